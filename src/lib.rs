//! Tabular data validation: schemas, lazy row casting, and a streaming
//! driver with cross-row integrity checks.
//!
//! The flow mirrors how a table is actually read. A [`Detector`](detect::Detector)
//! samples the source, finds the header, and resolves a [`Schema`](schema::Schema)
//! (declared, synced, or inferred). [`TableStream`](stream::TableStream)
//! then replays the sample and continues the live source, producing lazy
//! [`Row`](row::Row)s that cast and validate cells on demand, while the
//! integrity state flags unique, primary-key, and foreign-key violations
//! across rows. Everything wrong with the data surfaces as a
//! [`ValidationError`](errors::ValidationError); everything wrong with the
//! configuration is a hard `anyhow` failure.

pub mod data;
pub mod detect;
pub mod errors;
pub mod field;
pub mod header;
pub mod row;
pub mod schema;
pub mod sources;
pub mod stream;

use std::{env, sync::OnceLock};

use log::LevelFilter;

static LOGGER: OnceLock<()> = OnceLock::new();

/// Installs the env_logger backend once; later calls are no-ops. Embedders
/// with their own logger simply never call this.
pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabular_validate", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}
