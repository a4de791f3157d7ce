//! Raw row sources: the boundary between the validation core and format
//! parsers.
//!
//! The core consumes a forward-only sequence of raw cell arrays through
//! [`RawRowSource`]. Two thin adapters are provided: [`InMemorySource`]
//! for native data and tests, and [`CsvSource`] for encoded CSV/TSV files
//! (decoding via `encoding_rs_io`, parsing via the `csv` crate). Anything
//! richer (JSON, Excel, SQL, remote fetching) belongs to collaborators
//! implementing the same trait.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// A forward-only stream of raw rows. Each call yields the next physical
/// row's cells, or `None` at end of input. Positions are assigned by the
/// consumer in pull order.
pub trait RawRowSource {
    fn read_raw_row(&mut self) -> Result<Option<Vec<String>>>;
}

/// In-memory rows, mainly for native data and tests.
#[derive(Debug, Default)]
pub struct InMemorySource {
    rows: std::vec::IntoIter<Vec<String>>,
}

impl InMemorySource {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        InMemorySource {
            rows: rows.into_iter(),
        }
    }

    /// Convenience constructor from string slices.
    pub fn from_strs(rows: &[&[&str]]) -> Self {
        Self::new(
            rows.iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        )
    }
}

impl RawRowSource for InMemorySource {
    fn read_raw_row(&mut self) -> Result<Option<Vec<String>>> {
        Ok(self.rows.next())
    }
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

/// CSV-backed source. Every physical record is surfaced, so the driver's
/// row positions line up with file line numbers for well-formed input.
pub struct CsvSource {
    records: csv::StringRecordsIntoIter<Box<dyn Read>>,
}

impl CsvSource {
    pub fn open(path: &Path, delimiter: Option<u8>, encoding: Option<&str>) -> Result<Self> {
        let delimiter = resolve_delimiter(path, delimiter);
        let encoding = resolve_encoding(encoding)?;
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        let reader: Box<dyn Read> = if encoding == UTF_8 {
            Box::new(BufReader::new(file))
        } else {
            Box::new(
                DecodeReaderBytesBuilder::new()
                    .encoding(Some(encoding))
                    .build(BufReader::new(file)),
            )
        };
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .double_quote(true)
            .flexible(true)
            .from_reader(reader);
        Ok(CsvSource {
            records: reader.into_records(),
        })
    }
}

impl RawRowSource for CsvSource {
    fn read_raw_row(&mut self) -> Result<Option<Vec<String>>> {
        match self.records.next() {
            Some(record) => {
                let record = record.context("Reading CSV record")?;
                Ok(Some(record.iter().map(str::to_string).collect()))
            }
            None => Ok(None),
        }
    }
}
