#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

use tabular_validate::detect::{Detector, Layout};
use tabular_validate::schema::Schema;
use tabular_validate::sources::{CsvSource, InMemorySource};
use tabular_validate::stream::{StreamOptions, TableStream};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Opens a stream over a CSV file with a declared schema and defaults
/// everywhere else.
pub fn open_csv(path: &Path, schema: Schema) -> TableStream {
    let source = CsvSource::open(path, None, None).expect("open csv");
    let detector = Detector {
        schema: Some(schema),
        ..Detector::default()
    };
    TableStream::open(
        Box::new(source),
        &detector,
        Layout::default(),
        StreamOptions::default(),
    )
    .expect("open stream")
}

/// Opens a stream over in-memory rows.
pub fn open_rows(rows: &[&[&str]], detector: &Detector, layout: Layout) -> TableStream {
    TableStream::open(
        Box::new(InMemorySource::from_strs(rows)),
        detector,
        layout,
        StreamOptions::default(),
    )
    .expect("open stream")
}
