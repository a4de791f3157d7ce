//! The validation-error taxonomy.
//!
//! Every problem found in data is recovered locally and recorded as a
//! [`ValidationError`]; nothing here is raised during streaming unless the
//! caller opts into the `Raise` policy. Configuration problems (invalid
//! schema, bad constraint literals) are hard `anyhow` failures elsewhere
//! and never appear in this enum.
//!
//! Each variant carries the positional context the reporting layer
//! flattens into tabular output: row number/position, field name/number/
//! position, the offending cell, and a human-readable note.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum ValidationError {
    // Header-structural
    #[error("the header is completely blank")]
    BlankHeader {
        labels: Vec<String>,
        row_positions: Vec<usize>,
    },
    #[error("there is an extra label \"{label}\" in the header")]
    ExtraLabel {
        labels: Vec<String>,
        row_positions: Vec<usize>,
        label: String,
        field_number: usize,
    },
    #[error("there is a missing label for field \"{field_name}\" in the header")]
    MissingLabel {
        labels: Vec<String>,
        row_positions: Vec<usize>,
        field_name: String,
        field_number: usize,
    },
    #[error("the label in position {field_number} is blank")]
    BlankLabel {
        labels: Vec<String>,
        row_positions: Vec<usize>,
        field_name: String,
        field_number: usize,
    },
    #[error("the label \"{label}\" duplicates a label {note}")]
    DuplicateLabel {
        labels: Vec<String>,
        row_positions: Vec<usize>,
        label: String,
        field_name: String,
        field_number: usize,
        note: String,
    },
    #[error("the label \"{label}\" does not match the field \"{field_name}\"")]
    IncorrectLabel {
        labels: Vec<String>,
        row_positions: Vec<usize>,
        label: String,
        field_name: String,
        field_number: usize,
    },

    // Row-structural
    #[error("row {row_number} is completely blank")]
    BlankRow {
        cells: Vec<String>,
        row_number: usize,
        row_position: usize,
    },
    #[error("row {row_number} has an extra cell \"{cell}\" in position {field_number}")]
    ExtraCell {
        cells: Vec<String>,
        row_number: usize,
        row_position: usize,
        cell: String,
        field_number: usize,
        field_position: usize,
    },
    #[error("row {row_number} has a missing cell for field \"{field_name}\"")]
    MissingCell {
        cells: Vec<String>,
        row_number: usize,
        row_position: usize,
        field_name: String,
        field_number: usize,
        field_position: usize,
    },

    // Cell-semantic
    #[error("cell \"{cell}\" in field \"{field_name}\" at row {row_number} has a type error: {note}")]
    Type {
        cells: Vec<String>,
        row_number: usize,
        row_position: usize,
        cell: String,
        field_name: String,
        field_number: usize,
        field_position: usize,
        note: String,
    },
    #[error(
        "cell \"{cell}\" in field \"{field_name}\" at row {row_number} violates a constraint: {note}"
    )]
    Constraint {
        cells: Vec<String>,
        row_number: usize,
        row_position: usize,
        cell: String,
        field_name: String,
        field_number: usize,
        field_position: usize,
        constraint: String,
        note: String,
    },

    // Cross-row integrity
    #[error("cell \"{cell}\" in field \"{field_name}\" at row {row_number} is not unique: {note}")]
    Unique {
        cells: Vec<String>,
        row_number: usize,
        row_position: usize,
        cell: String,
        field_name: String,
        field_number: usize,
        field_position: usize,
        note: String,
    },
    #[error("row {row_number} violates the primary key: {note}")]
    PrimaryKey {
        cells: Vec<String>,
        row_number: usize,
        row_position: usize,
        note: String,
    },
    #[error("row {row_number} violates a foreign key: {note}")]
    ForeignKey {
        cells: Vec<String>,
        row_number: usize,
        row_position: usize,
        field_names: Vec<String>,
        reference_name: String,
        reference_field_names: Vec<String>,
        note: String,
    },
}

impl ValidationError {
    /// Stable taxonomy code consumed by the reporting layer.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::BlankHeader { .. } => "blank-header",
            ValidationError::ExtraLabel { .. } => "extra-label",
            ValidationError::MissingLabel { .. } => "missing-label",
            ValidationError::BlankLabel { .. } => "blank-label",
            ValidationError::DuplicateLabel { .. } => "duplicate-label",
            ValidationError::IncorrectLabel { .. } => "incorrect-label",
            ValidationError::BlankRow { .. } => "blank-row",
            ValidationError::ExtraCell { .. } => "extra-cell",
            ValidationError::MissingCell { .. } => "missing-cell",
            ValidationError::Type { .. } => "type-error",
            ValidationError::Constraint { .. } => "constraint-error",
            ValidationError::Unique { .. } => "unique-error",
            ValidationError::PrimaryKey { .. } => "primary-key",
            ValidationError::ForeignKey { .. } => "foreign-key",
        }
    }

    pub fn is_header_error(&self) -> bool {
        matches!(
            self,
            ValidationError::BlankHeader { .. }
                | ValidationError::ExtraLabel { .. }
                | ValidationError::MissingLabel { .. }
                | ValidationError::BlankLabel { .. }
                | ValidationError::DuplicateLabel { .. }
                | ValidationError::IncorrectLabel { .. }
        )
    }

    /// Content row number; `None` for header errors.
    pub fn row_number(&self) -> Option<usize> {
        match self {
            ValidationError::BlankRow { row_number, .. }
            | ValidationError::ExtraCell { row_number, .. }
            | ValidationError::MissingCell { row_number, .. }
            | ValidationError::Type { row_number, .. }
            | ValidationError::Constraint { row_number, .. }
            | ValidationError::Unique { row_number, .. }
            | ValidationError::PrimaryKey { row_number, .. }
            | ValidationError::ForeignKey { row_number, .. } => Some(*row_number),
            _ => None,
        }
    }

    /// Physical row position; `None` for header errors.
    pub fn row_position(&self) -> Option<usize> {
        match self {
            ValidationError::BlankRow { row_position, .. }
            | ValidationError::ExtraCell { row_position, .. }
            | ValidationError::MissingCell { row_position, .. }
            | ValidationError::Type { row_position, .. }
            | ValidationError::Constraint { row_position, .. }
            | ValidationError::Unique { row_position, .. }
            | ValidationError::PrimaryKey { row_position, .. }
            | ValidationError::ForeignKey { row_position, .. } => Some(*row_position),
            _ => None,
        }
    }

    pub fn field_number(&self) -> Option<usize> {
        match self {
            ValidationError::ExtraLabel { field_number, .. }
            | ValidationError::MissingLabel { field_number, .. }
            | ValidationError::BlankLabel { field_number, .. }
            | ValidationError::DuplicateLabel { field_number, .. }
            | ValidationError::IncorrectLabel { field_number, .. }
            | ValidationError::ExtraCell { field_number, .. }
            | ValidationError::MissingCell { field_number, .. }
            | ValidationError::Type { field_number, .. }
            | ValidationError::Constraint { field_number, .. }
            | ValidationError::Unique { field_number, .. } => Some(*field_number),
            _ => None,
        }
    }

    /// Physical column position; `None` for header and whole-row errors.
    pub fn field_position(&self) -> Option<usize> {
        match self {
            ValidationError::ExtraCell { field_position, .. }
            | ValidationError::MissingCell { field_position, .. }
            | ValidationError::Type { field_position, .. }
            | ValidationError::Constraint { field_position, .. }
            | ValidationError::Unique { field_position, .. } => Some(*field_position),
            _ => None,
        }
    }

    pub fn field_name(&self) -> Option<&str> {
        match self {
            ValidationError::MissingLabel { field_name, .. }
            | ValidationError::BlankLabel { field_name, .. }
            | ValidationError::DuplicateLabel { field_name, .. }
            | ValidationError::IncorrectLabel { field_name, .. }
            | ValidationError::MissingCell { field_name, .. }
            | ValidationError::Type { field_name, .. }
            | ValidationError::Constraint { field_name, .. }
            | ValidationError::Unique { field_name, .. } => Some(field_name),
            _ => None,
        }
    }

    pub fn cell(&self) -> Option<&str> {
        match self {
            ValidationError::ExtraCell { cell, .. }
            | ValidationError::Type { cell, .. }
            | ValidationError::Constraint { cell, .. }
            | ValidationError::Unique { cell, .. } => Some(cell),
            _ => None,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            ValidationError::DuplicateLabel { note, .. }
            | ValidationError::Type { note, .. }
            | ValidationError::Constraint { note, .. }
            | ValidationError::Unique { note, .. }
            | ValidationError::PrimaryKey { note, .. }
            | ValidationError::ForeignKey { note, .. } => Some(note),
            _ => None,
        }
    }
}

/// Flattens errors into rows of the requested context keys, the shape
/// tabular validation reports are built from. Unknown keys flatten to
/// `None`.
pub fn flatten_errors(errors: &[ValidationError], keys: &[&str]) -> Vec<Vec<Option<String>>> {
    errors
        .iter()
        .map(|error| {
            keys.iter()
                .map(|key| match *key {
                    "type" | "code" => Some(error.code().to_string()),
                    "note" => error.note().map(str::to_string),
                    "message" => Some(error.to_string()),
                    "rowNumber" => error.row_number().map(|n| n.to_string()),
                    "rowPosition" => error.row_position().map(|n| n.to_string()),
                    "fieldName" => error.field_name().map(str::to_string),
                    "fieldNumber" => error.field_number().map(|n| n.to_string()),
                    "fieldPosition" => error.field_position().map(|n| n.to_string()),
                    "cell" => error.cell().map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_type_error() -> ValidationError {
        ValidationError::Type {
            cells: vec!["1".to_string(), "bad".to_string()],
            row_number: 2,
            row_position: 3,
            cell: "bad".to_string(),
            field_name: "count".to_string(),
            field_number: 2,
            field_position: 2,
            note: "type is \"integer/default\"".to_string(),
        }
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(sample_type_error().code(), "type-error");
        let blank = ValidationError::BlankHeader {
            labels: Vec::new(),
            row_positions: vec![1],
        };
        assert_eq!(blank.code(), "blank-header");
        assert!(blank.is_header_error());
        assert!(!sample_type_error().is_header_error());
    }

    #[test]
    fn flatten_extracts_requested_context() {
        let rows = flatten_errors(
            &[sample_type_error()],
            &["rowNumber", "fieldNumber", "fieldPosition", "type", "cell"],
        );
        assert_eq!(
            rows,
            vec![vec![
                Some("2".to_string()),
                Some("2".to_string()),
                Some("2".to_string()),
                Some("type-error".to_string()),
                Some("bad".to_string()),
            ]]
        );
    }

    #[test]
    fn structural_cell_errors_carry_a_field_position() {
        let extra = ValidationError::ExtraCell {
            cells: vec!["1".to_string(), "surplus".to_string()],
            row_number: 1,
            row_position: 2,
            cell: "surplus".to_string(),
            field_number: 2,
            field_position: 4,
        };
        assert_eq!(extra.field_position(), Some(4));
        let flat = flatten_errors(&[extra], &["fieldPosition"]);
        assert_eq!(flat, vec![vec![Some("4".to_string())]]);

        let missing = ValidationError::MissingCell {
            cells: vec!["1".to_string()],
            row_number: 1,
            row_position: 2,
            field_name: "name".to_string(),
            field_number: 2,
            field_position: 3,
        };
        assert_eq!(missing.field_position(), Some(3));
    }

    #[test]
    fn header_errors_have_no_row_context() {
        let error = ValidationError::IncorrectLabel {
            labels: vec!["iD".to_string()],
            row_positions: vec![1],
            label: "iD".to_string(),
            field_name: "id".to_string(),
            field_number: 1,
        };
        assert_eq!(error.row_number(), None);
        assert_eq!(error.field_number(), Some(1));
        assert_eq!(error.field_name(), Some("id"));
    }
}
