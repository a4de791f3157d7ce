//! Header validation: the label row(s) checked against schema field names.
//!
//! Built exactly once per stream open, immediately after labels are
//! determined; the error list is computed in the constructor and never
//! recomputed. Cell-level casting plays no part here.

use std::ops::Deref;

use itertools::Itertools;

use crate::errors::ValidationError;
use crate::field::Field;

#[derive(Debug, Clone)]
pub struct Header {
    labels: Vec<String>,
    field_names: Vec<String>,
    row_positions: Vec<usize>,
    errors: Vec<ValidationError>,
}

impl Header {
    /// `case_sensitive` is the `header_case` policy: when false, labels
    /// differing from field names only by case are accepted.
    pub fn new(
        labels: Vec<String>,
        fields: &[Field],
        row_positions: Vec<usize>,
        case_sensitive: bool,
    ) -> Self {
        let field_names: Vec<String> = fields.iter().map(|field| field.name.clone()).collect();
        let errors = derive_errors(&labels, &field_names, &row_positions, case_sensitive);
        Header {
            labels,
            field_names,
            row_positions,
            errors,
        }
    }

    /// Header for a table declared headerless: no labels, no errors.
    pub fn absent(fields: &[Field]) -> Self {
        Header {
            labels: Vec::new(),
            field_names: fields.iter().map(|field| field.name.clone()).collect(),
            row_positions: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    pub fn row_positions(&self) -> &[usize] {
        &self.row_positions
    }

    /// True when no label row was found at all.
    pub fn missing(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_list(&self) -> Vec<String> {
        self.labels.clone()
    }
}

impl Deref for Header {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.labels
    }
}

fn normalize_label(label: &str) -> String {
    label.replace('\n', " ").trim().to_string()
}

fn labels_match(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

fn derive_errors(
    labels: &[String],
    field_names: &[String],
    row_positions: &[usize],
    case_sensitive: bool,
) -> Vec<ValidationError> {
    // No labels at all: one blank-header error supersedes everything.
    if labels.is_empty() {
        return vec![ValidationError::BlankHeader {
            labels: Vec::new(),
            row_positions: row_positions.to_vec(),
        }];
    }

    let mut errors = Vec::new();

    // Extra labels beyond the field count.
    for (offset, label) in labels.iter().skip(field_names.len()).enumerate() {
        errors.push(ValidationError::ExtraLabel {
            labels: labels.to_vec(),
            row_positions: row_positions.to_vec(),
            label: label.clone(),
            field_number: field_names.len() + 1 + offset,
        });
    }

    // Fields beyond the label count.
    for (offset, field_name) in field_names.iter().skip(labels.len()).enumerate() {
        errors.push(ValidationError::MissingLabel {
            labels: labels.to_vec(),
            row_positions: row_positions.to_vec(),
            field_name: field_name.clone(),
            field_number: labels.len() + 1 + offset,
        });
    }

    for (index, (field_name, label)) in field_names.iter().zip(labels.iter()).enumerate() {
        let field_number = index + 1;

        if label.is_empty() {
            errors.push(ValidationError::BlankLabel {
                labels: labels.to_vec(),
                row_positions: row_positions.to_vec(),
                field_name: field_name.clone(),
                field_number,
            });
            continue;
        }

        // A duplicate of an earlier label is reported once here and then
        // treated as absent for the incorrect-label comparison.
        let duplicate_positions: Vec<usize> = labels[..index]
            .iter()
            .enumerate()
            .filter(|(_, seen)| labels_match(seen, label, case_sensitive))
            .map(|(seen_index, _)| seen_index + 1)
            .collect();
        if !duplicate_positions.is_empty() {
            let positions = duplicate_positions.iter().join(", ");
            errors.push(ValidationError::DuplicateLabel {
                labels: labels.to_vec(),
                row_positions: row_positions.to_vec(),
                label: label.clone(),
                field_name: field_name.clone(),
                field_number,
                note: format!("at position \"{positions}\""),
            });
            continue;
        }

        let normalized = normalize_label(label);
        if !labels_match(&normalized, field_name, case_sensitive) {
            errors.push(ValidationError::IncorrectLabel {
                labels: labels.to_vec(),
                row_positions: row_positions.to_vec(),
                label: label.clone(),
                field_name: field_name.clone(),
                field_number,
            });
        }
    }

    errors
}
