//! Lazy per-row validation.
//!
//! [`FieldTable`] is the per-stream snapshot of field behavior: names,
//! positions, compiled readers and writers, built once at stream open and
//! shared read-only (via `Arc`) by every [`Row`] the stream produces.
//!
//! A `Row` is a two-state object: unprocessed rows cast individual fields
//! on demand without touching the rest; any access to the summary surface
//! (`errors`, `valid`, `blank_cells`, `error_cells`, exports) forces full
//! processing exactly once. Cast values never change after they are
//! computed, so repeated reads are free and identical.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Result, ensure};

use crate::data::Value;
use crate::errors::ValidationError;
use crate::field::{CellReader, CellWriter, Field, FieldType};
use crate::schema::Schema;

#[derive(Debug)]
pub struct FieldEntry {
    pub field: Field,
    /// 1-based, content-relative (order within the schema).
    pub field_number: usize,
    /// 1-based physical column; differs from `field_number` when field
    /// picking leaves gaps.
    pub field_position: usize,
    pub reader: CellReader,
    pub writer: CellWriter,
}

/// Per-stream read-only field metadata, shared by all rows of one stream.
#[derive(Debug)]
pub struct FieldTable {
    entries: Vec<FieldEntry>,
    by_name: HashMap<String, usize>,
}

impl FieldTable {
    /// Compiles readers/writers for every schema field. `field_positions`
    /// supplies the physical column of each field when picking/filtering
    /// upstream has made them non-contiguous; pass `None` for the identity
    /// mapping.
    pub fn build(schema: &Schema, field_positions: Option<&[usize]>) -> Result<Arc<Self>> {
        let mut entries = Vec::with_capacity(schema.fields.len());
        let mut by_name = HashMap::with_capacity(schema.fields.len());
        for (index, field) in schema.fields.iter().enumerate() {
            ensure!(
                by_name.insert(field.name.clone(), index).is_none(),
                "Field table has a duplicate field name '{}'",
                field.name
            );
            let field_position = field_positions
                .and_then(|positions| positions.get(index).copied())
                .unwrap_or(index + 1);
            entries.push(FieldEntry {
                field: field.clone(),
                field_number: index + 1,
                field_position,
                reader: field.compile_reader(&schema.missing_values)?,
                writer: field.compile_writer(&schema.missing_values),
            });
        }
        Ok(Arc::new(FieldTable { entries, by_name }))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FieldEntry] {
        &self.entries
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.field.name.as_str())
            .collect()
    }

    pub fn field_positions(&self) -> Vec<usize> {
        self.entries.iter().map(|entry| entry.field_position).collect()
    }
}

#[derive(Debug)]
pub struct Row {
    cells: Vec<String>,
    table: Arc<FieldTable>,
    row_number: usize,
    row_position: usize,
    /// One slot per field: `None` = not cast yet.
    values: Vec<Option<Option<Value>>>,
    processed: bool,
    blank_cells: BTreeMap<String, String>,
    error_cells: BTreeMap<String, String>,
    errors: Vec<ValidationError>,
}

impl Row {
    pub fn new(
        cells: Vec<String>,
        table: Arc<FieldTable>,
        row_number: usize,
        row_position: usize,
    ) -> Self {
        let slots = table.len();
        Row {
            cells,
            table,
            row_number,
            row_position,
            values: vec![None; slots],
            processed: false,
            blank_cells: BTreeMap::new(),
            error_cells: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Content row number, 1-based, header excluded.
    pub fn row_number(&self) -> usize {
        self.row_number
    }

    /// Physical row position, 1-based, header and skipped rows included.
    pub fn row_position(&self) -> usize {
        self.row_position
    }

    /// The raw cells this row was built from.
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn fields(&self) -> Vec<&Field> {
        self.table.entries().iter().map(|entry| &entry.field).collect()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.table.field_names()
    }

    pub fn field_positions(&self) -> Vec<usize> {
        self.table.field_positions()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.index_of(name).is_some()
    }

    /// Cast value for one field by name. While the row is unprocessed this
    /// casts just that field; it never forces full-row processing. Returns
    /// `None` for null cells and for unknown field names.
    pub fn get(&mut self, name: &str) -> Option<&Value> {
        let index = self.table.index_of(name)?;
        self.cast_slot(index);
        self.values[index].as_ref().and_then(|slot| slot.as_ref())
    }

    /// Full error list; forces processing.
    pub fn errors(&mut self) -> &[ValidationError] {
        self.ensure_processed();
        &self.errors
    }

    /// Forces processing.
    pub fn valid(&mut self) -> bool {
        self.ensure_processed();
        self.errors.is_empty()
    }

    /// Field name to original raw cell, for cells that resolved to null.
    pub fn blank_cells(&mut self) -> &BTreeMap<String, String> {
        self.ensure_processed();
        &self.blank_cells
    }

    /// Field name to original raw cell, for cells rejected by the caster.
    pub fn error_cells(&mut self) -> &BTreeMap<String, String> {
        self.ensure_processed();
        &self.error_cells
    }

    /// Appends an error found outside the row itself (integrity checks).
    /// Processing is forced first so blank-row classification cannot later
    /// discard what the tracker appends.
    pub fn push_error(&mut self, error: ValidationError) {
        self.ensure_processed();
        self.errors.push(error);
    }

    /// Values in field order. With a type whitelist, values of any other
    /// type are written back through the field's cell writer (missing
    /// substitution suppressed, so nulls stay null).
    pub fn to_list(&mut self, types: Option<&[FieldType]>) -> Vec<Option<Value>> {
        self.ensure_processed();
        (0..self.table.len())
            .map(|index| self.export_slot(index, types))
            .collect()
    }

    /// Same as [`Row::to_list`], keyed by field name.
    pub fn to_dict(&mut self, types: Option<&[FieldType]>) -> BTreeMap<String, Option<Value>> {
        self.ensure_processed();
        (0..self.table.len())
            .map(|index| {
                let name = self.table.entries()[index].field.name.clone();
                (name, self.export_slot(index, types))
            })
            .collect()
    }

    fn export_slot(&self, index: usize, types: Option<&[FieldType]>) -> Option<Value> {
        let entry = &self.table.entries()[index];
        let value = self.values[index].as_ref().and_then(|slot| slot.clone());
        match (value, types) {
            (Some(value), Some(types)) if !types.contains(&entry.field.field_type) => {
                Some(Value::String(entry.writer.write(Some(&value), true)))
            }
            (value, _) => value,
        }
    }

    /// Casts one slot if it has not been cast yet, recording any type or
    /// constraint errors exactly once.
    fn cast_slot(&mut self, index: usize) {
        if self.values[index].is_some() {
            return;
        }
        let entry = &self.table.entries()[index];
        let (value, notes) = match self.cells.get(index) {
            Some(raw) => entry.reader.read(raw),
            None => entry.reader.read_absent(),
        };
        let raw = self.cells.get(index).cloned().unwrap_or_default();

        if let Some(type_note) = &notes.type_note {
            self.error_cells.insert(entry.field.name.clone(), raw.clone());
            self.errors.push(ValidationError::Type {
                cells: self.cells.clone(),
                row_number: self.row_number,
                row_position: self.row_position,
                cell: raw.clone(),
                field_name: entry.field.name.clone(),
                field_number: entry.field_number,
                field_position: entry.field_position,
                note: type_note.clone(),
            });
        } else if value.is_none() {
            self.blank_cells.insert(entry.field.name.clone(), raw.clone());
        }

        for (constraint, note) in &notes.constraint_notes {
            self.errors.push(ValidationError::Constraint {
                cells: self.cells.clone(),
                row_number: self.row_number,
                row_position: self.row_position,
                cell: raw.clone(),
                field_name: entry.field.name.clone(),
                field_number: entry.field_number,
                field_position: entry.field_position,
                constraint: constraint.to_string(),
                note: note.clone(),
            });
        }

        self.values[index] = Some(value);
    }

    /// One-way transition to the processed state: cast every remaining
    /// field, derive the structural errors, and apply blank-row dominance.
    pub fn ensure_processed(&mut self) {
        if self.processed {
            return;
        }

        for index in 0..self.table.len() {
            self.cast_slot(index);
        }

        // Surplus cells past the field count. Positions continue from the
        // last declared field's physical position, which can differ from
        // the logical field number when columns were picked.
        if self.cells.len() > self.table.len() {
            let base = self.table.len();
            let base_position = self
                .table
                .entries()
                .last()
                .map(|entry| entry.field_position)
                .unwrap_or(0);
            for (offset, cell) in self.cells[base..].iter().enumerate() {
                self.errors.push(ValidationError::ExtraCell {
                    cells: self.cells.clone(),
                    row_number: self.row_number,
                    row_position: self.row_position,
                    cell: cell.clone(),
                    field_number: base + offset + 1,
                    field_position: base_position + offset + 1,
                });
            }
        }

        // Fields past the cell count.
        if self.table.len() > self.cells.len() {
            for entry in &self.table.entries()[self.cells.len()..] {
                self.errors.push(ValidationError::MissingCell {
                    cells: self.cells.clone(),
                    row_number: self.row_number,
                    row_position: self.row_position,
                    field_name: entry.field.name.clone(),
                    field_number: entry.field_number,
                    field_position: entry.field_position,
                });
            }
        }

        // A fully blank row supersedes every cell-level error.
        if !self.table.is_empty() && self.blank_cells.len() == self.table.len() {
            self.errors = vec![ValidationError::BlankRow {
                cells: self.cells.clone(),
                row_number: self.row_number,
                row_position: self.row_position,
            }];
        }

        self.processed = true;
    }
}
