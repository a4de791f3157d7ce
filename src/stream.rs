//! Row stream driver: replays the buffered sample, continues the live
//! source, and runs cross-row integrity checks as rows go by.
//!
//! The driver owns all positional bookkeeping. `row_position` is the
//! 1-based physical row (header and skipped rows included), `row_number`
//! the 1-based content row among those actually yielded. Buffered sample
//! rows and live tail rows travel through exactly the same path, so a
//! consumer cannot tell where the sample ended.

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Result, bail};
use itertools::Itertools;
use log::warn;

use crate::detect::{Detection, Detector, Layout};
use crate::errors::ValidationError;
use crate::header::Header;
use crate::row::{FieldTable, Row};
use crate::schema::Schema;
use crate::sources::RawRowSource;

/// What to do when a header or a row turns out invalid. Errors stay on
/// the header/row object in every mode; `Warn` additionally logs the
/// first one and `Raise` aborts the stream with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    #[default]
    Ignore,
    Warn,
    Raise,
}

impl FromStr for ErrorPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(ErrorPolicy::Ignore),
            "warn" => Ok(ErrorPolicy::Warn),
            "raise" => Ok(ErrorPolicy::Raise),
            other => bail!("Unknown error policy '{other}'"),
        }
    }
}

/// Reference data for foreign-key checks: per referenced resource, per
/// reference field tuple, the set of seen value tuples. Tuples are
/// canonical strings, `None` for null cells.
#[derive(Debug, Default, Clone)]
pub struct Lookup {
    tables: HashMap<String, HashMap<Vec<String>, HashSet<Vec<Option<String>>>>>,
}

impl Lookup {
    pub fn has_table(&self, resource: &str) -> bool {
        self.tables.contains_key(resource)
    }

    pub fn insert(&mut self, resource: &str, fields: &[String], tuple: Vec<Option<String>>) {
        // An all-null tuple can never satisfy a reference.
        if tuple.iter().all(Option::is_none) {
            return;
        }
        self.tables
            .entry(resource.to_string())
            .or_default()
            .entry(fields.to_vec())
            .or_default()
            .insert(tuple);
    }

    pub fn contains(&self, resource: &str, fields: &[String], tuple: &[Option<String>]) -> bool {
        self.tables
            .get(resource)
            .and_then(|table| table.get(fields))
            .is_some_and(|set| set.contains(tuple))
    }

    /// Indexes a whole referenced table, the way package-level validation
    /// prepares reference data before opening the referencing table.
    pub fn index_stream(
        &mut self,
        resource: &str,
        fields: &[String],
        stream: &mut TableStream,
    ) -> Result<()> {
        self.tables
            .entry(resource.to_string())
            .or_default()
            .entry(fields.to_vec())
            .or_default();
        while let Some(mut row) = stream.read_row()? {
            let tuple: Vec<Option<String>> = fields
                .iter()
                .map(|name| row.get(name).map(|value| value.canonical()))
                .collect();
            self.insert(resource, fields, tuple);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub header_policy: ErrorPolicy,
    pub row_policy: ErrorPolicy,
    pub lookup: Lookup,
}

struct UniqueState {
    entry_index: usize,
    field_name: String,
    field_number: usize,
    field_position: usize,
    seen: HashMap<String, usize>,
}

struct PrimaryKeyState {
    entry_indices: Vec<usize>,
    seen: HashMap<Vec<Option<String>>, usize>,
}

struct ForeignGroup {
    local_fields: Vec<String>,
    local_indices: Vec<usize>,
    reference_name: String,
    reference_fields: Vec<String>,
    /// Entry indices of the reference fields, for self-referencing keys
    /// whose reference data accumulates from the rows already seen.
    self_indices: Option<Vec<usize>>,
}

/// Cross-row state: unique maps, primary-key tuples, foreign-key lookups.
/// Inspects each row in order; a first occurrence is never flagged. Stays
/// a no-op (and keeps rows lazy) when the schema declares none of it.
struct IntegrityTracker {
    uniques: Vec<UniqueState>,
    primary_key: Option<PrimaryKeyState>,
    foreign: Vec<ForeignGroup>,
    lookup: Lookup,
}

impl IntegrityTracker {
    fn build(schema: &Schema, table: &FieldTable, lookup: Lookup) -> Self {
        let uniques = table
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.field.constraints.unique == Some(true))
            .map(|(entry_index, entry)| UniqueState {
                entry_index,
                field_name: entry.field.name.clone(),
                field_number: entry.field_number,
                field_position: entry.field_position,
                seen: HashMap::new(),
            })
            .collect();

        // With schema_sync a primary-key field can be absent from the
        // field table; the header already carries a missing-label error,
        // so the check is simply disabled.
        let primary_key = if schema.primary_key.is_empty() {
            None
        } else {
            schema
                .primary_key
                .iter()
                .map(|name| table.index_of(name))
                .collect::<Option<Vec<usize>>>()
                .map(|entry_indices| PrimaryKeyState {
                    entry_indices,
                    seen: HashMap::new(),
                })
        };

        let mut foreign = Vec::new();
        for fk in &schema.foreign_keys {
            if !fk.is_self_reference() && !lookup.has_table(&fk.reference.resource) {
                continue;
            }
            let Some(local_indices) = fk
                .fields
                .iter()
                .map(|name| table.index_of(name))
                .collect::<Option<Vec<usize>>>()
            else {
                continue;
            };
            let self_indices = if fk.is_self_reference() {
                let Some(indices) = fk
                    .reference
                    .fields
                    .iter()
                    .map(|name| table.index_of(name))
                    .collect::<Option<Vec<usize>>>()
                else {
                    continue;
                };
                Some(indices)
            } else {
                None
            };
            foreign.push(ForeignGroup {
                local_fields: fk.fields.clone(),
                local_indices,
                reference_name: fk.reference.resource.clone(),
                reference_fields: fk.reference.fields.clone(),
                self_indices,
            });
        }

        IntegrityTracker {
            uniques,
            primary_key,
            foreign,
            lookup,
        }
    }

    fn is_active(&self) -> bool {
        !self.uniques.is_empty() || self.primary_key.is_some() || !self.foreign.is_empty()
    }

    fn inspect(&mut self, row: &mut Row) {
        if !self.is_active() {
            return;
        }
        let row_number = row.row_number();
        let row_position = row.row_position();
        let names: Vec<String> = row.field_names().iter().map(|s| s.to_string()).collect();
        let value_at = |row: &mut Row, index: usize| -> Option<String> {
            row.get(&names[index]).map(|value| value.canonical())
        };

        for unique in &mut self.uniques {
            let Some(key) = value_at(row, unique.entry_index) else {
                continue;
            };
            if let Some(previous) = unique.seen.get(&key).copied() {
                let cell = row
                    .cells()
                    .get(unique.entry_index)
                    .cloned()
                    .unwrap_or_default();
                row.push_error(ValidationError::Unique {
                    cells: row.cells().to_vec(),
                    row_number,
                    row_position,
                    cell,
                    field_name: unique.field_name.clone(),
                    field_number: unique.field_number,
                    field_position: unique.field_position,
                    note: format!("the same as in the row at position {previous}"),
                });
            } else {
                unique.seen.insert(key, row_position);
            }
        }

        if let Some(pk) = &mut self.primary_key {
            let key: Vec<Option<String>> = pk
                .entry_indices
                .iter()
                .map(|&index| value_at(row, index))
                .collect();
            if key.iter().all(Option::is_none) {
                row.push_error(ValidationError::PrimaryKey {
                    cells: row.cells().to_vec(),
                    row_number,
                    row_position,
                    note: "cells composing the primary key are all null".to_string(),
                });
            } else if let Some(previous) = pk.seen.get(&key).copied() {
                row.push_error(ValidationError::PrimaryKey {
                    cells: row.cells().to_vec(),
                    row_number,
                    row_position,
                    note: format!("the same as in the row at position {previous}"),
                });
            } else {
                pk.seen.insert(key, row_position);
            }
        }

        let IntegrityTracker {
            foreign, lookup, ..
        } = self;
        for group in foreign.iter() {
            // Self-referencing keys see the current row's own reference
            // cells, so a row may reference itself; forward references
            // stay unresolved.
            if let Some(self_indices) = &group.self_indices {
                let tuple: Vec<Option<String>> = self_indices
                    .iter()
                    .map(|&index| value_at(row, index))
                    .collect();
                lookup.insert(&group.reference_name, &group.reference_fields, tuple);
            }

            let tuple: Vec<Option<String>> = group
                .local_indices
                .iter()
                .map(|&index| value_at(row, index))
                .collect();
            if tuple.iter().all(Option::is_none) {
                continue;
            }
            if !lookup.contains(&group.reference_name, &group.reference_fields, &tuple) {
                let values = tuple
                    .iter()
                    .map(|value| value.as_deref().unwrap_or(""))
                    .join(", ");
                row.push_error(ValidationError::ForeignKey {
                    cells: row.cells().to_vec(),
                    row_number,
                    row_position,
                    field_names: group.local_fields.clone(),
                    reference_name: group.reference_name.clone(),
                    reference_field_names: group.reference_fields.clone(),
                    note: format!(
                        "for \"{}\": values \"{}\" not found in the lookup table \"{}\" as \"{}\"",
                        group.local_fields.join(", "),
                        values,
                        group.reference_name,
                        group.reference_fields.join(", "),
                    ),
                });
            }
        }
    }
}

/// An open table: validated header plus a forward-only stream of rows.
pub struct TableStream {
    source: Box<dyn RawRowSource>,
    layout: Layout,
    schema: Schema,
    header: Header,
    table: Arc<FieldTable>,
    tracker: IntegrityTracker,
    row_policy: ErrorPolicy,
    /// Buffered sample rows not yet replayed.
    replay: VecDeque<(usize, Vec<String>)>,
    /// Last physical position pulled from the source.
    position: usize,
    /// Leading content rows still to be skipped for `offset_rows`.
    offset_remaining: usize,
    row_number: usize,
    rows_processed: usize,
    done: bool,
}

impl TableStream {
    pub fn open(
        mut source: Box<dyn RawRowSource>,
        detector: &Detector,
        layout: Layout,
        options: StreamOptions,
    ) -> Result<Self> {
        let Detection {
            schema,
            labels,
            header_row_positions,
            field_positions,
            buffer,
        } = detector.detect(source.as_mut(), &layout)?;

        let table = FieldTable::build(&schema, Some(&field_positions))?;
        let header = if layout.header {
            Header::new(
                labels,
                &schema.fields,
                header_row_positions,
                layout.header_case,
            )
        } else {
            Header::absent(&schema.fields)
        };

        match options.header_policy {
            ErrorPolicy::Ignore => {}
            ErrorPolicy::Warn => {
                for error in header.errors() {
                    warn!("invalid header: {error}");
                }
            }
            ErrorPolicy::Raise => {
                if let Some(error) = header.errors().first() {
                    bail!("invalid header: {error}");
                }
            }
        }

        let tracker = IntegrityTracker::build(&schema, &table, options.lookup);
        let position = buffer.last().map(|(position, _)| *position).unwrap_or(0);
        let offset_remaining = layout.offset_rows;

        Ok(TableStream {
            source,
            layout,
            schema,
            header,
            table,
            tracker,
            row_policy: options.row_policy,
            replay: buffer.into(),
            position,
            offset_remaining,
            row_number: 0,
            rows_processed: 0,
            done: false,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Content rows yielded so far.
    pub fn rows_processed(&self) -> usize {
        self.rows_processed
    }

    /// The next validated row, or `None` once the source is exhausted or
    /// `limit_rows` is reached. Past the limit no further source rows are
    /// pulled, so the integrity state sees nothing beyond it.
    pub fn read_row(&mut self) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        if let Some(limit) = self.layout.limit_rows {
            if self.row_number >= limit {
                self.done = true;
                return Ok(None);
            }
        }

        loop {
            let (row_position, cells) = match self.replay.pop_front() {
                Some(buffered) => buffered,
                None => match self.source.read_raw_row()? {
                    Some(cells) => {
                        self.position += 1;
                        (self.position, cells)
                    }
                    None => {
                        self.done = true;
                        return Ok(None);
                    }
                },
            };

            if self.header.row_positions().contains(&row_position)
                || self.layout.is_comment_row(&cells)
            {
                continue;
            }
            // The offset is consumed once, at the head of the content
            // stream, not per call.
            if self.offset_remaining > 0 {
                self.offset_remaining -= 1;
                continue;
            }

            self.row_number += 1;
            self.rows_processed += 1;
            let cells = self.project(cells);
            let mut row = Row::new(cells, self.table.clone(), self.row_number, row_position);
            self.tracker.inspect(&mut row);

            if self.row_policy != ErrorPolicy::Ignore && !row.valid() {
                // The error list is non-empty when valid() is false.
                let error = &row.errors()[0];
                match self.row_policy {
                    ErrorPolicy::Warn => warn!("invalid row: {error}"),
                    ErrorPolicy::Raise => bail!("invalid row: {error}"),
                    ErrorPolicy::Ignore => unreachable!(),
                }
            }

            return Ok(Some(row));
        }
    }

    /// Remaining rows, fully materialized.
    pub fn read_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.read_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Header errors followed by every remaining row's errors, in stream
    /// order. Consumes the rest of the stream.
    pub fn collect_errors(&mut self) -> Result<Vec<ValidationError>> {
        let mut errors = self.header.errors().to_vec();
        while let Some(mut row) = self.read_row()? {
            errors.extend(row.errors().iter().cloned());
        }
        Ok(errors)
    }

    /// Maps a physical row onto the kept fields. With no field filtering
    /// the cells pass through untouched, surplus included; with filtering,
    /// cells are picked by physical position and absent trailing cells
    /// stay absent.
    fn project(&self, cells: Vec<String>) -> Vec<String> {
        if self.layout.pick_fields.is_none() && self.layout.skip_fields.is_none() {
            return cells;
        }
        self.table
            .field_positions()
            .iter()
            .map_while(|&position| cells.get(position - 1).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, FieldType};
    use crate::schema::{ForeignKey, ForeignKeyReference};
    use crate::sources::InMemorySource;

    fn open(
        rows: &[&[&str]],
        detector: &Detector,
        layout: Layout,
        options: StreamOptions,
    ) -> Result<TableStream> {
        TableStream::open(
            Box::new(InMemorySource::from_strs(rows)),
            detector,
            layout,
            options,
        )
    }

    fn declared(schema: Schema) -> Detector {
        Detector {
            schema: Some(schema),
            ..Detector::default()
        }
    }

    #[test]
    fn sample_and_tail_replay_as_one_sequence() {
        let detector = Detector {
            sample_size: 2,
            ..Detector::default()
        };
        let mut stream = open(
            &[
                &["id", "name"],
                &["1", "english"],
                &["2", "german"],
                &["3", "french"],
            ],
            &detector,
            Layout::default(),
            StreamOptions::default(),
        )
        .unwrap();
        let rows = stream.read_rows().unwrap();
        let numbers: Vec<(usize, usize)> = rows
            .iter()
            .map(|row| (row.row_number(), row.row_position()))
            .collect();
        assert_eq!(numbers, vec![(1, 2), (2, 3), (3, 4)]);
        assert_eq!(stream.rows_processed(), 3);
    }

    #[test]
    fn unique_flags_repeats_but_never_the_first_occurrence() {
        let mut schema = Schema::default();
        let mut id = Field::new("id", FieldType::Integer);
        id.constraints.unique = Some(true);
        schema.add_field(id);
        let mut stream = open(
            &[&["id"], &["1"], &["2"], &["1"], &[""]],
            &declared(schema),
            Layout::default(),
            StreamOptions::default(),
        )
        .unwrap();
        let mut rows = stream.read_rows().unwrap();
        assert!(rows[0].valid());
        assert!(rows[1].valid());
        let errors = rows[2].errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), "unique-error");
        assert_eq!(
            errors[0].note(),
            Some("the same as in the row at position 2")
        );
        // Nulls never participate in uniqueness; the blank row still
        // carries its own classification.
        assert_eq!(rows[3].errors()[0].code(), "blank-row");
    }

    #[test]
    fn primary_key_flags_duplicates_and_all_null_tuples() {
        let mut schema = Schema::default();
        schema.add_field(Field::new("id", FieldType::Integer));
        schema.add_field(Field::new("name", FieldType::String));
        schema.primary_key = vec!["id".to_string(), "name".to_string()];
        let mut stream = open(
            &[
                &["id", "name"],
                &["1", "english"],
                &["1", "german"],
                &["1", "english"],
                &["", ""],
                &["", ""],
            ],
            &declared(schema),
            Layout::default(),
            StreamOptions::default(),
        )
        .unwrap();
        let mut rows = stream.read_rows().unwrap();
        assert!(rows[0].valid());
        assert!(rows[1].valid());
        assert_eq!(rows[2].errors()[0].code(), "primary-key");
        assert_eq!(
            rows[2].errors()[0].note(),
            Some("the same as in the row at position 2")
        );
        // All-null tuples are flagged independently, never as duplicates
        // of one another.
        for row in &mut rows[3..] {
            let codes: Vec<&str> = row.errors().iter().map(|e| e.code()).collect();
            assert_eq!(codes, vec!["blank-row", "primary-key"]);
            assert_eq!(
                row.errors()[1].note(),
                Some("cells composing the primary key are all null")
            );
        }
    }

    #[test]
    fn self_referencing_foreign_key_sees_earlier_rows_and_itself() {
        let mut schema = Schema::default();
        schema.add_field(Field::new("id", FieldType::Integer));
        schema.add_field(Field::new("parent", FieldType::Integer));
        schema.foreign_keys = vec![ForeignKey {
            fields: vec!["parent".to_string()],
            reference: ForeignKeyReference {
                resource: String::new(),
                fields: vec!["id".to_string()],
            },
        }];
        let mut stream = open(
            &[
                &["id", "parent"],
                &["1", "1"],
                &["2", "1"],
                &["3", "5"],
                &["4", ""],
            ],
            &declared(schema),
            Layout::default(),
            StreamOptions::default(),
        )
        .unwrap();
        let mut rows = stream.read_rows().unwrap();
        // Row referencing itself and a row referencing an earlier id pass.
        assert!(rows[0].valid());
        assert!(rows[1].valid());
        // A forward reference is not found.
        let errors = rows[2].errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), "foreign-key");
        assert!(errors[0].note().unwrap().contains("values \"5\""));
        // A fully null key is not checked.
        assert!(rows[3].valid());
    }

    #[test]
    fn external_foreign_key_checks_against_the_lookup() {
        let mut people = Schema::default();
        people.add_field(Field::new("name", FieldType::String));

        let mut lookup = Lookup::default();
        let mut reference = open(
            &[&["name"], &["alice"], &["bob"]],
            &declared(people),
            Layout::default(),
            StreamOptions::default(),
        )
        .unwrap();
        lookup
            .index_stream("people", &["name".to_string()], &mut reference)
            .unwrap();

        let mut schema = Schema::default();
        schema.add_field(Field::new("id", FieldType::Integer));
        schema.add_field(Field::new("owner", FieldType::String));
        schema.foreign_keys = vec![ForeignKey {
            fields: vec!["owner".to_string()],
            reference: ForeignKeyReference {
                resource: "people".to_string(),
                fields: vec!["name".to_string()],
            },
        }];
        let mut stream = open(
            &[&["id", "owner"], &["1", "alice"], &["2", "carol"]],
            &declared(schema),
            Layout::default(),
            StreamOptions {
                lookup,
                ..StreamOptions::default()
            },
        )
        .unwrap();
        let mut rows = stream.read_rows().unwrap();
        assert!(rows[0].valid());
        let errors = rows[1].errors();
        assert_eq!(errors[0].code(), "foreign-key");
        assert_eq!(
            errors[0].note(),
            Some(
                "for \"owner\": values \"carol\" not found in the lookup table \
                 \"people\" as \"name\""
            )
        );
    }

    #[test]
    fn foreign_key_without_reference_data_is_not_checked() {
        let mut schema = Schema::default();
        schema.add_field(Field::new("owner", FieldType::String));
        schema.foreign_keys = vec![ForeignKey {
            fields: vec!["owner".to_string()],
            reference: ForeignKeyReference {
                resource: "people".to_string(),
                fields: vec!["name".to_string()],
            },
        }];
        let mut stream = open(
            &[&["owner"], &["ghost"]],
            &declared(schema),
            Layout::default(),
            StreamOptions::default(),
        )
        .unwrap();
        let mut rows = stream.read_rows().unwrap();
        assert!(rows[0].valid());
    }

    #[test]
    fn limit_and_offset_bound_the_yielded_rows() {
        let layout = Layout {
            offset_rows: 1,
            limit_rows: Some(2),
            ..Layout::default()
        };
        let mut stream = open(
            &[&["id"], &["1"], &["2"], &["3"], &["4"]],
            &Detector::default(),
            layout,
            StreamOptions::default(),
        )
        .unwrap();
        let mut rows = stream.read_rows().unwrap();
        let cells: Vec<Option<String>> = rows
            .iter_mut()
            .map(|row| row.get("id").map(|value| value.canonical()))
            .collect();
        assert_eq!(
            cells,
            vec![Some("2".to_string()), Some("3".to_string())]
        );
        assert_eq!(stream.rows_processed(), 2);
    }

    #[test]
    fn offset_skips_only_the_leading_content_rows() {
        let layout = Layout {
            offset_rows: 1,
            ..Layout::default()
        };
        let mut stream = open(
            &[&["id"], &["1"], &["2"], &["3"], &["4"]],
            &Detector::default(),
            layout,
            StreamOptions::default(),
        )
        .unwrap();
        let mut rows = stream.read_rows().unwrap();
        let cells: Vec<Option<String>> = rows
            .iter_mut()
            .map(|row| row.get("id").map(|value| value.canonical()))
            .collect();
        // Every row past the offset is yielded; nothing in the middle of
        // the stream is dropped.
        assert_eq!(
            cells,
            vec![
                Some("2".to_string()),
                Some("3".to_string()),
                Some("4".to_string())
            ]
        );
        assert_eq!(stream.rows_processed(), 3);
    }

    #[test]
    fn raise_policy_aborts_on_the_first_invalid_row() {
        let mut schema = Schema::default();
        schema.add_field(Field::new("id", FieldType::Integer));
        let mut stream = open(
            &[&["id"], &["1"], &["oops"]],
            &declared(schema),
            Layout::default(),
            StreamOptions {
                row_policy: ErrorPolicy::Raise,
                ..StreamOptions::default()
            },
        )
        .unwrap();
        assert!(stream.read_row().unwrap().is_some());
        assert!(stream.read_row().is_err());
    }

    #[test]
    fn raise_policy_rejects_an_invalid_header_at_open() {
        let mut schema = Schema::default();
        schema.add_field(Field::new("id", FieldType::Integer));
        let result = open(
            &[&["wrong"], &["1"]],
            &declared(schema),
            Layout::default(),
            StreamOptions {
                header_policy: ErrorPolicy::Raise,
                ..StreamOptions::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn error_policies_parse_from_strings() {
        assert_eq!("warn".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Warn);
        assert_eq!(
            "RAISE".parse::<ErrorPolicy>().unwrap(),
            ErrorPolicy::Raise
        );
        assert!("explode".parse::<ErrorPolicy>().is_err());
    }
}
