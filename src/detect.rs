//! Sampling stage: header-row detection, label accumulation, and
//! column-wise type inference over a buffered sample.
//!
//! Runs once at stream open, before any row is validated. It pulls up to
//! `sample_size` physical rows from the source, decides where the header
//! lives, joins multi-row labels, infers or adjusts the schema, and hands
//! everything back together with the buffered rows so the driver can
//! replay them as the head of the row stream.

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value as JsonValue;

use crate::data;
use crate::field::{Field, FieldType};
use crate::schema::Schema;
use crate::sources::RawRowSource;

pub const DEFAULT_SAMPLE_SIZE: usize = 100;
pub const DEFAULT_HEADER_JOIN: &str = " ";

/// Where the header lives and which rows and fields survive filtering.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Whether the table has a header at all.
    pub header: bool,
    /// Declared header row positions (1-based, physical). `None` means
    /// detect them from the sample.
    pub header_rows: Option<Vec<usize>>,
    /// Joiner for multi-row labels.
    pub header_join: String,
    /// Case-sensitive label matching when true.
    pub header_case: bool,
    /// Rows whose first cell starts with this prefix are dropped before
    /// any other processing.
    pub skip_comment_prefix: Option<String>,
    /// Keep only fields with these names, in source order.
    pub pick_fields: Option<Vec<String>>,
    /// Drop fields with these names.
    pub skip_fields: Option<Vec<String>>,
    /// Content rows to skip from the start.
    pub offset_rows: usize,
    /// Maximum content rows to yield.
    pub limit_rows: Option<usize>,
}

impl Default for Layout {
    fn default() -> Self {
        Layout {
            header: true,
            header_rows: None,
            header_join: DEFAULT_HEADER_JOIN.to_string(),
            header_case: true,
            skip_comment_prefix: None,
            pick_fields: None,
            skip_fields: None,
            offset_rows: 0,
            limit_rows: None,
        }
    }
}

impl Layout {
    pub fn is_comment_row(&self, cells: &[String]) -> bool {
        match (&self.skip_comment_prefix, cells.first()) {
            (Some(prefix), Some(first)) if !prefix.is_empty() => first.starts_with(prefix),
            _ => false,
        }
    }
}

/// Schema acquisition knobs: inference parameters plus the declared
/// schema and its adjustments.
#[derive(Debug, Clone, Default)]
pub struct Detector {
    /// Physical rows to buffer; 0 falls back to the default.
    pub sample_size: usize,
    pub schema: Option<Schema>,
    /// Reorder and select declared fields to match the observed labels.
    pub schema_sync: bool,
    pub schema_patch: Option<JsonValue>,
}

/// Everything the sampling stage decides, plus the buffered rows the
/// driver replays before continuing with the live source.
#[derive(Debug)]
pub struct Detection {
    pub schema: Schema,
    /// Joined labels, projected to the kept fields. Empty for headerless
    /// tables.
    pub labels: Vec<String>,
    pub header_row_positions: Vec<usize>,
    /// 1-based physical column of each kept field.
    pub field_positions: Vec<usize>,
    /// All buffered physical rows, in pull order, with positions.
    pub buffer: Vec<(usize, Vec<String>)>,
}

impl Detector {
    pub fn effective_sample_size(&self) -> usize {
        if self.sample_size == 0 {
            DEFAULT_SAMPLE_SIZE
        } else {
            self.sample_size
        }
    }

    pub fn detect(&self, source: &mut dyn RawRowSource, layout: &Layout) -> Result<Detection> {
        let sample_size = self.effective_sample_size();

        let mut buffer: Vec<(usize, Vec<String>)> = Vec::new();
        let mut position = 0;
        while buffer.len() < sample_size {
            let Some(cells) = source.read_raw_row()? else {
                break;
            };
            position += 1;
            buffer.push((position, cells));
        }

        let header_row_positions = self.resolve_header_rows(&buffer, layout);
        // A declared header row may sit beyond the initial buffer.
        if let Some(last) = header_row_positions.last().copied() {
            while position < last {
                let Some(cells) = source.read_raw_row()? else {
                    break;
                };
                position += 1;
                buffer.push((position, cells));
            }
        }

        let raw_labels = join_labels(&buffer, &header_row_positions, &layout.header_join);

        let content_sample: Vec<&[String]> = buffer
            .iter()
            .filter(|(pos, cells)| {
                !header_row_positions.contains(pos) && !layout.is_comment_row(cells)
            })
            .map(|(_, cells)| cells.as_slice())
            .take(sample_size)
            .collect();

        let width = if raw_labels.is_empty() {
            match &self.schema {
                Some(schema) => schema.fields.len(),
                None => content_sample
                    .iter()
                    .map(|cells| cells.len())
                    .max()
                    .unwrap_or(0),
            }
        } else {
            raw_labels.len()
        };
        let base_names: Vec<String> = if raw_labels.is_empty() {
            (1..=width).map(|number| format!("field{number}")).collect()
        } else {
            raw_labels.clone()
        };
        let kept = self.keep_columns(&base_names, layout);

        let labels: Vec<String> = if raw_labels.is_empty() {
            Vec::new()
        } else {
            kept.iter().map(|&index| raw_labels[index].clone()).collect()
        };

        let mut schema = match &self.schema {
            Some(schema) => {
                let mut schema = schema.clone();
                if self.schema_sync && !labels.is_empty() {
                    schema = sync_schema(&schema, &labels, layout.header_case);
                }
                schema
            }
            None => {
                let names: Vec<&str> = kept.iter().map(|&index| base_names[index].as_str()).collect();
                infer_schema(&names, &content_sample, &kept)
            }
        };

        if let Some(patch) = &self.schema_patch {
            schema.patch(patch).context("Applying schema patch")?;
        }
        schema
            .validate()
            .context("Validating the resolved schema")?;

        debug!(
            "detected header rows {:?}, {} field(s), {} sampled content row(s)",
            header_row_positions,
            schema.fields.len(),
            content_sample.len()
        );

        Ok(Detection {
            schema,
            labels,
            header_row_positions,
            field_positions: kept.iter().map(|&index| index + 1).collect(),
            buffer,
        })
    }

    fn resolve_header_rows(&self, buffer: &[(usize, Vec<String>)], layout: &Layout) -> Vec<usize> {
        if !layout.header {
            return Vec::new();
        }
        if let Some(declared) = &layout.header_rows {
            let mut rows = declared.clone();
            rows.sort_unstable();
            rows.dedup();
            return rows;
        }

        let candidates: Vec<&(usize, Vec<String>)> = buffer
            .iter()
            .filter(|(_, cells)| !layout.is_comment_row(cells))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let widths: Vec<usize> = candidates.iter().map(|(_, cells)| cells.len()).collect();
        let mean = (widths.iter().sum::<usize>() + widths.len() / 2) / widths.len();
        let band = (mean / 10).max(1);
        for (position, cells) in &candidates {
            let width = cells.len();
            if width.abs_diff(mean) <= band && cells.iter().all(|cell| is_textual(cell)) {
                return vec![*position];
            }
        }
        // No convincing label row; fall back to the first row.
        vec![candidates[0].0]
    }

    /// 0-based indices of the columns surviving pick/skip, in source order.
    fn keep_columns(&self, names: &[String], layout: &Layout) -> Vec<usize> {
        let case = layout.header_case;
        let listed = |list: &[String], name: &str| {
            list.iter().any(|entry| {
                if case {
                    entry == name
                } else {
                    entry.eq_ignore_ascii_case(name)
                }
            })
        };
        (0..names.len())
            .filter(|&index| {
                let name = names[index].as_str();
                if let Some(pick) = &layout.pick_fields {
                    if !listed(pick, name) {
                        return false;
                    }
                }
                if let Some(skip) = &layout.skip_fields {
                    if listed(skip, name) {
                        return false;
                    }
                }
                true
            })
            .collect()
    }
}

/// A header cell is textual when it is non-empty and does not read as a
/// number.
fn is_textual(cell: &str) -> bool {
    let trimmed = cell.trim();
    !trimmed.is_empty() && data::parse_number(trimmed).is_err()
}

/// Joins multi-row labels column-wise. A value identical to the one
/// directly above it is not repeated.
fn join_labels(
    buffer: &[(usize, Vec<String>)],
    header_row_positions: &[usize],
    joiner: &str,
) -> Vec<String> {
    let rows: Vec<&[String]> = header_row_positions
        .iter()
        .filter_map(|target| {
            buffer
                .iter()
                .find(|(position, _)| position == target)
                .map(|(_, cells)| cells.as_slice())
        })
        .collect();
    let width = rows.iter().map(|cells| cells.len()).max().unwrap_or(0);

    (0..width)
        .map(|column| {
            let mut parts: Vec<&str> = Vec::new();
            for cells in &rows {
                let cell = cells.get(column).map(String::as_str).unwrap_or("");
                if parts.last() != Some(&cell) {
                    parts.push(cell);
                }
            }
            parts.join(joiner).trim().to_string()
        })
        .collect()
}

/// Per-column candidate counting over the sampled cells.
#[derive(Debug, Default)]
struct ColumnProbe {
    non_empty: usize,
    boolean: usize,
    integer: usize,
    number: usize,
    date: usize,
    time: usize,
    datetime: usize,
    year: usize,
    yearmonth: usize,
    array: usize,
    object: usize,
    geojson: usize,
}

impl ColumnProbe {
    fn feed(&mut self, cell: &str) {
        let cell = cell.trim();
        if cell.is_empty() {
            return;
        }
        self.non_empty += 1;
        if data::parse_boolean(cell).is_ok() {
            self.boolean += 1;
        }
        if data::parse_integer(cell).is_ok() {
            self.integer += 1;
        }
        if data::parse_number(cell).is_ok() {
            self.number += 1;
        }
        if data::parse_naive_date(cell).is_ok() {
            self.date += 1;
        }
        if data::parse_naive_time(cell).is_ok() {
            self.time += 1;
        }
        if data::parse_naive_datetime(cell).is_ok() {
            self.datetime += 1;
        }
        if data::parse_year(cell).is_ok() {
            self.year += 1;
        }
        if data::parse_yearmonth(cell).is_ok() {
            self.yearmonth += 1;
        }
        if data::parse_json_array(cell).is_ok() {
            self.array += 1;
        }
        if data::parse_json_object(cell).is_ok() {
            self.object += 1;
        }
        if data::parse_geojson(cell).is_ok() {
            self.geojson += 1;
        }
    }

    /// Majority vote with a fixed priority order; columns with no content
    /// stay `any`, columns with no majority fall back to `string`.
    fn decide(&self) -> FieldType {
        if self.non_empty == 0 {
            return FieldType::Any;
        }
        let majority = |count: usize| count * 2 > self.non_empty;
        let ladder = [
            (self.boolean, FieldType::Boolean),
            (self.integer, FieldType::Integer),
            (self.number, FieldType::Number),
            (self.date, FieldType::Date),
            (self.time, FieldType::Time),
            (self.datetime, FieldType::DateTime),
            (self.year, FieldType::Year),
            (self.yearmonth, FieldType::YearMonth),
            (self.array, FieldType::Array),
            (self.object, FieldType::Object),
            (self.geojson, FieldType::Geojson),
        ];
        for (count, field_type) in ladder {
            if majority(count) {
                return field_type;
            }
        }
        FieldType::String
    }
}

fn infer_schema(names: &[&str], sample: &[&[String]], kept: &[usize]) -> Schema {
    let mut probes: Vec<ColumnProbe> = (0..kept.len()).map(|_| ColumnProbe::default()).collect();
    for cells in sample {
        for (slot, &column) in kept.iter().enumerate() {
            if let Some(cell) = cells.get(column) {
                probes[slot].feed(cell);
            }
        }
    }
    let fields = names
        .iter()
        .zip(probes.iter())
        .map(|(name, probe)| Field::new(*name, probe.decide()))
        .collect();
    Schema {
        fields,
        ..Schema::default()
    }
}

/// Reorders the declared fields to match the observed labels; labels the
/// schema does not know get an `any`-typed placeholder.
fn sync_schema(schema: &Schema, labels: &[String], case_sensitive: bool) -> Schema {
    let fields = labels
        .iter()
        .map(|label| {
            schema
                .fields
                .iter()
                .find(|field| {
                    if case_sensitive {
                        field.name == *label
                    } else {
                        field.name.eq_ignore_ascii_case(label)
                    }
                })
                .cloned()
                .unwrap_or_else(|| Field::new(label.as_str(), FieldType::Any))
        })
        .collect();
    Schema {
        fields,
        ..schema.clone()
    }
}
