//! Field model: semantic types, constraints, and compiled cell readers.
//!
//! A [`Field`] names a column and fixes its semantic [`FieldType`], parsing
//! format, missing-value tokens, and [`Constraints`]. Casting happens
//! through a [`CellReader`] compiled once per stream per field: the
//! missing-value list is resolved, the `pattern` regex anchored and
//! compiled, and `minimum`/`maximum`/`enum` literals parsed through the
//! same value reader as cell data.
//!
//! Casting never fails hard. A bad cell yields a type note; a violated
//! constraint yields one note per failed constraint. Only schema-definition
//! problems (unsupported constraint, bad pattern, unparseable constraint
//! literal) are hard errors, raised when the reader is compiled.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail, ensure};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::data::{
    Value, parse_boolean, parse_duration, parse_geojson, parse_geopoint, parse_integer,
    parse_json_array, parse_json_object, parse_naive_date, parse_naive_datetime, parse_naive_time,
    parse_number, parse_year, parse_yearmonth,
};

pub const DEFAULT_FIELD_FORMAT: &str = "default";
pub const DEFAULT_MISSING_VALUES: &[&str] = &[""];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Date,
    DateTime,
    Time,
    Year,
    YearMonth,
    Array,
    Object,
    Geopoint,
    Geojson,
    Duration,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Any => "any",
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Time => "time",
            FieldType::Year => "year",
            FieldType::YearMonth => "yearmonth",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Geopoint => "geopoint",
            FieldType::Geojson => "geojson",
            FieldType::Duration => "duration",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "any",
            "string",
            "integer",
            "number",
            "boolean",
            "date",
            "datetime",
            "time",
            "year",
            "yearmonth",
            "array",
            "object",
            "geopoint",
            "geojson",
            "duration",
        ]
    }

    /// Constraint keys a field of this type may declare. Anything else is
    /// a schema-definition error, not a runtime one.
    pub fn supported_constraints(&self) -> &'static [&'static str] {
        match self {
            FieldType::Any | FieldType::Boolean | FieldType::Geopoint | FieldType::Geojson => {
                &["required", "enum", "unique"]
            }
            FieldType::String => &[
                "required",
                "minLength",
                "maxLength",
                "pattern",
                "enum",
                "unique",
            ],
            FieldType::Integer
            | FieldType::Number
            | FieldType::Date
            | FieldType::DateTime
            | FieldType::Time
            | FieldType::Year
            | FieldType::YearMonth => &["required", "minimum", "maximum", "enum", "unique"],
            FieldType::Duration => &["required", "enum", "unique"],
            FieldType::Array | FieldType::Object => {
                &["required", "minLength", "maxLength", "enum", "unique"]
            }
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(FieldType::Any),
            "string" => Ok(FieldType::String),
            "integer" | "int" => Ok(FieldType::Integer),
            "number" => Ok(FieldType::Number),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            "datetime" | "date-time" => Ok(FieldType::DateTime),
            "time" => Ok(FieldType::Time),
            "year" => Ok(FieldType::Year),
            "yearmonth" => Ok(FieldType::YearMonth),
            "array" => Ok(FieldType::Array),
            "object" => Ok(FieldType::Object),
            "geopoint" => Ok(FieldType::Geopoint),
            "geojson" => Ok(FieldType::Geojson),
            "duration" => Ok(FieldType::Duration),
            _ => Err(anyhow!(
                "Unknown field type '{value}'. Supported types: {}",
                FieldType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        FieldType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

/// Declared constraints, raw as they appear in a descriptor. `minimum`,
/// `maximum`, and `enum` values are literals parsed through the field's
/// value reader when the reader is compiled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
}

impl Constraints {
    /// Names of the constraints actually declared, in canonical key form.
    pub fn declared(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.required.is_some() {
            names.push("required");
        }
        if self.min_length.is_some() {
            names.push("minLength");
        }
        if self.max_length.is_some() {
            names.push("maxLength");
        }
        if self.minimum.is_some() {
            names.push("minimum");
        }
        if self.maximum.is_some() {
            names.push("maximum");
        }
        if self.pattern.is_some() {
            names.push("pattern");
        }
        if self.enum_values.is_some() {
            names.push("enum");
        }
        if self.unique.is_some() {
            names.push("unique");
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.declared().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(
        default,
        rename = "missingValues",
        skip_serializing_if = "Option::is_none"
    )]
    pub missing_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

fn default_format() -> String {
    DEFAULT_FIELD_FORMAT.to_string()
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            field_type,
            format: default_format(),
            missing_values: None,
            constraints: Constraints::default(),
            example: None,
        }
    }

    /// Validates the field definition: every declared constraint must be
    /// supported by the type, and a declared example must itself cast
    /// cleanly.
    pub fn validate(&self) -> Result<()> {
        let supported = self.field_type.supported_constraints();
        for name in self.constraints.declared() {
            ensure!(
                supported.contains(&name),
                "Constraint '{}' is not supported by type '{}' (field '{}')",
                name,
                self.field_type,
                self.name
            );
        }
        if let Some(example) = &self.example {
            let reader = self.compile_reader(DEFAULT_MISSING_VALUES)?;
            let (_, notes) = reader.read(example);
            ensure!(
                notes.is_empty(),
                "Example value '{}' for field '{}' is not valid",
                example,
                self.name
            );
        }
        Ok(())
    }

    /// Parses one raw value according to the field's type and format,
    /// ignoring missing values and constraints.
    pub fn read_value(&self, raw: &str) -> Result<Value> {
        let custom_format = (self.format != DEFAULT_FIELD_FORMAT).then_some(self.format.as_str());
        match self.field_type {
            FieldType::Any | FieldType::String => Ok(Value::String(raw.to_string())),
            FieldType::Integer => parse_integer(raw).map(Value::Integer),
            FieldType::Number => parse_number(raw),
            FieldType::Boolean => parse_boolean(raw).map(Value::Boolean),
            FieldType::Date => match custom_format {
                Some(fmt) => NaiveDate::parse_from_str(raw, fmt)
                    .map(Value::Date)
                    .with_context(|| format!("Parsing '{raw}' with format '{fmt}'")),
                None => parse_naive_date(raw).map(Value::Date),
            },
            FieldType::DateTime => match custom_format {
                Some(fmt) => NaiveDateTime::parse_from_str(raw, fmt)
                    .map(Value::DateTime)
                    .with_context(|| format!("Parsing '{raw}' with format '{fmt}'")),
                None => parse_naive_datetime(raw).map(Value::DateTime),
            },
            FieldType::Time => match custom_format {
                Some(fmt) => NaiveTime::parse_from_str(raw, fmt)
                    .map(Value::Time)
                    .with_context(|| format!("Parsing '{raw}' with format '{fmt}'")),
                None => parse_naive_time(raw).map(Value::Time),
            },
            FieldType::Year => parse_year(raw).map(Value::Year),
            FieldType::YearMonth => {
                parse_yearmonth(raw).map(|(year, month)| Value::YearMonth { year, month })
            }
            FieldType::Array => parse_json_array(raw).map(Value::Array),
            FieldType::Object => parse_json_object(raw).map(Value::Object),
            FieldType::Geopoint => match self.format.as_str() {
                "array" => {
                    let items = parse_json_array(raw)?;
                    let coords: Vec<f64> = items.iter().filter_map(|v| v.as_f64()).collect();
                    if coords.len() != 2 {
                        bail!("Failed to parse '{raw}' as geopoint array");
                    }
                    parse_geopoint(&format!("{},{}", coords[0], coords[1]))
                        .map(|(lon, lat)| Value::Geopoint { lon, lat })
                }
                "object" => {
                    let map = parse_json_object(raw)?;
                    let lon = map.get("lon").and_then(|v| v.as_f64());
                    let lat = map.get("lat").and_then(|v| v.as_f64());
                    match (lon, lat) {
                        (Some(lon), Some(lat)) => {
                            parse_geopoint(&format!("{lon},{lat}"))
                                .map(|(lon, lat)| Value::Geopoint { lon, lat })
                        }
                        _ => bail!("Failed to parse '{raw}' as geopoint object"),
                    }
                }
                _ => parse_geopoint(raw).map(|(lon, lat)| Value::Geopoint { lon, lat }),
            },
            FieldType::Geojson => parse_geojson(raw).map(Value::Geojson),
            FieldType::Duration => parse_duration(raw).map(Value::Duration),
        }
    }

    /// Compiles the per-stream cell reader. `schema_missing_values` is the
    /// owning schema's list, used when the field declares none.
    pub fn compile_reader(&self, schema_missing_values: &[impl AsRef<str>]) -> Result<CellReader> {
        self.validate_constraint_support()?;
        let missing_values: Vec<String> = match &self.missing_values {
            Some(own) => own.clone(),
            None => schema_missing_values
                .iter()
                .map(|token| token.as_ref().to_string())
                .collect(),
        };

        let mut checks = Vec::new();
        let constraints = &self.constraints;
        if constraints.required == Some(true) {
            checks.push(CompiledCheck::Required);
        }
        if let Some(min) = constraints.min_length {
            checks.push(CompiledCheck::MinLength(min));
        }
        if let Some(max) = constraints.max_length {
            checks.push(CompiledCheck::MaxLength(max));
        }
        if let Some(literal) = &constraints.minimum {
            let bound = self.read_value(literal).with_context(|| {
                format!(
                    "Parsing minimum constraint '{literal}' for field '{}'",
                    self.name
                )
            })?;
            checks.push(CompiledCheck::Minimum(literal.clone(), bound));
        }
        if let Some(literal) = &constraints.maximum {
            let bound = self.read_value(literal).with_context(|| {
                format!(
                    "Parsing maximum constraint '{literal}' for field '{}'",
                    self.name
                )
            })?;
            checks.push(CompiledCheck::Maximum(literal.clone(), bound));
        }
        if let Some(pattern) = &constraints.pattern {
            // Pattern constraints are full-string anchored.
            let regex = Regex::new(&format!("^(?:{pattern})$")).with_context(|| {
                format!(
                    "Compiling pattern constraint '{pattern}' for field '{}'",
                    self.name
                )
            })?;
            checks.push(CompiledCheck::Pattern(pattern.clone(), regex));
        }
        if let Some(literals) = &constraints.enum_values {
            let mut allowed = Vec::with_capacity(literals.len());
            for literal in literals {
                let value = self.read_value(literal).with_context(|| {
                    format!(
                        "Parsing enum constraint '{literal}' for field '{}'",
                        self.name
                    )
                })?;
                allowed.push(value);
            }
            checks.push(CompiledCheck::Enum(literals.clone(), allowed));
        }

        Ok(CellReader {
            field: self.clone(),
            missing_values,
            checks,
        })
    }

    /// Compiles the per-stream cell writer.
    pub fn compile_writer(&self, schema_missing_values: &[impl AsRef<str>]) -> CellWriter {
        let missing_value = match &self.missing_values {
            Some(own) => own.first().cloned().unwrap_or_default(),
            None => schema_missing_values
                .first()
                .map(|token| token.as_ref().to_string())
                .unwrap_or_default(),
        };
        CellWriter { missing_value }
    }

    /// One-off cast, building a throwaway reader. Streams compile their
    /// readers once instead.
    pub fn read_cell(&self, raw: &str) -> Result<(Option<Value>, ReadNotes)> {
        let reader = self.compile_reader(DEFAULT_MISSING_VALUES)?;
        Ok(reader.read(raw))
    }

    fn validate_constraint_support(&self) -> Result<()> {
        let supported = self.field_type.supported_constraints();
        for name in self.constraints.declared() {
            ensure!(
                supported.contains(&name),
                "Constraint '{}' is not supported by type '{}' (field '{}')",
                name,
                self.field_type,
                self.name
            );
        }
        Ok(())
    }
}

/// Outcome notes of one cell cast. Empty notes mean the cell is clean.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadNotes {
    pub type_note: Option<String>,
    /// Pairs of (constraint name, reason), one per failed constraint.
    pub constraint_notes: Vec<(&'static str, String)>,
}

impl ReadNotes {
    pub fn is_empty(&self) -> bool {
        self.type_note.is_none() && self.constraint_notes.is_empty()
    }
}

#[derive(Debug, Clone)]
enum CompiledCheck {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Minimum(String, Value),
    Maximum(String, Value),
    Pattern(String, Regex),
    Enum(Vec<String>, Vec<Value>),
}

impl CompiledCheck {
    fn name(&self) -> &'static str {
        match self {
            CompiledCheck::Required => "required",
            CompiledCheck::MinLength(_) => "minLength",
            CompiledCheck::MaxLength(_) => "maxLength",
            CompiledCheck::Minimum(..) => "minimum",
            CompiledCheck::Maximum(..) => "maximum",
            CompiledCheck::Pattern(..) => "pattern",
            CompiledCheck::Enum(..) => "enum",
        }
    }

    fn describe(&self) -> String {
        match self {
            CompiledCheck::Required => "true".to_string(),
            CompiledCheck::MinLength(n) | CompiledCheck::MaxLength(n) => n.to_string(),
            CompiledCheck::Minimum(literal, _)
            | CompiledCheck::Maximum(literal, _)
            | CompiledCheck::Pattern(literal, _) => literal.clone(),
            CompiledCheck::Enum(literals, _) => format!("[{}]", literals.join(", ")),
        }
    }

    /// Pure check: `None` satisfies every constraint except `required`.
    /// Incomparable values (non-finite numbers included) fail ordered
    /// constraints instead of erroring.
    fn check(&self, cell: Option<&Value>) -> bool {
        let Some(value) = cell else {
            return !matches!(self, CompiledCheck::Required);
        };
        match self {
            CompiledCheck::Required => true,
            CompiledCheck::MinLength(min) => value.length().is_none_or(|len| len >= *min),
            CompiledCheck::MaxLength(max) => value.length().is_none_or(|len| len <= *max),
            CompiledCheck::Minimum(_, bound) => {
                value.compare(bound).is_some_and(|ordering| ordering.is_ge())
            }
            CompiledCheck::Maximum(_, bound) => {
                value.compare(bound).is_some_and(|ordering| ordering.is_le())
            }
            CompiledCheck::Pattern(_, regex) => match value {
                Value::String(s) => regex.is_match(s),
                _ => true,
            },
            CompiledCheck::Enum(_, allowed) => allowed.contains(value),
        }
    }
}

/// Compiled, per-stream cast function for one field. Shared read-only
/// across every row of the stream.
#[derive(Debug, Clone)]
pub struct CellReader {
    field: Field,
    missing_values: Vec<String>,
    checks: Vec<CompiledCheck>,
}

impl CellReader {
    /// Casts one raw cell. Missing tokens resolve to `None` without notes;
    /// a parse failure yields a type note and suppresses constraint
    /// checking; otherwise every declared constraint is checked and every
    /// failure reported.
    pub fn read(&self, raw: &str) -> (Option<Value>, ReadNotes) {
        let mut notes = ReadNotes::default();
        let cell = if self.missing_values.iter().any(|token| token == raw) {
            None
        } else {
            match self.field.read_value(raw) {
                Ok(value) => Some(value),
                Err(_) => {
                    notes.type_note = Some(format!(
                        "type is \"{}/{}\"",
                        self.field.field_type, self.field.format
                    ));
                    None
                }
            }
        };
        if notes.type_note.is_none() {
            for check in &self.checks {
                if !check.check(cell.as_ref()) {
                    notes.constraint_notes.push((
                        check.name(),
                        format!("constraint \"{}\" is \"{}\"", check.name(), check.describe()),
                    ));
                }
            }
        }
        (cell, notes)
    }

    /// Casts a cell that is physically absent from the row. The value is
    /// null; only the `required` constraint can fail.
    pub fn read_absent(&self) -> (Option<Value>, ReadNotes) {
        let mut notes = ReadNotes::default();
        for check in &self.checks {
            if !check.check(None) {
                notes.constraint_notes.push((
                    check.name(),
                    format!("constraint \"{}\" is \"{}\"", check.name(), check.describe()),
                ));
            }
        }
        (None, notes)
    }
}

/// Inverse of [`CellReader`]: renders a typed value back to its raw form.
#[derive(Debug, Clone)]
pub struct CellWriter {
    missing_value: String,
}

impl CellWriter {
    /// `None` maps to the first configured missing token unless
    /// `ignore_missing` asks to keep blanks blank.
    pub fn write(&self, value: Option<&Value>, ignore_missing: bool) -> String {
        match value {
            Some(value) => value.canonical(),
            None if ignore_missing => String::new(),
            None => self.missing_value.clone(),
        }
    }
}
