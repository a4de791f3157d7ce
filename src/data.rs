//! Typed cell values and the scalar parsing helpers behind every field type.
//!
//! [`Value`] is the closed set of typed values a cast cell can resolve to.
//! The `parse_*` helpers are shared between cell readers (casting data),
//! constraint compilation (casting `minimum`/`maximum`/`enum` literals),
//! and type inference (probing sample cells).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{Result, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map as JsonMap, Value as JsonValue};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    /// Finite numbers, kept lossless.
    Number(Decimal),
    /// Non-finite numbers only (NaN, INF, -INF); finite values use `Number`.
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Year(i64),
    YearMonth { year: i64, month: u32 },
    Duration(String),
    Array(Vec<JsonValue>),
    Object(JsonMap<String, JsonValue>),
    Geopoint { lon: f64, lat: f64 },
    Geojson(JsonValue),
}

impl Value {
    /// Stable string rendering used both for writing cells back out and as
    /// the key of integrity-tracker maps and lookup sets.
    pub fn canonical(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Number(d) => d.normalize().to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    "NaN".to_string()
                } else if *f == f64::INFINITY {
                    "INF".to_string()
                } else if *f == f64::NEG_INFINITY {
                    "-INF".to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
            Value::Year(y) => y.to_string(),
            Value::YearMonth { year, month } => format!("{year:04}-{month:02}"),
            Value::Duration(s) => s.clone(),
            Value::Array(items) => {
                serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
            }
            Value::Object(map) => serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string()),
            Value::Geopoint { lon, lat } => format!("{lon},{lat}"),
            Value::Geojson(json) => {
                serde_json::to_string(json).unwrap_or_else(|_| "null".to_string())
            }
        }
    }

    /// Length used by `minLength`/`maxLength`: characters for strings,
    /// element count for arrays and objects.
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Ordering used by `minimum`/`maximum`. Returns `None` for
    /// non-finite numbers and for heterogeneous pairs, which a constraint
    /// check treats as "not satisfied" rather than an error.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Number(b)) => Some(Decimal::from(*a).cmp(b)),
            (Value::Number(a), Value::Integer(b)) => Some(a.cmp(&Decimal::from(*b))),
            (Value::Float(_), _) | (_, Value::Float(_)) => None,
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Year(a), Value::Year(b)) => Some(a.cmp(b)),
            (
                Value::YearMonth { year: ay, month: am },
                Value::YearMonth { year: by, month: bm },
            ) => Some((ay, am).cmp(&(by, bm))),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

pub fn parse_naive_time(value: &str) -> Result<NaiveTime> {
    const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M", "%H:%M:%S%.f"];
    for fmt in TIME_FORMATS {
        if let Ok(parsed) = NaiveTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as time"))
}

pub fn parse_integer(value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| anyhow!("Failed to parse '{value}' as integer"))
}

/// Parses a number cell. Finite values become lossless decimals; the
/// special tokens `NaN`, `INF` and `-INF` become non-finite floats so the
/// constraint layer can treat them uniformly.
pub fn parse_number(value: &str) -> Result<Value> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("Failed to parse '{value}' as number");
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" => return Ok(Value::Float(f64::NAN)),
        "inf" | "+inf" | "infinity" => return Ok(Value::Float(f64::INFINITY)),
        "-inf" | "-infinity" => return Ok(Value::Float(f64::NEG_INFINITY)),
        _ => {}
    }
    if let Ok(decimal) = Decimal::from_str(trimmed) {
        return Ok(Value::Number(decimal));
    }
    Decimal::from_scientific(trimmed)
        .map(Value::Number)
        .map_err(|_| anyhow!("Failed to parse '{value}' as number"))
}

pub fn parse_boolean(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => Err(anyhow!("Failed to parse '{value}' as boolean")),
    }
}

pub fn parse_year(value: &str) -> Result<i64> {
    let year = parse_integer(value).map_err(|_| anyhow!("Failed to parse '{value}' as year"))?;
    if !(0..=9999).contains(&year) {
        bail!("Year '{value}' is out of the 0..=9999 range");
    }
    Ok(year)
}

pub fn parse_yearmonth(value: &str) -> Result<(i64, u32)> {
    let trimmed = value.trim();
    let (year_part, month_part) = trimmed
        .split_once('-')
        .ok_or_else(|| anyhow!("Failed to parse '{value}' as yearmonth"))?;
    let year = year_part
        .parse::<i64>()
        .map_err(|_| anyhow!("Failed to parse '{value}' as yearmonth"))?;
    let month = month_part
        .parse::<u32>()
        .map_err(|_| anyhow!("Failed to parse '{value}' as yearmonth"))?;
    if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
        bail!("Yearmonth '{value}' is out of range");
    }
    Ok((year, month))
}

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^P(?:\d+(?:\.\d+)?Y)?(?:\d+(?:\.\d+)?M)?(?:\d+(?:\.\d+)?W)?(?:\d+(?:\.\d+)?D)?(?:T(?:\d+(?:\.\d+)?H)?(?:\d+(?:\.\d+)?M)?(?:\d+(?:\.\d+)?S)?)?$",
        )
        .expect("duration pattern compiles")
    })
}

/// Validates an ISO-8601 duration; the value is kept in its textual form.
pub fn parse_duration(value: &str) -> Result<String> {
    let trimmed = value.trim();
    // "P" and "PT" alone carry no designators and are rejected.
    let has_designator = trimmed.len() > 1 && trimmed.chars().any(|c| c.is_ascii_digit());
    if !has_designator || !duration_pattern().is_match(trimmed) {
        bail!("Failed to parse '{value}' as duration");
    }
    Ok(trimmed.to_string())
}

pub fn parse_json_array(value: &str) -> Result<Vec<JsonValue>> {
    match serde_json::from_str::<JsonValue>(value.trim()) {
        Ok(JsonValue::Array(items)) => Ok(items),
        _ => Err(anyhow!("Failed to parse '{value}' as array")),
    }
}

pub fn parse_json_object(value: &str) -> Result<JsonMap<String, JsonValue>> {
    match serde_json::from_str::<JsonValue>(value.trim()) {
        Ok(JsonValue::Object(map)) => Ok(map),
        _ => Err(anyhow!("Failed to parse '{value}' as object")),
    }
}

pub fn parse_geojson(value: &str) -> Result<JsonValue> {
    match serde_json::from_str::<JsonValue>(value.trim()) {
        Ok(json @ JsonValue::Object(_)) => Ok(json),
        _ => Err(anyhow!("Failed to parse '{value}' as geojson")),
    }
}

/// Default geopoint format: `"lon,lat"`.
pub fn parse_geopoint(value: &str) -> Result<(f64, f64)> {
    let (lon_part, lat_part) = value
        .trim()
        .split_once(',')
        .ok_or_else(|| anyhow!("Failed to parse '{value}' as geopoint"))?;
    let lon = lon_part
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("Failed to parse '{value}' as geopoint"))?;
    let lat = lat_part
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("Failed to parse '{value}' as geopoint"))?;
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        bail!("Geopoint '{value}' is out of coordinate range");
    }
    Ok((lon, lat))
}
