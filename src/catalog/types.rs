//! Column data types and the conversions between them.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

/// Column types supported by GitDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Text/string data (VARCHAR in SQL).
    Text,
    /// Integer numbers (BIGINT in SQL).
    Integer,
    /// Floating point numbers (DOUBLE in SQL).
    Float,
    /// True/false.
    Boolean,
    /// JSON objects or arrays.
    Json,
    /// Timestamps, stored as RFC 3339 strings.
    Timestamp,
    /// UUIDs, stored as strings.
    Uuid,
}

/// a value that could not be converted to a column type
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert {value} to {target}")]
pub struct CoerceError {
    /// the value as it was stored
    pub value: Value,
    /// the type it was read as
    pub target: DataType,
}

impl DataType {
    /// Check if a JSON value matches this data type. Null matches every type.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::Text, Value::String(_)) => true,
            (DataType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (DataType::Float, Value::Number(_)) => true,
            (DataType::Boolean, Value::Bool(_)) => true,
            (DataType::Json, Value::Object(_) | Value::Array(_)) => true,
            (DataType::Timestamp, Value::String(s)) => parse_timestamp(s).is_some(),
            (DataType::Uuid, Value::String(s)) => is_uuid(s),
            _ => false,
        }
    }

    /// Convert a value stored under another column type into this one.
    ///
    /// Used when a table's schema changed between two commits and rows written
    /// under the old type are read through the new one.
    ///
    /// Conversions that would lose information fail instead: a fractional
    /// float is not an integer, and a string that doesn't parse is not a number.
    pub fn coerce(&self, value: &Value) -> Result<Value, CoerceError> {
        if value.is_null() || self.matches(value) {
            return Ok(value.clone());
        }

        let converted = match (self, value) {
            (DataType::Text, other) => Some(Value::String(other.to_string())),

            // only whole floats within i64 range; anything else would lose data
            (DataType::Integer, Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| Value::from(f as i64)),
            (DataType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (DataType::Integer, Value::Bool(b)) => Some(Value::from(i64::from(*b))),

            (DataType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (DataType::Float, Value::Bool(b)) => Some(Value::from(if *b { 1.0 } else { 0.0 })),

            (DataType::Boolean, Value::Number(n)) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
            (DataType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },

            (DataType::Json, Value::String(s)) => {
                Some(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())))
            }
            (DataType::Json, other) => Some(other.clone()),

            (DataType::Timestamp, Value::Number(n)) => n
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .map(|ts| Value::String(ts.to_rfc3339())),

            _ => None,
        };

        converted.ok_or_else(|| CoerceError {
            value: value.clone(),
            target: *self,
        })
    }

    /// Get the SQL name for this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Integer => "INTEGER",
            DataType::Float => "REAL",
            DataType::Boolean => "BOOLEAN",
            DataType::Json => "JSON",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Uuid => "UUID",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

/// RFC 3339, or a bare `YYYY-MM-DDTHH:MM:SS` taken as UTC
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

// 8-4-4-4-12 hex groups
fn is_uuid(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// A column: name, type and nullability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    /// omitted from the stored schema when false
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not_null: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null: false,
        }
    }

    /// mark the column NOT NULL
    pub fn required(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Validate a value against this column definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<(), String> {
        match value {
            None | Some(Value::Null) if self.not_null => {
                Err(format!("column '{}' cannot be null", self.name))
            }
            Some(v) if !self.data_type.matches(v) => Err(format!(
                "column '{}' expects type {}, got {}",
                self.name, self.data_type, v
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if self.not_null {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}
