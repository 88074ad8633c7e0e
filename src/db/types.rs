//! Row decoding into JSON maps.
//!
//! Column types are first classified into a [`TypeCategory`], then a
//! per-backend decoder tries the matching Rust types in order.

use crate::models::DatabaseType;
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// A decoded row keyed by column name.
pub type JsonRow = serde_json::Map<String, JsonValue>;

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Json,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    // SQLite's NUMERIC affinity stores floats
    if db == DatabaseType::SQLite && lower == "numeric" {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    if lower.contains("char") || lower == "text" || lower.contains("string") {
        return TypeCategory::Text;
    }
    TypeCategory::Unknown
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Binary columns decode as text when valid UTF-8, else as a byte array.
fn bytes_value(bytes: Vec<u8>) -> JsonValue {
    match String::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s),
        Err(e) => JsonValue::Array(e.into_bytes().into_iter().map(JsonValue::from).collect()),
    }
}

fn text_value(v: String, type_name: &str) -> JsonValue {
    if type_name.to_lowercase().contains("json") {
        if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
            return json;
        }
    }
    JsonValue::String(v)
}

/// Return the first successful decode among the listed types.
macro_rules! decode_first {
    ($row:expr, $idx:expr, $($ty:ty => $map:expr),+ $(,)?) => {{
        $(
            if let Ok(Some(v)) = $row.try_get::<Option<$ty>, _>($idx) {
                return $map(v);
            }
        )+
        JsonValue::Null
    }};
}

/// Conversion of driver rows into JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decoder:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> JsonRow {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let is_null = self
                            .try_get_raw(idx)
                            .map(|raw| raw.is_null())
                            .unwrap_or(true);
                        let value = if is_null {
                            JsonValue::Null
                        } else {
                            let type_name = col.type_info().name();
                            $decoder(self, idx, type_name, categorize_type(type_name, $db))
                        };
                        (col.name().to_string(), value)
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_first!(row, idx,
                i64 => JsonValue::from,
                u64 => JsonValue::from,
            ),
            TypeCategory::Boolean => decode_first!(row, idx,
                bool => JsonValue::Bool,
                i64 => |v: i64| JsonValue::Bool(v != 0),
            ),
            TypeCategory::Float => decode_first!(row, idx,
                f64 => float_value,
                f32 => |v: f32| float_value(v as f64),
            ),
            TypeCategory::Binary => decode_first!(row, idx, Vec<u8> => bytes_value),
            TypeCategory::Json => decode_first!(row, idx,
                JsonValue => |v: JsonValue| v,
                String => |v: String| text_value(v, type_name),
            ),
            TypeCategory::Text | TypeCategory::Unknown => decode_first!(row, idx,
                String => |v: String| text_value(v, type_name),
                Vec<u8> => bytes_value,
            ),
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_first!(row, idx,
                i64 => JsonValue::from,
                i32 => JsonValue::from,
                i16 => JsonValue::from,
            ),
            TypeCategory::Boolean => decode_first!(row, idx, bool => JsonValue::Bool),
            TypeCategory::Float => decode_first!(row, idx,
                f64 => float_value,
                f32 => |v: f32| float_value(v as f64),
            ),
            TypeCategory::Binary => decode_first!(row, idx, Vec<u8> => bytes_value),
            TypeCategory::Json => decode_first!(row, idx, JsonValue => |v: JsonValue| v),
            TypeCategory::Text | TypeCategory::Unknown => decode_first!(row, idx,
                String => |v: String| text_value(v, type_name),
            ),
        }
    }
}

mod sqlite {
    use super::*;

    /// SQLite is dynamically typed, so every category falls back to the
    /// storage classes in turn.
    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Boolean => decode_first!(row, idx,
                bool => JsonValue::Bool,
                i64 => JsonValue::from,
            ),
            TypeCategory::Float => decode_first!(row, idx,
                f64 => float_value,
                i64 => JsonValue::from,
            ),
            TypeCategory::Binary => decode_first!(row, idx, Vec<u8> => bytes_value),
            TypeCategory::Text => decode_first!(row, idx,
                String => |v: String| text_value(v, type_name),
                i64 => JsonValue::from,
                f64 => float_value,
            ),
            _ => decode_first!(row, idx,
                i64 => JsonValue::from,
                f64 => float_value,
                String => |v: String| text_value(v, type_name),
                Vec<u8> => bytes_value,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type() {
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("int4", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::SQLite),
            TypeCategory::Float
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("NULL", DatabaseType::SQLite),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_bytes_value() {
        assert_eq!(bytes_value("♥".as_bytes().to_vec()), JsonValue::from("♥"));
        assert_eq!(
            bytes_value(vec![0xff, 0x00]),
            serde_json::json!([255, 0])
        );
    }

    #[test]
    fn test_text_value_parses_json_columns() {
        assert_eq!(
            text_value("{\"a\":1}".to_string(), "JSON"),
            serde_json::json!({"a": 1})
        );
        assert_eq!(
            text_value("{\"a\":1}".to_string(), "TEXT"),
            JsonValue::from("{\"a\":1}")
        );
    }
}
