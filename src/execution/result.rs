//! Query Result - rectangular result set returned by a query service

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// One typed cell of a result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision numerics are carried as their exact decimal text.
    Decimal(String),
    Text(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    TextArray(Vec<String>),
    /// A column type the service could not decode; holds the type name.
    Unsupported(String),
}

impl CellValue {
    /// Convert to a JSON value for the json output format.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Int(i) => serde_json::Value::Number((*i).into()),
            CellValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Json(v) => v.clone(),
            CellValue::TextArray(items) => {
                serde_json::Value::Array(items.iter().cloned().map(serde_json::Value::String).collect())
            }
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Decimal(d) => write!(f, "{}", d),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            CellValue::TimestampTz(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f%:z")),
            CellValue::Date(d) => write!(f, "{}", d),
            CellValue::Time(t) => write!(f, "{}", t),
            CellValue::Uuid(u) => write!(f, "{}", u),
            CellValue::Json(v) => write!(f, "{}", v),
            CellValue::Bytes(bytes) => {
                write!(f, "\\x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            CellValue::TextArray(items) => write!(f, "{{{}}}", items.join(",")),
            CellValue::Unsupported(type_name) => write!(f, "<{}>", type_name),
        }
    }
}

/// Ordered columns and ordered rows, exactly as the database returned them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// The row cap, when it cut the result short.
    pub truncated_at: Option<usize>,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            columns,
            rows,
            truncated_at: None,
            execution_time_ms: 0,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_display() {
        assert_eq!(CellValue::Null.to_string(), "NULL");
        assert_eq!(CellValue::Bytes(vec![0xde, 0xad]).to_string(), "\\xdead");
        assert_eq!(
            CellValue::TextArray(vec!["ids=*".to_string(), "actions=read".to_string()]).to_string(),
            "{ids=*,actions=read}"
        );
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(CellValue::Date(date).to_string(), "2024-03-01");
    }

    #[test]
    fn test_cell_to_json() {
        assert_eq!(CellValue::Int(7).to_json(), serde_json::json!(7));
        assert_eq!(CellValue::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(CellValue::Decimal("1.50".to_string()).to_json(), serde_json::json!("1.50"));
        assert_eq!(CellValue::Text("u_1234567890".to_string()).to_json(), serde_json::json!("u_1234567890"));
    }
}
