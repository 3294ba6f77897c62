//! Row values and the batch messages exchanged between pipeline stages.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// A single cell value, drawn from the closed logical type set.
///
/// Absence ("null") is represented at the row level as `Option<Value>`, so
/// every variant here is a present value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Render the value as a string, the form used by masking, length
    /// validation, and the file writers.
    pub fn render(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Bytes(v) => v.iter().map(|b| format!("{b:02x}")).collect(),
            Value::Date(v) => v.format("%Y-%m-%d").to_string(),
            Value::Timestamp(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Decimal(_))
    }

    /// Numeric view of the value, when one exists.
    pub fn as_f64(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Decimal(v) => v.to_f64(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int64",
            Value::Float(_) => "float64",
            Value::Decimal(_) => "decimal",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// A row is a fixed-width ordered tuple of optional values. Positional order
/// matches the column list advertised by the stage that produced it.
pub type Row = Vec<Option<Value>>;

/// An ordered finite sequence of rows delivered together by a reader.
pub type Batch = Vec<Row>;

/// Messages passed over the bounded buffer between the reader task and the
/// transform/write loop.
#[derive(Debug)]
pub enum Message {
    /// A batch of rows, in source order.
    Batch(Batch),
    /// End-of-stream marker; no more batches will follow.
    Eos,
}

/// Sender half of the reader/writer buffer.
pub type BatchTx = mpsc::Sender<Message>;

/// Receiver half of the reader/writer buffer.
pub type BatchRx = mpsc::Receiver<Message>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_covers_every_variant() {
        assert_eq!(Value::Int(42).render(), "42");
        assert_eq!(Value::Bool(false).render(), "false");
        assert_eq!(Value::Str("a b".into()).render(), "a b");
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).render(), "dead");
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()).render(),
            "2024-03-09"
        );
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
        assert!(Value::Decimal(Decimal::new(1234, 2)).is_numeric());
        assert_eq!(Value::Str("7".into()).as_f64(), None);
    }
}
