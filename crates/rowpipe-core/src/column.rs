//! Column descriptors and target-schema metadata.

use serde::{Deserialize, Serialize};

/// Logical column types, the closed set every adapter maps its native types
/// into. Unknown native types map to `String` with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    Int64,
    Float64,
    Decimal { precision: u8, scale: u8 },
    Bool,
    String,
    Bytes,
    Date,
    Timestamp,
}

impl LogicalType {
    /// Whether a source value of `self` can be written to a target column of
    /// `target` without a lossy or undefined conversion. Widening numeric
    /// conversions are allowed (the static validator reports them as
    /// warnings, not errors).
    pub fn compatible_with(&self, target: &LogicalType) -> bool {
        use LogicalType::*;
        match (self, target) {
            (a, b) if a == b => true,
            (Int64, Float64) | (Int64, Decimal { .. }) => true,
            (Float64, Decimal { .. }) | (Decimal { .. }, Float64) => true,
            (Decimal { .. }, Decimal { .. }) => true,
            (Date, Timestamp) => true,
            // Everything renders as a string.
            (_, String) => true,
            _ => false,
        }
    }

    /// Whether writing `self` into `target` may lose precision.
    pub fn lossy_into(&self, target: &LogicalType) -> bool {
        use LogicalType::*;
        matches!(
            (self, target),
            (Int64, Float64) | (Decimal { .. }, Float64) | (Timestamp, Date)
        )
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalType::Int64 => write!(f, "INT64"),
            LogicalType::Float64 => write!(f, "FLOAT64"),
            LogicalType::Decimal { precision, scale } => {
                write!(f, "DECIMAL({precision},{scale})")
            }
            LogicalType::Bool => write!(f, "BOOL"),
            LogicalType::String => write!(f, "STRING"),
            LogicalType::Bytes => write!(f, "BYTES"),
            LogicalType::Date => write!(f, "DATE"),
            LogicalType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

/// A source-side column descriptor. `name` is already dialect-normalized;
/// `original_name` keeps the un-normalized spelling when they differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
    /// Set when the original identifier differs from its normalized form.
    pub case_sensitive: bool,
    pub original_name: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: true,
            case_sensitive: false,
            original_name: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A sink-side column descriptor, as reported by an existing target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetColumn {
    pub name: String,
    /// Backend-native type string, e.g. `VARCHAR2(40)`.
    pub native_type: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub max_length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub has_default: bool,
}

/// The shape of an existing (or to-be-created) sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSchema {
    /// Ordered target columns; empty when the sink does not exist yet.
    pub columns: Vec<TargetColumn>,
    /// Whether the sink already holds data.
    pub exists: bool,
    pub approx_rows: Option<u64>,
    pub approx_bytes: Option<u64>,
    pub primary_key: Option<Vec<String>>,
}

impl TargetSchema {
    pub fn column(&self, name: &str) -> Option<&TargetColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `name` is part of the declared primary key.
    pub fn in_primary_key(&self, name: &str) -> bool {
        self.primary_key
            .as_deref()
            .is_some_and(|pk| pk.iter().any(|k| k == name))
    }
}
