//! Pre-flight schema compatibility checks and per-value guards.

use crate::column::{Column, LogicalType, TargetColumn, TargetSchema};
use crate::options::PipelineOptions;
use crate::value::Value;

/// Outcome of the static (once per run) validation between the source
/// columns and an existing target.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Columns to add to the target, populated only when `auto_migrate` is
    /// on, the target exists, and the schema is not strict.
    pub auto_migrations: Vec<TargetColumn>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compare the source columns against an existing target schema.
pub fn validate_schema(
    source: &[Column],
    target: &TargetSchema,
    options: &PipelineOptions,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    if !target.exists {
        // Nothing to reconcile; the writer creates the target from source.
        return report;
    }

    for tcol in &target.columns {
        let scol = source.iter().find(|c| c.name == tcol.name);
        match scol {
            None => {
                if !tcol.nullable && !tcol.has_default && !tcol.primary_key {
                    report.errors.push(format!(
                        "target column {} is not nullable, has no default, and is absent on the source",
                        tcol.name
                    ));
                }
            }
            Some(scol) => {
                if !scol.logical_type.compatible_with(&tcol.logical_type) {
                    report.errors.push(format!(
                        "source column {} ({}) has no compatible mapping to target type {}",
                        scol.name, scol.logical_type, tcol.logical_type
                    ));
                } else if scol.logical_type.lossy_into(&tcol.logical_type) {
                    report.warnings.push(format!(
                        "column {}: conversion {} -> {} may lose precision",
                        scol.name, scol.logical_type, tcol.logical_type
                    ));
                }
            }
        }
    }

    let migrate = options.auto_migrate && !options.strict_schema;
    for scol in source {
        if target.column(&scol.name).is_none() {
            if migrate {
                report.auto_migrations.push(TargetColumn {
                    name: scol.name.clone(),
                    native_type: native_type_for(&scol.logical_type),
                    logical_type: scol.logical_type,
                    nullable: true,
                    primary_key: false,
                    unique: false,
                    max_length: None,
                    precision: match scol.logical_type {
                        LogicalType::Decimal { precision, .. } => Some(precision),
                        _ => None,
                    },
                    scale: match scol.logical_type {
                        LogicalType::Decimal { scale, .. } => Some(scale),
                        _ => None,
                    },
                    has_default: false,
                });
            } else {
                report.warnings.push(format!(
                    "source column {} is missing on the target and will be dropped",
                    scol.name
                ));
            }
        }
    }

    report
}

/// Generic native type used when auto-migrating a missing column.
fn native_type_for(logical_type: &LogicalType) -> String {
    match logical_type {
        LogicalType::Int64 => "BIGINT".to_string(),
        LogicalType::Float64 => "DOUBLE PRECISION".to_string(),
        LogicalType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
        LogicalType::Bool => "BOOLEAN".to_string(),
        LogicalType::String => "VARCHAR".to_string(),
        LogicalType::Bytes => "BLOB".to_string(),
        LogicalType::Date => "DATE".to_string(),
        LogicalType::Timestamp => "TIMESTAMP".to_string(),
    }
}

/// Per-value guard outcome for the hot path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ValueCheck {
    pub null_violation: bool,
    pub length_violation: bool,
    pub precision_violation: bool,
    pub actual_length: usize,
    pub actual_integer_digits: u32,
    pub max_integer_digits: u32,
}

impl ValueCheck {
    pub fn is_ok(&self) -> bool {
        !(self.null_violation || self.length_violation || self.precision_violation)
    }
}

/// Check one value against its target column.
///
/// Primary-key columns are exempt from the null check; their nullability
/// comes from the key definition, not the column.
pub fn check_value(value: Option<&Value>, column: &TargetColumn, in_primary_key: bool) -> ValueCheck {
    let mut check = ValueCheck::default();
    let pk = in_primary_key || column.primary_key;

    let Some(value) = value else {
        check.null_violation = !column.nullable && !pk;
        return check;
    };

    if column.logical_type == LogicalType::String {
        if let Some(max) = column.max_length.filter(|m| *m > 0) {
            check.actual_length = value.render().chars().count();
            check.length_violation = check.actual_length > max as usize;
        }
    }

    if let Some(precision) = column.precision.filter(|_| value.is_numeric()) {
        let scale = column.scale.unwrap_or(0);
        check.max_integer_digits = precision.saturating_sub(scale) as u32;
        check.actual_integer_digits = integer_digits(&value.render());
        check.precision_violation = check.actual_integer_digits > check.max_integer_digits;
    }

    check
}

/// Digits before the decimal point, sign stripped.
fn integer_digits(rendered: &str) -> u32 {
    let unsigned = rendered.trim_start_matches(['-', '+']);
    let integer_part = unsigned.split('.').next().unwrap_or(unsigned);
    integer_part.chars().filter(char::is_ascii_digit).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn string_target(max_length: Option<u32>) -> TargetColumn {
        TargetColumn {
            name: "NAME".into(),
            native_type: "VARCHAR".into(),
            logical_type: LogicalType::String,
            nullable: false,
            primary_key: false,
            unique: false,
            max_length,
            precision: None,
            scale: None,
            has_default: false,
        }
    }

    fn decimal_target(precision: u8, scale: u8) -> TargetColumn {
        TargetColumn {
            name: "AMOUNT".into(),
            native_type: format!("DECIMAL({precision},{scale})"),
            logical_type: LogicalType::Decimal { precision, scale },
            nullable: true,
            primary_key: false,
            unique: false,
            max_length: None,
            precision: Some(precision),
            scale: Some(scale),
            has_default: false,
        }
    }

    #[test]
    fn null_violation_skips_primary_key_columns() {
        let col = string_target(None);
        assert!(check_value(None, &col, false).null_violation);
        assert!(!check_value(None, &col, true).null_violation);
        let mut pk_col = string_target(None);
        pk_col.primary_key = true;
        assert!(!check_value(None, &pk_col, false).null_violation);
    }

    #[test]
    fn length_violation_counts_characters() {
        let col = string_target(Some(5));
        let ok = check_value(Some(&Value::Str("héllo".into())), &col, false);
        assert!(!ok.length_violation);
        assert_eq!(ok.actual_length, 5);
        let long = check_value(Some(&Value::Str("toolong".into())), &col, false);
        assert!(long.length_violation);
        assert_eq!(long.actual_length, 7);
    }

    #[test]
    fn precision_counts_integer_digits_only() {
        let col = decimal_target(5, 2);
        let ok = check_value(Some(&Value::Decimal(Decimal::new(99999, 2))), &col, false);
        assert!(!ok.precision_violation); // 999.99
        let bad = check_value(Some(&Value::Decimal(Decimal::new(123450, 1))), &col, false);
        assert!(bad.precision_violation); // 12345.0 -> 5 integer digits > 3
        assert_eq!(bad.actual_integer_digits, 5);
        assert_eq!(bad.max_integer_digits, 3);
    }

    #[test]
    fn sign_is_stripped_before_counting() {
        let col = decimal_target(4, 0);
        let c = check_value(Some(&Value::Int(-1234)), &col, false);
        assert_eq!(c.actual_integer_digits, 4);
        assert!(!c.precision_violation);
    }

    fn source(cols: &[(&str, LogicalType)]) -> Vec<Column> {
        cols.iter()
            .map(|(n, t)| Column::new(*n, *t))
            .collect()
    }

    fn target_with(columns: Vec<TargetColumn>) -> TargetSchema {
        TargetSchema {
            columns,
            exists: true,
            ..Default::default()
        }
    }

    #[test]
    fn missing_required_target_column_is_an_error() {
        let target = target_with(vec![string_target(None)]);
        let report = validate_schema(
            &source(&[("ID", LogicalType::Int64)]),
            &target,
            &PipelineOptions::default(),
        );
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("NAME"));
    }

    #[test]
    fn incompatible_types_are_errors_and_lossy_ones_warn() {
        let mut int_target = decimal_target(10, 0);
        int_target.name = "ID".into();
        int_target.logical_type = LogicalType::Date;
        let report = validate_schema(
            &source(&[("ID", LogicalType::Int64)]),
            &target_with(vec![int_target]),
            &PipelineOptions::default(),
        );
        assert_eq!(report.errors.len(), 1);

        let mut float_target = decimal_target(10, 0);
        float_target.name = "ID".into();
        float_target.logical_type = LogicalType::Float64;
        let report = validate_schema(
            &source(&[("ID", LogicalType::Int64)]),
            &target_with(vec![float_target]),
            &PipelineOptions::default(),
        );
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn extra_source_columns_warn_or_migrate() {
        let target = target_with(vec![]);
        let src = source(&[("EXTRA", LogicalType::String)]);

        let report = validate_schema(&src, &target, &PipelineOptions::default());
        assert!(report.auto_migrations.is_empty());
        assert_eq!(report.warnings.len(), 1);

        let mut opts = PipelineOptions::default();
        opts.auto_migrate = true;
        let report = validate_schema(&src, &target, &opts);
        assert_eq!(report.auto_migrations.len(), 1);
        assert_eq!(report.auto_migrations[0].native_type, "VARCHAR");

        opts.strict_schema = true;
        let report = validate_schema(&src, &target, &opts);
        assert!(report.auto_migrations.is_empty());
    }
}
