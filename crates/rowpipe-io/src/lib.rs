//! # Rowpipe I/O - Reference Source and Sink Adapters
//!
//! This crate provides the file-based reference adapters for rowpipe
//! pipelines, plus a generated-data source for smoke runs:
//!
//! - **CSV**: reader and writer, with delimiter/header/null options and glob
//!   support on the read side
//! - **JSON-Lines**: reader and writer with schema inference from the first
//!   record
//! - **Generate**: `generate:N` emits N rows of a fixed demo schema
//!
//! Connection strings match by suffix (`data.csv`), by scheme prefix
//! (`csv:/path/to/file`), or by the bare scheme name meaning stdin/stdout
//! (`csv` is shorthand for `csv:-`).

pub mod sink_csv;
pub mod sink_jsonl;
pub mod source_csv;
pub mod source_generate;
pub mod source_jsonl;

use rowpipe_core::descriptor::{CreateContext, Descriptor, DescriptorKind, Provider};
use rowpipe_core::options::{apply_option, OptionField, OptionsInfo, OptionsRegistry};
use rowpipe_core::{PipelineError, Result};

pub use sink_csv::CsvSink;
pub use sink_jsonl::JsonlSink;
pub use source_csv::{CsvOptions, CsvSource};
pub use source_generate::GenerateSource;
pub use source_jsonl::JsonlSource;

/// Resolve a connection string against a scheme: `csv` -> `-` (stdio),
/// `csv:path` -> `path`, anything else is taken verbatim.
pub(crate) fn resolve_path(connection_string: &str, scheme: &str) -> String {
    if connection_string == scheme {
        return "-".to_string();
    }
    match connection_string.strip_prefix(scheme).and_then(|r| r.strip_prefix(':')) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        Some(_) => "-".to_string(),
        None => connection_string.to_string(),
    }
}

fn accepts_csv(s: &str) -> bool {
    s == "csv" || s.starts_with("csv:") || s.ends_with(".csv")
}

fn accepts_jsonl(s: &str) -> bool {
    s == "jsonl" || s.starts_with("jsonl:") || s.ends_with(".jsonl")
}

fn accepts_generate(s: &str) -> bool {
    s.starts_with("generate:")
}

const CSV_FIELDS: &[OptionField] = &[
    OptionField {
        field: "delimiter",
        flag: "--csv-delimiter",
        help: "Field delimiter, a single character",
    },
    OptionField {
        field: "header",
        flag: "--csv-header",
        help: "Whether files carry a header row",
    },
    OptionField {
        field: "null",
        flag: "--csv-null",
        help: "Literal that reads and writes as null",
    },
];

const CSV_OPTIONS: OptionsInfo = OptionsInfo {
    prefix: "csv",
    display_name: "CSV files",
    fields: CSV_FIELDS,
};

const NO_FIELDS: &[OptionField] = &[];

fn no_options(_: &OptionsRegistry, field: &str, _: &str) -> Result<()> {
    Err(PipelineError::config(format!("unknown option field {field}")))
}

fn create_csv_reader(ctx: &CreateContext<'_>) -> Result<Provider> {
    let options = ctx.registry.get::<CsvOptions>();
    let path = resolve_path(ctx.connection_string, "csv");
    Ok(Provider::Reader(Box::new(CsvSource::new(path, options))))
}

fn create_csv_writer(ctx: &CreateContext<'_>) -> Result<Provider> {
    let options = ctx.registry.get::<CsvOptions>();
    let path = resolve_path(ctx.connection_string, "csv");
    Ok(Provider::Writer(Box::new(CsvSink::new(path, options, ctx.strategy)?)))
}

fn create_jsonl_reader(ctx: &CreateContext<'_>) -> Result<Provider> {
    let path = resolve_path(ctx.connection_string, "jsonl");
    Ok(Provider::Reader(Box::new(JsonlSource::new(path))))
}

fn create_jsonl_writer(ctx: &CreateContext<'_>) -> Result<Provider> {
    let path = resolve_path(ctx.connection_string, "jsonl");
    Ok(Provider::Writer(Box::new(JsonlSink::new(path, ctx.strategy)?)))
}

fn create_generate_reader(ctx: &CreateContext<'_>) -> Result<Provider> {
    let count = ctx
        .connection_string
        .strip_prefix("generate:")
        .unwrap_or_default()
        .parse::<u64>()
        .map_err(|_| {
            PipelineError::config(format!(
                "generate source expects `generate:<rows>`, got `{}`",
                ctx.connection_string
            ))
        })?;
    Ok(Provider::Reader(Box::new(GenerateSource::new(count))))
}

/// All adapter descriptors of this crate, in registration order.
pub fn descriptors() -> Vec<Descriptor> {
    vec![
        Descriptor {
            kind: DescriptorKind::Reader,
            name: "csv",
            requires_query: false,
            options: CSV_OPTIONS,
            accepts: accepts_csv,
            factory: create_csv_reader,
            apply_option: apply_option::<CsvOptions>,
        },
        Descriptor {
            kind: DescriptorKind::Writer,
            name: "csv",
            requires_query: false,
            options: CSV_OPTIONS,
            accepts: accepts_csv,
            factory: create_csv_writer,
            apply_option: apply_option::<CsvOptions>,
        },
        Descriptor {
            kind: DescriptorKind::Reader,
            name: "jsonl",
            requires_query: false,
            options: OptionsInfo {
                prefix: "jsonl",
                display_name: "JSON-Lines files",
                fields: NO_FIELDS,
            },
            accepts: accepts_jsonl,
            factory: create_jsonl_reader,
            apply_option: no_options,
        },
        Descriptor {
            kind: DescriptorKind::Writer,
            name: "jsonl",
            requires_query: false,
            options: OptionsInfo {
                prefix: "jsonl",
                display_name: "JSON-Lines files",
                fields: NO_FIELDS,
            },
            accepts: accepts_jsonl,
            factory: create_jsonl_writer,
            apply_option: no_options,
        },
        Descriptor {
            kind: DescriptorKind::Reader,
            name: "generate",
            requires_query: false,
            options: OptionsInfo {
                prefix: "generate",
                display_name: "Generated demo rows",
                fields: NO_FIELDS,
            },
            accepts: accepts_generate,
            factory: create_generate_reader,
            apply_option: no_options,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowpipe_core::descriptor::DescriptorSet;
    use rowpipe_core::writer::WriteStrategy;

    fn set() -> DescriptorSet {
        let mut s = DescriptorSet::new();
        s.extend(descriptors());
        s
    }

    #[test]
    fn path_resolution() {
        assert_eq!(resolve_path("csv", "csv"), "-");
        assert_eq!(resolve_path("csv:-", "csv"), "-");
        assert_eq!(resolve_path("csv:/tmp/a.csv", "csv"), "/tmp/a.csv");
        assert_eq!(resolve_path("data.csv", "csv"), "data.csv");
    }

    #[test]
    fn matching_by_suffix_scheme_and_bare_name() {
        let s = set();
        for conn in ["data.csv", "csv:whatever", "csv"] {
            assert_eq!(s.find(DescriptorKind::Reader, conn).unwrap().name, "csv");
        }
        assert_eq!(s.find(DescriptorKind::Reader, "x.jsonl").unwrap().name, "jsonl");
        assert_eq!(s.find(DescriptorKind::Reader, "generate:10").unwrap().name, "generate");
        assert!(s.find(DescriptorKind::Reader, "x.parquet").is_none());
        assert!(s.find(DescriptorKind::Writer, "generate:10").is_none());
    }

    #[test]
    fn bad_generate_count_is_a_config_error() {
        let s = set();
        let registry = OptionsRegistry::new();
        let ctx = CreateContext {
            connection_string: "generate:lots",
            query: None,
            strategy: WriteStrategy::Append,
            registry: &registry,
        };
        let err = match s.create_reader(&ctx) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("provider-construction"));
    }
}
