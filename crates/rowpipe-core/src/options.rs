//! Run configuration and the process-local options registry.
//!
//! Provider option records are plain structs registered here during the
//! bootstrap phase. Their CLI flag surface is described by explicit
//! [`OptionField`] schema records owned by each provider descriptor; there is
//! no runtime introspection. After [`OptionsRegistry::freeze`] the registry
//! is read-only and safe to share across the run.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Engine configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Advisory rows per batch handed to the reader and the writer.
    pub batch_size: usize,
    /// Stop after this many written rows; 0 means unlimited.
    pub limit: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Per-row Bernoulli keep probability, applied before the transformers.
    pub sampling_rate: f64,
    pub sampling_seed: Option<u64>,
    /// Abort when the static schema validation reports errors, and raise
    /// per-value violations instead of counting them.
    pub strict_schema: bool,
    pub no_schema_validation: bool,
    /// Add missing target columns when the target exists and the schema is
    /// not strict.
    pub auto_migrate: bool,
    /// Read up to this many transformed rows, print them, and stop without
    /// writing. 0 disables the dry run.
    pub dry_run_count: usize,
    pub pre_exec: Option<String>,
    pub post_exec: Option<String>,
    pub on_error_exec: Option<String>,
    pub finally_exec: Option<String>,
    pub no_stats: bool,
    /// Write the run metrics as JSON here on completion.
    pub metrics_path: Option<PathBuf>,
    /// Seconds allowed for the reader's query phase.
    pub query_timeout: Option<u64>,
    /// Seconds allowed for `open`.
    pub connection_timeout: Option<u64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: 50_000,
            limit: 0,
            max_retries: 3,
            retry_delay_ms: 1_000,
            sampling_rate: 1.0,
            sampling_seed: None,
            strict_schema: false,
            no_schema_validation: false,
            auto_migrate: false,
            dry_run_count: 0,
            pre_exec: None,
            post_exec: None,
            on_error_exec: None,
            finally_exec: None,
            no_stats: false,
            metrics_path: None,
            query_timeout: None,
            connection_timeout: None,
        }
    }
}

/// One settable field of a provider option record.
#[derive(Debug, Clone, Copy)]
pub struct OptionField {
    pub field: &'static str,
    /// CLI flag spelling, derived from the option-set prefix (`--csv-header`).
    pub flag: &'static str,
    pub help: &'static str,
}

/// Static metadata for one option record, owned by the provider descriptor.
#[derive(Debug, Clone, Copy)]
pub struct OptionsInfo {
    /// Short prefix used to derive flag names (`csv` → `--csv-*`).
    pub prefix: &'static str,
    pub display_name: &'static str,
    pub fields: &'static [OptionField],
}

/// A provider option record that can live in the registry.
pub trait OptionSet: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Parse and assign one field from its textual form.
    fn set_field(&mut self, field: &str, raw: &str) -> Result<()>;
}

/// Process-local typed bag of option records keyed by option-set type.
///
/// Mutation happens during the configuration phase; `freeze` is called before
/// any pipeline component is constructed, after which writes are rejected.
#[derive(Default)]
pub struct OptionsRegistry {
    entries: RwLock<HashMap<TypeId, Box<dyn OptionSet>>>,
    frozen: AtomicBool,
}

impl OptionsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered record of type `T`.
    pub fn set<T: OptionSet>(&self, value: T) -> Result<()> {
        self.check_mutable()?;
        self.entries.write().insert(TypeId::of::<T>(), Box::new(value));
        Ok(())
    }

    /// The registered record of type `T`, or a fresh default.
    pub fn get<T: OptionSet + Default + Clone>(&self) -> T {
        self.entries
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|e| e.as_any().downcast_ref::<T>())
            .cloned()
            .unwrap_or_default()
    }

    /// Assign one field on the record of type `T`, inserting a default record
    /// first when none is registered yet.
    pub fn apply<T: OptionSet + Default>(&self, field: &str, raw: &str) -> Result<()> {
        self.check_mutable()?;
        let mut entries = self.entries.write();
        let entry = entries
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        entry.set_field(field, raw)
    }

    /// End the mutation phase. Idempotent.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    fn check_mutable(&self) -> Result<()> {
        if self.frozen.load(Ordering::SeqCst) {
            Err(PipelineError::config(
                "options registry is frozen; set options before pipeline construction",
            ))
        } else {
            Ok(())
        }
    }
}

/// Monomorphized option applier, referenced by provider descriptors so the
/// untyped CLI surface can reach the typed record.
pub fn apply_option<T: OptionSet + Default>(
    registry: &OptionsRegistry,
    field: &str,
    raw: &str,
) -> Result<()> {
    registry.apply::<T>(field, raw)
}

/// Parse helper for boolean option fields (`true/false/1/0/yes/no`).
pub fn parse_bool(field: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(PipelineError::config(format!(
            "invalid boolean `{raw}` for option {field}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct DemoOptions {
        header: bool,
        delimiter: String,
    }

    impl OptionSet for DemoOptions {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
        fn set_field(&mut self, field: &str, raw: &str) -> Result<()> {
            match field {
                "header" => self.header = parse_bool(field, raw)?,
                "delimiter" => self.delimiter = raw.to_string(),
                _ => {
                    return Err(PipelineError::config(format!("unknown option field {field}")));
                }
            }
            Ok(())
        }
    }

    #[test]
    fn get_returns_default_when_unset() {
        let reg = OptionsRegistry::new();
        assert_eq!(reg.get::<DemoOptions>(), DemoOptions::default());
    }

    #[test]
    fn apply_then_get_round_trips() {
        let reg = OptionsRegistry::new();
        reg.apply::<DemoOptions>("header", "yes").unwrap();
        reg.apply::<DemoOptions>("delimiter", ";").unwrap();
        let opts = reg.get::<DemoOptions>();
        assert!(opts.header);
        assert_eq!(opts.delimiter, ";");
    }

    #[test]
    fn frozen_registry_rejects_writes() {
        let reg = OptionsRegistry::new();
        reg.freeze();
        assert!(reg.set(DemoOptions::default()).is_err());
        assert!(reg.apply::<DemoOptions>("header", "true").is_err());
        // Reads still work.
        let _ = reg.get::<DemoOptions>();
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let o = PipelineOptions::default();
        assert_eq!(o.batch_size, 50_000);
        assert_eq!(o.limit, 0);
        assert_eq!(o.max_retries, 3);
        assert_eq!(o.retry_delay_ms, 1_000);
        assert_eq!(o.sampling_rate, 1.0);
        assert!(!o.strict_schema);
        assert_eq!(o.dry_run_count, 0);
    }
}
