//! # Rowpipe Core - Data Transfer Engine
//!
//! This crate provides the foundational types, traits, and the execution
//! engine for rowpipe data-transfer pipelines. A pipeline pulls rows from one
//! tabular source, optionally applies an ordered chain of row transformers,
//! and writes the result to one sink.
//!
//! ## Key Components
//!
//! - **Reader/Writer Contracts**: Batch-oriented async I/O traits with
//!   explicit lifecycles and cooperative cancellation
//! - **Transformer Pipeline**: Ordered composition of row transformers with
//!   schema propagation, row-drop and row-expand semantics
//! - **Provider Descriptors**: Connection-string based discovery and
//!   construction of source and sink adapters
//! - **Options Registry**: Typed, freeze-after-bootstrap bag of provider
//!   option records
//! - **SQL Dialects**: Identifier normalization, quoting, and reserved-word
//!   handling per database family
//! - **Orchestrator**: The run driver owning batching, sampling, limits,
//!   retries, hooks, and metrics
//!
//! ## Example Usage
//!
//! ```no_run
//! use rowpipe_core::{Orchestrator, PipelineOptions, TransformerPipeline};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(
//! #     reader: Box<dyn rowpipe_core::StreamReader>,
//! #     writer: Box<dyn rowpipe_core::DataWriter>,
//! # ) -> rowpipe_core::Result<()> {
//! let orchestrator = Orchestrator::new(PipelineOptions::default());
//! let pipeline = TransformerPipeline::new(vec![]);
//! let metrics = orchestrator
//!     .run(reader, pipeline, writer, CancellationToken::new())
//!     .await?;
//! println!("{} rows written", metrics.write_count);
//! # Ok(())
//! # }
//! ```

pub mod column;
pub mod descriptor;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod options;
pub mod reader;
pub mod retry;
pub mod script;
pub mod transform;
pub mod validate;
pub mod value;
pub mod writer;

pub use column::{Column, LogicalType, TargetColumn, TargetSchema};
pub use descriptor::{CreateContext, Descriptor, DescriptorKind, DescriptorSet, Provider};
pub use dialect::{dialect, SqlDialect};
pub use engine::Orchestrator;
pub use error::{PipelineError, Result};
pub use metrics::{ExportMetrics, MetricsCollector};
pub use options::{OptionField, OptionSet, OptionsInfo, OptionsRegistry, PipelineOptions};
pub use reader::StreamReader;
pub use retry::RetryPolicy;
pub use script::{ScriptEngine, ScriptHandle, ScriptValue};
pub use transform::{DataTransformer, RowOutput, TransformerPipeline};
pub use validate::{check_value, validate_schema, ValidationReport, ValueCheck};
pub use value::{Batch, BatchRx, BatchTx, Message, Row, Value};
pub use writer::{DataWriter, WriteStrategy};
