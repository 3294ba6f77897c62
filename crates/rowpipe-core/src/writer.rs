//! The batch-oriented sink contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::column::{Column, TargetColumn, TargetSchema};
use crate::error::{PipelineError, Result};
use crate::value::Row;

/// How a writer reconciles incoming rows with existing sink contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteStrategy {
    /// Append to whatever is already there.
    #[default]
    Append,
    /// Delete all existing rows before the first batch, atomically with it.
    Truncate,
    /// Drop and re-create the target from the source schema, then append.
    Recreate,
    /// MERGE/ON CONFLICT semantics over a primary-key list.
    Upsert,
}

impl std::str::FromStr for WriteStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(WriteStrategy::Append),
            "truncate" => Ok(WriteStrategy::Truncate),
            "recreate" => Ok(WriteStrategy::Recreate),
            "upsert" => Ok(WriteStrategy::Upsert),
            _ => Err(PipelineError::config(format!("unknown write strategy `{s}`"))),
        }
    }
}

/// A batch-oriented row sink.
///
/// Lifecycle: `initialize` exactly once with the final column list, zero or
/// more `write_batch` calls, then `complete` exactly once (idempotent).
///
/// A failed `write_batch` leaves the sink in the state of the last committed
/// batch; earlier batches are never rolled back.
#[async_trait]
pub trait DataWriter: Send {
    /// Provider name, for logging and error context.
    fn name(&self) -> &str;

    /// Prepare the sink for the given columns: create or migrate the target,
    /// apply the write strategy's preamble.
    async fn initialize(&mut self, columns: &[Column], cancel: &CancellationToken) -> Result<()>;

    /// Shape of the existing target, when the sink has one. Drives the
    /// static schema validation and the per-value guards; file sinks return
    /// `None`.
    fn target_schema(&self) -> Option<&TargetSchema> {
        None
    }

    /// Add the given columns to an existing target (`auto_migrate`). Sinks
    /// without migration support accept the call as a no-op.
    async fn apply_migrations(
        &mut self,
        _columns: &[TargetColumn],
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Ok(())
    }

    /// Append one batch. For relational sinks this is a single parameterized
    /// multi-row insert committed at the batch boundary; file sinks buffer
    /// and flush per batch.
    async fn write_batch(&mut self, rows: &[Row], cancel: &CancellationToken) -> Result<()>;

    /// Flush buffers, commit the trailing transaction, release the
    /// connection. Idempotent.
    async fn complete(&mut self) -> Result<()>;

    /// Run a pre/post/error hook against this sink's command surface.
    ///
    /// Relational adapters override this with SQL execution; the default is
    /// the host shell, which is the command surface file sinks have.
    async fn execute_command(&mut self, command: &str, cancel: &CancellationToken) -> Result<()> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .spawn()
            .map_err(|e| PipelineError::io_from(format!("hook spawn failed: {e}"), e))?;
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Err(PipelineError::Cancelled)
            }
            status = child.wait() => {
                let status = status
                    .map_err(|e| PipelineError::io_from(format!("hook wait failed: {e}"), e))?;
                if status.success() {
                    Ok(())
                } else {
                    Err(PipelineError::io(format!("hook `{command}` exited with {status}")))
                }
            }
        }
    }
}
