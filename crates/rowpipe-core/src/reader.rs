//! The batch-oriented source contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::column::Column;
use crate::error::Result;
use crate::value::Batch;

/// A batch-oriented row source.
///
/// Lifecycle: `open` exactly once, then `next_batch` until it returns `None`
/// (or the run is cancelled), then `close`. `columns` may only be read after
/// `open` returns and is immutable thereafter.
///
/// Readers are I/O-bound and may suspend in `open`, in each batch pull, and
/// in `close`. Cancellation is cooperative: a cancelled reader stops pulling
/// from its source and returns [`crate::PipelineError::Cancelled`] from the
/// next await; partial batches are discarded.
#[async_trait]
pub trait StreamReader: Send {
    /// Provider name, for logging and error context.
    fn name(&self) -> &str;

    /// Establish the connection, issue the query if any, and populate the
    /// column list from the result-set metadata.
    async fn open(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Ordered column descriptors. Valid only after `open`.
    fn columns(&self) -> &[Column];

    /// Pull the next batch of at most `batch_size` rows, or `None` when the
    /// source is exhausted. Batches preserve source order and are never
    /// reordered internally; they may be smaller than `batch_size`.
    async fn next_batch(
        &mut self,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<Batch>>;

    /// Release the connection. Idempotent.
    async fn close(&mut self) -> Result<()>;
}
