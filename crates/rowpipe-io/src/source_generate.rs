use async_trait::async_trait;
use rowpipe_core::{Batch, Column, LogicalType, PipelineError, Result, StreamReader, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Deterministic demo-row source (`generate:N`): N rows of a fixed schema,
/// useful for smoke runs and tests that need a source without fixtures.
pub struct GenerateSource {
    count: u64,
    emitted: u64,
    columns: Vec<Column>,
}

impl GenerateSource {
    pub fn new(count: u64) -> Self {
        Self {
            count,
            emitted: 0,
            columns: Vec::new(),
        }
    }
}

#[async_trait]
impl StreamReader for GenerateSource {
    fn name(&self) -> &str {
        "generate"
    }

    async fn open(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.columns = vec![
            Column::new("id", LogicalType::Int64).not_null(),
            Column::new("name", LogicalType::String),
            Column::new("score", LogicalType::Float64),
        ];
        info!(rows = self.count, "generate source opened");
        Ok(())
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn next_batch(
        &mut self,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<Batch>> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if self.emitted >= self.count {
            return Ok(None);
        }
        let end = (self.emitted + batch_size as u64).min(self.count);
        let batch: Batch = (self.emitted..end)
            .map(|i| {
                vec![
                    Some(Value::Int(i as i64)),
                    Some(Value::Str(format!("user-{i}"))),
                    Some(Value::Float(i as f64 / 8.0)),
                ]
            })
            .collect();
        self.emitted = end;
        Ok(Some(batch))
    }

    async fn close(&mut self) -> Result<()> {
        self.emitted = self.count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_exactly_count_rows_in_batches() {
        let mut source = GenerateSource::new(7);
        let cancel = CancellationToken::new();
        source.open(&cancel).await.unwrap();
        assert_eq!(source.columns().len(), 3);
        let mut total = 0;
        let mut sizes = Vec::new();
        while let Some(batch) = source.next_batch(3, &cancel).await.unwrap() {
            sizes.push(batch.len());
            total += batch.len();
        }
        assert_eq!(total, 7);
        assert_eq!(sizes, vec![3, 3, 1]);
    }
}
