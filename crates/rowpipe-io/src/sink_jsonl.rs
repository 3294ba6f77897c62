use std::io::{BufWriter, Write};

use async_trait::async_trait;
use rowpipe_core::{Column, DataWriter, PipelineError, Result, Row, Value, WriteStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type BoxedWriter = BufWriter<Box<dyn Write + Send>>;

/// JSON-Lines sink: one JSON object per row. The path may be `-` for stdout.
///
/// Like the CSV sink, the output file is opened lazily at the first batch so
/// an early failure leaves an existing target untouched.
pub struct JsonlSink {
    path: String,
    strategy: WriteStrategy,
    columns: Vec<Column>,
    writer: Option<BoxedWriter>,
    completed: bool,
}

impl JsonlSink {
    pub fn new(path: String, strategy: WriteStrategy) -> Result<Self> {
        if strategy == WriteStrategy::Upsert {
            return Err(PipelineError::config(
                "upsert requires a keyed sink; jsonl files have none",
            ));
        }
        Ok(Self {
            path,
            strategy,
            columns: Vec::new(),
            writer: None,
            completed: false,
        })
    }

    fn ensure_writer(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let sink: Box<dyn Write + Send> = if self.path == "-" {
            Box::new(std::io::stdout())
        } else {
            let file = match self.strategy {
                WriteStrategy::Append => std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path),
                WriteStrategy::Truncate | WriteStrategy::Recreate => {
                    std::fs::File::create(&self.path)
                }
                WriteStrategy::Upsert => unreachable!("rejected at construction"),
            }
            .map_err(|e| {
                PipelineError::io_from(format!("open {}: {e}", self.path), e)
                    .with_provider("jsonl")
            })?;
            Box::new(file)
        };
        self.writer = Some(BufWriter::new(sink));
        Ok(())
    }

    fn row_to_json(&self, row: &Row) -> serde_json::Value {
        let mut object = serde_json::Map::with_capacity(self.columns.len());
        for (column, value) in self.columns.iter().zip(row) {
            object.insert(column.name.clone(), value_to_json(value.as_ref()));
        }
        serde_json::Value::Object(object)
    }
}

fn value_to_json(value: Option<&Value>) -> serde_json::Value {
    match value {
        None => serde_json::Value::Null,
        Some(Value::Int(v)) => serde_json::Value::from(*v),
        Some(Value::Float(v)) => serde_json::Value::from(*v),
        Some(Value::Bool(v)) => serde_json::Value::from(*v),
        Some(other) => serde_json::Value::from(other.render()),
    }
}

#[async_trait]
impl DataWriter for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn initialize(&mut self, columns: &[Column], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.columns = columns.to_vec();
        info!(path = %self.path, columns = columns.len(), strategy = ?self.strategy, "jsonl sink ready");
        Ok(())
    }

    async fn write_batch(&mut self, rows: &[Row], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.ensure_writer()?;
        for row in rows {
            let line = serde_json::to_string(&self.row_to_json(row))
                .map_err(|e| PipelineError::io_from("serialize row", e))?;
            let writer = self.writer.as_mut().expect("writer just ensured");
            writeln!(writer, "{line}")
                .map_err(|e| PipelineError::io_from(format!("jsonl write: {e}"), e))?;
        }
        let writer = self.writer.as_mut().expect("writer just ensured");
        writer
            .flush()
            .map_err(|e| PipelineError::io_from(format!("jsonl flush: {e}"), e))?;
        debug!(rows = rows.len(), "jsonl batch flushed");
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        if self.completed {
            return Ok(());
        }
        self.ensure_writer()?;
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| PipelineError::io_from(format!("jsonl flush: {e}"), e))?;
        }
        self.completed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowpipe_core::LogicalType;

    #[tokio::test]
    async fn writes_one_object_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let cancel = CancellationToken::new();
        let mut sink =
            JsonlSink::new(path.display().to_string(), WriteStrategy::Truncate).unwrap();
        let columns = vec![
            Column::new("id", LogicalType::Int64),
            Column::new("name", LogicalType::String),
        ];
        sink.initialize(&columns, &cancel).await.unwrap();
        sink.write_batch(
            &[
                vec![Some(Value::Int(1)), Some(Value::Str("a".into()))],
                vec![Some(Value::Int(2)), None],
            ],
            &cancel,
        )
        .await
        .unwrap();
        sink.complete().await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"name\":null}\n");
    }

    #[tokio::test]
    async fn complete_is_idempotent_and_creates_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let cancel = CancellationToken::new();
        let mut sink =
            JsonlSink::new(path.display().to_string(), WriteStrategy::Truncate).unwrap();
        sink.initialize(&[], &cancel).await.unwrap();
        sink.complete().await.unwrap();
        sink.complete().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
