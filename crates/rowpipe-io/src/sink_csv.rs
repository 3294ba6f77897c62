use std::io::Write;

use async_trait::async_trait;
use rowpipe_core::{Column, DataWriter, PipelineError, Result, Row, WriteStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::source_csv::CsvOptions;

type BoxedWriter = csv::Writer<Box<dyn Write + Send>>;

/// CSV file sink. The path may be `-` for stdout.
///
/// The output file is opened lazily at the first batch (or at `complete` for
/// an empty run), so a run that fails before producing output leaves an
/// existing target untouched even under the truncate strategy.
pub struct CsvSink {
    path: String,
    options: CsvOptions,
    strategy: WriteStrategy,
    columns: Vec<Column>,
    writer: Option<BoxedWriter>,
    completed: bool,
}

impl std::fmt::Debug for CsvSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSink")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("strategy", &self.strategy)
            .field("columns", &self.columns)
            .field("completed", &self.completed)
            .finish()
    }
}

impl CsvSink {
    pub fn new(path: String, options: CsvOptions, strategy: WriteStrategy) -> Result<Self> {
        if strategy == WriteStrategy::Upsert {
            return Err(PipelineError::config(
                "upsert requires a keyed sink; csv files have none",
            ));
        }
        Ok(Self {
            path,
            options,
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
        let (sink, write_header): (Box<dyn Write + Send>, bool) = if self.path == "-" {
            (Box::new(std::io::stdout()), self.options.header)
        } else {
            match self.strategy {
                WriteStrategy::Append => {
                    let has_rows = std::fs::metadata(&self.path)
                        .map(|m| m.len() > 0)
                        .unwrap_or(false);
                    let file = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&self.path)
                        .map_err(|e| {
                            PipelineError::io_from(format!("open {}: {e}", self.path), e)
                                .with_provider("csv")
                        })?;
                    (Box::new(file), self.options.header && !has_rows)
                }
                // Recreate degenerates to truncate for files.
                WriteStrategy::Truncate | WriteStrategy::Recreate => {
                    let file = std::fs::File::create(&self.path).map_err(|e| {
                        PipelineError::io_from(format!("create {}: {e}", self.path), e)
                            .with_provider("csv")
                    })?;
                    (Box::new(file), self.options.header)
                }
                WriteStrategy::Upsert => unreachable!("rejected at construction"),
            }
        };
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.options.delimiter as u8)
            .from_writer(sink);
        if write_header {
            writer
                .write_record(self.columns.iter().map(|c| c.name.as_str()))
                .map_err(|e| PipelineError::io_from(format!("write header: {e}"), e))?;
        }
        self.writer = Some(writer);
        Ok(())
    }
}

#[async_trait]
impl DataWriter for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn initialize(&mut self, columns: &[Column], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.columns = columns.to_vec();
        info!(path = %self.path, columns = columns.len(), strategy = ?self.strategy, "csv sink ready");
        Ok(())
    }

    async fn write_batch(&mut self, rows: &[Row], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.ensure_writer()?;
        let writer = self.writer.as_mut().expect("writer just ensured");
        for row in rows {
            let record = row.iter().map(|value| match value {
                Some(v) => v.render(),
                None => self.options.null_value.clone(),
            });
            writer
                .write_record(record)
                .map_err(|e| PipelineError::io_from(format!("csv write: {e}"), e))?;
        }
        writer
            .flush()
            .map_err(|e| PipelineError::io_from(format!("csv flush: {e}"), e))?;
        debug!(rows = rows.len(), "csv batch flushed");
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
                .map_err(|e| PipelineError::io_from(format!("csv flush: {e}"), e))?;
        }
        self.completed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowpipe_core::{LogicalType, Value};

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", LogicalType::Int64),
            Column::new("name", LogicalType::String),
        ]
    }

    fn row(id: i64, name: Option<&str>) -> Row {
        vec![
            Some(Value::Int(id)),
            name.map(|n| Value::Str(n.to_string())),
        ]
    }

    #[tokio::test]
    async fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let cancel = CancellationToken::new();
        let mut sink = CsvSink::new(
            path.display().to_string(),
            CsvOptions::default(),
            WriteStrategy::Truncate,
        )
        .unwrap();
        sink.initialize(&columns(), &cancel).await.unwrap();
        sink.write_batch(&[row(1, Some("alice")), row(2, None)], &cancel)
            .await
            .unwrap();
        sink.complete().await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "id,name\n1,alice\n2,\n");
    }

    #[tokio::test]
    async fn truncate_leaves_the_old_file_until_the_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "old,content\n").unwrap();
        let cancel = CancellationToken::new();
        let mut sink = CsvSink::new(
            path.display().to_string(),
            CsvOptions::default(),
            WriteStrategy::Truncate,
        )
        .unwrap();
        sink.initialize(&columns(), &cancel).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old,content\n");
        sink.write_batch(&[row(1, Some("x"))], &cancel).await.unwrap();
        sink.complete().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,name\n1,x\n");
    }

    #[tokio::test]
    async fn append_skips_the_header_on_nonempty_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "id,name\n1,a\n").unwrap();
        let cancel = CancellationToken::new();
        let mut sink = CsvSink::new(
            path.display().to_string(),
            CsvOptions::default(),
            WriteStrategy::Append,
        )
        .unwrap();
        sink.initialize(&columns(), &cancel).await.unwrap();
        sink.write_batch(&[row(2, Some("b"))], &cancel).await.unwrap();
        sink.complete().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,name\n1,a\n2,b\n");
    }

    #[tokio::test]
    async fn empty_run_still_produces_a_header_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let cancel = CancellationToken::new();
        let mut sink = CsvSink::new(
            path.display().to_string(),
            CsvOptions::default(),
            WriteStrategy::Truncate,
        )
        .unwrap();
        sink.initialize(&columns(), &cancel).await.unwrap();
        sink.complete().await.unwrap();
        // Idempotent.
        sink.complete().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,name\n");
    }

    #[test]
    fn upsert_is_rejected() {
        let err = CsvSink::new("x.csv".into(), CsvOptions::default(), WriteStrategy::Upsert)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }
}
