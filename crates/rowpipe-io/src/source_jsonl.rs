use std::io::{BufRead, BufReader, Read};

use async_trait::async_trait;
use rowpipe_core::{Batch, Column, LogicalType, PipelineError, Result, Row, StreamReader, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type BoxedLines = std::io::Lines<BufReader<Box<dyn Read + Send>>>;

/// JSON-Lines source: one JSON object per line.
///
/// The column list is inferred from the first record (keys in lexicographic
/// order). Later records may omit keys (read as null); keys outside the
/// inferred list are ignored.
pub struct JsonlSource {
    path: String,
    lines: Option<BoxedLines>,
    columns: Vec<Column>,
    pending: Option<Row>,
    line_no: u64,
}

impl JsonlSource {
    pub fn new(path: String) -> Self {
        Self {
            path,
            lines: None,
            columns: Vec::new(),
            pending: None,
            line_no: 0,
        }
    }

    fn object_to_row(&self, object: &serde_json::Map<String, serde_json::Value>) -> Row {
        self.columns
            .iter()
            .map(|column| object.get(&column.name).and_then(json_to_value))
            .collect()
    }

    fn parse_line(&self, line: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
        let parsed: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            PipelineError::io(format!("{}:{}: invalid json: {e}", self.path, self.line_no))
        })?;
        match parsed {
            serde_json::Value::Object(object) => Ok(object),
            other => Err(PipelineError::io(format!(
                "{}:{}: expected a json object per line, got {}",
                self.path,
                self.line_no,
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn json_to_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else {
                Some(Value::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        serde_json::Value::String(s) => Some(Value::Str(s.clone())),
        // Nested structures carry through as their JSON text.
        other => Some(Value::Str(other.to_string())),
    }
}

fn infer_type(name: &str, value: &serde_json::Value) -> LogicalType {
    match value {
        serde_json::Value::Bool(_) => LogicalType::Bool,
        serde_json::Value::Number(n) if n.is_i64() => LogicalType::Int64,
        serde_json::Value::Number(_) => LogicalType::Float64,
        serde_json::Value::String(_) => LogicalType::String,
        other => {
            warn!(column = name, "cannot infer a type from {}, falling back to string", json_kind(other));
            LogicalType::String
        }
    }
}

#[async_trait]
impl StreamReader for JsonlSource {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn open(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let input: Box<dyn Read + Send> = if self.path == "-" {
            Box::new(std::io::stdin())
        } else {
            Box::new(std::fs::File::open(&self.path).map_err(|e| {
                PipelineError::io_from(format!("open {}: {e}", self.path), e).with_provider("jsonl")
            })?)
        };
        let mut lines = BufReader::new(input).lines();

        // Infer the schema from the first non-blank record.
        loop {
            match lines.next() {
                None => {
                    warn!(path = %self.path, "jsonl file is empty, no columns inferred");
                    break;
                }
                Some(Err(e)) => {
                    return Err(PipelineError::io_from(format!("read {}: {e}", self.path), e));
                }
                Some(Ok(line)) => {
                    self.line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let object = self.parse_line(&line)?;
                    self.columns = object
                        .iter()
                        .map(|(name, value)| Column::new(name.clone(), infer_type(name, value)))
                        .collect();
                    self.pending = Some(self.object_to_row(&object));
                    break;
                }
            }
        }
        info!(path = %self.path, columns = self.columns.len(), "jsonl source opened");
        self.lines = Some(lines);
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
        let mut rows: Batch = Vec::new();
        if let Some(pending) = self.pending.take() {
            rows.push(pending);
        }
        while rows.len() < batch_size {
            let Some(lines) = self.lines.as_mut() else { break };
            match lines.next() {
                None => {
                    self.lines = None;
                    break;
                }
                Some(Err(e)) => {
                    return Err(PipelineError::io_from(format!("read {}: {e}", self.path), e));
                }
                Some(Ok(line)) => {
                    self.line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let object = self.parse_line(&line)?;
                    rows.push(self.object_to_row(&object));
                }
            }
        }
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.lines = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_for(dir: &tempfile::TempDir, contents: &str) -> JsonlSource {
        let path = dir.path().join("in.jsonl");
        std::fs::write(&path, contents).unwrap();
        JsonlSource::new(path.display().to_string())
    }

    async fn read_all(source: &mut JsonlSource) -> Vec<Row> {
        let cancel = CancellationToken::new();
        source.open(&cancel).await.unwrap();
        let mut rows = Vec::new();
        while let Some(batch) = source.next_batch(100, &cancel).await.unwrap() {
            rows.extend(batch);
        }
        rows
    }

    #[tokio::test]
    async fn infers_types_from_the_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = source_for(
            &dir,
            "{\"age\":25,\"name\":\"a\",\"ok\":true,\"score\":1.5}\n",
        );
        read_all(&mut source).await;
        let types: Vec<LogicalType> = source.columns().iter().map(|c| c.logical_type).collect();
        assert_eq!(
            types,
            vec![
                LogicalType::Int64,
                LogicalType::String,
                LogicalType::Bool,
                LogicalType::Float64
            ]
        );
    }

    #[tokio::test]
    async fn missing_keys_read_as_null_and_extra_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = source_for(
            &dir,
            "{\"a\":1,\"b\":\"x\"}\n\n{\"a\":2,\"c\":9}\n",
        );
        let rows = read_all(&mut source).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], Some(Value::Int(2)));
        assert_eq!(rows[1][1], None);
        assert_eq!(rows[1].len(), 2);
    }

    #[tokio::test]
    async fn non_object_lines_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = source_for(&dir, "[1,2,3]\n");
        let err = source.open(&CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("expected a json object"));
    }

    #[tokio::test]
    async fn empty_file_yields_no_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = source_for(&dir, "");
        let cancel = CancellationToken::new();
        source.open(&cancel).await.unwrap();
        assert!(source.columns().is_empty());
        assert!(source.next_batch(10, &cancel).await.unwrap().is_none());
    }
}
