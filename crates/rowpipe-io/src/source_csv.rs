use std::io::Read;

use async_trait::async_trait;
use rowpipe_core::options::{parse_bool, OptionSet};
use rowpipe_core::{Batch, Column, LogicalType, PipelineError, Result, Row, StreamReader, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Options shared by the CSV reader and writer.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: char,
    pub header: bool,
    /// Field literal that reads and writes as null.
    pub null_value: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            header: true,
            null_value: String::new(),
        }
    }
}

impl OptionSet for CsvOptions {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
    fn set_field(&mut self, field: &str, raw: &str) -> Result<()> {
        match field {
            "delimiter" => {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => self.delimiter = c,
                    _ => {
                        return Err(PipelineError::config(format!(
                            "csv delimiter must be a single character, got `{raw}`"
                        )));
                    }
                }
            }
            "header" => self.header = parse_bool(field, raw)?,
            "null" => self.null_value = raw.to_string(),
            _ => return Err(PipelineError::config(format!("unknown option field {field}"))),
        }
        Ok(())
    }
}

type BoxedReader = csv::Reader<Box<dyn Read + Send>>;

/// CSV file source. The path may be `-` for stdin or a glob pattern; matched
/// files are read in order and must share the first file's column count.
pub struct CsvSource {
    path: String,
    options: CsvOptions,
    files: Vec<String>,
    next_file: usize,
    reader: Option<BoxedReader>,
    columns: Vec<Column>,
    /// First record of a headerless file, buffered during `open`.
    pending: Option<Row>,
}

impl CsvSource {
    pub fn new(path: String, options: CsvOptions) -> Self {
        Self {
            path,
            options,
            files: Vec::new(),
            next_file: 0,
            reader: None,
            columns: Vec::new(),
            pending: None,
        }
    }

    fn open_input(&self, path: &str) -> Result<BoxedReader> {
        let input: Box<dyn Read + Send> = if path == "-" {
            Box::new(std::io::stdin())
        } else {
            Box::new(std::fs::File::open(path).map_err(|e| {
                PipelineError::io_from(format!("open {path}: {e}"), e).with_provider("csv")
            })?)
        };
        Ok(csv::ReaderBuilder::new()
            .delimiter(self.options.delimiter as u8)
            .has_headers(self.options.header)
            .from_reader(input))
    }

    fn resolve_files(&self) -> Result<Vec<String>> {
        if self.path == "-" || !self.path.contains(&['*', '?', '['][..]) {
            return Ok(vec![self.path.clone()]);
        }
        let mut files = Vec::new();
        for entry in glob::glob(&self.path)
            .map_err(|e| PipelineError::config(format!("bad glob pattern {}: {e}", self.path)))?
        {
            let entry =
                entry.map_err(|e| PipelineError::io(format!("glob {}: {e}", self.path)))?;
            files.push(entry.display().to_string());
        }
        if files.is_empty() {
            return Err(PipelineError::config(format!("no files matched: {}", self.path)));
        }
        Ok(files)
    }

    fn record_to_row(&self, record: &csv::StringRecord) -> Result<Row> {
        if record.len() != self.columns.len() {
            return Err(PipelineError::io(format!(
                "row has {} fields, expected {}",
                record.len(),
                self.columns.len()
            )));
        }
        Ok(record
            .iter()
            .map(|field| {
                if field == self.options.null_value {
                    None
                } else {
                    Some(Value::Str(field.to_string()))
                }
            })
            .collect())
    }

    /// Open the next matched file, skipping (and arity-checking) its header.
    fn advance_file(&mut self) -> Result<bool> {
        if self.next_file >= self.files.len() {
            self.reader = None;
            return Ok(false);
        }
        let path = self.files[self.next_file].clone();
        self.next_file += 1;
        let mut reader = self.open_input(&path)?;
        if self.options.header {
            let headers = reader
                .headers()
                .map_err(|e| PipelineError::io_from(format!("read header of {path}: {e}"), e))?;
            if headers.len() != self.columns.len() {
                return Err(PipelineError::io(format!(
                    "{path} has {} columns, expected {}",
                    headers.len(),
                    self.columns.len()
                )));
            }
        }
        self.reader = Some(reader);
        Ok(true)
    }
}

#[async_trait]
impl StreamReader for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn open(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.files = self.resolve_files()?;
        let first = self.files[0].clone();
        self.next_file = 1;
        let mut reader = self.open_input(&first)?;

        // CSV carries no type information; every column is a nullable string.
        if self.options.header {
            let headers = reader
                .headers()
                .map_err(|e| PipelineError::io_from(format!("read header of {first}: {e}"), e))?;
            self.columns = headers
                .iter()
                .map(|name| Column::new(name, LogicalType::String))
                .collect();
        } else {
            let mut record = csv::StringRecord::new();
            let got = reader
                .read_record(&mut record)
                .map_err(|e| PipelineError::io_from(format!("read {first}: {e}"), e))?;
            if got {
                self.columns = (0..record.len())
                    .map(|i| Column::new(format!("col_{i}"), LogicalType::String))
                    .collect();
                self.pending = Some(self.record_to_row(&record)?);
            } else {
                warn!(path = %first, "headerless csv file is empty, no columns inferred");
            }
        }
        info!(path = %first, files = self.files.len(), columns = self.columns.len(), "csv source opened");
        self.reader = Some(reader);
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
        let mut record = csv::StringRecord::new();
        while rows.len() < batch_size {
            let Some(reader) = self.reader.as_mut() else { break };
            match reader.read_record(&mut record) {
                Ok(true) => rows.push(self.record_to_row(&record)?),
                Ok(false) => {
                    if !self.advance_file()? {
                        break;
                    }
                }
                Err(e) => {
                    return Err(PipelineError::io_from(format!("csv read: {e}"), e));
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
        self.reader = None;
        self.next_file = self.files.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.display().to_string()
    }

    async fn read_all(source: &mut CsvSource, batch_size: usize) -> Vec<Row> {
        let cancel = CancellationToken::new();
        source.open(&cancel).await.unwrap();
        let mut rows = Vec::new();
        while let Some(batch) = source.next_batch(batch_size, &cancel).await.unwrap() {
            rows.extend(batch);
        }
        source.close().await.unwrap();
        rows
    }

    #[tokio::test]
    async fn reads_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.csv", "id,name\n1,alice\n2,\n");
        let mut source = CsvSource::new(path, CsvOptions::default());
        let rows = read_all(&mut source, 10).await;
        assert_eq!(source.columns().len(), 2);
        assert_eq!(source.columns()[1].name, "name");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], Some(Value::Str("alice".into())));
        // The default null literal is the empty string.
        assert_eq!(rows[1][1], None);
    }

    #[tokio::test]
    async fn headerless_files_get_positional_column_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.csv", "1,alice\n2,bob\n");
        let mut options = CsvOptions::default();
        options.header = false;
        let mut source = CsvSource::new(path, options);
        let rows = read_all(&mut source, 1).await;
        assert_eq!(source.columns()[0].name, "col_0");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Some(Value::Str("1".into())));
    }

    #[tokio::test]
    async fn glob_reads_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "p1.csv", "id\n1\n");
        write_file(&dir, "p2.csv", "id\n2\n");
        let pattern = dir.path().join("p*.csv").display().to_string();
        let mut source = CsvSource::new(pattern, CsvOptions::default());
        let rows = read_all(&mut source, 10).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Some(Value::Str("1".into())));
        assert_eq!(rows[1][0], Some(Value::Str("2".into())));
    }

    #[tokio::test]
    async fn custom_delimiter_and_null_literal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.csv", "id;city\n1;\\N\n");
        let mut options = CsvOptions::default();
        options.set_field("delimiter", ";").unwrap();
        options.set_field("null", "\\N").unwrap();
        let mut source = CsvSource::new(path, options);
        let rows = read_all(&mut source, 10).await;
        assert_eq!(rows[0][1], None);
    }

    #[tokio::test]
    async fn missing_glob_match_is_a_config_error() {
        let mut source = CsvSource::new("/nonexistent/dir/*.csv".into(), CsvOptions::default());
        let err = source.open(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }
}
