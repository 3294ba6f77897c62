//! Script-backed transformers: filter, expand, and the generic map script.

use rowpipe_core::{
    Column, DataTransformer, LogicalType, PipelineError, Result, Row, RowOutput, ScriptEngine,
    ScriptHandle, ScriptValue, Value,
};

fn row_view<'a>(columns: &'a [Column], row: &'a Row) -> Vec<(&'a str, Option<&'a Value>)> {
    columns
        .iter()
        .zip(row)
        .map(|(c, v)| (c.name.as_str(), v.as_ref()))
        .collect()
}

/// Build a positional row from a row-shaped script result. Keys outside the
/// column list are ignored; absent keys read as null.
fn positional_row(columns: &[Column], fields: &[(String, Option<Value>)]) -> Row {
    columns
        .iter()
        .map(|c| {
            fields
                .iter()
                .find(|(name, _)| name == &c.name)
                .and_then(|(_, v)| v.clone())
        })
        .collect()
}

/// Keeps rows for which every script returns truthy.
pub struct FilterTransformer {
    engine: Box<dyn ScriptEngine>,
    sources: Vec<String>,
    handles: Vec<ScriptHandle>,
    columns: Vec<Column>,
}

impl FilterTransformer {
    pub fn new(engine: Box<dyn ScriptEngine>, sources: Vec<String>) -> Self {
        Self {
            engine,
            sources,
            handles: Vec::new(),
            columns: Vec::new(),
        }
    }
}

impl DataTransformer for FilterTransformer {
    fn name(&self) -> &str {
        "filter"
    }

    fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
        self.handles = self
            .sources
            .iter()
            .map(|s| self.engine.compile(s))
            .collect::<Result<_>>()?;
        self.columns = columns.to_vec();
        Ok(columns.to_vec())
    }

    fn transform(&mut self, row: Row) -> Result<RowOutput> {
        let view = row_view(&self.columns, &row);
        for handle in &self.handles {
            if !self.engine.eval(*handle, &view)?.is_truthy() {
                return Ok(RowOutput::Drop);
            }
        }
        drop(view);
        Ok(RowOutput::Row(row))
    }

    fn teardown(&mut self) {
        self.handles.clear();
    }
}

/// Replaces each input row by the rows a script returns, in script order.
///
/// Extra output columns must be declared up front; the script cannot widen
/// the schema at run time.
pub struct ExpandTransformer {
    engine: Box<dyn ScriptEngine>,
    source: String,
    extra_columns: Vec<String>,
    handle: Option<ScriptHandle>,
    columns: Vec<Column>,
}

impl ExpandTransformer {
    pub fn new(engine: Box<dyn ScriptEngine>, source: String, extra_columns: Vec<String>) -> Self {
        Self {
            engine,
            source,
            extra_columns,
            handle: None,
            columns: Vec::new(),
        }
    }
}

impl DataTransformer for ExpandTransformer {
    fn name(&self) -> &str {
        "expand"
    }

    fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
        self.handle = Some(self.engine.compile(&self.source)?);
        let mut out = columns.to_vec();
        for name in &self.extra_columns {
            if out.iter().any(|c| &c.name == name) {
                continue;
            }
            out.push(Column::new(name.clone(), LogicalType::String));
        }
        self.columns = out.clone();
        Ok(out)
    }

    fn transform(&mut self, mut row: Row) -> Result<RowOutput> {
        row.resize(self.columns.len(), None);
        let handle = self.handle.expect("initialized");
        let view = row_view(&self.columns, &row);
        let result = self.engine.eval(handle, &view)?;
        drop(view);
        let rows = match result {
            ScriptValue::Rows(rows) => rows,
            ScriptValue::Row(fields) => vec![fields],
            ScriptValue::Null => Vec::new(),
            other => {
                return Err(PipelineError::script(format!(
                    "expand script must return an array of row-shaped objects, got {other:?}"
                )));
            }
        };
        Ok(RowOutput::Expand(
            rows.iter()
                .map(|fields| positional_row(&self.columns, fields))
                .collect(),
        ))
    }

    fn teardown(&mut self) {
        self.handle = None;
    }
}

/// Generic map script: the returned row-shaped object overwrites the named
/// columns; a nil result drops the row.
pub struct ScriptTransformer {
    engine: Box<dyn ScriptEngine>,
    source: String,
    handle: Option<ScriptHandle>,
    columns: Vec<Column>,
}

impl ScriptTransformer {
    pub fn new(engine: Box<dyn ScriptEngine>, source: String) -> Self {
        Self {
            engine,
            source,
            handle: None,
            columns: Vec::new(),
        }
    }
}

impl DataTransformer for ScriptTransformer {
    fn name(&self) -> &str {
        "script"
    }

    fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
        self.handle = Some(self.engine.compile(&self.source)?);
        self.columns = columns.to_vec();
        Ok(columns.to_vec())
    }

    fn transform(&mut self, mut row: Row) -> Result<RowOutput> {
        let handle = self.handle.expect("initialized");
        let view = row_view(&self.columns, &row);
        let result = self.engine.eval(handle, &view)?;
        drop(view);
        match result {
            ScriptValue::Null => Ok(RowOutput::Drop),
            ScriptValue::Row(fields) => {
                for (name, value) in fields {
                    if let Some(index) = self.columns.iter().position(|c| c.name == name) {
                        row[index] = value;
                    }
                }
                Ok(RowOutput::Row(row))
            }
            other => Err(PipelineError::script(format!(
                "map script must return a row-shaped object or nil, got {other:?}"
            ))),
        }
    }

    fn teardown(&mut self) {
        self.handle = None;
    }
}
