//! Row transformers and their ordered composition.

use crate::column::Column;
use crate::error::Result;
use crate::value::Row;

/// What one transformer produced for one input row.
///
/// Map-style transformers return `Row` or `Drop`; expand-style transformers
/// return `Expand`. The pipeline flat-maps expansions and short-circuits
/// drops.
#[derive(Debug)]
pub enum RowOutput {
    Row(Row),
    Drop,
    Expand(Vec<Row>),
}

/// A pipeline stage mapping each input row to zero or more output rows,
/// possibly reshaping the schema.
///
/// `initialize` is called exactly once, before any row; the returned column
/// list is authoritative for downstream stages. Stateless after init apart
/// from counters and engine handles.
pub trait DataTransformer: Send {
    /// Stable name for metrics and logging.
    fn name(&self) -> &str;

    /// Resolve column positions and produce the output column list. May add,
    /// drop or rename columns; a rename keeps its positional index.
    fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>>;

    fn transform(&mut self, row: Row) -> Result<RowOutput>;

    /// Release owned resources (script handles). Called in reverse pipeline
    /// order.
    fn teardown(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
struct StageCounter {
    processed: u64,
    emitted: u64,
}

/// Ordered composition of transformers into a single effective transformer.
#[derive(Default)]
pub struct TransformerPipeline {
    stages: Vec<Box<dyn DataTransformer>>,
    counters: Vec<StageCounter>,
    columns: Vec<Column>,
    initialized: bool,
}

impl TransformerPipeline {
    pub fn new(stages: Vec<Box<dyn DataTransformer>>) -> Self {
        let counters = vec![StageCounter::default(); stages.len()];
        Self {
            stages,
            counters,
            columns: Vec::new(),
            initialized: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Initialize every stage in order, threading the evolving column list.
    pub fn initialize(&mut self, columns: &[Column]) -> Result<&[Column]> {
        debug_assert!(!self.initialized, "pipeline initialized twice");
        let mut current = columns.to_vec();
        for stage in &mut self.stages {
            current = stage.initialize(&current)?;
        }
        self.columns = current;
        self.initialized = true;
        Ok(&self.columns)
    }

    /// Column list after the last stage. Valid only after `initialize`.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Run one input row through every stage. Values at positions added by
    /// an upstream stage are carried forward positionally.
    pub fn apply(&mut self, row: Row) -> Result<Vec<Row>> {
        let mut current = vec![row];
        for (stage, counter) in self.stages.iter_mut().zip(self.counters.iter_mut()) {
            let mut next = Vec::with_capacity(current.len());
            for r in current {
                counter.processed += 1;
                match stage.transform(r)? {
                    RowOutput::Row(out) => next.push(out),
                    RowOutput::Drop => {}
                    RowOutput::Expand(rows) => next.extend(rows),
                }
            }
            counter.emitted += next.len() as u64;
            if next.is_empty() {
                return Ok(next);
            }
            current = next;
        }
        Ok(current)
    }

    /// Rows emitted per stage, in pipeline order.
    pub fn stats(&self) -> Vec<(String, u64)> {
        self.stages
            .iter()
            .zip(&self.counters)
            .map(|(s, c)| (s.name().to_string(), c.emitted))
            .collect()
    }

    /// Tear stages down in reverse order.
    pub fn teardown(&mut self) {
        for stage in self.stages.iter_mut().rev() {
            stage.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::LogicalType;
    use crate::value::Value;

    /// Appends a constant column named `tag`.
    struct AddTag;

    impl DataTransformer for AddTag {
        fn name(&self) -> &str {
            "add_tag"
        }
        fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
            let mut out = columns.to_vec();
            out.push(Column::new("tag", LogicalType::String));
            Ok(out)
        }
        fn transform(&mut self, mut row: Row) -> Result<RowOutput> {
            row.push(Some(Value::Str("x".into())));
            Ok(RowOutput::Row(row))
        }
    }

    /// Drops rows whose first value is null.
    struct DropNullFirst;

    impl DataTransformer for DropNullFirst {
        fn name(&self) -> &str {
            "drop_null_first"
        }
        fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
            Ok(columns.to_vec())
        }
        fn transform(&mut self, row: Row) -> Result<RowOutput> {
            if row.first().map(Option::is_none).unwrap_or(true) {
                Ok(RowOutput::Drop)
            } else {
                Ok(RowOutput::Row(row))
            }
        }
    }

    /// Duplicates every row.
    struct Duplicate;

    impl DataTransformer for Duplicate {
        fn name(&self) -> &str {
            "duplicate"
        }
        fn initialize(&mut self, columns: &[Column]) -> Result<Vec<Column>> {
            Ok(columns.to_vec())
        }
        fn transform(&mut self, row: Row) -> Result<RowOutput> {
            Ok(RowOutput::Expand(vec![row.clone(), row]))
        }
    }

    fn id_column() -> Vec<Column> {
        vec![Column::new("id", LogicalType::Int64)]
    }

    #[test]
    fn schema_threads_through_stages() {
        let mut p = TransformerPipeline::new(vec![Box::new(AddTag), Box::new(AddTag)]);
        let cols = p.initialize(&id_column()).unwrap();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[1].name, "tag");
        assert_eq!(cols[2].name, "tag");
    }

    #[test]
    fn drop_short_circuits_downstream_stages() {
        let mut p = TransformerPipeline::new(vec![Box::new(DropNullFirst), Box::new(AddTag)]);
        p.initialize(&id_column()).unwrap();
        assert!(p.apply(vec![None]).unwrap().is_empty());
        let kept = p.apply(vec![Some(Value::Int(1))]).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].len(), 2);
    }

    #[test]
    fn expansion_is_flat_mapped_in_order() {
        let mut p = TransformerPipeline::new(vec![Box::new(Duplicate), Box::new(Duplicate)]);
        p.initialize(&id_column()).unwrap();
        let out = p.apply(vec![Some(Value::Int(5))]).unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn stats_report_emitted_rows_per_stage() {
        let mut p = TransformerPipeline::new(vec![Box::new(Duplicate), Box::new(DropNullFirst)]);
        p.initialize(&id_column()).unwrap();
        p.apply(vec![Some(Value::Int(1))]).unwrap();
        p.apply(vec![None]).unwrap();
        let stats = p.stats();
        assert_eq!(stats[0], ("duplicate".to_string(), 4));
        assert_eq!(stats[1], ("drop_null_first".to_string(), 2));
    }
}
