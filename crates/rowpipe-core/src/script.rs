//! Script-engine provider contract for user-scripted transformers.
//!
//! Filter, expand and generic script transformers obtain compiled handles
//! from a [`ScriptEngine`] and evaluate them against a row-shaped mapping of
//! `{column_name: value}`. Engines are single-threaded per handle; the
//! pipeline guarantees sequential invocation. Handles are owned resources
//! released when the engine is dropped at pipeline teardown.

use crate::error::Result;
use crate::value::Value;

/// Opaque reference to a compiled script within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptHandle(pub usize);

/// A value returned by a user script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A row-shaped object: column name to value.
    Row(Vec<(String, Option<Value>)>),
    /// An array of row-shaped objects, in script order.
    Rows(Vec<Vec<(String, Option<Value>)>>),
}

impl ScriptValue {
    /// Script truthiness: only `Null` and `Bool(false)` are falsy, matching
    /// the embedded language's own rule.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, ScriptValue::Null | ScriptValue::Bool(false))
    }
}

/// Compiles scripts once and evaluates them repeatedly against rows.
pub trait ScriptEngine: Send {
    /// Compile `source`, returning a reusable handle. Compilation errors are
    /// [`crate::PipelineError::Script`].
    fn compile(&mut self, source: &str) -> Result<ScriptHandle>;

    /// Evaluate a compiled script against one row. `row` pairs each column
    /// name with its value at that position.
    fn eval(&mut self, handle: ScriptHandle, row: &[(&str, Option<&Value>)])
        -> Result<ScriptValue>;
}
