//! Lua-backed implementation of the script-engine contract.
//!
//! Scripts are Lua chunks with the current row bound as `row`, e.g.
//! `return row.Age > 18`. Each script is compiled once; handles live until
//! the engine is dropped at pipeline teardown.

use mlua::Lua;
use rowpipe_core::{PipelineError, Result, ScriptEngine, ScriptHandle, ScriptValue, Value};
use rust_decimal::prelude::ToPrimitive;

pub struct LuaScriptEngine {
    lua: Lua,
    scripts: Vec<mlua::Function>,
}

impl LuaScriptEngine {
    pub fn new() -> Self {
        Self {
            lua: Lua::new(),
            scripts: Vec::new(),
        }
    }

    fn to_lua(&self, value: Option<&Value>) -> mlua::Result<mlua::Value> {
        Ok(match value {
            None => mlua::Value::Nil,
            Some(Value::Int(v)) => mlua::Value::Integer(*v),
            Some(Value::Float(v)) => mlua::Value::Number(*v),
            Some(Value::Bool(v)) => mlua::Value::Boolean(*v),
            Some(Value::Decimal(v)) => mlua::Value::Number(v.to_f64().unwrap_or(f64::NAN)),
            Some(other) => mlua::Value::String(self.lua.create_string(other.render())?),
        })
    }
}

impl Default for LuaScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn script_err(e: mlua::Error) -> PipelineError {
    PipelineError::script(e.to_string())
}

fn scalar_from_lua(value: &mlua::Value) -> Result<Option<Value>> {
    match value {
        mlua::Value::Nil => Ok(None),
        mlua::Value::Boolean(b) => Ok(Some(Value::Bool(*b))),
        mlua::Value::Integer(i) => Ok(Some(Value::Int(*i))),
        mlua::Value::Number(n) => Ok(Some(Value::Float(*n))),
        mlua::Value::String(s) => Ok(Some(Value::Str(
            s.to_str().map_err(script_err)?.to_string(),
        ))),
        other => Err(PipelineError::script(format!(
            "unsupported value of type {} in script result",
            other.type_name()
        ))),
    }
}

fn table_to_row(table: &mlua::Table) -> Result<Vec<(String, Option<Value>)>> {
    let mut row = Vec::new();
    for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
        let (key, value) = pair.map_err(script_err)?;
        let mlua::Value::String(key) = key else {
            return Err(PipelineError::script(
                "row-shaped script results must use string keys",
            ));
        };
        row.push((
            key.to_str().map_err(script_err)?.to_string(),
            scalar_from_lua(&value)?,
        ));
    }
    Ok(row)
}

impl ScriptEngine for LuaScriptEngine {
    fn compile(&mut self, source: &str) -> Result<ScriptHandle> {
        let wrapped = format!("local row = ...\n{source}");
        let function = self
            .lua
            .load(&wrapped)
            .into_function()
            .map_err(script_err)?;
        self.scripts.push(function);
        Ok(ScriptHandle(self.scripts.len() - 1))
    }

    fn eval(
        &mut self,
        handle: ScriptHandle,
        row: &[(&str, Option<&Value>)],
    ) -> Result<ScriptValue> {
        let function = self
            .scripts
            .get(handle.0)
            .ok_or_else(|| PipelineError::script(format!("unknown script handle {}", handle.0)))?
            .clone();
        let table = self.lua.create_table().map_err(script_err)?;
        for (name, value) in row {
            table
                .set(*name, self.to_lua(*value).map_err(script_err)?)
                .map_err(script_err)?;
        }
        let result: mlua::Value = function.call(table).map_err(script_err)?;
        match result {
            mlua::Value::Nil => Ok(ScriptValue::Null),
            mlua::Value::Boolean(b) => Ok(ScriptValue::Bool(b)),
            mlua::Value::Integer(i) => Ok(ScriptValue::Int(i)),
            mlua::Value::Number(n) => Ok(ScriptValue::Float(n)),
            mlua::Value::String(s) => Ok(ScriptValue::Str(
                s.to_str().map_err(script_err)?.to_string(),
            )),
            mlua::Value::Table(table) => {
                if table.raw_len() > 0 {
                    let mut rows = Vec::new();
                    for entry in table.sequence_values::<mlua::Table>() {
                        let entry = entry.map_err(|e| {
                            PipelineError::script(format!(
                                "expected an array of row-shaped tables: {e}"
                            ))
                        })?;
                        rows.push(table_to_row(&entry)?);
                    }
                    Ok(ScriptValue::Rows(rows))
                } else {
                    let row = table_to_row(&table)?;
                    if row.is_empty() {
                        // `{}`: an empty expansion.
                        Ok(ScriptValue::Rows(Vec::new()))
                    } else {
                        Ok(ScriptValue::Row(row))
                    }
                }
            }
            other => Err(PipelineError::script(format!(
                "unsupported script result type {}",
                other.type_name()
            ))),
        }
    }
}
