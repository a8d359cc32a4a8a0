use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use super::error::UsageError;

/// Arguments for one invocation. Positional and keyword forms never mix.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Arguments {
    #[default]
    None,
    Positional(Vec<Value>),
    Keyword(Map<String, Value>),
}

/// Lookup failures raised by the typed [`Arguments`] accessors
#[derive(Debug, Error, PartialEq)]
pub enum ArgumentError {
    #[error("missing argument `{name}` (position {position})")]
    Missing { position: usize, name: String },

    #[error("argument `{name}` expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl Arguments {
    pub fn positional(&self, position: usize) -> Option<&Value> {
        match self {
            Arguments::Positional(values) => values.get(position),
            _ => None,
        }
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        match self {
            Arguments::Keyword(values) => values.get(name),
            _ => None,
        }
    }

    /// Look an argument up by keyword, falling back to its position
    pub fn get(&self, position: usize, name: &str) -> Option<&Value> {
        self.keyword(name).or_else(|| self.positional(position))
    }

    pub fn require(&self, position: usize, name: &str) -> Result<&Value, ArgumentError> {
        self.get(position, name).ok_or_else(|| ArgumentError::Missing {
            position,
            name: name.to_string(),
        })
    }

    pub fn i64(&self, position: usize, name: &str) -> Result<i64, ArgumentError> {
        let value = self.require(position, name)?;
        value.as_i64().ok_or_else(|| mismatch(name, "an integer", value))
    }

    pub fn f64(&self, position: usize, name: &str) -> Result<f64, ArgumentError> {
        let value = self.require(position, name)?;
        value.as_f64().ok_or_else(|| mismatch(name, "a number", value))
    }

    pub fn str(&self, position: usize, name: &str) -> Result<&str, ArgumentError> {
        let value = self.require(position, name)?;
        value.as_str().ok_or_else(|| mismatch(name, "a string", value))
    }

    pub fn len(&self) -> usize {
        match self {
            Arguments::None => 0,
            Arguments::Positional(values) => values.len(),
            Arguments::Keyword(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arguments::None => Ok(()),
            Arguments::Positional(values) => {
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                f.write_str(&rendered.join(", "))
            }
            Arguments::Keyword(values) => {
                let rendered: Vec<String> = values
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect();
                f.write_str(&rendered.join(", "))
            }
        }
    }
}

fn mismatch(name: &str, expected: &'static str, found: &Value) -> ArgumentError {
    ArgumentError::TypeMismatch {
        name: name.to_string(),
        expected,
        found: value_kind(found),
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Where the argument sets of a batch come from
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ArgSource {
    /// One invocation with no arguments
    #[default]
    Single,
    Positional(Vec<Vec<Value>>),
    Keyword(Vec<Map<String, Value>>),
}

impl ArgSource {
    /// Build a source from optional positional and keyword lists; supplying both is an error
    pub fn from_parts(
        positional: Option<Vec<Vec<Value>>>,
        keyword: Option<Vec<Map<String, Value>>>,
    ) -> Result<Self, UsageError> {
        match (positional, keyword) {
            (Some(_), Some(_)) => Err(UsageError::ConflictingArguments),
            (Some(positional), None) => Ok(ArgSource::Positional(positional)),
            (None, Some(keyword)) => Ok(ArgSource::Keyword(keyword)),
            (None, None) => Ok(ArgSource::Single),
        }
    }

    /// Parse a JSON array whose entries are all arrays (positional) or all objects (keyword)
    pub fn from_json(value: Value) -> Result<Self, UsageError> {
        let entries = match value {
            Value::Array(entries) => entries,
            other => {
                return Err(UsageError::InvalidParameterSource(
                    value_kind(&other).to_string(),
                ));
            }
        };

        let keyword = matches!(entries.first(), Some(Value::Object(_)));
        let mut positional_sets = Vec::new();
        let mut keyword_sets = Vec::new();

        for (index, entry) in entries.into_iter().enumerate() {
            match (entry, keyword) {
                (Value::Object(map), true) => keyword_sets.push(map),
                (Value::Array(values), false) => positional_sets.push(values),
                (other, _) => {
                    return Err(UsageError::InvalidParameterSet {
                        index,
                        found: value_kind(&other).to_string(),
                    });
                }
            }
        }

        if keyword {
            Ok(ArgSource::Keyword(keyword_sets))
        } else {
            Ok(ArgSource::Positional(positional_sets))
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArgSource::Single => 1,
            ArgSource::Positional(sets) => sets.len(),
            ArgSource::Keyword(sets) => sets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_arguments(self) -> Vec<Arguments> {
        match self {
            ArgSource::Single => vec![Arguments::None],
            ArgSource::Positional(sets) => sets.into_iter().map(Arguments::Positional).collect(),
            ArgSource::Keyword(sets) => sets.into_iter().map(Arguments::Keyword).collect(),
        }
    }
}

/// What a task sees of the batch it runs in
#[derive(Debug, Clone)]
pub struct TaskContext {
    index: usize,
    worker: String,
    cancelled: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(index: usize, worker: impl Into<String>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            index,
            worker: worker.into(),
            cancelled,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn worker_name(&self) -> &str {
        &self.worker
    }

    /// True once the batch deadline expired; long-running tasks should poll this and return early
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A unit of work that can be fanned out across parameter sets
pub trait Callable: Send + Sync {
    /// Dotted name used for worker naming, logging and registry lookups
    fn qualified_name(&self) -> &str;

    fn call(&self, ctx: &TaskContext, args: &Arguments) -> anyhow::Result<Value>;
}

/// A [`Callable`] backed by a closure
pub struct FnCallable<F> {
    name: String,
    func: F,
}

impl<F> FnCallable<F>
where
    F: Fn(&TaskContext, &Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Callable for FnCallable<F>
where
    F: Fn(&TaskContext, &Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn qualified_name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: &TaskContext, args: &Arguments) -> anyhow::Result<Value> {
        (self.func)(ctx, args)
    }
}

/// Shorthand for a shared closure-backed callable
pub fn callable<F>(name: impl Into<String>, func: F) -> Arc<dyn Callable>
where
    F: Fn(&TaskContext, &Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnCallable::new(name, func))
}

/// One invocation of a callable, identified by its position in the batch
#[derive(Clone)]
pub struct TaskDescriptor {
    index: usize,
    callable: Arc<dyn Callable>,
    args: Arguments,
}

impl TaskDescriptor {
    pub fn new(index: usize, callable: Arc<dyn Callable>, args: Arguments) -> Self {
        Self {
            index,
            callable,
            args,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn callable(&self) -> &Arc<dyn Callable> {
        &self.callable
    }

    pub fn args(&self) -> &Arguments {
        &self.args
    }

    /// `name(k=v, ...)`, used to describe the unit of work in diagnostics
    pub fn describe(&self) -> String {
        format!("{}({})", self.callable.qualified_name(), self.args)
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("index", &self.index)
            .field("callable", &self.callable.qualified_name())
            .field("args", &self.args)
            .finish()
    }
}

/// Turn an argument source into descriptors indexed by position
pub fn build_tasks(callable: &Arc<dyn Callable>, source: ArgSource) -> Vec<TaskDescriptor> {
    source
        .into_arguments()
        .into_iter()
        .enumerate()
        .map(|(index, args)| TaskDescriptor::new(index, callable.clone(), args))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Arc<dyn Callable> {
        callable("tests.echo", |_, args| Ok(json!(args.to_string())))
    }

    #[test]
    fn test_single_source_builds_one_empty_task() {
        let tasks = build_tasks(&echo(), ArgSource::default());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].index(), 0);
        assert_eq!(tasks[0].args(), &Arguments::None);
    }

    #[test]
    fn test_indices_follow_positions() {
        let source = ArgSource::Positional(vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]);
        let tasks = build_tasks(&echo(), source);
        let indices: Vec<usize> = tasks.iter().map(TaskDescriptor::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(tasks[2].args().positional(0), Some(&json!(3)));
    }

    #[test]
    fn test_from_parts_rejects_both_forms() {
        let result = ArgSource::from_parts(Some(vec![vec![]]), Some(vec![Map::new()]));
        assert!(matches!(result, Err(UsageError::ConflictingArguments)));
        assert_eq!(ArgSource::from_parts(None, None).unwrap(), ArgSource::Single);
    }

    #[test]
    fn test_from_json_detects_shape() {
        let keyword = ArgSource::from_json(json!([{"x": 1}, {"x": 2}])).unwrap();
        assert_eq!(keyword.len(), 2);
        assert!(matches!(keyword, ArgSource::Keyword(_)));

        let positional = ArgSource::from_json(json!([[1, 2], [3]])).unwrap();
        assert!(matches!(positional, ArgSource::Positional(_)));

        let mixed = ArgSource::from_json(json!([{"x": 1}, [2]]));
        assert!(matches!(
            mixed,
            Err(UsageError::InvalidParameterSet { index: 1, .. })
        ));

        let scalar = ArgSource::from_json(json!(5));
        assert!(matches!(scalar, Err(UsageError::InvalidParameterSource(_))));
    }

    #[test]
    fn test_typed_accessors() {
        let mut map = Map::new();
        map.insert("x".to_string(), json!("bad"));
        let args = Arguments::Keyword(map);

        assert_eq!(args.str(0, "x").unwrap(), "bad");
        assert_eq!(
            args.i64(0, "x"),
            Err(ArgumentError::TypeMismatch {
                name: "x".to_string(),
                expected: "an integer",
                found: "a string",
            })
        );
        assert!(matches!(args.i64(1, "y"), Err(ArgumentError::Missing { .. })));

        let positional = Arguments::Positional(vec![json!(2.5)]);
        assert_eq!(positional.f64(0, "x").unwrap(), 2.5);
    }

    #[test]
    fn test_describe() {
        let mut map = Map::new();
        map.insert("x".to_string(), json!(1));
        let task = TaskDescriptor::new(0, echo(), Arguments::Keyword(map));
        assert_eq!(task.describe(), "tests.echo(x=1)");
    }
}
