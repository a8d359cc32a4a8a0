//! Explicit name → callable resolution
//!
//! Callables can be handed to the executor directly or by qualified name. Names are only ever
//! looked up in a [`SymbolResolver`] supplied by the caller; nothing is evaluated dynamically.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::parallel::Callable;

lazy_static! {
    static ref QUALIFIED_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("qualified name pattern is valid");
}

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("`{0}` is not a valid qualified name")]
    InvalidName(String),

    #[error("no callable registered as `{0}`")]
    NotFound(String),

    #[error("a callable is already registered as `{0}`")]
    Duplicate(String),
}

/// Dotted identifier check: `module.sub.function`
pub fn is_valid_name(name: &str) -> bool {
    QUALIFIED_NAME.is_match(name)
}

/// Turns a qualified name into a callable
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Arc<dyn Callable>, ResolveError>;
}

/// In-memory resolver keyed by each callable's qualified name
#[derive(Default, Clone)]
pub struct Registry {
    entries: BTreeMap<String, Arc<dyn Callable>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callable: Arc<dyn Callable>) -> Result<(), ResolveError> {
        let name = callable.qualified_name().to_string();
        if !is_valid_name(&name) {
            return Err(ResolveError::InvalidName(name));
        }
        if self.entries.contains_key(&name) {
            return Err(ResolveError::Duplicate(name));
        }

        tracing::trace!("Registered callable {}", name);
        self.entries.insert(name, callable);
        Ok(())
    }

    /// Builder-style [`Registry::register`]
    pub fn with(mut self, callable: Arc<dyn Callable>) -> Result<Self, ResolveError> {
        self.register(callable)?;
        Ok(self)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SymbolResolver for Registry {
    fn resolve(&self, name: &str) -> Result<Arc<dyn Callable>, ResolveError> {
        if !is_valid_name(name) {
            return Err(ResolveError::InvalidName(name.to_string()));
        }
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// A callable given directly or by name
#[derive(Clone)]
pub enum CallableRef {
    Direct(Arc<dyn Callable>),
    Named(String),
}

impl CallableRef {
    pub fn name(&self) -> &str {
        match self {
            CallableRef::Direct(callable) => callable.qualified_name(),
            CallableRef::Named(name) => name,
        }
    }
}

impl From<Arc<dyn Callable>> for CallableRef {
    fn from(callable: Arc<dyn Callable>) -> Self {
        CallableRef::Direct(callable)
    }
}

impl From<&Arc<dyn Callable>> for CallableRef {
    fn from(callable: &Arc<dyn Callable>) -> Self {
        CallableRef::Direct(callable.clone())
    }
}

impl From<&str> for CallableRef {
    fn from(name: &str) -> Self {
        CallableRef::Named(name.to_string())
    }
}

impl From<String> for CallableRef {
    fn from(name: String) -> Self {
        CallableRef::Named(name)
    }
}

impl fmt::Debug for CallableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallableRef::Direct(callable) => {
                f.debug_tuple("Direct").field(&callable.qualified_name()).finish()
            }
            CallableRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}
