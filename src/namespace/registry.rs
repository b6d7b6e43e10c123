use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use super::{Function, State};
use crate::dispatch::DispatchError;

/// A named store of functions plus its private state
pub struct Namespace {
    name: String,
    dependencies: Vec<String>,
    functions: RwLock<HashMap<String, Function>>,
    state: State,
}

impl Namespace {
    fn new(name: &str, dependencies: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            functions: RwLock::new(HashMap::new()),
            state: State::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespaces injected into every call, in declaration order
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The `$` container shared by all functions of this namespace
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Define (or silently replace) a function
    pub fn define(&self, name: &str, function: Function) -> &Self {
        trace!("define {}:{}", self.name, name);
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), function);
        self
    }

    pub fn function(&self, name: &str) -> Option<Function> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of all defined functions, sorted
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("functions", &self.function_names())
            .finish()
    }
}

/// Registry of every namespace, keyed by name
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct Registry {
    namespaces: Arc<RwLock<HashMap<String, Arc<Namespace>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace, or return the existing one with that name
    ///
    /// `dependencies` is only used the first time a name is registered.
    pub fn register(&self, name: &str, dependencies: &[&str]) -> Arc<Namespace> {
        let mut namespaces = self
            .namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        Arc::clone(namespaces.entry(name.to_string()).or_insert_with(|| {
            trace!("register namespace {name} {dependencies:?}");
            Arc::new(Namespace::new(name, dependencies))
        }))
    }

    /// Get a namespace by name
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownNamespace`] if nothing is registered under `name`
    pub fn lookup(&self, name: &str) -> Result<Arc<Namespace>, DispatchError> {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownNamespace(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Names of all registered namespaces, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Serialize a namespace into just the names of its functions
    pub fn serialize_namespace(&self, name: &str) -> Result<Vec<String>, DispatchError> {
        self.lookup(name).map(|ns| ns.function_names())
    }
}
