use std::collections::BTreeMap;

use serde_json::Value;

use super::{DispatchError, Reply};
use crate::namespace::{Namespace, Registry, State};

/// Key under which a namespace sees its own state
pub const STATE_KEY: &str = "$";
/// Key present when a namespace declares no dependencies
pub const NO_IMPORTS_KEY: &str = "_";

/// The function store of a dependency, without access to its state
#[derive(Clone)]
pub struct Exports {
    namespace: String,
    functions: Vec<String>,
    registry: Registry,
}

impl Exports {
    pub(crate) fn of(namespace: &Namespace, registry: Registry) -> Self {
        Self {
            namespace: namespace.name().to_string(),
            functions: namespace.function_names(),
            registry,
        }
    }

    fn empty(registry: Registry) -> Self {
        Self {
            namespace: NO_IMPORTS_KEY.to_string(),
            functions: Vec::new(),
            registry,
        }
    }

    /// Functions the dependency defined when this call was dispatched
    pub fn function_names(&self) -> &[String] {
        &self.functions
    }

    pub fn has(&self, function: &str) -> bool {
        self.functions.iter().any(|f| f == function)
    }

    /// Call one of the exported functions through the dispatcher
    pub fn call(&self, function: &str, args: Vec<Value>) -> Result<Reply, DispatchError> {
        if !self.has(function) {
            return Err(DispatchError::UnknownFunction {
                namespace: self.namespace.clone(),
                function: function.to_string(),
            });
        }
        self.registry
            .trigger(&format!("{}:{}", self.namespace, function), args)
    }
}

impl std::fmt::Debug for Exports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exports")
            .field("namespace", &self.namespace)
            .field("functions", &self.functions)
            .finish()
    }
}

/// First argument of every namespace function
///
/// Holds `$` (the namespace's own state) and one [`Exports`] per declared
/// dependency, or `_` when there are none.
#[derive(Clone, Debug)]
pub struct Imports {
    state: State,
    dependencies: BTreeMap<String, Exports>,
}

impl Imports {
    pub(crate) fn new(
        state: State,
        dependencies: BTreeMap<String, Exports>,
        registry: Registry,
    ) -> Self {
        let mut dependencies = dependencies;
        if dependencies.is_empty() {
            dependencies.insert(NO_IMPORTS_KEY.to_string(), Exports::empty(registry));
        }
        Self {
            state,
            dependencies,
        }
    }

    /// `$`
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The exports injected under `name`
    pub fn dependency(&self, name: &str) -> Option<&Exports> {
        self.dependencies.get(name)
    }

    /// Every key of the injected object, `$` first
    pub fn keys(&self) -> Vec<&str> {
        std::iter::once(STATE_KEY)
            .chain(self.dependencies.keys().map(String::as_str))
            .collect()
    }
}
