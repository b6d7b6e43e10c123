//! Dispatcher
//!
//! `trigger("namespace:function", args)` resolves the namespace and function,
//! injects the namespace's imports, checks declared argument types and calls
//! the function. Asynchronous functions come back as [`Reply::Pending`];
//! the dispatcher never awaits them itself.

mod error;
mod imports;
mod reply;
mod target;

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::{debug, trace};

pub use error::DispatchError;
pub use imports::{Exports, Imports, NO_IMPORTS_KEY, STATE_KEY};
pub use reply::Reply;
pub use target::Target;

use crate::namespace::{Namespace, Registry};

impl Registry {
    /// Call `target` with `args`
    ///
    /// # Errors
    ///
    /// Fails if the target is malformed, the namespace or function is not
    /// registered, a dependency of the namespace is missing, or an argument
    /// does not match the declared parameter types. Errors returned by the
    /// function itself are passed through.
    pub fn trigger(&self, target: &str, args: Vec<Value>) -> Result<Reply, DispatchError> {
        trace!("trigger {target} with {} args", args.len());

        let result = self.dispatch(target, args);
        if let Err(e) = &result {
            debug!("Dispatch to {target} failed: {e}");
        }
        result
    }

    fn dispatch(&self, raw: &str, args: Vec<Value>) -> Result<Reply, DispatchError> {
        let target = Target::parse(raw)?;
        let namespace = self.lookup(target.namespace)?;
        let function =
            namespace
                .function(target.function)
                .ok_or_else(|| DispatchError::UnknownFunction {
                    namespace: target.namespace.to_string(),
                    function: target.function.to_string(),
                })?;

        let imports = self.imports_for(&namespace)?;
        function.check_args(raw, &args)?;
        function.call(imports, args)
    }

    /// Build the injected imports, making sure every dependency (and theirs)
    /// is registered
    fn imports_for(&self, namespace: &Namespace) -> Result<Imports, DispatchError> {
        let mut dependencies = BTreeMap::new();
        let mut seen = HashSet::from([namespace.name().to_string()]);

        for name in namespace.dependencies() {
            let dependency = self.resolve_dependency(namespace.name(), name)?;
            self.check_transitive(&dependency, &mut seen)?;
            dependencies.insert(name.clone(), Exports::of(&dependency, self.clone()));
        }

        Ok(Imports::new(
            namespace.state().clone(),
            dependencies,
            self.clone(),
        ))
    }

    fn resolve_dependency(
        &self,
        namespace: &str,
        dependency: &str,
    ) -> Result<std::sync::Arc<Namespace>, DispatchError> {
        self.lookup(dependency)
            .map_err(|_| DispatchError::UnresolvedDependency {
                namespace: namespace.to_string(),
                dependency: dependency.to_string(),
            })
    }

    fn check_transitive(
        &self,
        namespace: &Namespace,
        seen: &mut HashSet<String>,
    ) -> Result<(), DispatchError> {
        if !seen.insert(namespace.name().to_string()) {
            return Ok(());
        }
        for name in namespace.dependencies() {
            let dependency = self.resolve_dependency(namespace.name(), name)?;
            self.check_transitive(&dependency, seen)?;
        }
        Ok(())
    }
}
