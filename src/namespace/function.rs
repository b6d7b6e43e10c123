use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use crate::dispatch::{DispatchError, Imports, Reply};

/// Type-erased namespace function: `(imports, ...args) -> reply`
pub type NamespaceFn =
    Arc<dyn Fn(Imports, Vec<Value>) -> Result<Reply, DispatchError> + Send + Sync>;

/// Declared type of a positional argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// A textual value
    String,
    /// A non-textual reference value (object, array or null)
    Object,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Object => "object",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Object => matches!(value, Value::Object(_) | Value::Array(_) | Value::Null),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ParamType::String),
            "object" => Ok(ParamType::Object),
            other => Err(format!("Unknown parameter type: {other}")),
        }
    }
}

/// Loose type name of an argument, as reported in mismatch errors
pub(crate) fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::Null | Value::Object(_) | Value::Array(_)) => "object",
        Some(Value::String(_)) => "string",
        Some(Value::Number(_)) => "number",
        Some(Value::Bool(_)) => "boolean",
    }
}

/// A function stored in a namespace, with its optional parameter types
#[derive(Clone)]
pub struct Function {
    callable: NamespaceFn,
    params: Option<Vec<ParamType>>,
}

impl Function {
    /// Wrap a synchronous implementation
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Imports, Vec<Value>) -> Result<Value, DispatchError> + Send + Sync + 'static,
    {
        Self {
            callable: Arc::new(move |imports, args| f(imports, args).map(Reply::Value)),
            params: None,
        }
    }

    /// Wrap an implementation whose result is computed later
    ///
    /// The dispatcher hands the future back unawaited.
    pub fn pending<F, Fut>(f: F) -> Self
    where
        F: Fn(Imports, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DispatchError>> + Send + 'static,
    {
        Self {
            callable: Arc::new(move |imports, args| Ok(Reply::Pending(f(imports, args).boxed()))),
            params: None,
        }
    }

    /// Declare the positional parameter types checked before each call
    #[must_use]
    pub fn with_params(mut self, params: impl IntoIterator<Item = ParamType>) -> Self {
        self.params = Some(params.into_iter().collect());
        self
    }

    /// Check `args` against the declared parameter types, stopping at the
    /// first offending position. Extra trailing arguments are accepted.
    pub(crate) fn check_args(&self, target: &str, args: &[Value]) -> Result<(), DispatchError> {
        let Some(params) = &self.params else {
            return Ok(());
        };

        for (position, expected) in params.iter().enumerate() {
            let arg = args.get(position);
            if !arg.is_some_and(|value| expected.accepts(value)) {
                return Err(DispatchError::ArgumentTypeMismatch {
                    target: target.to_string(),
                    position,
                    expected: *expected,
                    found: type_name(arg),
                });
            }
        }

        Ok(())
    }

    pub(crate) fn call(&self, imports: Imports, args: Vec<Value>) -> Result<Reply, DispatchError> {
        (self.callable)(imports, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
