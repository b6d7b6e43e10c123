//! Namespace registry
//!
//! A namespace is a named store of callable functions, a list of namespaces
//! it depends on, and a private state container (`$`) shared by every call
//! into it. Namespaces are addressed by dispatch targets of the form
//! `namespace:function` (see [`crate::dispatch`]).

mod function;
mod registry;
mod state;

pub use function::{Function, NamespaceFn, ParamType};
pub use registry::{Namespace, Registry};
pub use state::State;
