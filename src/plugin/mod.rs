//! Installable apps: the `.cdos` script language, its acceptance check, and
//! the loader that turns a registry entry into a runnable capsule.

pub mod capsule;
pub mod lexer;
pub mod loader;
pub mod script;
pub mod validator;

pub use capsule::{ExecutionError, PluginCapsule, PluginHost};
pub use loader::{LoadCause, LoadError, PluginLoader};
pub use validator::{Accepted, ValidationError};
