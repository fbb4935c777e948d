//! CommanDOS: a DOS-flavoured interactive shell with installable script apps.
//!
//! The shell runs built-in commands implemented in Rust and apps written in a
//! small restricted script language (`.cdos` files). Apps are installed into
//! `System/Apps` under the installation root, recorded in a JSON registry and
//! loaded into the command table at login.
//!
//! The main entry point is [`Interpreter`]: [`Interpreter::boot`] runs the
//! login gate and [`Interpreter::repl`] reads commands until the session
//! ends. The public modules [`command`] and [`console`] expose the traits for
//! adding commands and for driving the shell from something other than a
//! terminal.

pub mod auth;
mod builtin;
pub mod command;
pub mod config;
pub mod console;
mod external;
pub mod install;
mod interpreter;
pub mod io_adapters;
pub mod plugin;
pub mod registry;
pub mod session;
pub mod table;
pub mod update;

/// Version reported by `ver`, exposed to apps as `SYSTEM_VERSION` and
/// compared against the remote version by `update`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use auth::BootError;
pub use config::ShellConfig;
pub use interpreter::{Interpreter, ShellState};
pub use session::Outcome;

/// Every built-in command, in `help` listing order.
pub fn builtin_commands() -> Vec<Box<dyn command::CommandFactory>> {
    builtin::defaults()
}
