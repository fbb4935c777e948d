use crate::config::{ShellConfig, SystemPaths};
use crate::console::Console;
use crate::registry::RegistryStore;
use crate::session::Session;
use crate::table::CommandTable;
use crate::update::Updater;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// Long-lived collaborators owned by the dispatcher and lent to commands.
pub struct Services {
    pub config: ShellConfig,
    pub paths: SystemPaths,
    pub store: RegistryStore,
    pub updater: Updater,
}

/// Everything a command may read or change while it runs.
pub struct Context<'a> {
    pub session: &'a mut Session,
    pub console: &'a mut dyn Console,
    pub out: &'a mut dyn Write,
    pub services: &'a mut Services,
    /// The table the command was resolved from, for `help` and `sysinfo`.
    pub table: &'a CommandTable,
}

/// Object-safe trait for any command that can be executed by the shell.
///
/// Implemented by built-ins via a blanket impl and by loaded apps.
pub trait ExecutableCommand {
    fn execute(self: Box<Self>, ctx: &mut Context<'_>) -> Result<ExitCode>;
}

/// Where a command is listed by `help`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    System,
    File,
    Apps,
    Other,
    Hidden,
}

impl Category {
    pub fn title(self) -> &'static str {
        match self {
            Category::System => "System Commands",
            Category::File => "File Commands",
            Category::Apps => "App Management",
            Category::Other => "Other Commands",
            Category::Hidden => "Hidden Commands",
        }
    }
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    fn name(&self) -> &'static str;

    /// One line for the `help` listing.
    fn summary(&self) -> &'static str;

    /// Synopsis for `help <command>`.
    fn usage(&self) -> &'static str;

    fn category(&self) -> Category;

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
