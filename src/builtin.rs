use crate::VERSION;
use crate::command::{Category, CommandFactory, Context, ExecutableCommand, ExitCode};
use crate::console;
use crate::install::{self, UninstallError};
use crate::interpreter::Factory;
use crate::session::{Outcome, format_size};
use anyhow::{Context as _, Result};
use argh::{EarlyExit, FromArgs};
use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// in-process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "dir" or "cd".
    fn name() -> &'static str;

    fn summary() -> &'static str;

    fn usage() -> &'static str;

    fn category() -> Category;

    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, ctx: &mut Context<'_>) -> Result<ExitCode> {
        T::execute(*self, ctx)
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, ctx: &mut Context<'_>) -> Result<ExitCode> {
        writeln!(ctx.out, "{}", self.output.trim_end())?;
        Ok(if self.is_error { 1 } else { 0 })
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn summary(&self) -> &'static str {
        T::summary()
    }

    fn usage(&self) -> &'static str {
        T::usage()
    }

    fn category(&self) -> Category {
        T::category()
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

/// Every built-in, in `help` listing order.
pub fn defaults() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Help>::default()),
        Box::new(Factory::<Ver>::default()),
        Box::new(Factory::<Cls>::default()),
        Box::new(Factory::<Clear>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Time>::default()),
        Box::new(Factory::<Uptime>::default()),
        Box::new(Factory::<Sysinfo>::default()),
        Box::new(Factory::<Dir>::default()),
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Apps>::default()),
        Box::new(Factory::<Install>::default()),
        Box::new(Factory::<Update>::default()),
        Box::new(Factory::<History>::default()),
        Box::new(Factory::<Crash>::default()),
    ]
}

#[derive(FromArgs)]
/// Show available commands, or details about one.
pub struct Help {
    #[argh(switch, short = 'a')]
    /// include hidden commands.
    pub all: bool,

    #[argh(positional)]
    /// command to describe.
    pub command: Option<String>,
}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn summary() -> &'static str {
        "Show this help message"
    }

    fn usage() -> &'static str {
        "help [command] [-a] - Show commands, or details about one"
    }

    fn category() -> Category {
        Category::System
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        if let Some(command) = &self.command {
            let command = command.to_lowercase();
            if let Some(factory) = ctx.table.builtin(&command) {
                writeln!(ctx.out, "\n{}", factory.usage())?;
            } else if let Some(app) = ctx.table.app(&command) {
                writeln!(ctx.out, "\n{} - {}", app.name(), app.description())?;
            } else {
                writeln!(ctx.out, "No help available for '{command}'.")?;
                return Ok(1);
            }
            return Ok(0);
        }

        writeln!(ctx.out, "\nCommanDOS Command Reference:")?;
        writeln!(ctx.out, "{}", "=".repeat(40))?;

        for category in [Category::System, Category::File, Category::Apps] {
            list_category(ctx, category)?;
        }
        if ctx.table.apps().next().is_some() {
            writeln!(ctx.out, "\nInstalled Apps:")?;
            for app in ctx.table.apps() {
                writeln!(ctx.out, "  {:<12} - {}", app.name(), app.description())?;
            }
        }
        list_category(ctx, Category::Other)?;
        if self.all {
            list_category(ctx, Category::Hidden)?;
        }

        writeln!(ctx.out, "\nType 'help <command>' for detailed information.")?;
        writeln!(ctx.out, "Use 'help -a' to show all commands including hidden ones.")?;
        Ok(0)
    }
}

fn list_category(ctx: &mut Context<'_>, category: Category) -> Result<()> {
    writeln!(ctx.out, "\n{}:", category.title())?;
    for factory in ctx.table.builtins().filter(|f| f.category() == category) {
        writeln!(ctx.out, "  {:<12} - {}", factory.name(), factory.summary())?;
    }
    Ok(())
}

#[derive(FromArgs)]
/// List directory contents.
pub struct Dir {
    #[argh(positional)]
    /// directory to list; defaults to the current directory.
    pub path: Option<String>,
}

impl BuiltinCommand for Dir {
    fn name() -> &'static str {
        "dir"
    }

    fn summary() -> &'static str {
        "List directory contents"
    }

    fn usage() -> &'static str {
        "dir [path] - List directory contents"
    }

    fn category() -> Category {
        Category::File
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let shown = self
            .path
            .clone()
            .unwrap_or_else(|| ctx.session.current_dir.display().to_string());
        let path = ctx.session.resolve(&shown);
        if !path.is_dir() {
            writeln!(ctx.out, "Directory not found: {shown}")?;
            return Ok(1);
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in fs::read_dir(&path).with_context(|| format!("can't list {shown}"))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => dirs.push(name),
                Ok(meta) => {
                    let modified = meta
                        .modified()
                        .map(DateTime::<Local>::from)
                        .unwrap_or_else(|_| Local::now());
                    files.push((name, meta.len(), modified));
                }
                Err(_) => files.push((name, 0, Local::now())),
            }
        }
        dirs.sort();
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let absolute = path.display().to_string();
        writeln!(ctx.out, "\nDirectory of {absolute}")?;
        writeln!(ctx.out, "{}", "=".repeat(absolute.len() + 13))?;
        if dirs.is_empty() && files.is_empty() {
            writeln!(ctx.out, "  <empty directory>")?;
            return Ok(0);
        }
        for dir in &dirs {
            writeln!(ctx.out, "  📁 {dir}/")?;
        }
        for (name, size, modified) in &files {
            writeln!(
                ctx.out,
                "  📄 {name:<30} {:>10} {}",
                format_size(*size),
                modified.format("%Y-%m-%d %H:%M")
            )?;
        }
        writeln!(ctx.out, "\n  {} directories, {} files", dirs.len(), files.len())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the shell's current directory.
/// Without a target, prints the current directory.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; `..` for the parent, `~` for home.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn summary() -> &'static str {
        "Change directory"
    }

    fn usage() -> &'static str {
        "cd <path> - Change current directory"
    }

    fn category() -> Category {
        Category::File
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let Some(target) = self.target else {
            writeln!(ctx.out, "{}", ctx.session.current_dir.display())?;
            return Ok(0);
        };

        let new_dir: PathBuf = match target.as_str() {
            ".." => ctx
                .session
                .current_dir
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| ctx.session.current_dir.clone()),
            "~" => directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().to_path_buf())
                .context("cd: can't determine the home directory")?,
            other => ctx.session.resolve(other),
        };

        if !new_dir.exists() {
            writeln!(ctx.out, "Directory not found: {target}")?;
            return Ok(1);
        }
        if !new_dir.is_dir() {
            writeln!(ctx.out, "Not a directory: {target}")?;
            return Ok(1);
        }

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: can't canonicalize {}", new_dir.display()))?;
        ctx.session.current_dir = canonical;
        Ok(0)
    }
}

fn clear_screen(out: &mut dyn Write) -> Result<ExitCode> {
    write!(out, "\x1b[2J\x1b[H")?;
    out.flush()?;
    Ok(0)
}

#[derive(FromArgs)]
/// Clear the screen.
pub struct Cls {}

impl BuiltinCommand for Cls {
    fn name() -> &'static str {
        "cls"
    }

    fn summary() -> &'static str {
        "Clear screen"
    }

    fn usage() -> &'static str {
        "cls - Clear screen"
    }

    fn category() -> Category {
        Category::System
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        clear_screen(ctx.out)
    }
}

#[derive(FromArgs)]
/// Clear the screen.
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn name() -> &'static str {
        "clear"
    }

    fn summary() -> &'static str {
        "Clear screen"
    }

    fn usage() -> &'static str {
        "clear - Clear screen"
    }

    fn category() -> Category {
        Category::System
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        clear_screen(ctx.out)
    }
}

#[derive(FromArgs)]
/// Show version information.
pub struct Ver {}

impl BuiltinCommand for Ver {
    fn name() -> &'static str {
        "ver"
    }

    fn summary() -> &'static str {
        "Show version information"
    }

    fn usage() -> &'static str {
        "ver - Show system version and information"
    }

    fn category() -> Category {
        Category::System
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        writeln!(ctx.out, "\nCommanDOS Version {VERSION}")?;
        writeln!(ctx.out, "RELEASE-GRADE SOFTWARE - May contain bugs or be incomplete")?;
        writeln!(ctx.out, "Running on {}", host_description())?;
        Ok(0)
    }
}

fn host_description() -> String {
    let name = sysinfo::System::name().unwrap_or_else(|| std::env::consts::OS.to_string());
    match sysinfo::System::os_version() {
        Some(version) => format!("{name} {version}"),
        None => name,
    }
}

#[derive(FromArgs)]
/// Leave the session and return to the login prompt.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn summary() -> &'static str {
        "Exit and reboot system"
    }

    fn usage() -> &'static str {
        "exit - Log out and reboot CommanDOS"
    }

    fn category() -> Category {
        Category::System
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        writeln!(ctx.out, "\nRebooting CommanDOS...")?;
        ctx.session.exit_request = Some(Outcome::Reboot);
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Display the current time.
pub struct Time {}

impl BuiltinCommand for Time {
    fn name() -> &'static str {
        "time"
    }

    fn summary() -> &'static str {
        "Display current time"
    }

    fn usage() -> &'static str {
        "time - Display current time"
    }

    fn category() -> Category {
        Category::System
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        writeln!(ctx.out, "{}", Local::now().format("%H:%M:%S"))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Check for a newer CommanDOS and install it.
pub struct Update {}

impl BuiltinCommand for Update {
    fn name() -> &'static str {
        "update"
    }

    fn summary() -> &'static str {
        "Check for updates"
    }

    fn usage() -> &'static str {
        "update - Check for system updates"
    }

    fn category() -> Category {
        Category::Other
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        writeln!(ctx.out, "Checking for updates...")?;
        let updater = &ctx.services.updater;
        let latest = match updater.check_remote_version() {
            Ok(latest) => latest,
            Err(err) => {
                writeln!(ctx.out, "Could not check for updates: {err}")?;
                return Ok(1);
            }
        };
        if latest == VERSION {
            writeln!(ctx.out, "You are using the latest version.")?;
            return Ok(0);
        }

        writeln!(ctx.out, "New version available: {latest}")?;
        if !console::confirm(ctx.console, "Download and install update? (y/n): ", "y") {
            writeln!(ctx.out, "Update cancelled.")?;
            return Ok(0);
        }

        writeln!(ctx.out, "Downloading update...")?;
        let archive = match updater.download() {
            Ok(archive) => archive,
            Err(err) => {
                writeln!(ctx.out, "Update failed: {err}")?;
                return Ok(1);
            }
        };

        writeln!(ctx.out, "Installing update...")?;
        match updater.apply_update(&archive) {
            Ok(()) => {
                writeln!(ctx.out, "Update installed successfully!")?;
                writeln!(ctx.out, "Rebooting CommanDOS...")?;
                ctx.session.exit_request = Some(Outcome::Restart);
                Ok(0)
            }
            Err(err) => {
                writeln!(ctx.out, "Update failed: {err}")?;
                writeln!(
                    ctx.out,
                    "System may be in an unstable state. Please reinstall manually."
                )?;
                Ok(1)
            }
        }
    }
}

#[derive(FromArgs)]
/// Install an app from a .cdos file or a directory, or remove one with -d.
pub struct Install {
    #[argh(option, short = 'd')]
    /// name of an installed app to remove.
    pub remove: Option<String>,

    #[argh(positional, greedy)]
    /// a .cdos file, or a directory to choose one from.
    pub path: Vec<String>,
}

impl BuiltinCommand for Install {
    fn name() -> &'static str {
        "install"
    }

    fn summary() -> &'static str {
        "Install/uninstall apps"
    }

    fn usage() -> &'static str {
        "install <path> - Install app from .cdos file\ninstall -d <app> - Uninstall app"
    }

    fn category() -> Category {
        Category::Apps
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        if let Some(name) = self.remove {
            return match install::uninstall(&mut ctx.services.store, &name, ctx.console) {
                Ok(()) => {
                    ctx.session.apps_changed = true;
                    writeln!(ctx.out, "Successfully uninstalled '{name}'")?;
                    Ok(0)
                }
                Err(UninstallError::Cancelled) => {
                    writeln!(ctx.out, "{}", UninstallError::Cancelled)?;
                    Ok(0)
                }
                Err(err) => {
                    writeln!(ctx.out, "{err}")?;
                    Ok(1)
                }
            };
        }

        if self.path.is_empty() {
            writeln!(ctx.out, "Usage: install <path>")?;
            return Ok(1);
        }
        // paths with spaces arrive as several words
        let path = ctx.session.resolve(self.path.join(" "));
        match install::install(&mut ctx.services.store, &path, ctx.console, ctx.out) {
            Ok(descriptor) => {
                ctx.session.apps_changed = true;
                writeln!(ctx.out, "Successfully installed {}", descriptor.name)?;
                if ctx.table.builtin(&descriptor.name).is_some() {
                    writeln!(
                        ctx.out,
                        "Note: app '{}' is hidden by the built-in command of the same name",
                        descriptor.name
                    )?;
                }
                Ok(0)
            }
            Err(err) => {
                writeln!(ctx.out, "{err}")?;
                Ok(1)
            }
        }
    }
}

#[derive(FromArgs)]
/// List installed apps.
pub struct Apps {}

impl BuiltinCommand for Apps {
    fn name() -> &'static str {
        "apps"
    }

    fn summary() -> &'static str {
        "List installed apps"
    }

    fn usage() -> &'static str {
        "apps - List all installed applications"
    }

    fn category() -> Category {
        Category::Apps
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let registry = ctx.services.store.registry();
        if registry.is_empty() {
            writeln!(ctx.out, "No apps installed")?;
            return Ok(0);
        }
        writeln!(ctx.out, "\nInstalled apps:")?;
        for app in registry.iter() {
            writeln!(ctx.out, "  {}", app.name)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Show system information.
pub struct Sysinfo {}

impl BuiltinCommand for Sysinfo {
    fn name() -> &'static str {
        "sysinfo"
    }

    fn summary() -> &'static str {
        "Show system information"
    }

    fn usage() -> &'static str {
        "sysinfo - Show detailed system information"
    }

    fn category() -> Category {
        Category::System
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let out = &mut *ctx.out;
        writeln!(out, "\nSystem Information")?;
        writeln!(out, "{}", "=".repeat(30))?;
        writeln!(out, "CommanDOS Version: {VERSION}")?;
        writeln!(out, "Uptime: {}", ctx.session.uptime())?;
        writeln!(out, "Current Directory: {}", ctx.session.current_dir.display())?;

        writeln!(out, "\nHost System:")?;
        writeln!(out, "  OS: {}", host_description())?;
        writeln!(out, "  Architecture: {}", std::env::consts::ARCH)?;

        let system = sysinfo::System::new_all();
        writeln!(out, "\nHardware:")?;
        writeln!(out, "  CPU Cores: {}", system.cpus().len())?;
        writeln!(
            out,
            "  Memory: {} available / {} total",
            format_size(system.available_memory()),
            format_size(system.total_memory())
        )?;
        let disks = sysinfo::Disks::new_with_refreshed_list();
        // the disk holding the current directory: longest matching mount point
        let disk = disks
            .list()
            .iter()
            .filter(|disk| ctx.session.current_dir.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len());
        match disk {
            Some(disk) => writeln!(
                out,
                "  Disk: {} free / {} total",
                format_size(disk.available_space()),
                format_size(disk.total_space())
            )?,
            None => writeln!(out, "  Disk: Information unavailable")?,
        }

        writeln!(out, "\nApplications:")?;
        writeln!(out, "  Installed Apps: {}", ctx.services.store.registry().len())?;
        writeln!(out, "  Total Commands: {}", ctx.table.len())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Show command history.
pub struct History {}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn summary() -> &'static str {
        "Show command history"
    }

    fn usage() -> &'static str {
        "history - Show command history"
    }

    fn category() -> Category {
        Category::Other
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let history = &ctx.session.history;
        if history.is_empty() {
            writeln!(ctx.out, "No command history available")?;
            return Ok(0);
        }

        writeln!(ctx.out, "\nCommand History:")?;
        writeln!(ctx.out, "{}", "-".repeat(20))?;
        let limit = ctx.services.config.system.history_limit;
        let start = history.len().saturating_sub(limit);
        for (index, line) in history.iter().enumerate().skip(start) {
            writeln!(ctx.out, "{:3}: {line}", index + 1)?;
        }
        if start > 0 {
            writeln!(ctx.out, "\n... and {start} more commands")?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Show how long this session has been running.
pub struct Uptime {}

impl BuiltinCommand for Uptime {
    fn name() -> &'static str {
        "uptime"
    }

    fn summary() -> &'static str {
        "Show system uptime"
    }

    fn usage() -> &'static str {
        "uptime - Show system uptime"
    }

    fn category() -> Category {
        Category::System
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        writeln!(ctx.out, "System uptime: {}", ctx.session.uptime())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Simulate a system crash. The shell stops responding until Ctrl+C.
pub struct Crash {}

impl BuiltinCommand for Crash {
    fn name() -> &'static str {
        "crash"
    }

    fn summary() -> &'static str {
        "Simulate system crash"
    }

    fn usage() -> &'static str {
        "crash - Simulate system crash"
    }

    fn category() -> Category {
        Category::Hidden
    }

    fn execute(self, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let recoverable = console::watch_interrupts();
        console::INTERRUPTED.store(false, Ordering::SeqCst);
        writeln!(ctx.out, "\nERROR: Critical system failure detected!")?;
        writeln!(ctx.out, "System unresponsive... Press Ctrl+C to force quit")?;
        ctx.out.flush()?;
        tracing::warn!(recoverable, "simulated crash requested");
        freeze_until(&console::INTERRUPTED, ctx.out)
    }
}

/// Block until `interrupted` is raised, then report recovery.
fn freeze_until(interrupted: &AtomicBool, out: &mut dyn Write) -> Result<ExitCode> {
    while !interrupted.swap(false, Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }
    writeln!(out, "\nSystem recovered. Normal operation resumed.")?;
    Ok(0)
}
