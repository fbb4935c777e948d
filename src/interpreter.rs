use crate::VERSION;
use crate::auth::{self, BootError, CredentialGate};
use crate::builtin;
use crate::command::{CommandFactory, Context, ExitCode, Services};
use crate::config::ShellConfig;
use crate::console::{Console, Input};
use crate::plugin::PluginLoader;
use crate::plugin::lexer::{self, Word};
use crate::registry::RegistryStore;
use crate::session::{Outcome, Session};
use crate::table::CommandTable;
use crate::update::{UpdateSource, Updater};
use chrono::Local;
use std::io::Write;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate, see [`builtin`].
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Initializing,
    Ready,
    Executing,
    Terminated,
}

/// The command dispatcher: reads lines, resolves them against the
/// [`CommandTable`] and runs them with a [`Context`].
///
/// Nothing a command does unwinds past [`Interpreter::execute_line`]: errors
/// become a message and status 1.
pub struct Interpreter {
    state: ShellState,
    session: Session,
    services: Services,
    table: CommandTable,
    loader: PluginLoader,
    console: Box<dyn Console>,
    out: Box<dyn Write>,
}

impl Interpreter {
    /// Check the installation, run the login gate and start a session for
    /// whoever got in.
    pub fn boot(
        config: ShellConfig,
        mut console: Box<dyn Console>,
        mut out: Box<dyn Write>,
        source: Box<dyn UpdateSource>,
    ) -> Result<Self, BootError> {
        let paths = config.paths();
        if !auth::setup_completed(&paths.setup_marker) {
            tracing::warn!(marker = %paths.setup_marker.display(), "setup not completed");
            return Err(BootError::NotConfigured);
        }
        let gate = CredentialGate::open(&paths, config.login.max_attempts)?;
        let principal = gate.login(console.as_mut(), out.as_mut())?;

        Ok(Self::new(
            config,
            principal.username,
            builtin::defaults(),
            console,
            out,
            source,
        ))
    }

    /// Start a session for `user` without asking for credentials.
    pub fn new(
        config: ShellConfig,
        user: impl Into<String>,
        builtins: Vec<Box<dyn CommandFactory>>,
        console: Box<dyn Console>,
        out: Box<dyn Write>,
        source: Box<dyn UpdateSource>,
    ) -> Self {
        let paths = config.paths();
        let current_dir = std::fs::canonicalize(&paths.root).unwrap_or_else(|_| paths.root.clone());
        let mut store = RegistryStore::new(&paths.apps_dir, &paths.registry);
        store.load();

        let mut shell = Self {
            state: ShellState::Initializing,
            session: Session::new(user, current_dir),
            services: Services {
                updater: Updater::new(source, paths.clone()),
                config,
                paths,
                store,
            },
            table: CommandTable::new(builtins),
            loader: PluginLoader::new(VERSION),
            console,
            out,
        };
        shell.rebuild_table();
        shell.state = ShellState::Ready;
        tracing::info!(user = %shell.session.user, commands = shell.table.len(), "session ready");
        shell
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    fn rebuild_table(&mut self) {
        self.table.reload_apps(
            self.services.store.registry(),
            &mut self.loader,
            self.console.as_mut(),
            self.out.as_mut(),
        );
    }

    /// Read and run lines until the session ends.
    pub fn repl(&mut self) -> Outcome {
        let _ = writeln!(self.out, "CommanDOS v{VERSION}");
        let _ = writeln!(self.out, "Type 'help' for available commands.");
        let _ = writeln!(
            self.out,
            "Welcome! System ready at {}",
            Local::now().format("%H:%M:%S")
        );

        let outcome = loop {
            if let Some(outcome) = self.session.exit_request.take() {
                break outcome;
            }

            let prompt = format!("{}>", self.session.prompt_label());
            match self.console.read_line(&prompt) {
                Ok(Input::Line(line)) => {
                    self.execute_line(&line);
                }
                Ok(Input::Interrupted) => {
                    let _ = writeln!(self.out, "\nUse 'exit' command to quit CommanDOS.");
                }
                Ok(Input::Eof) => {
                    let _ = writeln!(self.out, "\nGoodbye!");
                    break Outcome::Quit;
                }
                Err(err) => {
                    tracing::error!("console failed: {err}");
                    let _ = writeln!(self.out, "\nInput error: {err}");
                    break Outcome::Quit;
                }
            }
        };

        let _ = self.out.flush();
        self.state = ShellState::Terminated;
        tracing::info!(?outcome, "session ended");
        outcome
    }

    /// Run one input line and return its status. Blank lines return 0
    /// without touching the history; every other line is recorded, even a
    /// comment or one that fails to lex.
    pub fn execute_line(&mut self, line: &str) -> ExitCode {
        let line = line.trim();
        if line.is_empty() {
            return 0;
        }
        self.session.record(line);
        self.console.add_history(line);

        let words = match lexer::split_into_words(line) {
            Ok(words) => words,
            Err(err) => {
                let _ = writeln!(self.out, "Syntax error: {err}");
                return 1;
            }
        };
        let mut words = words.iter().map(Word::to_source);
        let Some(name) = words.next() else {
            return 0;
        };
        let name = name.to_lowercase();
        let args: Vec<String> = words.collect();

        self.state = ShellState::Executing;
        let code = self.dispatch(&name, &args);
        self.state = ShellState::Ready;

        if self.session.apps_changed {
            self.session.apps_changed = false;
            self.rebuild_table();
        }
        code
    }

    fn dispatch(&mut self, name: &str, args: &[String]) -> ExitCode {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let Some(cmd) = self.table.resolve(name, &args) else {
            let _ = writeln!(self.out, "'{name}' is not recognized as a command.");
            let _ = writeln!(self.out, "Type 'help' to see available commands.");
            return 1;
        };
        tracing::debug!(command = name, ?args, "dispatching");

        let mut ctx = Context {
            session: &mut self.session,
            console: self.console.as_mut(),
            out: self.out.as_mut(),
            services: &mut self.services,
            table: &self.table,
        };
        match cmd.execute(&mut ctx) {
            Ok(0) => 0,
            Ok(code) => {
                let _ = writeln!(self.out, "Command exited with code {code}");
                code
            }
            Err(err) => {
                tracing::warn!(command = name, "command failed: {err:#}");
                let _ = writeln!(self.out, "Error executing {name}: {err:#}");
                1
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixture::Fixture;
    use super::*;
    use crate::command::{Category, ExecutableCommand};
    use crate::io_adapters::{MemWriter, ScriptedConsole};
    use crate::update::fixed::{FixedSource, zip_of};
    use std::fs;

    const GREETER: &str = r#"APP_INFO = { description = "says hi" }

def run(args):
    print "Hi from $APP_NAME"
    return 0
"#;

    #[test]
    fn greeter_install_run_uninstall() {
        let mut fx = Fixture::builder().answers(&["yes"]).build();
        fs::create_dir_all(fx.root().join("Downloads")).unwrap();
        fs::write(fx.root().join("Downloads/greeter.cdos"), GREETER).unwrap();

        assert_eq!(fx.run("install Downloads/greeter.cdos"), 0);
        assert!(fx.take_output().contains("Successfully installed greeter"));

        fx.run("apps");
        assert_eq!(fx.take_output(), "\nInstalled apps:\n  greeter\n");

        assert_eq!(fx.run("GREETER"), 0);
        assert_eq!(fx.take_output(), "Hi from greeter\n");

        fx.run("help");
        assert!(fx.take_output().contains("\nInstalled Apps:\n  greeter      - says hi\n"));

        assert_eq!(fx.run("install -d greeter"), 0);
        assert!(fx.take_output().contains("Successfully uninstalled 'greeter'"));
        fx.run("apps");
        assert_eq!(fx.take_output(), "No apps installed\n");
        assert_eq!(fx.run("greeter"), 1);
        assert!(fx.take_output().contains("'greeter' is not recognized as a command."));
    }

    #[test]
    fn installed_help_app_does_not_replace_builtin() {
        let mut fx = Fixture::logged_in();
        fs::write(fx.root().join("help.cdos"), GREETER).unwrap();
        assert_eq!(fx.run("install help.cdos"), 0);
        let out = fx.take_output();
        assert!(out.contains("app 'help' is hidden"));

        assert_eq!(fx.run("help"), 0);
        let out = fx.take_output();
        assert!(out.contains("CommanDOS Command Reference:"));
        assert!(!out.contains("Hi from"));

        // later rebuilds stay quiet about it
        fs::write(fx.root().join("greeter.cdos"), GREETER).unwrap();
        assert_eq!(fx.run("install greeter.cdos"), 0);
        assert!(!fx.take_output().contains("hidden"));
    }

    #[test]
    fn app_with_missing_source_is_left_out() {
        let root = tempfile::TempDir::new().unwrap();
        let config = ShellConfig::defaults().unwrap().with_root(root.path());
        let paths = config.paths();
        let mut store = RegistryStore::new(&paths.apps_dir, &paths.registry);
        for name in ["gone", "kept"] {
            let descriptor = crate::registry::AppDescriptor::new(&paths.apps_dir, name);
            fs::create_dir_all(descriptor.source_path.parent().unwrap()).unwrap();
            fs::write(&descriptor.source_path, GREETER).unwrap();
            store.put(descriptor).unwrap();
        }
        fs::remove_file(crate::registry::app_source_path(&paths.apps_dir, "gone")).unwrap();

        let (out, output) = MemWriter::with_handle();
        let shell = Interpreter::new(
            config,
            "tester",
            builtin::defaults(),
            Box::new(ScriptedConsole::default()),
            Box::new(out),
            Box::new(FixedSource::new(VERSION, Vec::new())),
        );
        assert!(!shell.table().contains("gone"));
        assert!(shell.table().contains("kept"));
        assert!(MemWriter::contents(&output).contains("Error loading gone: can't read source"));
    }

    #[test]
    fn invalid_app_never_reaches_the_table() {
        let mut fx = Fixture::logged_in();
        fs::write(fx.root().join("norun.cdos"), "APP_INFO = {}\n").unwrap();
        assert_eq!(fx.run("install norun.cdos"), 1);
        assert!(fx.take_output().contains("Error: norun missing run() function"));
        assert!(!fx.shell().table().contains("norun"));
    }

    #[test]
    fn failing_app_reports_and_returns_one() {
        let mut fx = Fixture::logged_in();
        fs::write(
            fx.root().join("boom.cdos"),
            "APP_INFO = {}\ndef run(args):\n    fail kaboom\n",
        )
        .unwrap();
        fx.run("install boom.cdos");
        fx.take_output();

        assert_eq!(fx.run("boom"), 1);
        assert_eq!(
            fx.take_output(),
            "Error executing boom: kaboom\nCommand exited with code 1\n"
        );
        assert_eq!(fx.shell().state(), ShellState::Ready);
    }

    #[test]
    fn update_when_latest_changes_nothing() {
        let mut fx = Fixture::logged_in();
        let registry_before = fx.shell().services.store.registry().clone();
        let listing_before: Vec<_> = fs::read_dir(fx.root()).unwrap().flatten().map(|e| e.path()).collect();

        assert_eq!(fx.run("update"), 0);
        assert_eq!(
            fx.take_output(),
            "Checking for updates...\nYou are using the latest version.\n"
        );
        assert_eq!(fx.downloads.get(), 0);
        assert!(fx.prompts.borrow().is_empty());
        assert_eq!(fx.shell().services.store.registry(), &registry_before);
        let listing_after: Vec<_> = fs::read_dir(fx.root()).unwrap().flatten().map(|e| e.path()).collect();
        assert_eq!(listing_before, listing_after);
        assert_eq!(fx.session().exit_request, None);
    }

    #[test]
    fn update_applies_and_requests_restart() {
        let archive = zip_of(&[("System/NEWS.txt", "fresh")]);
        let mut fx = Fixture::builder()
            .remote("99.0.0", archive)
            .answers(&["y"])
            .build();

        assert_eq!(fx.run("update"), 0);
        let out = fx.take_output();
        assert!(out.contains("New version available: 99.0.0"));
        assert!(out.contains("Update installed successfully!"));
        assert_eq!(
            fs::read_to_string(fx.root().join("System/NEWS.txt")).unwrap(),
            "fresh"
        );
        assert_eq!(fx.session().exit_request, Some(Outcome::Restart));
    }

    #[test]
    fn declined_update_downloads_nothing() {
        let mut fx = Fixture::builder()
            .remote("99.0.0", Vec::new())
            .answers(&["n"])
            .build();
        assert_eq!(fx.run("update"), 0);
        assert!(fx.take_output().ends_with("Update cancelled.\n"));
        assert_eq!(fx.downloads.get(), 0);
    }

    #[test]
    fn broken_update_warns_about_state() {
        let mut fx = Fixture::builder()
            .remote("99.0.0", b"not a zip".to_vec())
            .answers(&["y"])
            .build();
        assert_eq!(fx.run("update"), 1);
        let out = fx.take_output();
        assert!(out.contains("Update failed: update archive is unreadable"));
        assert!(out.contains("System may be in an unstable state. Please reinstall manually."));
        assert_eq!(fx.session().exit_request, None);
    }

    #[test]
    fn unknown_and_malformed_lines() {
        let mut fx = Fixture::logged_in();
        assert_eq!(fx.run("frobnicate now"), 1);
        assert_eq!(
            fx.take_output(),
            "'frobnicate' is not recognized as a command.\nType 'help' to see available commands.\n"
        );
        assert_eq!(fx.run("dir 'unterminated"), 1);
        assert_eq!(fx.take_output(), "Syntax error: unterminated quote\n");
        assert_eq!(fx.run("   "), 0);
        assert_eq!(fx.run("# just a note"), 0);
        assert_eq!(fx.take_output(), "");
        assert_eq!(
            fx.session().history,
            ["frobnicate now", "dir 'unterminated", "# just a note"]
        );
    }

    struct Failing;

    impl ExecutableCommand for Failing {
        fn execute(self: Box<Self>, _ctx: &mut Context<'_>) -> anyhow::Result<ExitCode> {
            anyhow::bail!("disk on fire")
        }
    }

    struct FailingFactory;

    impl CommandFactory for FailingFactory {
        fn name(&self) -> &'static str {
            "explode"
        }
        fn summary(&self) -> &'static str {
            "Always fails"
        }
        fn usage(&self) -> &'static str {
            "explode"
        }
        fn category(&self) -> Category {
            Category::Other
        }
        fn try_create(&self, name: &str, _args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
            (name == "explode").then(|| Box::new(Failing) as Box<dyn ExecutableCommand>)
        }
    }

    #[test]
    fn command_errors_stop_at_the_dispatcher() {
        let mut builtins = builtin::defaults();
        builtins.push(Box::new(FailingFactory));
        let mut fx = Fixture::builder().builtins(builtins).build();

        assert_eq!(fx.run("explode"), 1);
        assert_eq!(fx.take_output(), "Error executing explode: disk on fire\n");
        assert_eq!(fx.run("time"), 0);
    }

    #[test]
    fn repl_handles_interrupt_and_eof() {
        let mut fx = Fixture::builder()
            .inputs([
                Input::Line(String::new()),
                Input::Line("time".into()),
                Input::Interrupted,
                Input::Eof,
            ])
            .build();

        assert_eq!(fx.shell().repl(), Outcome::Quit);
        assert_eq!(fx.shell().state(), ShellState::Terminated);
        let out = fx.take_output();
        assert!(out.starts_with("CommanDOS v"));
        assert!(out.contains("Welcome! System ready at "));
        assert!(out.contains("\nUse 'exit' command to quit CommanDOS.\n"));
        assert!(out.ends_with("\nGoodbye!\n"));
        assert_eq!(fx.session().history, ["time"]);

        let root_name = fs::canonicalize(fx.root()).unwrap();
        let label = root_name.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(fx.prompts.borrow()[0], format!("{label}>"));
    }

    #[test]
    fn exit_ends_the_repl_with_reboot() {
        let mut fx = Fixture::builder()
            .answers(&["exit", "time"])
            .build();
        assert_eq!(fx.shell().repl(), Outcome::Reboot);
        // the line after exit is never read
        assert_eq!(fx.prompts.borrow().len(), 1);
    }

    fn installation(root: &std::path::Path) -> ShellConfig {
        let config = ShellConfig::defaults().unwrap().with_root(root);
        let paths = config.paths();
        fs::create_dir_all(paths.credentials.parent().unwrap()).unwrap();
        fs::write(&paths.credentials, r#"{"amiho":"hunter2"}"#).unwrap();
        fs::write(&paths.setup_marker, "1").unwrap();
        config
    }

    #[test]
    fn three_wrong_passwords_refuse_boot() {
        let root = tempfile::TempDir::new().unwrap();
        let config = installation(root.path());
        let console = ScriptedConsole::new(["amiho", "a", "amiho", "b", "amiho", "c"]);
        let (out, output) = MemWriter::with_handle();

        let err = Interpreter::boot(
            config,
            Box::new(console),
            Box::new(out),
            Box::new(FixedSource::new(VERSION, Vec::new())),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BootError::Auth(auth::AuthFailure::LockedOut)));
        assert_eq!(err.exit_code(), 1);
        assert!(MemWriter::contents(&output).contains("Too many failed attempts. System locked."));
    }

    #[test]
    fn boot_logs_in_and_loads_apps() {
        let root = tempfile::TempDir::new().unwrap();
        let config = installation(root.path());
        let paths = config.paths();
        let app = crate::registry::app_source_path(&paths.apps_dir, "greeter");
        fs::create_dir_all(app.parent().unwrap()).unwrap();
        fs::write(&app, GREETER).unwrap();
        // registry document recovered from the apps directory
        let mut store = RegistryStore::new(&paths.apps_dir, &paths.registry);
        store.rebuild();

        let shell = Interpreter::boot(
            config,
            Box::new(ScriptedConsole::new(["amiho", "hunter2"])),
            Box::new(MemWriter::new()),
            Box::new(FixedSource::new(VERSION, Vec::new())),
        )
        .ok()
        .unwrap();
        assert_eq!(shell.state(), ShellState::Ready);
        assert_eq!(shell.session().user, "amiho");
        assert!(shell.table().contains("greeter"));
    }

    #[test]
    fn unconfigured_installation_refuses_boot() {
        let root = tempfile::TempDir::new().unwrap();
        let config = installation(root.path());
        fs::write(config.paths().setup_marker, "0").unwrap();

        let err = Interpreter::boot(
            config,
            Box::new(ScriptedConsole::default()),
            Box::new(MemWriter::new()),
            Box::new(FixedSource::new(VERSION, Vec::new())),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BootError::NotConfigured));
    }
}
