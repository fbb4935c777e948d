use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitCode};

use anyhow::{Context, Result};
use argh::FromArgs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use commandos::auth::AuthFailure;
use commandos::console::TerminalConsole;
use commandos::update::HttpUpdateSource;
use commandos::{BootError, Interpreter, Outcome, ShellConfig, VERSION};

#[derive(FromArgs)]
/// CommanDOS interactive shell.
struct Args {
    #[argh(option)]
    /// installation root holding the System directory.
    root: Option<PathBuf>,

    #[argh(option)]
    /// configuration file to use instead of the per-user one.
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("critical error: {err:#}");
            eprintln!("Critical system error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let mut config = ShellConfig::load(args.config.as_deref())?;
    if let Some(root) = args.root {
        config = config.with_root(root);
    }
    let guard = init_logging(&config)?;
    tracing::info!(version = VERSION, root = %config.system.root.display(), "commandos starting");

    loop {
        println!("CommanDOS Login");
        println!("{}", "=".repeat(20));

        let console = TerminalConsole::new().context("can't open the terminal")?;
        let source = HttpUpdateSource::new(&config.update);
        let booted = Interpreter::boot(
            config.clone(),
            Box::new(console),
            Box::new(io::stdout()),
            Box::new(source),
        );
        let mut shell = match booted {
            Ok(shell) => shell,
            Err(err) => {
                // the gate already printed the lock-out
                if !matches!(err, BootError::Auth(AuthFailure::LockedOut)) {
                    println!("Error: {err}");
                }
                tracing::error!("boot refused: {err}");
                return Ok(ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1)));
            }
        };

        match shell.repl() {
            Outcome::Reboot => continue,
            Outcome::Quit => return Ok(ExitCode::SUCCESS),
            Outcome::Restart => return restart(guard),
        }
    }
}

/// Log to a daily file in the platform data directory, never to stdout.
fn init_logging(config: &ShellConfig) -> Result<WorkerGuard> {
    let log_dir = directories::ProjectDirs::from("", "", "commandos")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("can't create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "commandos.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .with_ansi(false)
        .init();
    Ok(guard)
}

/// Replace this process with a fresh copy of the (possibly updated) binary.
fn restart(guard: WorkerGuard) -> Result<ExitCode> {
    let exe = std::env::current_exe().context("can't locate the running binary")?;
    let args: Vec<_> = std::env::args_os().skip(1).collect();
    tracing::info!("restarting {}", exe.display());
    drop(guard);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = Command::new(&exe).args(&args).exec();
        Err(err).with_context(|| format!("can't restart {}", exe.display()))
    }

    #[cfg(not(unix))]
    {
        let status = Command::new(&exe)
            .args(&args)
            .status()
            .with_context(|| format!("can't restart {}", exe.display()))?;
        Ok(ExitCode::from(
            status.code().and_then(|c| u8::try_from(c).ok()).unwrap_or(1),
        ))
    }
}
