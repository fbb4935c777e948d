use chrono::{DateTime, Local, TimeDelta};
use std::path::{Path, PathBuf};

/// How a finished REPL wants the binary to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// End of input; the process exits.
    Quit,
    /// `exit`: run the login again without leaving the process.
    Reboot,
    /// An update was applied; the binary re-executes itself.
    Restart,
}

/// Per-login state shared by every command.
///
/// `current_dir` is the shell's own notion of the working directory. `cd`
/// changes only this field; the process directory stays where it was.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    pub current_dir: PathBuf,
    pub started_at: DateTime<Local>,
    pub history: Vec<String>,
    /// Set by a command that ends the loop; checked after every dispatch.
    pub exit_request: Option<Outcome>,
    /// The registry changed; the command table must be rebuilt before the
    /// next line.
    pub apps_changed: bool,
}

impl Session {
    pub fn new(user: impl Into<String>, current_dir: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            current_dir: current_dir.into(),
            started_at: Local::now(),
            history: Vec::new(),
            exit_request: None,
            apps_changed: false,
        }
    }

    /// `path` relative to the shell directory, or as-is when absolute.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_dir.join(path)
        }
    }

    pub fn record(&mut self, line: &str) {
        self.history.push(line.to_string());
    }

    /// Last component of the current directory, shown in the prompt.
    pub fn prompt_label(&self) -> String {
        self.current_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.current_dir.display().to_string())
    }

    pub fn uptime(&self) -> String {
        format_uptime(Local::now() - self.started_at)
    }
}

/// `2 days, 1 hour, 5 minutes`; seconds only when under a minute.
pub fn format_uptime(delta: TimeDelta) -> String {
    let total = delta.num_seconds().max(0);
    let days = total / 86_400;
    let hours = total % 86_400 / 3_600;
    let minutes = total % 3_600 / 60;
    let seconds = total % 60;

    let plural = |n: i64, unit: &str| format!("{n} {unit}{}", if n == 1 { "" } else { "s" });
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(plural(days, "day"));
    }
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(plural(minutes, "minute"));
    }
    if parts.is_empty() {
        parts.push(plural(seconds, "second"));
    }
    parts.join(", ")
}

/// Human readable byte count: `0 B`, `512 B`, `1.5 KB`, up to GB.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
