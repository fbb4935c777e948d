use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the process Ctrl-C handler; rustyline handles Ctrl-C itself while
/// a line is being read.
pub static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the Ctrl-C handler on first use. Returns whether it is active.
pub fn watch_interrupts() -> bool {
    static INSTALLED: OnceLock<bool> = OnceLock::new();
    *INSTALLED.get_or_init(|| {
        match ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("can't install Ctrl-C handler: {err}");
                false
            }
        }
    })
}

/// One answer from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    /// Ctrl-D or a closed input stream.
    Eof,
}

/// Interactive input used by the login gate, the REPL and every prompt a
/// command asks (confirmations, menu picks).
pub trait Console {
    fn read_line(&mut self, prompt: &str) -> io::Result<Input>;

    /// Read without echo.
    fn read_secret(&mut self, prompt: &str) -> io::Result<Input>;

    /// Make `line` available to line editing recall. No-op by default.
    fn add_history(&mut self, _line: &str) {}
}

/// Ask a question and compare the trimmed, lower-cased answer with `accept`.
///
/// Anything else, including interrupt and end of input, counts as "no".
pub fn confirm(console: &mut dyn Console, prompt: &str, accept: &str) -> bool {
    match console.read_line(prompt) {
        Ok(Input::Line(answer)) => answer.trim().eq_ignore_ascii_case(accept),
        Ok(_) => false,
        Err(err) => {
            tracing::warn!("prompt failed: {err}");
            false
        }
    }
}

/// Terminal console: rustyline for editable lines, dialoguer for hidden input.
pub struct TerminalConsole {
    editor: DefaultEditor,
}

impl TerminalConsole {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl Console for TerminalConsole {
    fn read_line(&mut self, prompt: &str) -> io::Result<Input> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Input::Line(line)),
            Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
            Err(ReadlineError::Eof) => Ok(Input::Eof),
            Err(ReadlineError::Io(err)) => Err(err),
            Err(err) => Err(io::Error::other(err)),
        }
    }

    fn read_secret(&mut self, prompt: &str) -> io::Result<Input> {
        // dialoguer appends its own ": "
        let prompt = prompt.trim_end().trim_end_matches(':');
        match dialoguer::Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
        {
            Ok(secret) => Ok(Input::Line(secret)),
            Err(dialoguer::Error::IO(err)) if err.kind() == io::ErrorKind::Interrupted => {
                Ok(Input::Interrupted)
            }
            Err(dialoguer::Error::IO(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Ok(Input::Eof)
            }
            Err(err) => Err(io::Error::other(err)),
        }
    }

    fn add_history(&mut self, line: &str) {
        if let Err(err) = self.editor.add_history_entry(line) {
            tracing::debug!("history entry dropped: {err}");
        }
    }
}
