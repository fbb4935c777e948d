//! In-memory console and output adapters.
//!
//! The REPL, the login gate and the interactive commands only talk to a
//! [`Console`] and a `dyn Write`, so these let a whole session be driven from
//! a script and its output inspected afterwards.

use crate::console::{Console, Input};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Result as IoResult, Write};
use std::rc::Rc;

/// Console that replays a fixed list of answers.
///
/// Once the script runs out every read yields [`Input::Eof`].
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    answers: VecDeque<Input>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedConsole {
    /// Each string becomes one [`Input::Line`].
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_inputs(lines.into_iter().map(|line| Input::Line(line.into())))
    }

    pub fn from_inputs(inputs: impl IntoIterator<Item = Input>) -> Self {
        Self {
            answers: inputs.into_iter().collect(),
            prompts: Rc::default(),
        }
    }

    /// Handle on every prompt shown so far, usable after the console has been
    /// moved into an interpreter.
    pub fn prompts(&self) -> Rc<RefCell<Vec<String>>> {
        self.prompts.clone()
    }

    fn next(&mut self, prompt: &str) -> Input {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.answers.pop_front().unwrap_or(Input::Eof)
    }
}

impl Console for ScriptedConsole {
    fn read_line(&mut self, prompt: &str) -> IoResult<Input> {
        Ok(self.next(prompt))
    }

    fn read_secret(&mut self, prompt: &str) -> IoResult<Input> {
        Ok(self.next(prompt))
    }
}

/// Memory-backed writer for capturing shell output.
#[derive(Debug, Default)]
pub struct MemWriter {
    buf: Rc<RefCell<Vec<u8>>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create writer and return (writer, handle) so the caller can read the
    /// collected bytes after the writer has been moved elsewhere.
    pub fn with_handle() -> (Self, Rc<RefCell<Vec<u8>>>) {
        let writer = MemWriter::new();
        let handle = writer.buf.clone();
        (writer, handle)
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(handle: &Rc<RefCell<Vec<u8>>>) -> String {
        String::from_utf8_lossy(&handle.borrow()).into_owned()
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.buf.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::confirm;

    #[test]
    fn scripted_console_replays_then_hits_eof() {
        let mut console = ScriptedConsole::new(["first", "second"]);
        let prompts = console.prompts();

        assert_eq!(console.read_line("a> ").unwrap(), Input::Line("first".into()));
        assert_eq!(console.read_secret("b> ").unwrap(), Input::Line("second".into()));
        assert_eq!(console.read_line("c> ").unwrap(), Input::Eof);
        assert_eq!(*prompts.borrow(), vec!["a> ", "b> ", "c> "]);
    }

    #[test]
    fn confirm_accepts_only_the_expected_answer() {
        let mut console = ScriptedConsole::new(["YES ", "y", "yes"]);
        assert!(confirm(&mut console, "sure? ", "yes"));
        assert!(!confirm(&mut console, "sure? ", "yes"));
        assert!(confirm(&mut console, "sure? ", "yes"));
        // script exhausted: end of input is a refusal
        assert!(!confirm(&mut console, "sure? ", "yes"));
    }

    #[test]
    fn mem_writer_handle_sees_writes() {
        let (mut writer, handle) = MemWriter::with_handle();
        write!(writer, "hello ").unwrap();
        writeln!(writer, "world").unwrap();
        assert_eq!(MemWriter::contents(&handle), "hello world\n");
    }
}
