//! Loaded apps and the interpreter that runs them.

use crate::command::ExitCode;
use crate::external;
use crate::plugin::lexer::{self, Word, WordPart};
use crate::plugin::script::{self, Compare, ENTRY_POINT, Function, ParseError, Script, Statement};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

/// Deepest `call` chain an app may build.
pub const MAX_CALL_DEPTH: usize = 32;

const NO_DESCRIPTION: &str = "No description available";

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("return value '{0}' is not an integer")]
    BadStatus(String),
    #[error("{0}")]
    Raised(String),
    #[error("no function named '{0}'")]
    UnknownFunction(String),
    #[error("call depth exceeded {}", MAX_CALL_DEPTH)]
    RecursionLimit,
    #[error("{0}: program not found")]
    ProgramNotFound(String),
    #[error("eval: {0}")]
    Eval(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What an app may touch while running.
pub struct PluginHost<'a> {
    pub out: &'a mut dyn Write,
    /// Working directory for spawned programs; the shell's `cd` target.
    pub current_dir: &'a Path,
}

/// An app that passed validation and whose top-level definitions have been
/// evaluated. Immutable once built; each invocation gets fresh frames.
#[derive(Debug, Clone)]
pub struct PluginCapsule {
    name: String,
    script: Script,
    globals: HashMap<String, String>,
}

impl PluginCapsule {
    /// Evaluate the script's top-level `let`s in a namespace that starts with
    /// `APP_NAME` and `SYSTEM_VERSION`.
    pub(crate) fn new(name: &str, script: Script, system_version: &str) -> Self {
        let mut globals = HashMap::from([
            ("APP_NAME".to_string(), name.to_string()),
            ("SYSTEM_VERSION".to_string(), system_version.to_string()),
        ]);
        let load_frame = Frame::default();
        for (key, value) in &script.globals {
            let value = expand_all(value, &load_frame, &globals).join(" ");
            globals.insert(key.clone(), value);
        }
        Self {
            name: name.to_string(),
            script,
            globals,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.script.metadata
    }

    pub fn description(&self) -> &str {
        self.script
            .metadata
            .get("description")
            .map(String::as_str)
            .unwrap_or(NO_DESCRIPTION)
    }

    /// Value of a top-level variable after load.
    pub fn global(&self, key: &str) -> Option<&str> {
        self.globals.get(key).map(String::as_str)
    }

    /// Run the entry point. Any error is reported to `host.out` and becomes
    /// status 1.
    pub fn invoke(&self, args: &[String], host: &mut PluginHost<'_>) -> ExitCode {
        match self.try_invoke(args, host) {
            Ok(code) => code,
            Err(err) => {
                tracing::warn!(app = %self.name, "app failed: {err}");
                let _ = writeln!(host.out, "Error executing {}: {err}", self.name);
                1
            }
        }
    }

    pub fn try_invoke(
        &self,
        args: &[String],
        host: &mut PluginHost<'_>,
    ) -> Result<ExitCode, ExecutionError> {
        let mut run = Runner {
            capsule: self,
            host,
            depth: 0,
        };
        run.call(ENTRY_POINT, args.to_vec())
    }
}

#[derive(Debug, Default)]
struct Frame {
    args: Vec<String>,
    locals: HashMap<String, String>,
    status: ExitCode,
}

impl Frame {
    fn lookup(&self, name: &str, globals: &HashMap<String, String>) -> String {
        match name {
            "#" => self.args.len().to_string(),
            "@" => self.args.join(" "),
            "?" => self.status.to_string(),
            digit if digit.len() == 1 && digit.as_bytes()[0].is_ascii_digit() => {
                let index = usize::from(digit.as_bytes()[0] - b'0');
                if index == 0 {
                    // $0 is the app's own name
                    globals.get("APP_NAME").cloned().unwrap_or_default()
                } else {
                    self.args.get(index - 1).cloned().unwrap_or_default()
                }
            }
            name => self
                .locals
                .get(name)
                .or_else(|| globals.get(name))
                .cloned()
                .unwrap_or_default(),
        }
    }
}

fn expand(word: &Word, frame: &Frame, globals: &HashMap<String, String>) -> String {
    word.parts
        .iter()
        .map(|part| match part {
            WordPart::Literal(text) => text.clone(),
            WordPart::Param(name) => frame.lookup(name, globals),
        })
        .collect()
}

fn expand_all(words: &[Word], frame: &Frame, globals: &HashMap<String, String>) -> Vec<String> {
    words.iter().map(|w| expand(w, frame, globals)).collect()
}

enum Flow {
    Continue,
    Return(ExitCode),
}

struct Runner<'c, 'h, 'o> {
    capsule: &'c PluginCapsule,
    host: &'h mut PluginHost<'o>,
    depth: usize,
}

impl Runner<'_, '_, '_> {
    fn call(&mut self, name: &str, args: Vec<String>) -> Result<ExitCode, ExecutionError> {
        let capsule = self.capsule;
        let function: &Function = capsule
            .script
            .functions
            .get(name)
            .ok_or_else(|| ExecutionError::UnknownFunction(name.to_string()))?;
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecutionError::RecursionLimit);
        }

        let mut frame = Frame {
            args,
            ..Frame::default()
        };
        if let Some(param) = &function.param {
            let joined = frame.args.join(" ");
            frame.locals.insert(param.clone(), joined);
        }

        self.depth += 1;
        let result = self.run_body(&function.body, &mut frame);
        self.depth -= 1;
        result
    }

    fn run_body(&mut self, body: &[Statement], frame: &mut Frame) -> Result<ExitCode, ExecutionError> {
        for statement in body {
            if let Flow::Return(code) = self.execute(statement, frame)? {
                return Ok(code);
            }
        }
        Ok(0)
    }

    fn execute(&mut self, statement: &Statement, frame: &mut Frame) -> Result<Flow, ExecutionError> {
        let capsule = self.capsule;
        let globals = &capsule.globals;
        match statement {
            Statement::Print(words) => {
                writeln!(self.host.out, "{}", expand_all(words, frame, globals).join(" "))?;
            }
            Statement::Let { name, value } => {
                let value = expand_all(value, frame, globals).join(" ");
                frame.locals.insert(name.clone(), value);
            }
            Statement::Return(None) => return Ok(Flow::Return(0)),
            Statement::Return(Some(word)) => {
                let text = expand(word, frame, globals);
                let code = text
                    .trim()
                    .parse::<ExitCode>()
                    .map_err(|_| ExecutionError::BadStatus(text))?;
                return Ok(Flow::Return(code));
            }
            Statement::Fail(words) => {
                let message = expand_all(words, frame, globals).join(" ");
                return Err(ExecutionError::Raised(message));
            }
            Statement::Call { function, args } => {
                let args = expand_all(args, frame, globals);
                frame.status = self.call(function, args)?;
            }
            Statement::Exec { program, args } => {
                let program = expand(program, frame, globals);
                let args = expand_all(args, frame, globals);
                let path = external::lookup(&program, self.host.current_dir)
                    .ok_or_else(|| ExecutionError::ProgramNotFound(program.clone()))?;
                tracing::debug!(app = %self.capsule.name, ?path, "spawning host program");
                frame.status =
                    external::run_program(&path, &args, self.host.current_dir, self.host.out)?;
            }
            Statement::Eval(words) => {
                let text = expand_all(words, frame, globals).join(" ");
                let words = lexer::split_into_words(&text).map_err(|err| ParseError {
                    line: 1,
                    message: err.to_string(),
                })?;
                let statement = script::parse_statement(words, 1)?;
                if self.depth >= MAX_CALL_DEPTH {
                    return Err(ExecutionError::RecursionLimit);
                }
                self.depth += 1;
                let flow = self.execute(&statement, frame);
                self.depth -= 1;
                return flow;
            }
            Statement::If {
                left,
                op,
                right,
                then,
            } => {
                let equal = expand(left, frame, globals) == expand(right, frame, globals);
                let holds = match op {
                    Compare::Eq => equal,
                    Compare::Ne => !equal,
                };
                if holds {
                    return self.execute(then, frame);
                }
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::script::parse_script;
    use std::path::PathBuf;

    fn capsule(source: &str) -> PluginCapsule {
        PluginCapsule::new("demo", parse_script(source).unwrap(), "1.0.0")
    }

    fn run(capsule: &PluginCapsule, args: &[&str]) -> (ExitCode, String) {
        let mut out = Vec::<u8>::new();
        let cwd = PathBuf::from(".");
        let mut host = PluginHost {
            out: &mut out,
            current_dir: &cwd,
        };
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let code = capsule.invoke(&args, &mut host);
        (code, String::from_utf8(out).unwrap())
    }

    const GREETER: &str = r#"
APP_INFO = { description = "says hi" }
let GREETING = "Hello"
let BANNER = "$APP_NAME v$SYSTEM_VERSION"

def run(args):
    if $# == 0 then return 2
    print "$GREETING, $1!"
    print "all: $args"
"#;

    #[test]
    fn globals_see_the_seeded_namespace() {
        let app = capsule(GREETER);
        assert_eq!(app.global("GREETING"), Some("Hello"));
        assert_eq!(app.global("BANNER"), Some("demo v1.0.0"));
        assert_eq!(app.description(), "says hi");
    }

    #[test]
    fn run_returns_declared_status() {
        let app = capsule(GREETER);
        assert_eq!(run(&app, &[]), (2, String::new()));
        let (code, out) = run(&app, &["World", "again"]);
        assert_eq!(code, 0);
        assert_eq!(out, "Hello, World!\nall: World again\n");
    }

    #[test]
    fn missing_description_has_a_default() {
        let app = capsule("APP_INFO = {}\ndef run(a):\n    return 0\n");
        assert_eq!(app.description(), "No description available");
    }

    #[test]
    fn errors_become_status_one() {
        let app = capsule("APP_INFO = {}\ndef run(a):\n    fail broken $1\n");
        let (code, out) = run(&app, &["badly"]);
        assert_eq!(code, 1);
        assert_eq!(out, "Error executing demo: broken badly\n");

        let app = capsule("APP_INFO = {}\ndef run(a):\n    return lots\n");
        let (code, out) = run(&app, &[]);
        assert_eq!(code, 1);
        assert!(out.contains("'lots' is not an integer"));
    }

    #[test]
    fn call_sets_status_and_keeps_frames_apart() {
        let app = capsule(
            "APP_INFO = {}\n\
             def run(a):\n    let X = outer\n    call inner $1\n    print $? $X\n    return $?\n\
             def inner(v):\n    let X = inner\n    print $v $X\n    return 7\n",
        );
        let (code, out) = run(&app, &["arg"]);
        assert_eq!(code, 7);
        assert_eq!(out, "arg inner\n7 outer\n");
    }

    #[test]
    fn runaway_recursion_is_stopped() {
        let app = capsule("APP_INFO = {}\ndef run(a):\n    call run\n");
        let (code, out) = run(&app, &[]);
        assert_eq!(code, 1);
        assert!(out.contains("call depth exceeded 32"));
    }

    #[test]
    fn self_evaluating_variable_is_stopped() {
        let app = capsule("APP_INFO = {}\ndef run(a):\n    let X = 'eval $X'\n    eval $X\n");
        let (code, out) = run(&app, &[]);
        assert_eq!(code, 1);
        assert!(out.contains("call depth exceeded 32"));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let app = capsule("APP_INFO = {}\ndef run(a):\n    call nowhere\n");
        let err = app
            .try_invoke(
                &[],
                &mut PluginHost {
                    out: &mut Vec::<u8>::new(),
                    current_dir: Path::new("."),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownFunction(name) if name == "nowhere"));
    }

    #[test]
    fn eval_runs_expanded_text() {
        let app = capsule("APP_INFO = {}\ndef run(a):\n    eval $1 $2\n    return 3\n");
        assert_eq!(run(&app, &["print", "evaluated"]), (3, "evaluated\n".into()));
        assert_eq!(run(&app, &["return", "9"]).0, 9);
        let (code, out) = run(&app, &["bogus"]);
        assert_eq!(code, 1);
        assert!(out.contains("eval: line 1: unknown statement 'bogus'"));
    }

    #[test]
    fn exec_of_missing_program_fails() {
        let app = capsule(
            "APP_INFO = {}\ndef run(a):\n    exec definitely-not-a-real-program-xyz\n",
        );
        let (code, out) = run(&app, &[]);
        assert_eq!(code, 1);
        assert!(out.contains("definitely-not-a-real-program-xyz: program not found"));
    }

    #[test]
    #[cfg(unix)]
    fn exec_output_and_status() {
        let app = capsule(
            "APP_INFO = {}\ndef run(a):\n    exec sh -c \"echo from-sh; exit 4\"\n    print status $?\n",
        );
        assert_eq!(run(&app, &[]), (0, "from-sh\nstatus 4\n".into()));
    }
}
