//! App script syntax tree and parser.
//!
//! ```text
//! APP_INFO = { description = "says hi", version = "1.0" }
//!
//! let GREETING = "Hello"
//!
//! def run(args):
//!     if $# == 0 then return 2
//!     print "$GREETING, $1!"
//!     return 0
//! ```
//!
//! The top level holds only the metadata line, `let` definitions and
//! function headers; function bodies are the indented lines that follow a
//! header, one statement per line.

use crate::plugin::lexer::{self, Word};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use thiserror::Error;

/// Name of the metadata table.
pub const METADATA_KEY: &str = "APP_INFO";
/// Name of the function the shell calls.
pub const ENTRY_POINT: &str = "run";

static FUNCTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)?\s*\)\s*:\s*$")
        .expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `print words...`
    Print(Vec<Word>),
    /// `let NAME = words...`
    Let { name: String, value: Vec<Word> },
    /// `return [status]`
    Return(Option<Word>),
    /// `fail message...` raises an execution error.
    Fail(Vec<Word>),
    /// `call function args...`
    Call { function: String, args: Vec<Word> },
    /// `exec program args...` spawns a host program.
    Exec { program: Word, args: Vec<Word> },
    /// `eval words...` runs the expanded text as a statement.
    Eval(Vec<Word>),
    /// `if left (==|!=) right then statement`
    If {
        left: Word,
        op: Compare,
        right: Word,
        then: Box<Statement>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    /// Bound to the space-joined arguments when present.
    pub param: Option<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub metadata: BTreeMap<String, String>,
    pub globals: Vec<(String, Vec<Word>)>,
    pub functions: HashMap<String, Function>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

pub fn parse_script(source: &str) -> Result<Script, ParseError> {
    let mut script = Script::default();
    let mut seen_metadata = false;
    let mut current: Option<(usize, Function)> = None;

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if raw.starts_with(char::is_whitespace) {
            let Some((_, function)) = current.as_mut() else {
                return Err(ParseError::new(line, "indented line outside a function"));
            };
            let words = lexer::split_into_words(trimmed)
                .map_err(|err| ParseError::new(line, err.to_string()))?;
            function.body.push(parse_statement(words, line)?);
            continue;
        }

        if let Some((header_line, function)) = current.take() {
            close_function(&mut script, header_line, function)?;
        }

        if let Some(caps) = FUNCTION_HEADER.captures(trimmed) {
            let function = Function {
                name: caps[1].to_string(),
                param: caps.get(2).map(|m| m.as_str().to_string()),
                body: Vec::new(),
            };
            current = Some((line, function));
            continue;
        }

        if trimmed.starts_with(METADATA_KEY) {
            if seen_metadata {
                return Err(ParseError::new(line, "APP_INFO defined twice"));
            }
            script.metadata = parse_metadata(trimmed).map_err(|m| ParseError::new(line, m))?;
            seen_metadata = true;
            continue;
        }

        if trimmed.starts_with("def") {
            return Err(ParseError::new(
                line,
                "malformed function header, expected `def name(param):`",
            ));
        }

        let words = lexer::split_into_words(trimmed)
            .map_err(|err| ParseError::new(line, err.to_string()))?;
        match parse_statement(words, line)? {
            Statement::Let { name, value } => script.globals.push((name, value)),
            _ => {
                return Err(ParseError::new(
                    line,
                    "only APP_INFO, let and def are allowed at the top level",
                ));
            }
        }
    }

    if let Some((header_line, function)) = current.take() {
        close_function(&mut script, header_line, function)?;
    }

    Ok(script)
}

fn close_function(script: &mut Script, line: usize, function: Function) -> Result<(), ParseError> {
    if function.body.is_empty() {
        return Err(ParseError::new(
            line,
            format!("function '{}' has an empty body", function.name),
        ));
    }
    if script.functions.contains_key(&function.name) {
        return Err(ParseError::new(
            line,
            format!("function '{}' defined twice", function.name),
        ));
    }
    script.functions.insert(function.name.clone(), function);
    Ok(())
}

fn parse_metadata(line: &str) -> Result<BTreeMap<String, String>, String> {
    let table: toml::Table =
        toml::from_str(line).map_err(|err| format!("invalid APP_INFO: {}", err.message()))?;
    let Some(toml::Value::Table(info)) = table.get(METADATA_KEY) else {
        return Err("APP_INFO must be a table like `APP_INFO = { description = \"...\" }`".into());
    };
    Ok(info
        .iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect())
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// How many `if ... then` may be chained on one line.
pub const MAX_NESTED_IF: usize = 32;

/// Parse one already-split statement. `line` is only used for errors.
pub fn parse_statement(words: Vec<Word>, line: usize) -> Result<Statement, ParseError> {
    parse_nested(words, line, 0)
}

fn parse_nested(words: Vec<Word>, line: usize, depth: usize) -> Result<Statement, ParseError> {
    let err = |message: String| ParseError::new(line, message);

    let mut words = words.into_iter();
    let Some(head) = words.next() else {
        return Err(err("empty statement".into()));
    };
    let Some(keyword) = head.as_literal() else {
        return Err(err("a statement must start with a keyword".into()));
    };
    let mut rest: Vec<Word> = words.collect();

    let statement = match keyword.as_str() {
        "print" => Statement::Print(rest),
        "fail" => Statement::Fail(rest),
        "let" => {
            let name = rest
                .first()
                .and_then(Word::as_literal)
                .filter(|name| is_identifier(name))
                .ok_or_else(|| err("expected `let NAME = value`".into()))?;
            if !rest.get(1).is_some_and(|w| w.is("=")) {
                return Err(err("expected `=` after the variable name".into()));
            }
            Statement::Let {
                name,
                value: rest.split_off(2),
            }
        }
        "return" => match rest.len() {
            0 => Statement::Return(None),
            1 => Statement::Return(rest.pop()),
            _ => return Err(err("return takes at most one value".into())),
        },
        "call" => {
            let function = rest
                .first()
                .and_then(Word::as_literal)
                .filter(|name| is_identifier(name))
                .ok_or_else(|| err("expected `call function [args...]`".into()))?;
            Statement::Call {
                function,
                args: rest.split_off(1),
            }
        }
        "exec" => {
            if rest.is_empty() {
                return Err(err("expected `exec program [args...]`".into()));
            }
            let args = rest.split_off(1);
            let program = rest.remove(0);
            Statement::Exec { program, args }
        }
        "eval" => {
            if rest.is_empty() {
                return Err(err("eval needs something to evaluate".into()));
            }
            Statement::Eval(rest)
        }
        "if" => {
            if rest.len() < 5 || !rest[3].is("then") {
                return Err(err("expected `if A == B then statement`".into()));
            }
            let op = match rest[1].as_literal().as_deref() {
                Some("==") => Compare::Eq,
                Some("!=") => Compare::Ne,
                _ => return Err(err("comparison must be `==` or `!=`".into())),
            };
            if depth >= MAX_NESTED_IF {
                return Err(err(format!("more than {MAX_NESTED_IF} nested `if`s")));
            }
            let then = parse_nested(rest.split_off(4), line, depth + 1)?;
            let right = rest.remove(2);
            let left = rest.remove(0);
            Statement::If {
                left,
                op,
                right,
                then: Box::new(then),
            }
        }
        other => return Err(err(format!("unknown statement '{other}'"))),
    };
    Ok(statement)
}
