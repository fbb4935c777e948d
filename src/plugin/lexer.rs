//! Tokenization of app script lines and shell command lines.
//!
//! A line splits into whitespace-separated words. Single quotes keep text
//! verbatim, double quotes group text but still expand parameters, and `#`
//! at the start of a word begins a comment running to the end of the line.

use thiserror::Error;

/// A part of a word: literal text or a parameter to expand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordPart {
    Literal(String),
    /// `$name`, `${name}`, `$1`..`$9`, `$#`, `$@` or `$?`.
    Param(String),
}

/// One word, possibly made of several parts (`"$GREETING, $1!"`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

impl Word {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            parts: vec![WordPart::Literal(text.into())],
        }
    }

    /// The word's text if it contains no parameters.
    pub fn as_literal(&self) -> Option<String> {
        let mut text = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal(s) => text.push_str(s),
                WordPart::Param(_) => return None,
            }
        }
        Some(text)
    }

    pub fn is(&self, keyword: &str) -> bool {
        self.as_literal().is_some_and(|text| text == keyword)
    }

    /// Text with parameters written back as `$name`, for contexts that don't
    /// expand anything (the shell prompt).
    pub fn to_source(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                WordPart::Literal(s) => s.clone(),
                WordPart::Param(name) => format!("${name}"),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexingError {
    #[error("unterminated quote")]
    UnfinishedQuote,
    #[error("unterminated ${{...}} substitution")]
    UnfinishedParamSubst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    current_word: Vec<WordPart>,
    buffer: String,
    /// A word has begun even if it may end up empty (`''`).
    started: bool,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            current_word: Vec::new(),
            buffer: String::new(),
            started: false,
        }
    }

    fn make_words(&mut self) -> Result<Vec<Word>, LexingError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch)?,
                LexingState::ReadingWord => self.handle_word(ch, &mut out)?,
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch)?,
            }
        }

        if matches!(
            self.state,
            LexingState::ReadingSingleQuote | LexingState::ReadingDoubleQuote
        ) {
            return Err(LexingError::UnfinishedQuote);
        }

        self.finish_word(&mut out);
        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_start(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            c if c.is_whitespace() => {}
            '#' => self.pos = self.input.len(),
            '\'' => {
                self.started = true;
                self.state = LexingState::ReadingSingleQuote;
            }
            '"' => {
                self.started = true;
                self.state = LexingState::ReadingDoubleQuote;
            }
            '$' => {
                self.started = true;
                self.read_param()?;
                self.state = LexingState::ReadingWord;
            }
            c => {
                self.started = true;
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
        Ok(())
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Word>) -> Result<(), LexingError> {
        match ch {
            c if c.is_whitespace() => {
                self.finish_word(out);
                self.state = LexingState::Start;
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '$' => self.read_param()?,
            c => self.buffer.push(c),
        }
        Ok(())
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => {
                self.current_word
                    .push(WordPart::Literal(std::mem::take(&mut self.buffer)));
                self.state = LexingState::ReadingWord;
            }
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            '"' => {
                self.current_word
                    .push(WordPart::Literal(std::mem::take(&mut self.buffer)));
                self.state = LexingState::ReadingWord;
            }
            '\\' if matches!(self.peek_char(), Some('"' | '$' | '\\')) => {
                if let Some(escaped) = self.read_char() {
                    self.buffer.push(escaped);
                }
            }
            '$' => self.read_param()?,
            c => self.buffer.push(c),
        }
        Ok(())
    }

    /// Called right after a `$`. Pushes a [`WordPart::Param`] when a
    /// parameter name follows, otherwise keeps the `$` as literal text.
    fn read_param(&mut self) -> Result<(), LexingError> {
        let name = match self.peek_char() {
            Some('{') => {
                self.read_char();
                let mut name = String::new();
                loop {
                    match self.read_char() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(LexingError::UnfinishedParamSubst),
                    }
                }
                name
            }
            Some(c) if c.is_ascii_digit() || matches!(c, '#' | '@' | '?') => {
                self.read_char();
                c.to_string()
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(c) = self.peek_char() {
                    if c.is_alphanumeric() || c == '_' {
                        name.push(c);
                        self.read_char();
                    } else {
                        break;
                    }
                }
                name
            }
            _ => {
                self.buffer.push('$');
                return Ok(());
            }
        };

        self.flush_literal();
        self.current_word.push(WordPart::Param(name));
        Ok(())
    }

    fn flush_literal(&mut self) {
        if !self.buffer.is_empty() {
            self.current_word
                .push(WordPart::Literal(std::mem::take(&mut self.buffer)));
        }
    }

    fn finish_word(&mut self, out: &mut Vec<Word>) {
        self.flush_literal();
        if self.started || !self.current_word.is_empty() {
            out.push(Word {
                parts: std::mem::take(&mut self.current_word),
            });
        }
        self.started = false;
    }
}

/// Split one line into words.
pub fn split_into_words(line: &str) -> Result<Vec<Word>, LexingError> {
    LexingFSM::new(line).make_words()
}
