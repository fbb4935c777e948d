//! Static acceptance check run on app source before it is ever loaded.
//!
//! This is a textual filter, not an isolation boundary. It catches sources
//! that can't possibly work (no metadata, no entry point) and flags words
//! that hint at spawning programs or evaluating code so a human can decide.
//! Anything it lets through still runs with the shell's privileges.

use crate::console::{self, Console};
use crate::plugin::script::{ENTRY_POINT, METADATA_KEY};
use regex::Regex;
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::LazyLock;
use thiserror::Error;

/// Words associated with process spawning, dynamic evaluation and imports.
pub const SUSPICIOUS_TOKENS: &[&str] = &["exec", "spawn", "eval", "import"];

static METADATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?m)^{METADATA_KEY}\s*=\s*\{{")).expect("static regex")
});

static ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^def\s+{ENTRY_POINT}\s*\(\s*[A-Za-z_][A-Za-z0-9_]*\s*\)\s*:"
    ))
    .expect("static regex")
});

static SUSPICIOUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b({})\b", SUSPICIOUS_TOKENS.join("|"))).expect("static regex")
});

/// Outcome of a passed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    Clean,
    /// Structurally fine but mentions the listed tokens; the loader must get
    /// the user's consent first.
    NeedsConfirmation(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{name} missing APP_INFO")]
    MissingMetadata { name: String },
    #[error("{name} missing run() function")]
    MissingEntryPoint { name: String },
    #[error("{name} was not confirmed to run")]
    Declined { name: String },
}

/// Run the checks in order, stopping at the first failure.
pub fn validate(source: &str, name: &str) -> Result<Accepted, ValidationError> {
    if !METADATA.is_match(source) {
        return Err(ValidationError::MissingMetadata { name: name.into() });
    }
    if !ENTRY.is_match(source) {
        return Err(ValidationError::MissingEntryPoint { name: name.into() });
    }

    let found: BTreeSet<String> = SUSPICIOUS
        .find_iter(source)
        .map(|m| m.as_str().to_string())
        .collect();
    if found.is_empty() {
        Ok(Accepted::Clean)
    } else {
        Ok(Accepted::NeedsConfirmation(found.into_iter().collect()))
    }
}

/// Turn an [`Accepted`] verdict into permission to load, asking when needed.
pub fn confirm(
    accepted: &Accepted,
    name: &str,
    console: &mut dyn Console,
    out: &mut dyn Write,
) -> Result<(), ValidationError> {
    let Accepted::NeedsConfirmation(tokens) = accepted else {
        return Ok(());
    };

    tracing::warn!(app = name, ?tokens, "app source contains suspicious tokens");
    let _ = writeln!(
        out,
        "Warning: {name} contains potentially dangerous code ({})",
        tokens.join(", ")
    );
    if console::confirm(console, "Continue anyway? (y/n): ", "y") {
        Ok(())
    } else {
        Err(ValidationError::Declined { name: name.into() })
    }
}
