use crate::console::Console;
use crate::plugin::capsule::PluginCapsule;
use crate::plugin::script::{self, ParseError};
use crate::plugin::validator::{self, Accepted, ValidationError};
use crate::registry::AppDescriptor;
use std::collections::HashSet;
use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{self, Write};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Error loading {name}: {cause}")]
pub struct LoadError {
    pub name: String,
    #[source]
    pub cause: LoadCause,
}

#[derive(Debug, Error)]
pub enum LoadCause {
    #[error("can't read source: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("syntax error at {0}")]
    Syntax(#[from] ParseError),
}

/// Turns registry descriptors into runnable capsules.
///
/// Sources that needed confirmation are remembered by content, so rebuilding
/// the command table after an install doesn't ask about every app again.
/// Editing a source on disk brings the question back.
#[derive(Debug)]
pub struct PluginLoader {
    system_version: String,
    approved: HashSet<(String, u64)>,
}

impl PluginLoader {
    pub fn new(system_version: impl Into<String>) -> Self {
        Self {
            system_version: system_version.into(),
            approved: HashSet::new(),
        }
    }

    pub fn load(
        &mut self,
        descriptor: &AppDescriptor,
        console: &mut dyn Console,
        out: &mut dyn Write,
    ) -> Result<PluginCapsule, LoadError> {
        let name = descriptor.name.as_str();
        let fail = |cause: LoadCause| LoadError {
            name: name.to_string(),
            cause,
        };

        let source = fs::read_to_string(&descriptor.source_path).map_err(|e| fail(e.into()))?;
        let verdict = validator::validate(&source, name).map_err(|e| fail(e.into()))?;

        if let Accepted::NeedsConfirmation(_) = &verdict {
            let key = (name.to_string(), fingerprint(&source));
            if !self.approved.contains(&key) {
                validator::confirm(&verdict, name, console, out).map_err(|e| fail(e.into()))?;
                self.approved.insert(key);
            }
        }

        let script = script::parse_script(&source).map_err(|e| fail(e.into()))?;
        tracing::debug!(app = name, functions = script.functions.len(), "app loaded");
        Ok(PluginCapsule::new(name, script, &self.system_version))
    }
}

fn fingerprint(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}
