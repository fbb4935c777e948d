//! Persistent record of installed apps.
//!
//! The document on disk is a flat JSON object `{ "<name>": "app_<name>" }`.
//! Source files live at `<apps_dir>/<name>/<name>.cdos`, so a descriptor can
//! always be rebuilt from a directory scan when the document is lost or
//! damaged.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// File extension of app sources.
pub const APP_EXTENSION: &str = "cdos";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    pub name: String,
    pub source_path: PathBuf,
    pub command_id: String,
}

impl AppDescriptor {
    /// Descriptor for `name` living under `apps_dir`.
    pub fn new(apps_dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            source_path: app_source_path(apps_dir, name),
            command_id: format!("app_{name}"),
        }
    }
}

pub fn app_source_path(apps_dir: &Path, name: &str) -> PathBuf {
    apps_dir
        .join(name)
        .join(format!("{name}.{APP_EXTENSION}"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: BTreeMap<String, AppDescriptor>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&AppDescriptor> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &AppDescriptor> {
        self.entries.values()
    }

    fn document(&self) -> BTreeMap<&str, &str> {
        self.entries
            .values()
            .map(|d| (d.name.as_str(), d.command_id.as_str()))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("can't write app registry {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't encode app registry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Owner of the registry document and its in-memory copy.
///
/// Mutations go through [`RegistryStore::put`] and [`RegistryStore::remove`],
/// which persist a modified copy first and only adopt it once the write
/// succeeded.
#[derive(Debug)]
pub struct RegistryStore {
    apps_dir: PathBuf,
    document: PathBuf,
    registry: Registry,
}

impl RegistryStore {
    pub fn new(apps_dir: impl Into<PathBuf>, document: impl Into<PathBuf>) -> Self {
        Self {
            apps_dir: apps_dir.into(),
            document: document.into(),
            registry: Registry::default(),
        }
    }

    pub fn apps_dir(&self) -> &Path {
        &self.apps_dir
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Read the document from disk.
    ///
    /// A missing document is an empty registry. A document that can't be
    /// parsed is replaced by [`RegistryStore::rebuild`]. Never fails.
    pub fn load(&mut self) -> &Registry {
        let raw = match fs::read_to_string(&self.document) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.registry = Registry::default();
                return &self.registry;
            }
            Err(err) => {
                tracing::warn!("can't read {}: {err}; rebuilding", self.document.display());
                return self.rebuild();
            }
        };

        match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
            Ok(document) => {
                let entries = document
                    .into_iter()
                    .map(|(name, command_id)| {
                        let descriptor = AppDescriptor {
                            source_path: app_source_path(&self.apps_dir, &name),
                            name: name.clone(),
                            command_id,
                        };
                        (name, descriptor)
                    })
                    .collect();
                self.registry = Registry { entries };
                tracing::info!(apps = self.registry.len(), "app registry loaded");
                &self.registry
            }
            Err(err) => {
                tracing::warn!("app registry corrupted ({err}); rebuilding");
                self.rebuild()
            }
        }
    }

    /// Re-derive the registry from the apps directory and persist it.
    ///
    /// Every subdirectory `<name>` holding `<name>.cdos` becomes an entry.
    /// Persist failures are logged; the scanned registry is still returned.
    pub fn rebuild(&mut self) -> &Registry {
        let mut entries = BTreeMap::new();
        match fs::read_dir(&self.apps_dir) {
            Ok(dir) => {
                for entry in dir.flatten() {
                    if !entry.path().is_dir() {
                        continue;
                    }
                    let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                        continue;
                    };
                    let descriptor = AppDescriptor::new(&self.apps_dir, &name);
                    if descriptor.source_path.is_file() {
                        entries.insert(name, descriptor);
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!("can't scan {}: {err}", self.apps_dir.display()),
        }

        let rebuilt = Registry { entries };
        if let Err(err) = self.persist(&rebuilt) {
            tracing::warn!("{err}");
        }
        tracing::info!(apps = rebuilt.len(), "app registry rebuilt from scan");
        self.registry = rebuilt;
        &self.registry
    }

    /// Insert or replace the descriptor with the same name.
    pub fn put(&mut self, descriptor: AppDescriptor) -> Result<(), RegistryError> {
        let mut next = self.registry.clone();
        next.entries.insert(descriptor.name.clone(), descriptor);
        self.persist(&next)?;
        self.registry = next;
        Ok(())
    }

    /// Drop `name`. Returns whether an entry existed.
    pub fn remove(&mut self, name: &str) -> Result<bool, RegistryError> {
        if !self.registry.contains(name) {
            return Ok(false);
        }
        let mut next = self.registry.clone();
        next.entries.remove(name);
        self.persist(&next)?;
        self.registry = next;
        Ok(true)
    }

    fn persist(&self, registry: &Registry) -> Result<(), RegistryError> {
        let encoded = serde_json::to_string_pretty(&registry.document())?;
        let parent = self
            .document
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let persist_err = |source: io::Error| RegistryError::Persist {
            path: self.document.clone(),
            source,
        };

        fs::create_dir_all(parent).map_err(persist_err)?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(persist_err)?;
        tmp.write_all(encoded.as_bytes()).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(&self.document)
            .map_err(|err| persist_err(err.error))?;
        Ok(())
    }
}
