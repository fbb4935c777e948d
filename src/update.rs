//! Remote version check and in-place upgrade from a zip archive.
//!
//! An upgrade extracts the archive over the installation root. A fixed
//! allow-list of state files is read into memory first and written back
//! verbatim afterwards, even when extraction stopped halfway. Nothing else is
//! rolled back: a failed extraction can leave a mix of old and new files.

use crate::config::{SystemPaths, UpdateConfig};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("can't set up HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("can't back up {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("update archive is unreadable: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("archive entry '{0}' points outside the installation")]
    UnsafeEntry(String),
    #[error("can't extract {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't restore {path}: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where new versions come from.
pub trait UpdateSource {
    /// The newest published version string, trimmed.
    fn latest_version(&self) -> Result<String, NetworkError>;

    /// The full release archive.
    fn download(&self) -> Result<Vec<u8>, NetworkError>;
}

/// Plain HTTP source. Every request is bounded by the configured timeout and
/// never retried.
#[derive(Debug, Clone)]
pub struct HttpUpdateSource {
    version_url: String,
    archive_url: String,
    timeout: Duration,
}

impl HttpUpdateSource {
    pub fn new(config: &UpdateConfig) -> Self {
        Self {
            version_url: config.version_url.clone(),
            archive_url: config.archive_url.clone(),
            timeout: config.timeout(),
        }
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, NetworkError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(NetworkError::Client)?;
        let request_err = |source| NetworkError::Request {
            url: url.to_string(),
            source,
        };

        tracing::info!(url, "update request");
        let response = client.get(url).send().map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }
}

impl UpdateSource for HttpUpdateSource {
    fn latest_version(&self) -> Result<String, NetworkError> {
        let url = self.version_url.as_str();
        let text = self
            .get(url)?
            .text()
            .map_err(|source| NetworkError::Request {
                url: url.to_string(),
                source,
            })?;
        Ok(text.trim().to_string())
    }

    fn download(&self) -> Result<Vec<u8>, NetworkError> {
        let url = self.archive_url.as_str();
        let bytes = self
            .get(url)?
            .bytes()
            .map_err(|source| NetworkError::Request {
                url: url.to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }
}

pub struct Updater {
    source: Box<dyn UpdateSource>,
    paths: SystemPaths,
}

impl Updater {
    pub fn new(source: Box<dyn UpdateSource>, paths: SystemPaths) -> Self {
        Self { source, paths }
    }

    pub fn check_remote_version(&self) -> Result<String, NetworkError> {
        self.source.latest_version()
    }

    pub fn download(&self) -> Result<Vec<u8>, NetworkError> {
        self.source.download()
    }

    /// Unpack `archive` over the installation root, keeping the preserved
    /// state files as they were.
    pub fn apply_update(&self, archive: &[u8]) -> Result<(), UpdateError> {
        let snapshots = snapshot(&self.paths.preserved())?;
        tracing::info!(preserved = snapshots.len(), "applying update");

        let extracted = extract(archive, &self.paths.root);
        let restored = restore(&snapshots);
        if let Err(err) = &extracted {
            tracing::warn!("update extraction failed: {err}");
        }
        extracted?;
        restored
    }
}

fn snapshot(paths: &[PathBuf]) -> Result<Vec<(PathBuf, Vec<u8>)>, UpdateError> {
    let mut saved = Vec::new();
    for path in paths {
        match fs::read(path) {
            Ok(content) => saved.push((path.clone(), content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(UpdateError::Snapshot {
                    path: path.clone(),
                    source,
                });
            }
        }
    }
    Ok(saved)
}

fn restore(snapshots: &[(PathBuf, Vec<u8>)]) -> Result<(), UpdateError> {
    let mut first_failure = None;
    for (path, content) in snapshots {
        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(path, content));
        if let Err(source) = written {
            tracing::warn!("can't restore {}: {source}", path.display());
            first_failure.get_or_insert(UpdateError::Restore {
                path: path.clone(),
                source,
            });
        }
    }
    first_failure.map_or(Ok(()), Err)
}

fn extract(archive: &[u8], root: &Path) -> Result<(), UpdateError> {
    let mut archive = ZipArchive::new(Cursor::new(archive))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(UpdateError::UnsafeEntry(entry.name().to_string()));
        };
        let target = root.join(relative);
        let extract_err = |source| UpdateError::Extract {
            path: target.clone(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(extract_err)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(extract_err)?;
        }
        let mut file = File::create(&target).map_err(extract_err)?;
        io::copy(&mut entry, &mut file).map_err(extract_err)?;
    }
    Ok(())
}

/// Canned source for dispatcher and update tests.
#[cfg(test)]
pub(crate) mod fixed {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    pub struct FixedSource {
        pub version: String,
        pub archive: Vec<u8>,
        pub downloads: Rc<Cell<usize>>,
    }

    impl FixedSource {
        pub fn new(version: &str, archive: Vec<u8>) -> Self {
            Self {
                version: version.to_string(),
                archive,
                downloads: Rc::default(),
            }
        }
    }

    impl UpdateSource for FixedSource {
        fn latest_version(&self) -> Result<String, NetworkError> {
            Ok(self.version.clone())
        }

        fn download(&self) -> Result<Vec<u8>, NetworkError> {
            self.downloads.set(self.downloads.get() + 1);
            Ok(self.archive.clone())
        }
    }

    /// Zip holding `(name, content)` pairs.
    pub fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
        use std::io::Write;
        use zip::write::{SimpleFileOptions, ZipWriter};

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}
