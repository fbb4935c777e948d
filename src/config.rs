use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULTS: &str = include_str!("../config/default.toml");

/// Shell configuration, layered as embedded defaults → user file.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    pub system: SystemConfig,
    pub login: LoginConfig,
    pub update: UpdateConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub root: PathBuf,
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConfig {
    pub version_url: String,
    pub archive_url: String,
    pub timeout_secs: u64,
}

impl UpdateConfig {
    /// Bound on every update request.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl ShellConfig {
    /// Embedded defaults only.
    pub fn defaults() -> Result<Self> {
        Self::from_toml(None)
    }

    /// Load defaults, then overlay `explicit` if given, else the user config
    /// file from the platform config directory when it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let user_path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => directories::ProjectDirs::from("", "", "commandos")
                .map(|dirs| dirs.config_dir().join("config.toml"))
                .filter(|path| path.exists()),
        };

        let user = match &user_path {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("can't read config {}", path.display()))?,
            ),
            None => None,
        };

        let config = Self::from_toml(user.as_deref())?;
        tracing::debug!(?user_path, "configuration loaded");
        Ok(config)
    }

    /// Parse the embedded defaults and deep-merge `user` over them, so a user
    /// file may set a single key without repeating whole sections.
    pub fn from_toml(user: Option<&str>) -> Result<Self> {
        let mut table: toml::Table = toml::from_str(DEFAULTS).context("broken default config")?;
        if let Some(user) = user {
            let overlay: toml::Table = toml::from_str(user).context("invalid user config")?;
            merge(&mut table, overlay);
        }
        toml::Value::Table(table)
            .try_into()
            .context("config does not match the expected layout")
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.system.root = root.into();
        self
    }

    pub fn paths(&self) -> SystemPaths {
        SystemPaths::new(&self.system.root)
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_section)), toml::Value::Table(section)) => {
                merge(base_section, section)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Every on-disk location the shell touches, derived from the installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    pub root: PathBuf,
    pub system_dir: PathBuf,
    pub apps_dir: PathBuf,
    pub registry: PathBuf,
    pub credentials: PathBuf,
    pub setup_marker: PathBuf,
    pub show_user: PathBuf,
}

impl SystemPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let system_dir = root.join("System");
        let apps_dir = system_dir.join("Apps");
        Self {
            registry: apps_dir.join("registry.json"),
            credentials: system_dir.join("Credentials").join("credentials.txt"),
            setup_marker: system_dir.join("USER_SETUP_COMPLETED"),
            show_user: system_dir.join("SHOW_USER_ON_LOGON"),
            root,
            system_dir,
            apps_dir,
        }
    }

    /// State files an update must carry over untouched.
    pub fn preserved(&self) -> Vec<PathBuf> {
        vec![
            self.credentials.clone(),
            self.setup_marker.clone(),
            self.show_user.clone(),
            self.registry.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = ShellConfig::defaults().unwrap();
        assert_eq!(config.login.max_attempts, 3);
        assert_eq!(config.system.history_limit, 20);
        assert_eq!(config.update.timeout(), Duration::from_secs(10));
        assert_eq!(config.logging.filter, "commandos=info");
    }

    #[test]
    fn user_file_overrides_single_key() {
        let config = ShellConfig::from_toml(Some("[login]\nmax_attempts = 5\n")).unwrap();
        assert_eq!(config.login.max_attempts, 5);
        // untouched keys keep their defaults
        assert_eq!(config.update.timeout_secs, 10);
        assert!(config.update.version_url.ends_with("commandos-newest.txt"));
    }

    #[test]
    fn invalid_user_file_is_an_error() {
        assert!(ShellConfig::from_toml(Some("[login]\nmax_attempts = \"many\"\n")).is_err());
        assert!(ShellConfig::from_toml(Some("not toml at all [")).is_err());
    }

    #[test]
    fn paths_hang_off_root() {
        let paths = SystemPaths::new("/opt/dos");
        assert_eq!(paths.apps_dir, PathBuf::from("/opt/dos/System/Apps"));
        assert_eq!(
            paths.registry,
            PathBuf::from("/opt/dos/System/Apps/registry.json")
        );
        assert_eq!(
            paths.credentials,
            PathBuf::from("/opt/dos/System/Credentials/credentials.txt")
        );
        assert_eq!(paths.preserved().len(), 4);
    }
}
