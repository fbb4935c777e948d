use crate::console::{self, Console, Input};
use crate::plugin::validator::{self, ValidationError};
use crate::registry::{APP_EXTENSION, AppDescriptor, RegistryError, RegistryStore};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Invalid file path or not a .cdos file")]
    NotFound(PathBuf),
    #[error("Invalid file path or not a .cdos file")]
    NotCdos(PathBuf),
    #[error("No .cdos files found in directory")]
    NoCandidates(PathBuf),
    #[error("Invalid selection")]
    InvalidSelection,
    #[error("Error: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Error installing app: {0}")]
    Io(#[from] io::Error),
    #[error("Error installing app: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum UninstallError {
    #[error("App '{0}' not found")]
    NotFound(String),
    #[error("Uninstall cancelled")]
    Cancelled,
    #[error("Error uninstalling app: {0}")]
    Io(#[from] io::Error),
    #[error("Error uninstalling app: {0}")]
    Registry(#[from] RegistryError),
}

/// Install the app at `path`, a `.cdos` file or a directory to pick one from.
pub fn install(
    store: &mut RegistryStore,
    path: &Path,
    console: &mut dyn Console,
    out: &mut dyn Write,
) -> Result<AppDescriptor, InstallError> {
    let source_file = if path.is_dir() {
        choose_candidate(path, console, out)?
    } else if !path.exists() {
        return Err(InstallError::NotFound(path.to_path_buf()));
    } else if path.extension().and_then(|ext| ext.to_str()) != Some(APP_EXTENSION) {
        return Err(InstallError::NotCdos(path.to_path_buf()));
    } else {
        path.to_path_buf()
    };

    let name = app_name(&source_file).ok_or_else(|| InstallError::NotCdos(source_file.clone()))?;
    let source = fs::read_to_string(&source_file)?;
    validator::validate(&source, &name)?;

    let descriptor = AppDescriptor::new(store.apps_dir(), &name);
    if store.registry().contains(&name) {
        let _ = writeln!(out, "Warning: replacing the installed version of '{name}'");
        tracing::warn!(app = %name, "install overwrites an existing app");
    }

    let app_dir = store.apps_dir().join(&name);
    let created_dir = !app_dir.exists();
    fs::create_dir_all(&app_dir)?;
    let placed = fs::write(&descriptor.source_path, &source)
        .map_err(InstallError::from)
        .and_then(|()| store.put(descriptor.clone()).map_err(InstallError::from));

    if let Err(err) = placed {
        if created_dir {
            if let Err(cleanup) = fs::remove_dir_all(&app_dir) {
                tracing::warn!("can't remove {}: {cleanup}", app_dir.display());
            }
        }
        return Err(err);
    }

    tracing::info!(app = %name, "app installed");
    Ok(descriptor)
}

/// Lower-cased file stem.
fn app_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_lowercase)
}

fn choose_candidate(
    dir: &Path,
    console: &mut dyn Console,
    out: &mut dyn Write,
) -> Result<PathBuf, InstallError> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some(APP_EXTENSION)
        })
        .collect();
    if candidates.is_empty() {
        return Err(InstallError::NoCandidates(dir.to_path_buf()));
    }
    candidates.sort();

    writeln!(out, "\nAvailable .cdos files:")?;
    for (index, path) in candidates.iter().enumerate() {
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();
        writeln!(out, "{}. {file_name}", index + 1)?;
    }

    let Ok(Input::Line(answer)) = console.read_line("\nSelect number to install: ") else {
        return Err(InstallError::InvalidSelection);
    };
    answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|choice| choice.checked_sub(1))
        .and_then(|index| candidates.get(index).cloned())
        .ok_or(InstallError::InvalidSelection)
}

/// Remove an installed app after a `yes` confirmation.
///
/// Works on half-installed apps too: whichever of the app directory and the
/// registry entry exists is removed.
pub fn uninstall(
    store: &mut RegistryStore,
    name: &str,
    console: &mut dyn Console,
) -> Result<(), UninstallError> {
    if !is_plain_name(name) {
        return Err(UninstallError::NotFound(name.to_string()));
    }
    let app_dir = store.apps_dir().join(name);
    let has_dir = app_dir.is_dir();
    if !has_dir && !store.registry().contains(name) {
        return Err(UninstallError::NotFound(name.to_string()));
    }

    let prompt = format!("Are you sure you want to uninstall '{name}'? (yes/no): ");
    if !console::confirm(console, &prompt, "yes") {
        return Err(UninstallError::Cancelled);
    }

    if has_dir {
        fs::remove_dir_all(&app_dir)?;
    }
    store.remove(name)?;
    tracing::info!(app = name, "app uninstalled");
    Ok(())
}

/// A single path component, so joining it to the apps directory stays inside.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::ScriptedConsole;
    use tempfile::TempDir;

    const GREETER: &str =
        "APP_INFO = { description = \"says hi\" }\ndef run(args):\n    print hi\n    return 0\n";

    struct Fixture {
        _root: TempDir,
        downloads: PathBuf,
        store: RegistryStore,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let apps = root.path().join("System/Apps");
        let downloads = root.path().join("Downloads");
        fs::create_dir_all(&downloads).unwrap();
        let mut store = RegistryStore::new(&apps, apps.join("registry.json"));
        store.load();
        Fixture {
            _root: root,
            downloads,
            store,
        }
    }

    #[test]
    fn install_copies_and_registers() {
        let mut fx = fixture();
        let file = fx.downloads.join("Greeter.cdos");
        fs::write(&file, GREETER).unwrap();

        let descriptor = install(&mut fx.store, &file, &mut ScriptedConsole::default(), &mut Vec::<u8>::new()).unwrap();
        assert_eq!(descriptor.name, "greeter");
        assert_eq!(fs::read_to_string(&descriptor.source_path).unwrap(), GREETER);
        assert!(fx.store.registry().contains("greeter"));
    }

    #[test]
    fn install_then_uninstall_restores_registry() {
        let mut fx = fixture();
        let before = fx.store.registry().clone();
        let file = fx.downloads.join("greeter.cdos");
        fs::write(&file, GREETER).unwrap();

        install(&mut fx.store, &file, &mut ScriptedConsole::default(), &mut Vec::<u8>::new()).unwrap();
        uninstall(&mut fx.store, "greeter", &mut ScriptedConsole::new(["yes"])).unwrap();
        assert_eq!(fx.store.registry(), &before);
        assert!(!fx.store.apps_dir().join("greeter").exists());
    }

    #[test]
    fn invalid_sources_are_not_installed() {
        let mut fx = fixture();
        let file = fx.downloads.join("broken.cdos");
        fs::write(&file, "def run(args):\n    return 0\n").unwrap();

        let err = install(&mut fx.store, &file, &mut ScriptedConsole::default(), &mut Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, InstallError::Invalid(ValidationError::MissingMetadata { .. })));
        assert!(fx.store.registry().is_empty());
        assert!(!fx.store.apps_dir().join("broken").exists());
    }

    #[test]
    fn wrong_paths() {
        let mut fx = fixture();
        let txt = fx.downloads.join("notes.txt");
        fs::write(&txt, GREETER).unwrap();
        let mut console = ScriptedConsole::default();

        assert!(matches!(
            install(&mut fx.store, &txt, &mut console, &mut Vec::<u8>::new()),
            Err(InstallError::NotCdos(_))
        ));
        assert!(matches!(
            install(&mut fx.store, &fx.downloads.join("nope.cdos"), &mut console, &mut Vec::<u8>::new()),
            Err(InstallError::NotFound(_))
        ));
        // only notes.txt in there
        assert!(matches!(
            install(&mut fx.store, &fx.downloads.clone(), &mut console, &mut Vec::<u8>::new()),
            Err(InstallError::NoCandidates(_))
        ));
    }

    #[test]
    fn directory_install_picks_by_number() {
        let mut fx = fixture();
        fs::write(fx.downloads.join("beta.cdos"), GREETER).unwrap();
        fs::write(fx.downloads.join("alpha.cdos"), GREETER).unwrap();
        let downloads = fx.downloads.clone();

        let mut out = Vec::<u8>::new();
        let descriptor = install(&mut fx.store, &downloads, &mut ScriptedConsole::new(["2"]), &mut out).unwrap();
        assert_eq!(descriptor.name, "beta");
        let listing = String::from_utf8(out).unwrap();
        assert!(listing.contains("1. alpha.cdos\n2. beta.cdos\n"));

        for answer in ["0", "3", "two"] {
            let err = install(&mut fx.store, &downloads, &mut ScriptedConsole::new([answer]), &mut Vec::<u8>::new()).unwrap_err();
            assert!(matches!(err, InstallError::InvalidSelection), "{answer}");
        }
    }

    #[test]
    fn reinstall_overwrites_with_warning() {
        let mut fx = fixture();
        let file = fx.downloads.join("greeter.cdos");
        fs::write(&file, GREETER).unwrap();
        install(&mut fx.store, &file, &mut ScriptedConsole::default(), &mut Vec::<u8>::new()).unwrap();

        let updated = GREETER.replace("says hi", "says hello");
        fs::write(&file, &updated).unwrap();
        let mut out = Vec::<u8>::new();
        let descriptor = install(&mut fx.store, &file, &mut ScriptedConsole::default(), &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("replacing the installed version"));
        assert_eq!(fs::read_to_string(descriptor.source_path).unwrap(), updated);
        assert_eq!(fx.store.registry().len(), 1);
    }

    #[test]
    fn uninstall_edge_cases() {
        let mut fx = fixture();
        for name in ["ghost", "..", "../Apps", ""] {
            assert!(matches!(
                uninstall(&mut fx.store, name, &mut ScriptedConsole::new(["yes"])),
                Err(UninstallError::NotFound(_))
            ));
        }

        let file = fx.downloads.join("greeter.cdos");
        fs::write(&file, GREETER).unwrap();
        install(&mut fx.store, &file, &mut ScriptedConsole::default(), &mut Vec::<u8>::new()).unwrap();
        assert!(matches!(
            uninstall(&mut fx.store, "greeter", &mut ScriptedConsole::new(["y"])),
            Err(UninstallError::Cancelled)
        ));
        assert!(fx.store.registry().contains("greeter"));

        // directory gone but entry left behind
        fs::remove_dir_all(fx.store.apps_dir().join("greeter")).unwrap();
        uninstall(&mut fx.store, "greeter", &mut ScriptedConsole::new(["YES"])).unwrap();
        assert!(fx.store.registry().is_empty());
    }
}
