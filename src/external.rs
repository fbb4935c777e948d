//! Host program lookup and launch, used by the app `exec` statement.

use crate::command::ExitCode;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Run `program` with `args` in `cwd`, copying its stdout and stderr into
/// `out` once it finishes. Returns its exit status.
pub fn run_program(
    program: &Path,
    args: &[String],
    cwd: &Path,
    out: &mut dyn Write,
) -> io::Result<ExitCode> {
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::inherit())
        .output()?;
    out.write_all(&output.stdout)?;
    out.write_all(&output.stderr)?;

    Ok(match output.status.code() {
        Some(code) => code,
        None => terminated_by_signal(output.status),
    })
}

/// Resolve `name` against the process `PATH`. Relative paths with more than
/// one component are taken from `cwd`.
pub fn lookup(name: &str, cwd: &Path) -> Option<PathBuf> {
    let search_paths = std::env::var_os("PATH").unwrap_or_default();
    let path = Path::new(name);
    if path.is_relative() && path.components().count() > 1 {
        return find_by_path(&cwd.join(path)).map(Path::to_path_buf);
    }
    find_command_path(&search_paths, path).map(Cow::into_owned)
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> i32 {
    -1
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`): returns it if it exists.
/// - `./foo` on Unix or any `./`-prefixed path on other platforms: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first existing match.
/// - Empty path: returns `None`.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let search_in_current_dir = cfg!(not(unix)) || path.starts_with("./");
    if search_in_current_dir && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, None) => None,
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    #[cfg(unix)]
    fn absolute_existing_and_missing() {
        let found = find_command_path(OsStr::new("/bin"), Path::new("/bin/sh"));
        assert_eq!(found.as_deref(), Some(Path::new("/bin/sh")));
        assert!(find_command_path(OsStr::new("/bin"), Path::new("/bin/nonexisting")).is_none());
    }

    #[test]
    fn single_component_searches_path_dirs() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        File::create(second.path().join("tool")).unwrap();
        let paths = std::env::join_paths([first.path(), second.path()]).unwrap();

        let found = find_command_path(&paths, Path::new("tool")).unwrap();
        assert_eq!(found.as_ref(), second.path().join("tool"));
        assert!(find_command_path(&paths, Path::new("missing")).is_none());
    }

    #[test]
    fn multiple_components_resolve_against_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        File::create(dir.path().join("bin").join("tool")).unwrap();

        assert_eq!(
            lookup("bin/tool", dir.path()),
            Some(dir.path().join("bin").join("tool"))
        );
        assert_eq!(
            lookup("./bin/tool", dir.path()),
            Some(dir.path().join("./bin/tool"))
        );
        assert!(lookup("bin/missing", dir.path()).is_none());
    }

    #[test]
    fn empty_path_is_none() {
        assert!(find_command_path(OsStr::new("/bin"), Path::new("")).is_none());
    }

    #[test]
    #[cfg(unix)]
    fn run_program_captures_output_and_status() {
        let cwd = TempDir::new().unwrap();
        let sh = lookup("sh", Path::new("/")).expect("sh on PATH");
        let mut out = Vec::<u8>::new();
        let code = run_program(
            &sh,
            &["-c".into(), "echo captured; exit 3".into()],
            cwd.path(),
            &mut out,
        )
        .unwrap();
        assert_eq!(code, 3);
        assert_eq!(String::from_utf8(out).unwrap(), "captured\n");
    }
}
