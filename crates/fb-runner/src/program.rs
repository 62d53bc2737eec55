//! Locating step programs before anything is spawned.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("Program '{program}' not found")]
    NotFound { program: String },

    #[error("Program '{path}' is not an executable file")]
    NotExecutable { path: PathBuf },
}

/// Whether `program` names a path rather than something to look up on
/// `PATH`.
pub fn is_path_like(program: &str) -> bool {
    program.contains('/') || program.contains(std::path::MAIN_SEPARATOR)
}

/// The path a step program is spawned from.
///
/// Relative paths (`./Allrun`) are taken relative to the case directory;
/// bare names are left for the `PATH` lookup done at spawn time.
pub fn spawn_path(program: &str, case_dir: &Path) -> PathBuf {
    let path = Path::new(program);
    if is_path_like(program) && path.is_relative() {
        case_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Resolve a step program the way it will be found when the step runs.
///
/// `case_dir` anchors relative paths (at startup this is the template,
/// which every instance copies); bare names are searched on `PATH`.
pub fn resolve_program(program: &str, case_dir: &Path) -> Result<PathBuf, ProgramError> {
    if is_path_like(program) {
        let path = spawn_path(program, case_dir);
        if !path.exists() {
            return Err(ProgramError::NotFound {
                program: program.to_string(),
            });
        }
        if !is_executable(&path) {
            return Err(ProgramError::NotExecutable { path });
        }
        return Ok(path);
    }

    let search = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| ProgramError::NotFound {
            program: program.to_string(),
        })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
