//! # engine-probe
//!
//! Resolve the external conversion engines (headless LibreOffice, Poppler's
//! `pdftoppm`) to an executable file before a process is spawned, so that a
//! missing binary can be reported distinctly from a binary that ran and
//! failed.
//!
//! ## How it works
//!
//! [`locate`] accepts either a bare program name or a path:
//!
//! 1. A name containing a path separator (`/usr/bin/soffice`, `./fake.sh`)
//!    is checked as-is.
//! 2. A bare name (`libreoffice`) is searched in every directory of `PATH`,
//!    in order. On Windows each `PATHEXT` suffix is tried as well.
//!
//! A candidate matches when it is a regular file and, on Unix, has at least
//! one execute bit set.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_probe::{locate, probe};
//!
//! let soffice = locate("libreoffice").expect("LibreOffice is not installed");
//! println!("using {}", soffice.display());
//!
//! let status = probe("pdftoppm");
//! if !status.is_available() {
//!     eprintln!("{status}");
//! }
//! ```

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by probe operations.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// No executable with this name exists on `PATH` (or at the given path).
    #[error("'{program}' was not found on PATH")]
    NotFound { program: String },

    /// The file exists but cannot be executed by this process.
    #[error("'{}' exists but is not executable", path.display())]
    NotExecutable { path: PathBuf },

    /// An empty program name was configured.
    #[error("empty program name")]
    EmptyName,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolve `program` to an executable path using the process `PATH`.
pub fn locate(program: &str) -> Result<PathBuf, ProbeError> {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    locate_in(program, &path_var)
}

/// Resolve `program` against an explicit `PATH`-style search string.
///
/// Split out from [`locate`] so callers (and tests) can search a custom set
/// of directories without mutating the process environment.
pub fn locate_in(program: &str, search_path: &OsStr) -> Result<PathBuf, ProbeError> {
    if program.trim().is_empty() {
        return Err(ProbeError::EmptyName);
    }

    let as_path = Path::new(program);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        return check_candidate(as_path).map(|_| as_path.to_path_buf());
    }

    let mut not_executable = None;
    for dir in std::env::split_paths(search_path) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        for candidate in candidates(&dir, program) {
            match check_candidate(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(ProbeError::NotExecutable { path }) => {
                    not_executable.get_or_insert(path);
                }
                Err(_) => {}
            }
        }
    }

    match not_executable {
        Some(path) => Err(ProbeError::NotExecutable { path }),
        None => Err(ProbeError::NotFound {
            program: program.to_string(),
        }),
    }
}

/// Availability report for one engine, suitable for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// Program name as configured.
    pub program: String,
    /// Resolved executable, or `None` when unavailable.
    pub path: Option<PathBuf>,
    /// Why resolution failed, when it did.
    pub reason: Option<String>,
}

impl EngineStatus {
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, &self.reason) {
            (Some(path), _) => write!(f, "{} → {}", self.program, path.display()),
            (None, Some(reason)) => write!(f, "{}: {}", self.program, reason),
            (None, None) => write!(f, "{}: unavailable", self.program),
        }
    }
}

/// Probe a single program without failing.
pub fn probe(program: &str) -> EngineStatus {
    match locate(program) {
        Ok(path) => EngineStatus {
            program: program.to_string(),
            path: Some(path),
            reason: None,
        },
        Err(e) => EngineStatus {
            program: program.to_string(),
            path: None,
            reason: Some(e.to_string()),
        },
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    let mut out = vec![dir.join(program)];
    if cfg!(windows) && Path::new(program).extension().is_none() {
        let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.BAT;.CMD".to_string());
        for ext in exts.split(';').filter(|e| !e.is_empty()) {
            out.push(dir.join(format!("{program}{}", ext.to_ascii_lowercase())));
        }
    }
    out
}

fn check_candidate(path: &Path) -> Result<(), ProbeError> {
    let meta = std::fs::metadata(path).map_err(|_| ProbeError::NotFound {
        program: path.display().to_string(),
    })?;
    if !meta.is_file() {
        return Err(ProbeError::NotFound {
            program: path.display().to_string(),
        });
    }
    if !is_executable(&meta) {
        return Err(ProbeError::NotExecutable {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

// ── Tests ─────────────────────────────────────────────────────────────────────
