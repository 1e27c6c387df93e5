//! Handoff to the real init.
//!
//! The agent runs as PID 1; the real init must inherit that PID, so the
//! handoff replaces the process image (`execve`) instead of spawning.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::InitError;
use crate::logger::BootLog;

/// Process image replacement.
///
/// On success the call never returns; the returned error describes why the
/// replacement failed.
pub trait ImageReplace {
    fn replace(&self, program: &Path, args: &[OsString]) -> std::io::Error;
}

/// `execve` of `program` with `args`, keeping the PID and environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct Execve;

impl ImageReplace for Execve {
    fn replace(&self, program: &Path, args: &[OsString]) -> std::io::Error {
        Command::new(program).args(args).exec()
    }
}

/// Performs the final handoff to the real init.
pub struct InitDelegator<R = Execve> {
    init: PathBuf,
    replace: R,
}

impl InitDelegator<Execve> {
    pub fn new(init: impl Into<PathBuf>) -> Self {
        Self::with_replace(init, Execve)
    }
}

impl<R: ImageReplace> InitDelegator<R> {
    pub fn with_replace(init: impl Into<PathBuf>, replace: R) -> Self {
        Self {
            init: init.into(),
            replace,
        }
    }

    /// Replace this process with the real init, forwarding `args` unchanged.
    ///
    /// Only returns on failure, after reporting it through `log`.
    pub fn handoff(&self, args: &[OsString], log: &dyn BootLog) -> InitError {
        log.log(&format!("handing off to {}", self.init.display()));

        let source = self.replace.replace(&self.init, args);

        let error = InitError::Handoff {
            path: self.init.clone(),
            source,
        };
        log.log(&format!("FATAL: {}", error));
        error
    }
}
