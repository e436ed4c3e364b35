//! # piper-serve
//!
//! A Rust launcher that prepares an isolated Python environment for the
//! Piper text-to-speech package and keeps its HTTP voice server running.
//!
//! ## Features
//!
//! - **Idempotent bootstrap**: the virtual environment is created once and reused
//! - **Single download fallback**: a missing voice is fetched and serving retried once
//! - **Logged child processes**: all external output goes through the `log` facade
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! piper-serve = { version = "2026.2", features = ["piper"] }
//! ```
//!
//! ```ignore
//! use piper_serve::{bootstrap::Bootstrap, config::LauncherConfig};
//!
//! let config = LauncherConfig::default();
//! let bootstrap = Bootstrap::piper(&config);
//! bootstrap.run(&config.model)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bootstrap;
pub mod config;
pub mod services;

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

pub use bootstrap::{Bootstrap, BootstrapError};
pub use config::{ConfigError, LauncherConfig, LauncherConfigBuilder};

/// An activated isolated dependency environment.
///
/// Commands created through [`EnvironmentHandle::command`] run as if the
/// environment had been activated in a shell: `VIRTUAL_ENV` points at the
/// root and the environment's script directory leads `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    /// Root directory of the environment
    pub root: PathBuf,
    /// Interpreter living inside the environment
    pub interpreter: PathBuf,
}

impl EnvironmentHandle {
    pub fn new(root: impl Into<PathBuf>, interpreter: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            interpreter: interpreter.into(),
        }
    }

    /// Directory holding the environment's executables.
    pub fn bin_dir(&self) -> &Path {
        self.interpreter.parent().unwrap_or(self.root.as_path())
    }

    /// Build a command that runs the environment's interpreter.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.env("VIRTUAL_ENV", &self.root);
        cmd.env("PATH", self.activated_path());
        cmd.env_remove("PYTHONHOME");
        cmd
    }

    fn activated_path(&self) -> OsString {
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let mut paths = vec![self.bin_dir().to_path_buf()];
        paths.extend(std::env::split_paths(&inherited));
        match std::env::join_paths(paths) {
            Ok(path) => path,
            Err(err) => {
                log::warn!(
                    "Cannot put {} on PATH ({err}), keeping the inherited PATH",
                    self.bin_dir().display()
                );
                inherited
            }
        }
    }
}

/// Why an external command did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The voice model is not available locally.
    MissingModel,
    /// The server could not bind its listening port.
    PortInUse,
    /// A required environment or program does not exist.
    NotFound,
    /// The command could not be started.
    Spawn,
    /// The process was killed by a signal.
    Terminated,
    /// The command exited unsuccessfully for an unrecognised reason.
    Exited,
}

/// Failure reported by an environment or voice-service operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub kind: FailureKind,
    /// Exit code of the child process, when it ran and exited normally.
    pub exit_code: Option<i32>,
    pub detail: String,
}

impl CommandFailure {
    pub fn new(kind: FailureKind, exit_code: Option<i32>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            exit_code,
            detail: detail.into(),
        }
    }

    pub fn spawn(label: &str, err: &std::io::Error) -> Self {
        Self::new(FailureKind::Spawn, None, format!("{label}: failed to start: {err}"))
    }

    /// Whether fetching the model could plausibly fix this serve failure.
    pub fn warrants_download(&self) -> bool {
        matches!(self.kind, FailureKind::MissingModel | FailureKind::Exited)
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} (exit code {code})", self.detail),
            None => write!(f, "{}", self.detail),
        }
    }
}

impl std::error::Error for CommandFailure {}

/// An isolated dependency environment that can be activated, created and
/// populated with packages.
///
/// Implementations must be idempotent: `create` is only called after
/// `activate` failed, and `install` is expected to be a no-op when the
/// packages are already present.
pub trait DependencyEnvironment {
    /// Activate an existing environment. Fails when none exists.
    fn activate(&self) -> Result<EnvironmentHandle, CommandFailure>;

    /// Create a new, empty environment.
    fn create(&self) -> Result<(), CommandFailure>;

    /// Install the given packages into the activated environment.
    fn install(&self, env: &EnvironmentHandle, packages: &[String]) -> Result<(), CommandFailure>;
}

/// The external voice-service library, reached through its two entry points.
pub trait VoiceService {
    /// Run the HTTP server for `model_id`.
    ///
    /// Blocks for as long as the server runs. Returns `Ok` only when the
    /// server exits cleanly.
    fn serve(&self, env: &EnvironmentHandle, model_id: &str) -> Result<(), CommandFailure>;

    /// Fetch the model asset for `model_id` into the local cache.
    fn download(&self, env: &EnvironmentHandle, model_id: &str) -> Result<(), CommandFailure>;
}
