use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{CommandFailure, DependencyEnvironment, EnvironmentHandle, FailureKind};

use super::process::run_checked;

/// A Python virtual environment managed with `python3 -m venv` and `pip`.
#[derive(Debug, Clone)]
pub struct PythonVenv {
    root: PathBuf,
    base_python: Option<PathBuf>,
}

impl PythonVenv {
    /// Environment at `root`, created with the first `python3`/`python` on PATH.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_python: None,
        }
    }

    /// Create the environment with an explicit base interpreter.
    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.base_python = Some(python.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Interpreter inside an existing environment, if there is one.
    pub fn interpreter_in(root: &Path) -> Option<PathBuf> {
        let unix = root.join("bin").join("python");
        if unix.exists() {
            return Some(unix);
        }
        let windows = root.join("Scripts").join("python.exe");
        if windows.exists() {
            return Some(windows);
        }
        None
    }

    fn base_interpreter(&self) -> Result<PathBuf, CommandFailure> {
        if let Some(python) = &self.base_python {
            return Ok(python.clone());
        }
        for name in ["python3", "python"] {
            if let Ok(path) = which::which(name) {
                return Ok(path);
            }
        }
        Err(CommandFailure::new(
            FailureKind::NotFound,
            None,
            "python3 or python not found in PATH",
        ))
    }
}

impl DependencyEnvironment for PythonVenv {
    fn activate(&self) -> Result<EnvironmentHandle, CommandFailure> {
        let interpreter = Self::interpreter_in(&self.root).ok_or_else(|| {
            CommandFailure::new(
                FailureKind::NotFound,
                None,
                format!("no virtual environment at {}", self.root.display()),
            )
        })?;
        log::debug!("Activated virtual environment {}", self.root.display());
        Ok(EnvironmentHandle::new(&self.root, interpreter))
    }

    fn create(&self) -> Result<(), CommandFailure> {
        let python = self.base_interpreter()?;
        log::info!(
            "Creating virtual environment at {} with {}",
            self.root.display(),
            python.display()
        );

        let mut cmd = Command::new(&python);
        cmd.arg("-m").arg("venv").arg(&self.root);
        run_checked(&mut cmd, "venv")?;
        Ok(())
    }

    fn install(&self, env: &EnvironmentHandle, packages: &[String]) -> Result<(), CommandFailure> {
        if packages.is_empty() {
            log::debug!("No packages to install");
            return Ok(());
        }

        log::info!("Installing {}", packages.join(", "));
        let mut cmd = env.command();
        cmd.args(["-m", "pip", "install", "--disable-pip-version-check"])
            .args(packages);
        run_checked(&mut cmd, "pip")?;
        Ok(())
    }
}
