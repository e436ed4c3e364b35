//! The bootstrap sequencer.
//!
//! Brings up the dependency environment, installs the required packages and
//! starts the voice service. A serve failure that a download could fix
//! triggers exactly one download followed by exactly one more serve attempt.

use std::path::{Path, PathBuf};

use crate::config::ConfigError;
use crate::{CommandFailure, DependencyEnvironment, EnvironmentHandle, VoiceService};

#[cfg(feature = "piper")]
use crate::config::LauncherConfig;
#[cfg(feature = "piper")]
use crate::services::piper::{PiperService, PythonVenv};

#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    #[error("Working directory {} not found", .0.display())]
    EnvironmentNotFound(PathBuf),
    #[error("Could not create Python virtual environment: {0}")]
    EnvironmentCreation(CommandFailure),
    #[error("Could not install dependencies: {0}")]
    Installation(CommandFailure),
    #[error("Voice service failed: {0}")]
    Serve(CommandFailure),
    #[error("Could not download voice model: {0}")]
    Download(CommandFailure),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BootstrapError {
    /// The external command failure behind this error, if any.
    pub fn failure(&self) -> Option<&CommandFailure> {
        match self {
            Self::EnvironmentCreation(f)
            | Self::Installation(f)
            | Self::Serve(f)
            | Self::Download(f) => Some(f),
            Self::EnvironmentNotFound(_) | Self::Config(_) => None,
        }
    }

    /// Process exit status for this error: the child's own code when it
    /// exited with one, otherwise 1.
    pub fn exit_code(&self) -> i32 {
        self.failure()
            .and_then(|f| f.exit_code)
            .filter(|code| *code != 0)
            .unwrap_or(1)
    }
}

/// Environment bootstrap and service launch for a single voice.
pub struct Bootstrap<E, S> {
    work_dir: PathBuf,
    packages: Vec<String>,
    environment: E,
    service: S,
}

#[cfg(feature = "piper")]
impl Bootstrap<PythonVenv, PiperService> {
    /// Python venv + Piper bootstrap described by `config`.
    pub fn piper(config: &LauncherConfig) -> Self {
        let mut venv = PythonVenv::new(config.venv_path());
        if let Some(python) = &config.python {
            venv = venv.with_python(python);
        }
        Self::new(
            &config.work_dir,
            config.packages.clone(),
            venv,
            PiperService::from_config(config),
        )
    }
}

impl<E, S> Bootstrap<E, S>
where
    E: DependencyEnvironment,
    S: VoiceService,
{
    pub fn new(
        work_dir: impl Into<PathBuf>,
        packages: Vec<String>,
        environment: E,
        service: S,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            packages,
            environment,
            service,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn environment(&self) -> &E {
        &self.environment
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Bootstrap the environment and serve `model_id`.
    ///
    /// Blocks while the service runs. Returns `Ok` only if the service
    /// later exits cleanly.
    pub fn run(&self, model_id: &str) -> Result<(), BootstrapError> {
        self.select_directory()?;
        let env = self.activate_environment()?;

        self.environment
            .install(&env, &self.packages)
            .map_err(BootstrapError::Installation)?;

        self.serve_with_fallback(&env, model_id)
    }

    fn select_directory(&self) -> Result<(), BootstrapError> {
        if !self.work_dir.is_dir() {
            return Err(BootstrapError::EnvironmentNotFound(self.work_dir.clone()));
        }
        log::debug!("Using working directory {}", self.work_dir.display());
        Ok(())
    }

    /// Activate the environment, creating it first if it does not exist.
    pub fn activate_environment(&self) -> Result<EnvironmentHandle, BootstrapError> {
        match self.environment.activate() {
            Ok(env) => Ok(env),
            Err(reason) => {
                log::warn!("{reason}, creating it now");
                self.environment
                    .create()
                    .map_err(BootstrapError::EnvironmentCreation)?;
                self.environment
                    .activate()
                    .map_err(BootstrapError::EnvironmentCreation)
            }
        }
    }

    /// Serve `model_id`, downloading it and retrying once if the first
    /// attempt fails for a reason a download could fix.
    pub fn serve_with_fallback(
        &self,
        env: &EnvironmentHandle,
        model_id: &str,
    ) -> Result<(), BootstrapError> {
        let failure = match self.service.serve(env, model_id) {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };

        if !failure.warrants_download() {
            return Err(BootstrapError::Serve(failure));
        }

        log::warn!("Voice {model_id} could not be served, downloading it: {failure}");
        self.service
            .download(env, model_id)
            .map_err(BootstrapError::Download)?;

        self.service
            .serve(env, model_id)
            .map_err(BootstrapError::Serve)
    }
}


#[cfg(all(test, unix, feature = "piper"))]
mod piper_tests {
    use super::{Bootstrap, BootstrapError};
    use crate::config::LauncherConfig;
    use crate::FailureKind;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }

    /// Serves when the model is on disk, otherwise fails like Piper does.
    const SERVE_IF_MODEL_PRESENT: &str = r#"[ -f "$6/$4.onnx" ] && exit 0
    echo "FileNotFoundError: $4.onnx" >&2
    exit 1"#;

    /// Lays out a fake Python toolchain in `dir`: a base interpreter that
    /// builds venvs, and a venv interpreter that imitates pip and Piper.
    fn fake_python(dir: &Path) -> std::path::PathBuf {
        fake_python_serving(dir, SERVE_IF_MODEL_PRESENT)
    }

    /// Same as [`fake_python`] with `serve` as the HTTP server body.
    fn fake_python_serving(dir: &Path, serve: &str) -> std::path::PathBuf {
        let calls = dir.join("calls.log");
        let creates = dir.join("creates.log");
        let venv_python = dir.join("venv-python");
        let base = dir.join("python3");

        write_script(
            &venv_python,
            &format!(
                r#"echo "$@" >> {calls}
case "$2" in
  piper.http_server)
    {serve};;
  piper.download_voices)
    touch "$4/$5.onnx" "$4/$5.onnx.json";;
esac"#,
                calls = calls.display()
            ),
        );
        write_script(
            &base,
            &format!(
                r#"echo venv >> {creates}
mkdir -p "$3/bin"
cp {venv_python} "$3/bin/python"
chmod 755 "$3/bin/python""#,
                creates = creates.display(),
                venv_python = venv_python.display()
            ),
        );
        base
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn bootstraps_downloads_and_serves_then_reuses_everything() {
        let dir = tempfile::tempdir().expect("temp dir");
        let work_dir = dir.path().join("piper");
        fs::create_dir(&work_dir).expect("mkdir piper");
        let python = fake_python(dir.path());

        let config = LauncherConfig::builder()
            .work_dir(&work_dir)
            .python(&python)
            .build()
            .expect("builder should succeed");
        let bootstrap = Bootstrap::piper(&config);

        bootstrap.run(&config.model).expect("first run should succeed");
        assert!(work_dir.join("en_US-ryan-high.onnx").is_file());

        let data_dir = work_dir.display().to_string();
        let calls = read_lines(&dir.path().join("calls.log"));
        assert_eq!(
            calls,
            vec![
                "-m pip install --disable-pip-version-check piper-tts flask".to_string(),
                format!("-m piper.http_server -m en_US-ryan-high --data-dir {data_dir}"),
                format!("-m piper.download_voices --data-dir {data_dir} en_US-ryan-high"),
                format!("-m piper.http_server -m en_US-ryan-high --data-dir {data_dir}"),
            ]
        );

        bootstrap.run(&config.model).expect("second run should succeed");
        let calls = read_lines(&dir.path().join("calls.log"));
        assert_eq!(calls.len(), 6);
        assert!(calls[5].starts_with("-m piper.http_server"));
        assert_eq!(read_lines(&dir.path().join("creates.log")), vec!["venv"]);
    }

    #[test]
    fn killed_server_with_model_present_is_not_downloaded() {
        let dir = tempfile::tempdir().expect("temp dir");
        let work_dir = dir.path().join("piper");
        fs::create_dir(&work_dir).expect("mkdir piper");
        fs::write(work_dir.join("en_US-ryan-high.onnx"), b"onnx").expect("write model");
        fs::write(work_dir.join("en_US-ryan-high.onnx.json"), b"{}").expect("write config");
        let python = fake_python_serving(dir.path(), "kill -TERM $$");

        let config = LauncherConfig::builder()
            .work_dir(&work_dir)
            .python(&python)
            .build()
            .expect("builder should succeed");

        let err = Bootstrap::piper(&config)
            .run(&config.model)
            .expect_err("server was killed");
        match &err {
            BootstrapError::Serve(failure) => {
                assert_eq!(failure.kind, FailureKind::Terminated);
                assert!(failure.detail.contains("signal 15"));
            }
            other => panic!("expected a serve error, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 1);

        let calls = read_lines(&dir.path().join("calls.log"));
        assert_eq!(calls.iter().filter(|c| c.contains("piper.http_server")).count(), 1);
        assert!(!calls.iter().any(|c| c.contains("piper.download_voices")));
    }
}
