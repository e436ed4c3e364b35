use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::LauncherConfig;
use crate::{CommandFailure, EnvironmentHandle, FailureKind, VoiceService};

use super::process::{failure_from, run_checked, run_logged, terminating_signal};

/// Python module running the Piper HTTP server.
pub const SERVER_MODULE: &str = "piper.http_server";

/// Python module fetching Piper voices.
pub const DOWNLOAD_MODULE: &str = "piper.download_voices";

/// Output fragments showing the server could not bind its port.
const PORT_IN_USE_MARKERS: &[&str] = &["Address already in use", "address already in use"];

/// Output fragments showing the voice could not be loaded from disk.
const MISSING_MODEL_MARKERS: &[&str] = &[
    "FileNotFoundError",
    "No such file or directory",
    "Unable to find voice",
    "Voice not found",
];

/// Piper TTS reached through its Python entry points.
#[derive(Debug, Clone)]
pub struct PiperService {
    data_dir: PathBuf,
    host: Option<String>,
    port: Option<u16>,
}

impl PiperService {
    /// Service storing and loading voices from `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            host: None,
            port: None,
        }
    }

    pub fn from_config(config: &LauncherConfig) -> Self {
        Self {
            data_dir: config.data_path(),
            host: config.host.clone(),
            port: config.port,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The `.onnx` model and its `.onnx.json` config for `model_id`.
    pub fn model_files(&self, model_id: &str) -> [PathBuf; 2] {
        [
            self.data_dir.join(format!("{model_id}.onnx")),
            self.data_dir.join(format!("{model_id}.onnx.json")),
        ]
    }

    /// Whether both model files for `model_id` exist locally.
    pub fn model_present(&self, model_id: &str) -> bool {
        self.model_files(model_id).iter().all(|p| p.is_file())
    }

    fn serve_command(&self, env: &EnvironmentHandle, model_id: &str) -> Command {
        let mut cmd = env.command();
        cmd.args(["-m", SERVER_MODULE, "-m", model_id])
            .arg("--data-dir")
            .arg(&self.data_dir);
        if let Some(host) = &self.host {
            cmd.arg("--host").arg(host);
        }
        if let Some(port) = self.port {
            cmd.arg("--port").arg(port.to_string());
        }
        cmd
    }

    fn download_command(&self, env: &EnvironmentHandle, model_id: &str) -> Command {
        let mut cmd = env.command();
        cmd.args(["-m", DOWNLOAD_MODULE])
            .arg("--data-dir")
            .arg(&self.data_dir)
            .arg(model_id);
        cmd
    }
}

/// Decide why the server failed from how it ended, its last output and the
/// local model files.
///
/// A server killed by a signal was stopped from outside, so it is never
/// blamed on the model.
pub fn classify_serve_failure(
    signal: Option<i32>,
    tail: &[String],
    model_present: bool,
) -> FailureKind {
    let mentions = |markers: &[&str]| {
        tail.iter()
            .any(|line| markers.iter().any(|marker| line.contains(marker)))
    };

    if signal.is_some() {
        FailureKind::Terminated
    } else if mentions(PORT_IN_USE_MARKERS) {
        FailureKind::PortInUse
    } else if !model_present || mentions(MISSING_MODEL_MARKERS) {
        FailureKind::MissingModel
    } else {
        FailureKind::Exited
    }
}

impl VoiceService for PiperService {
    fn serve(&self, env: &EnvironmentHandle, model_id: &str) -> Result<(), CommandFailure> {
        log::info!("Starting Piper HTTP server with voice {model_id}");

        let output = run_logged(&mut self.serve_command(env, model_id), SERVER_MODULE)
            .map_err(|e| CommandFailure::spawn(SERVER_MODULE, &e))?;
        if output.status.success() {
            log::info!("Piper HTTP server stopped");
            return Ok(());
        }

        let kind = classify_serve_failure(
            terminating_signal(&output.status),
            &output.tail,
            self.model_present(model_id),
        );
        Err(failure_from(SERVER_MODULE, &output, kind))
    }

    fn download(&self, env: &EnvironmentHandle, model_id: &str) -> Result<(), CommandFailure> {
        log::info!(
            "Downloading voice {model_id} into {}",
            self.data_dir.display()
        );

        run_checked(&mut self.download_command(env, model_id), DOWNLOAD_MODULE)?;

        if let Some(missing) = self.model_files(model_id).iter().find(|p| !p.is_file()) {
            return Err(CommandFailure::new(
                FailureKind::MissingModel,
                None,
                format!("{DOWNLOAD_MODULE} finished but {} is missing", missing.display()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_serve_failure, PiperService};
    use crate::config::LauncherConfig;
    use crate::{EnvironmentHandle, FailureKind};
    use std::ffi::OsStr;
    use std::fs;
    use std::process::Command;

    fn args(cmd: &Command) -> Vec<&OsStr> {
        cmd.get_args().collect()
    }

    fn env() -> EnvironmentHandle {
        EnvironmentHandle::new("piper/venv", "piper/venv/bin/python")
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn serve_command_passes_model_and_data_dir() {
        let service = PiperService::new("piper");
        let cmd = service.serve_command(&env(), "en_US-ryan-high");
        assert_eq!(cmd.get_program(), OsStr::new("piper/venv/bin/python"));
        assert_eq!(
            args(&cmd),
            ["-m", "piper.http_server", "-m", "en_US-ryan-high", "--data-dir", "piper"]
        );
    }

    #[test]
    fn serve_command_includes_configured_host_and_port() {
        let config = LauncherConfig::builder()
            .host("0.0.0.0")
            .port(5001u16)
            .build()
            .expect("builder should succeed");
        let service = PiperService::from_config(&config);
        let cmd = service.serve_command(&env(), "en_US-ryan-high");
        let args = args(&cmd);
        assert_eq!(&args[6..], ["--host", "0.0.0.0", "--port", "5001"]);
    }

    #[test]
    fn download_command_targets_data_dir() {
        let service = PiperService::new("voices");
        let cmd = service.download_command(&env(), "en_US-ryan-high");
        assert_eq!(
            args(&cmd),
            ["-m", "piper.download_voices", "--data-dir", "voices", "en_US-ryan-high"]
        );
    }

    #[test]
    fn model_needs_both_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let service = PiperService::new(dir.path());
        assert!(!service.model_present("en_US-ryan-high"));

        fs::write(dir.path().join("en_US-ryan-high.onnx"), b"onnx").expect("write model");
        assert!(!service.model_present("en_US-ryan-high"));

        fs::write(dir.path().join("en_US-ryan-high.onnx.json"), b"{}").expect("write config");
        assert!(service.model_present("en_US-ryan-high"));
    }

    #[test]
    fn absent_model_classifies_as_missing() {
        let tail = lines(&["Traceback (most recent call last):", "ValueError: boom"]);
        assert_eq!(classify_serve_failure(None, &tail, false), FailureKind::MissingModel);
    }

    #[test]
    fn file_not_found_output_classifies_as_missing() {
        let tail = lines(&["FileNotFoundError: [Errno 2] en_US-ryan-high.onnx"]);
        assert_eq!(classify_serve_failure(None, &tail, true), FailureKind::MissingModel);
    }

    #[test]
    fn port_in_use_wins_over_missing_model() {
        let tail = lines(&["OSError: [Errno 98] Address already in use"]);
        assert_eq!(classify_serve_failure(None, &tail, false), FailureKind::PortInUse);
    }

    #[test]
    fn unrecognised_failure_with_model_present_is_exited() {
        let tail = lines(&["Segmentation fault"]);
        assert_eq!(classify_serve_failure(None, &tail, true), FailureKind::Exited);
    }

    #[test]
    fn signal_termination_is_not_blamed_on_the_model() {
        let tail = lines(&["Serving on http://127.0.0.1:5000"]);
        assert_eq!(classify_serve_failure(Some(15), &tail, true), FailureKind::Terminated);
        assert_eq!(classify_serve_failure(Some(9), &tail, false), FailureKind::Terminated);
    }

    #[cfg(unix)]
    mod unix {
        use crate::services::piper::PiperService;
        use crate::{EnvironmentHandle, FailureKind, VoiceService};
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn write_script(path: &Path, body: &str) {
            fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            let mut perms = fs::metadata(path).expect("metadata").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(path, perms).expect("chmod");
        }

        fn fake_env(dir: &Path, body: &str) -> EnvironmentHandle {
            let python = dir.join("python");
            write_script(&python, body);
            EnvironmentHandle::new(dir, python)
        }

        #[test]
        fn download_without_model_files_fails() {
            let dir = tempfile::tempdir().expect("temp dir");
            let service = PiperService::new(dir.path());
            let env = fake_env(dir.path(), "echo downloaded; exit 0");

            let err = service
                .download(&env, "en_US-ryan-high")
                .expect_err("download left no model behind");
            assert_eq!(err.kind, FailureKind::MissingModel);
            assert_eq!(err.exit_code, None);
            assert!(err.detail.contains("en_US-ryan-high.onnx"));
        }

        #[test]
        fn download_succeeds_once_model_files_exist() {
            let dir = tempfile::tempdir().expect("temp dir");
            let service = PiperService::new(dir.path());
            let env = fake_env(dir.path(), "touch \"$4/$5.onnx\" \"$4/$5.onnx.json\"");

            service
                .download(&env, "en_US-ryan-high")
                .expect("download should succeed");
            assert!(service.model_present("en_US-ryan-high"));
        }

        #[test]
        fn signalled_server_is_terminated() {
            let dir = tempfile::tempdir().expect("temp dir");
            let service = PiperService::new(dir.path());
            let env = fake_env(dir.path(), "kill -TERM $$");

            let err = service
                .serve(&env, "en_US-ryan-high")
                .expect_err("server was killed");
            assert_eq!(err.kind, FailureKind::Terminated);
            assert!(err.detail.contains("signal 15"));
        }
    }
}
