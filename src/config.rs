//! Launcher configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `PIPER_SERVE_*` environment variables.
//!
//! ```json
//! {
//!   "work_dir": "piper",
//!   "venv_dir": "venv",
//!   "model": "en_US-ryan-high",
//!   "packages": ["piper-tts", "flask"],
//!   "port": 5000
//! }
//! ```

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::Deserialize;

/// Voice served when nothing else is configured.
pub const DEFAULT_MODEL: &str = "en_US-ryan-high";

/// Working directory holding the virtual environment.
pub const DEFAULT_WORK_DIR: &str = "piper";

/// Environment directory, relative to the working directory.
pub const DEFAULT_VENV_DIR: &str = "venv";

/// Packages installed into the environment.
pub const DEFAULT_PACKAGES: [&str; 2] = ["piper-tts", "flask"];

/// Config file read when `PIPER_SERVE_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "piper-serve.json";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Everything the launcher needs to bootstrap and serve one voice.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Builder)]
#[serde(default, deny_unknown_fields)]
#[builder(default, setter(into))]
pub struct LauncherConfig {
    /// Fixed working directory. Must already exist.
    pub work_dir: PathBuf,
    /// Virtual environment directory. Relative paths resolve against `work_dir`.
    pub venv_dir: PathBuf,
    /// Where voice models live. `None` means the working directory.
    #[builder(setter(into, strip_option))]
    pub data_dir: Option<PathBuf>,
    /// Voice model identifier handed to the service.
    pub model: String,
    /// Packages installed into the environment on every run.
    pub packages: Vec<String>,
    /// Host the HTTP server binds to. `None` keeps the server default.
    #[builder(setter(into, strip_option))]
    pub host: Option<String>,
    /// Port the HTTP server listens on. `None` keeps the server default.
    #[builder(setter(into, strip_option))]
    pub port: Option<u16>,
    /// Base interpreter used to create the environment. `None` searches `PATH`.
    #[builder(setter(into, strip_option))]
    pub python: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            venv_dir: PathBuf::from(DEFAULT_VENV_DIR),
            data_dir: None,
            model: DEFAULT_MODEL.to_string(),
            packages: DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect(),
            host: None,
            port: None,
            python: None,
        }
    }
}

impl LauncherConfig {
    pub fn builder() -> LauncherConfigBuilder {
        LauncherConfigBuilder::default()
    }

    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve the configuration the binary runs with.
    ///
    /// Reads `PIPER_SERVE_CONFIG` (or `piper-serve.json` when present), then
    /// applies environment overrides. An explicitly named file must exist.
    pub fn discover() -> Result<Self, ConfigError> {
        Self::discover_with(|key| std::env::var(key).ok())
    }

    fn discover_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base = match lookup("PIPER_SERVE_CONFIG").filter(|s| !s.is_empty()) {
            Some(path) => Self::load(Path::new(&path))?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.is_file() {
                    Self::load(path)?
                } else {
                    Self::default()
                }
            }
        };
        base.with_overrides(lookup)
    }

    /// Apply `PIPER_SERVE_*` overrides read through `lookup`. Empty values are ignored.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        if let Some(v) = get("PIPER_SERVE_DIR") {
            self.work_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PIPER_SERVE_VENV") {
            self.venv_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PIPER_SERVE_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PIPER_SERVE_MODEL") {
            self.model = v.trim().to_string();
        }
        if let Some(v) = get("PIPER_SERVE_HOST") {
            self.host = Some(v.trim().to_string());
        }
        if let Some(v) = get("PIPER_SERVE_PORT") {
            let port = v
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "PIPER_SERVE_PORT".to_string(),
                    value: v.clone(),
                })?;
            self.port = Some(port);
        }
        if let Some(v) = get("PIPER_SERVE_PYTHON") {
            self.python = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PIPER_SERVE_PACKAGES") {
            self.packages = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(self)
    }

    /// Location of the virtual environment.
    pub fn venv_path(&self) -> PathBuf {
        self.work_dir.join(&self.venv_dir)
    }

    /// Location of the voice model cache.
    pub fn data_path(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => self.work_dir.join(dir),
            None => self.work_dir.clone(),
        }
    }
}
