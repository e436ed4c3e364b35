//! Piper text-to-speech served from a Python virtual environment.
//!
//! This module provides the [`DependencyEnvironment`](crate::DependencyEnvironment)
//! and [`VoiceService`](crate::VoiceService) implementations backing the
//! launcher. Nothing is synthesized in Rust: the `piper-tts` package does the
//! work and this module only prepares its environment and drives its
//! command-line entry points.
//!
//! # System Requirements
//!
//! **Python 3** with the `venv` module must be installed:
//! - **Linux**: `sudo apt-get install python3 python3-venv`
//! - **macOS**: `brew install python`
//! - **Windows**: Download installer from <https://www.python.org/downloads/>
//!
//! # Directory Layout
//!
//! ```text
//! piper/
//! ├── venv/                         # Virtual environment (created on first run)
//! ├── en_US-ryan-high.onnx          # Voice model (downloaded on demand)
//! └── en_US-ryan-high.onnx.json     # Voice config
//! ```
//!
//! # Entry Points
//!
//! | Operation | Command |
//! |---|---|
//! | create | `python3 -m venv piper/venv` |
//! | install | `piper/venv/bin/python -m pip install piper-tts flask` |
//! | serve | `piper/venv/bin/python -m piper.http_server -m <voice> --data-dir piper` |
//! | download | `piper/venv/bin/python -m piper.download_voices --data-dir piper <voice>` |
//!
//! # Examples
//!
//! ```rust,no_run
//! use piper_serve::{DependencyEnvironment, VoiceService};
//! use piper_serve::services::piper::{PiperService, PythonVenv};
//!
//! let venv = PythonVenv::new("piper/venv");
//! let env = match venv.activate() {
//!     Ok(env) => env,
//!     Err(_) => {
//!         venv.create()?;
//!         venv.activate()?
//!     }
//! };
//! venv.install(&env, &["piper-tts".to_string(), "flask".to_string()])?;
//!
//! let service = PiperService::new("piper");
//! service.serve(&env, "en_US-ryan-high")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod process;
pub mod service;
pub mod venv;

pub use service::PiperService;
pub use venv::PythonVenv;
