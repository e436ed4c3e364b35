//! External voice services and the environments they run in.
//!
//! # Available Services
//!
//! Enable services via Cargo features:
//! - `piper` - Piper TTS (`piper-tts` Python package, Python 3 required)

#[cfg(feature = "piper")]
pub mod piper;
