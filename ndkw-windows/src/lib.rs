//! # ndkw-windows
//!
//! Windows WASAPI backend for ndkw-core.
//!
//! Provides:
//! - `WasapiDirectory` — endpoint enumeration via the MMDevice API, with
//!   polling device-change notifications
//! - `WasapiCapture` — shared-mode capture of inputs, and loopback capture
//!   plus a silent render stream for outputs
//!
//! ## Platform Requirements
//! - Windows 10 or later
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use ndkw_core::{CaptureOrchestrator, RecorderConfiguration};
//! use ndkw_windows::WasapiDirectory;
//!
//! let directory = Arc::new(WasapiDirectory::new()?);
//! let recorder = CaptureOrchestrator::new(directory, RecorderConfiguration::default())?;
//! ```

pub mod mix_format;

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod wasapi_capture;

#[cfg(target_os = "windows")]
pub use device_enumerator::WasapiDirectory;
#[cfg(target_os = "windows")]
pub use wasapi_capture::WasapiCapture;
