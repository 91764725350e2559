use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use ndkw_core::{CacheBackingKind, RecorderConfiguration};

use crate::error::ServiceError;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:47800";
pub const DEFAULT_PIPE_NAME: &str = "ndkw-service";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackingArg {
    Memory,
    TempFile,
}

impl From<CacheBackingArg> for CacheBackingKind {
    fn from(arg: CacheBackingArg) -> Self {
        match arg {
            CacheBackingArg::Memory => CacheBackingKind::Memory,
            CacheBackingArg::TempFile => CacheBackingKind::TempFile,
        }
    }
}

/// Rolling audio recorder service.
#[derive(Debug, Parser)]
#[command(name = "ndkw-service", version, about)]
pub struct ServiceArgs {
    /// TCP address to listen on. Pass "none" to disable TCP.
    #[arg(long, env = "NDKW_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Unix socket path to listen on
    #[cfg(unix)]
    #[arg(long, env = "NDKW_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Named pipe to listen on (\\.\pipe\<name>)
    #[cfg(windows)]
    #[arg(long, env = "NDKW_PIPE_NAME", default_value = DEFAULT_PIPE_NAME)]
    pub pipe_name: String,

    /// Directory holding queued recordings
    #[arg(long, env = "NDKW_QUEUE_DIR")]
    pub queue_dir: Option<PathBuf>,

    /// Write-behind buffer per device, in bytes
    #[arg(long, env = "NDKW_WRITE_BUFFER_BYTES")]
    pub write_buffer_bytes: Option<usize>,

    /// Where rolling caches live
    #[arg(long, value_enum, env = "NDKW_CACHE_BACKING", default_value = "temp-file")]
    pub cache_backing: CacheBackingArg,

    /// Serve the in-process mock backend instead of real devices
    #[arg(long)]
    pub mock_devices: bool,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen: Option<SocketAddr>,
    #[cfg(unix)]
    pub socket: Option<PathBuf>,
    #[cfg(windows)]
    pub pipe_name: Option<String>,
    pub recorder: RecorderConfiguration,
    pub mock_devices: bool,
}

/// `<local data dir>/Ndkw/Queued`, falling back to the working directory.
pub fn default_queue_directory() -> PathBuf {
    dirs_next::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Ndkw")
        .join("Queued")
}

impl ServiceArgs {
    pub fn into_config(self) -> Result<ServiceConfig, ServiceError> {
        let listen = if self.listen.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(
                self.listen
                    .parse::<SocketAddr>()
                    .map_err(|e| ServiceError::Config(format!("--listen {}: {}", self.listen, e)))?,
            )
        };

        let mut recorder =
            RecorderConfiguration::with_queue_directory(self.queue_dir.unwrap_or_else(default_queue_directory));
        recorder.cache_backing = self.cache_backing.into();
        if let Some(bytes) = self.write_buffer_bytes {
            recorder.write_behind_capacity = bytes;
        }

        let config = ServiceConfig {
            listen,
            #[cfg(unix)]
            socket: self.socket,
            #[cfg(windows)]
            pipe_name: Some(self.pipe_name).filter(|name| !name.is_empty()),
            recorder,
            mock_devices: self.mock_devices,
        };
        config.validate()?;
        Ok(config)
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if let Some(addr) = self.listen {
            if addr.port() <= 1024 {
                return Err(ServiceError::Config(format!(
                    "port {} is reserved, pick one above 1024",
                    addr.port()
                )));
            }
        }
        if !self.has_transport() {
            return Err(ServiceError::Config("no transport configured".into()));
        }
        self.recorder.validate().map_err(ServiceError::Config)
    }

    pub fn has_transport(&self) -> bool {
        #[cfg(unix)]
        if self.socket.is_some() {
            return true;
        }
        #[cfg(windows)]
        if self.pipe_name.is_some() {
            return true;
        }
        self.listen.is_some()
    }
}
