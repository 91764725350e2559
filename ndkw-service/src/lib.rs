//! # ndkw-service
//!
//! Exposes a [`CaptureOrchestrator`] over a length-framed request/response
//! protocol. One task per connection; long-poll endpoints park on the
//! orchestrator's event hub without blocking other clients.
//!
//! ```text
//! transport (tcp / unix socket / named pipe)
//!   └── connection   ← handshake, framing, EOF and shutdown races
//!         └── endpoints  ← static name → handler table
//!               └── controller ← orchestrator calls on the blocking pool
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod controller;
pub mod endpoints;
pub mod error;
pub mod protocol;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use ndkw_core::mock::MockDirectory;
use ndkw_core::{CaptureOrchestrator, Device, DeviceDirectory, DeviceKind, WaveFormat};
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

pub use client::ServiceClient;
pub use config::{ServiceArgs, ServiceConfig};
pub use connection::ConnectionContext;
pub use controller::Controller;
pub use error::{DispatchError, ServiceError};
pub use transport::Server;

const MOCK_FEED_INTERVAL: Duration = Duration::from_millis(20);

fn mock_devices() -> Vec<(Device, WaveFormat)> {
    vec![
        (
            Device::new("mock-microphone", "Mock Microphone", DeviceKind::Input),
            WaveFormat::pcm16(48_000, 1),
        ),
        (
            Device::new("mock-speakers", "Mock Speakers", DeviceKind::Output),
            WaveFormat::float32(48_000, 2),
        ),
    ]
}

struct Backend {
    directory: Arc<dyn DeviceDirectory>,
    mock: Option<Arc<MockDirectory>>,
}

impl Backend {
    fn mock() -> Self {
        let mock = Arc::new(MockDirectory::with_devices(mock_devices()));
        Self {
            directory: mock.clone(),
            mock: Some(mock),
        }
    }
}

#[cfg(target_os = "windows")]
fn platform_backend() -> Result<Backend, ServiceError> {
    let directory = ndkw_windows::WasapiDirectory::new()?;
    Ok(Backend {
        directory: Arc::new(directory),
        mock: None,
    })
}

#[cfg(not(target_os = "windows"))]
fn platform_backend() -> Result<Backend, ServiceError> {
    log::warn!("No capture backend for this platform, serving mock devices");
    Ok(Backend::mock())
}

/// Feed silence into every running mock capture so snapshots grow in real
/// time.
fn spawn_mock_feeder(directory: Arc<MockDirectory>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let chunks: Vec<(String, Vec<u8>)> = mock_devices()
            .into_iter()
            .map(|(device, format)| (device.id, vec![0u8; format.bytes_for(MOCK_FEED_INTERVAL) as usize]))
            .collect();

        while !shutdown.is_cancelled() {
            for (id, silence) in &chunks {
                if let Some(handle) = directory.handle(id) {
                    handle.inject(silence);
                }
            }
            std::thread::sleep(MOCK_FEED_INTERVAL);
        }
    })
}

/// Run the service until `shutdown` is cancelled or a listener fails.
pub async fn run(config: ServiceConfig, shutdown: CancellationToken) -> Result<(), ServiceError> {
    config.validate()?;

    let backend = if config.mock_devices {
        Backend::mock()
    } else {
        platform_backend()?
    };
    let orchestrator = Arc::new(CaptureOrchestrator::new(backend.directory, config.recorder.clone())?);
    log::info!("Queue directory: {}", orchestrator.queue().root().display());

    let feeder = backend.mock.map(|mock| spawn_mock_feeder(mock, shutdown.clone()));

    let server = Server::new(ConnectionContext {
        controller: Arc::new(Controller::new(Arc::clone(&orchestrator))),
        versions: Arc::from(protocol::SERVER_VERSIONS),
        shutdown: shutdown.clone(),
    });

    let mut listeners = JoinSet::new();
    if let Some(addr) = config.listen {
        let listener = TcpListener::bind(addr).await?;
        let server = server.clone();
        listeners.spawn(async move { server.serve_tcp(listener).await });
    }

    #[cfg(unix)]
    if let Some(path) = config.socket.clone() {
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = tokio::net::UnixListener::bind(&path)?;
        let server = server.clone();
        listeners.spawn(async move {
            let result = server.serve_unix(listener).await;
            if let Err(e) = std::fs::remove_file(&path) {
                log::debug!("Failed to remove socket {}: {}", path.display(), e);
            }
            result
        });
    }

    #[cfg(windows)]
    if let Some(name) = config.pipe_name.clone() {
        let server = server.clone();
        listeners.spawn(async move { server.serve_named_pipe(&name).await });
    }

    let mut failure = None;
    while let Some(joined) = listeners.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        };
        if let Err(e) = result {
            log::error!("Listener failed: {}", e);
            shutdown.cancel();
            failure.get_or_insert(e);
        }
    }
    shutdown.cancel();

    if let Some(feeder) = feeder {
        if let Err(e) = feeder.await {
            log::warn!("Mock feeder ended abnormally: {}", e);
        }
    }

    let stopped = tokio::task::spawn_blocking(move || {
        if orchestrator.is_recording() {
            log::info!("Stopping active recording before exit");
            orchestrator.stop_recording()
        } else {
            Ok(())
        }
    })
    .await;
    match stopped {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Failed to stop recording on shutdown: {}", e),
        Err(e) => log::warn!("Shutdown task failed: {}", e),
    }

    log::info!("Service stopped");
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
