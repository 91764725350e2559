//! Listeners. Each accepted stream gets its own task running
//! [`serve_connection`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::connection::{serve_connection, ConnectionContext};

#[derive(Clone)]
pub struct Server {
    context: ConnectionContext,
    next_id: Arc<AtomicU64>,
}

impl Server {
    pub fn new(context: ConnectionContext) -> Self {
        Self {
            context,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Spawn a task serving `stream`.
    pub fn spawn<S>(&self, stream: S) -> tokio::task::JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let context = self.context.clone();
        tokio::spawn(serve_connection(stream, context, id))
    }

    pub async fn serve_tcp(&self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("Listening on tcp://{}", addr);
        }
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = self.context.shutdown.cancelled() => return Ok(()),
            };
            match accepted {
                Ok((stream, peer)) => {
                    log::debug!("Accepted tcp connection from {}", peer);
                    if let Err(e) = stream.set_nodelay(true) {
                        log::warn!("Failed to disable Nagle on {}: {}", peer, e);
                    }
                    self.spawn(stream);
                }
                Err(e) => log::warn!("Failed to accept tcp connection: {}", e),
            }
        }
    }

    #[cfg(unix)]
    pub async fn serve_unix(&self, listener: tokio::net::UnixListener) -> std::io::Result<()> {
        log::info!("Listening on unix socket {:?}", listener.local_addr().ok());
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = self.context.shutdown.cancelled() => return Ok(()),
            };
            match accepted {
                Ok((stream, _)) => {
                    self.spawn(stream);
                }
                Err(e) => log::warn!("Failed to accept unix connection: {}", e),
            }
        }
    }

    /// Serve `\\.\pipe\<name>`, one pipe instance per client.
    #[cfg(windows)]
    pub async fn serve_named_pipe(&self, name: &str) -> std::io::Result<()> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let path = format!(r"\\.\pipe\{}", name);
        let mut server = ServerOptions::new().first_pipe_instance(true).create(&path)?;
        log::info!("Listening on {}", path);

        loop {
            tokio::select! {
                connected = server.connect() => connected?,
                _ = self.context.shutdown.cancelled() => return Ok(()),
            }
            let next = ServerOptions::new().create(&path)?;
            let client = std::mem::replace(&mut server, next);
            self.spawn(client);
        }
    }
}
