use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::controller::Controller;
use crate::endpoints::{self, Reply};
use crate::error::DispatchError;
use crate::protocol::frame::{self, MAX_REQUEST_LEN};
use crate::protocol::{handshake, ProtocolError, Request, ResultCode, ResultFrame};

/// Shared state every connection task needs.
#[derive(Clone)]
pub struct ConnectionContext {
    pub controller: Arc<Controller>,
    pub versions: Arc<[u16]>,
    pub shutdown: CancellationToken,
}

/// Serve one client until it disconnects, the stream breaks or the service
/// shuts down.
pub async fn serve_connection<S>(stream: S, context: ConnectionContext, id: u64)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    log::info!("Connection {} opened", id);
    match run(stream, &context, id).await {
        Ok(()) => log::info!("Connection {} closed", id),
        Err(e) => log::warn!("Connection {} closed: {}", id, e),
    }
}

async fn run<S>(stream: S, context: &ConnectionContext, id: u64) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let version = tokio::select! {
        result = handshake::accept(&mut reader, &mut writer, &context.versions) => result?,
        _ = context.shutdown.cancelled() => return Ok(()),
    };
    log::debug!("Connection {} negotiated protocol version {}", id, version);

    loop {
        let frame = tokio::select! {
            result = frame::read_frame(&mut reader, MAX_REQUEST_LEN) => result,
            _ = context.shutdown.cancelled() => return Ok(()),
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(()),
            Err(e @ (ProtocolError::FrameTooLarge { .. } | ProtocolError::InvalidFrameLength(_))) => {
                // The stream can no longer be framed; answer once and hang up.
                write_result(
                    &mut writer,
                    &ResultFrame::failure(ResultCode::InvalidInputStructure, e.to_string()),
                )
                .await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let request = match Request::parse(&payload) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Connection {}: request is not UTF-8: {}", id, e);
                let failure = ResultFrame::failure(ResultCode::InvalidInputStructure, "request is not valid UTF-8");
                write_result(&mut writer, &failure).await?;
                continue;
            }
        };

        let Some(endpoint) = endpoints::lookup(request.endpoint) else {
            let err = DispatchError::UnknownEndpoint(request.endpoint.to_string());
            log::warn!("Connection {}: {}", id, err);
            write_result(&mut writer, &ResultFrame::failure(ResultCode::from(&err), err.to_string())).await?;
            continue;
        };

        log::debug!(
            "Connection {}: {} ({})",
            id,
            endpoint.name,
            if request.argument.is_some() { "with argument" } else { "no argument" }
        );

        let call = endpoint.call(Arc::clone(&context.controller), request.argument);
        let outcome = tokio::select! {
            outcome = call => outcome,
            _ = peer_closed(&mut reader) => {
                log::debug!("Connection {}: peer left during {}", id, endpoint.name);
                return Ok(());
            }
            _ = context.shutdown.cancelled() => Err(DispatchError::Cancelled),
        };

        send_reply(&mut writer, endpoint.name, outcome, id).await?;
        if context.shutdown.is_cancelled() {
            return Ok(());
        }
    }
}

/// Resolves once the peer has closed its side. Pipelined request bytes stay
/// buffered for the next read.
async fn peer_closed<R>(reader: &mut R)
where
    R: AsyncBufRead + Unpin,
{
    match reader.fill_buf().await {
        Ok(buffered) if !buffered.is_empty() => std::future::pending().await,
        _ => {}
    }
}

async fn send_reply<W>(
    writer: &mut W,
    endpoint: &str,
    outcome: Result<Reply, DispatchError>,
    id: u64,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    match outcome {
        Ok(Reply::Empty) => write_result(writer, &ResultFrame::success()).await,
        Ok(Reply::Value(value)) => write_result(writer, &ResultFrame::with_data(value)).await,
        Ok(Reply::Content(body)) => {
            let length = body.len();
            write_result(writer, &ResultFrame::content(length)).await?;
            let sent = body.write_to(writer).await?;
            log::debug!("Connection {}: {} streamed {} bytes", id, endpoint, sent);
            Ok(())
        }
        Err(err) => {
            let code = ResultCode::from(&err);
            log::warn!("Connection {}: {} failed with {:?}: {}", id, endpoint, code, err);
            write_result(writer, &ResultFrame::failure(code, err.to_string())).await
        }
    }
}

async fn write_result<W>(writer: &mut W, result: &ResultFrame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(result).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    frame::write_frame(writer, &json).await?;
    writer.flush().await?;
    Ok(())
}
