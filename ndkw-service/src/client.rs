//! Protocol client used by front ends and the integration tests.
//!
//! Transport failures never surface as I/O errors: they come back as result
//! frames carrying `timeout`, `disconnected`, `notConnected` or `noResponse`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::protocol::frame::{self, MAX_RESPONSE_LEN};
use crate::protocol::{handshake, ProtocolError, Request, ResultCode, ResultFrame};

pub struct ServiceClient<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    version: u16,
    timeout: Option<Duration>,
    closed: bool,
}

impl ServiceClient<TcpStream> {
    pub async fn connect_tcp<A: ToSocketAddrs>(addr: A, versions: &[u16]) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::connect(stream, versions).await
    }
}

impl<S> ServiceClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Negotiate a protocol version over an established stream.
    pub async fn connect(stream: S, versions: &[u16]) -> Result<Self, ProtocolError> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let version = handshake::connect(&mut reader, &mut writer, versions).await?;
        Ok(Self {
            reader,
            writer,
            version,
            timeout: None,
            closed: false,
        })
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Bound each call. A call that times out leaves the stream mid-frame,
    /// so the client refuses further calls afterwards.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn is_connected(&self) -> bool {
        !self.closed
    }

    /// Call `endpoint`. Any attached content is read and discarded.
    pub async fn call(&mut self, endpoint: &str, argument: Option<&Value>) -> ResultFrame {
        match self.round_trip(endpoint, argument).await {
            Ok((result, _)) => result,
            Err(result) => result,
        }
    }

    /// Call `endpoint` and decode its `data`.
    pub async fn call_json<T: DeserializeOwned>(
        &mut self,
        endpoint: &str,
        argument: Option<&Value>,
    ) -> Result<T, ResultFrame> {
        let result = self.call(endpoint, argument).await;
        if !result.is_success() {
            return Err(result);
        }
        result
            .data_as()
            .map_err(|e| ResultFrame::failure(ResultCode::NoResponse, format!("unexpected result data: {}", e)))
    }

    /// Call a content endpoint and return the attached bytes.
    pub async fn call_content(&mut self, endpoint: &str, argument: Option<&Value>) -> Result<Vec<u8>, ResultFrame> {
        let (result, content) = self.round_trip(endpoint, argument).await?;
        if !result.is_success() {
            return Err(result);
        }
        content.ok_or_else(|| ResultFrame::failure(ResultCode::NoResponse, "result carried no content"))
    }

    async fn round_trip(
        &mut self,
        endpoint: &str,
        argument: Option<&Value>,
    ) -> Result<(ResultFrame, Option<Vec<u8>>), ResultFrame> {
        if self.closed {
            return Err(ResultFrame::failure(ResultCode::NotConnected, "connection is closed"));
        }

        let argument = argument.map(Value::to_string);
        let request = Request::format(endpoint, argument.as_deref());
        let exchange = exchange(&mut self.reader, &mut self.writer, request.as_bytes());
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ResultFrame::failure(
                    ResultCode::Timeout,
                    format!("{} did not answer within {:?}", endpoint, limit),
                )),
            },
            None => exchange.await,
        };

        if let Err(failure) = &outcome {
            log::debug!("{} failed on the transport: {:?}", endpoint, failure.code);
            self.closed = true;
        }
        outcome
    }
}

async fn exchange<R, W>(
    reader: &mut R,
    writer: &mut W,
    request: &[u8],
) -> Result<(ResultFrame, Option<Vec<u8>>), ResultFrame>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let sent = async {
        frame::write_frame(writer, request).await?;
        writer.flush().await?;
        Ok::<_, ProtocolError>(())
    };
    sent.await
        .map_err(|e| ResultFrame::failure(ResultCode::Disconnected, format!("send failed: {}", e)))?;

    let payload = match frame::read_frame(reader, MAX_RESPONSE_LEN).await {
        Ok(Some(payload)) => payload,
        Ok(None) => return Err(ResultFrame::failure(ResultCode::Disconnected, "server closed the connection")),
        Err(ProtocolError::Io(e)) => {
            return Err(ResultFrame::failure(ResultCode::Disconnected, format!("receive failed: {}", e)))
        }
        Err(e) => return Err(ResultFrame::failure(ResultCode::NoResponse, e.to_string())),
    };

    let result: ResultFrame = serde_json::from_slice(&payload)
        .map_err(|e| ResultFrame::failure(ResultCode::NoResponse, format!("malformed result: {}", e)))?;

    let content = match result.content_length {
        Some(length) => {
            let mut content = Vec::new();
            let read = reader
                .take(length)
                .read_to_end(&mut content)
                .await
                .map_err(|e| ResultFrame::failure(ResultCode::Disconnected, format!("receive failed: {}", e)))?;
            if read as u64 != length {
                return Err(ResultFrame::failure(
                    ResultCode::Disconnected,
                    format!("content ended after {} of {} bytes", read, length),
                ));
            }
            Some(content)
        }
        None => None,
    };
    Ok((result, content))
}
