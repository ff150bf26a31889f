//! MDC over TCP.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use mdc_codec::{InputSource, MdcCodec, MdcRequest, encode_request};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use super::{MdcSession, MdcTransport};
use crate::config::DisplaySettings;
use crate::{Error, Result};

/// How long a request waits for its ACK/NAK, stale replies included.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    display_id: u8,
}

impl From<&DisplaySettings> for Endpoint {
    fn from(settings: &DisplaySettings) -> Self {
        Self {
            host: settings.ip.clone(),
            port: settings.port,
            display_id: settings.display_id,
        }
    }
}

/// Transport that talks MDC to a display on the network.
///
/// The endpoint can be swapped at runtime; sessions already open keep
/// talking to the old address until they are dropped.
pub struct TcpMdcTransport {
    endpoint: RwLock<Endpoint>,
    reply_timeout: Duration,
}

impl TcpMdcTransport {
    pub fn new(settings: &DisplaySettings) -> Self {
        Self {
            endpoint: RwLock::new(Endpoint::from(settings)),
            reply_timeout: REPLY_TIMEOUT,
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Point the transport at a new address.
    pub fn set_endpoint(&self, settings: &DisplaySettings) {
        let endpoint = Endpoint::from(settings);
        let mut current = self.endpoint.write();
        if *current != endpoint {
            debug!(host = %endpoint.host, port = endpoint.port, "Display endpoint changed");
            *current = endpoint;
        }
    }

    async fn connect_stream(&self) -> Result<(TcpStream, u8)> {
        let endpoint = self.endpoint.read().clone();
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        Ok((stream, endpoint.display_id))
    }
}

#[async_trait]
impl MdcTransport for TcpMdcTransport {
    async fn open(&self) -> Result<Box<dyn MdcSession>> {
        let (stream, display_id) = self.connect_stream().await?;
        Ok(Box::new(TcpMdcSession {
            framed: Framed::new(stream, MdcCodec),
            display_id,
            reply_timeout: self.reply_timeout,
        }))
    }

    async fn send_blind_power_on(&self) -> Result<()> {
        let (mut stream, display_id) =
            timeout(self.reply_timeout, self.connect_stream())
                .await
                .map_err(|_| Error::unreachable("blind power-on connect timed out"))??;
        let frame = encode_request(MdcRequest::set_power(display_id, true))?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
        Ok(())
    }

    fn endpoint(&self) -> String {
        let endpoint = self.endpoint.read();
        format!("{}:{}", endpoint.host, endpoint.port)
    }

    fn reconfigure(&self, settings: &DisplaySettings) {
        self.set_endpoint(settings);
    }
}

struct TcpMdcSession {
    framed: Framed<TcpStream, MdcCodec>,
    display_id: u8,
    reply_timeout: Duration,
}

impl TcpMdcSession {
    async fn request(&mut self, request: MdcRequest) -> Result<Vec<u8>> {
        let command = request.command;
        trace!(command, data = ?request.data, "Sending MDC request");
        self.framed.send(request).await?;

        // One deadline for the whole exchange
        let deadline = Instant::now() + self.reply_timeout;
        loop {
            let reply = timeout_at(deadline, self.framed.next())
                .await
                .map_err(|_| Error::comm(format!("no reply to command {command:#04x}")))?
                .ok_or_else(|| Error::comm("connection closed by display"))??;

            // Stale replies from an earlier, timed-out request
            if reply.command != command {
                debug!(expected = command, got = reply.command, "Skipping unrelated reply");
                continue;
            }
            return Ok(reply.into_values()?);
        }
    }
}

#[async_trait]
impl MdcSession for TcpMdcSession {
    async fn power(&mut self) -> Result<Value> {
        let values = self.request(MdcRequest::get_power(self.display_id)).await?;
        let raw = values
            .first()
            .copied()
            .ok_or_else(|| Error::comm("empty power reply"))?;
        Ok(Value::from(raw))
    }

    async fn set_power(&mut self, on: bool) -> Result<()> {
        self.request(MdcRequest::set_power(self.display_id, on))
            .await
            .map(|_| ())
    }

    async fn set_input_source(&mut self, source: InputSource) -> Result<()> {
        self.request(MdcRequest::set_input_source(self.display_id, source))
            .await
            .map(|_| ())
    }
}
