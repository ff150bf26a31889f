//! Link to the physical display.
//!
//! [`DeviceLink`] wraps an [`MdcTransport`] with the connection retry
//! policy, the blind wake variant of power-on, and normalization of the
//! power readings the display reports.

pub mod policy;
pub mod tcp;

#[cfg(test)]
pub(crate) mod test_support;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mdc_codec::InputSource;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::DisplaySettings;
use crate::{Error, Result};

pub use policy::ConnectPolicy;
pub use tcp::{REPLY_TIMEOUT, TcpMdcTransport};

/// Factory for sessions with the display.
#[async_trait]
pub trait MdcTransport: Send + Sync {
    /// Make one connection attempt.
    async fn open(&self) -> Result<Box<dyn MdcSession>>;

    /// Send a power-on command without waiting for a handshake or reply.
    async fn send_blind_power_on(&self) -> Result<()>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;

    /// Apply changed display settings. Transports without an address
    /// ignore this.
    fn reconfigure(&self, _settings: &DisplaySettings) {}
}

/// An established session. Every call is bounded by a reply timeout.
#[async_trait]
pub trait MdcSession: Send {
    /// Raw power reading as reported by the display.
    async fn power(&mut self) -> Result<Value>;

    async fn set_power(&mut self, on: bool) -> Result<()>;

    async fn set_input_source(&mut self, source: InputSource) -> Result<()>;
}

/// A power reading after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerReading {
    On,
    Off,
    /// Anything else, lowercased. Callers take no action on it.
    Other(String),
}

impl fmt::Display for PowerReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("on"),
            Self::Off => f.write_str("off"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// Map the encodings the display and its drivers use onto on/off.
pub fn normalize_power(raw: &Value) -> PowerReading {
    match raw {
        Value::Bool(true) => PowerReading::On,
        Value::Bool(false) => PowerReading::Off,
        Value::Number(n) if n.as_u64() == Some(1) => PowerReading::On,
        Value::Number(n) if n.as_u64() == Some(0) => PowerReading::Off,
        Value::String(s) => match s.to_lowercase().as_str() {
            "on" | "1" | "true" => PowerReading::On,
            "off" | "0" | "false" => PowerReading::Off,
            other => PowerReading::Other(other.to_string()),
        },
        other => PowerReading::Other(other.to_string().to_lowercase()),
    }
}

/// Connection management for one display.
#[derive(Clone)]
pub struct DeviceLink {
    transport: Arc<dyn MdcTransport>,
    policy: ConnectPolicy,
}

impl DeviceLink {
    pub fn new(transport: Arc<dyn MdcTransport>, policy: ConnectPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &ConnectPolicy {
        &self.policy
    }

    /// Connect, retrying per the policy.
    ///
    /// Fails with [`Error::Unreachable`] only after every attempt failed.
    pub async fn connect(&self) -> Result<Box<dyn MdcSession>> {
        let attempts = self.policy.retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match timeout(self.policy.attempt_timeout(), self.transport.open()).await {
                Ok(Ok(session)) => {
                    debug!(
                        endpoint = %self.transport.endpoint(),
                        attempt = attempt + 1,
                        "Connected to display"
                    );
                    return Ok(session);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = "connection attempt timed out".to_string(),
            }

            warn!(
                endpoint = %self.transport.endpoint(),
                attempt = attempt + 1,
                attempts,
                "Connection attempt failed: {}",
                last_error
            );

            if self.policy.should_retry(attempt) {
                sleep(self.policy.delay_for_attempt(attempt)).await;
            }
        }

        Err(Error::unreachable(format!(
            "{} after {} attempts: {}",
            self.transport.endpoint(),
            attempts,
            last_error
        )))
    }

    /// Power-on variant for a display that does not answer the handshake.
    ///
    /// Sends the power-on frame blind, waits for the display to boot and
    /// then runs a fresh connect sequence to confirm it came up.
    pub async fn force_wake(&self) -> Result<Box<dyn MdcSession>> {
        info!(endpoint = %self.transport.endpoint(), "Sending blind power-on");
        if let Err(e) = self.transport.send_blind_power_on().await {
            warn!("Blind power-on could not be sent: {}", e);
        }
        sleep(self.policy.wake_wait()).await;
        self.connect().await
    }

    /// Read and normalize the power state over an open session.
    pub async fn probe_power(&self, session: &mut dyn MdcSession) -> Result<PowerReading> {
        let raw = session.power().await?;
        Ok(normalize_power(&raw))
    }
}
