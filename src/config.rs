use std::time::Duration;

use serde::Deserialize;

use crate::connection::upgrade::OriginPolicy;
use crate::message::FrameKind;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection tuning shared by dialed and registered connections.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    /// Period of the keepalive ping. `None` disables pings.
    pub keepalive_interval: Option<Duration>,
    pub frame_kind: FrameKind,
    /// Upper bound on sending the close frame when the socket is torn down.
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_QUEUE_CAPACITY,
            outbound_capacity: DEFAULT_QUEUE_CAPACITY,
            keepalive_interval: None,
            frame_kind: FrameKind::Text,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    pub fn with_capacity(mut self, inbound: usize, outbound: usize) -> Self {
        self.inbound_capacity = inbound;
        self.outbound_capacity = outbound;
        self
    }

    pub fn with_frame_kind(mut self, kind: FrameKind) -> Self {
        self.frame_kind = kind;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    // tokio's bounded channels panic on a zero capacity
    pub(crate) fn inbound_capacity(&self) -> usize {
        self.inbound_capacity.max(1)
    }

    pub(crate) fn outbound_capacity(&self) -> usize {
        self.outbound_capacity.max(1)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `ws://` or `wss://` endpoint to dial.
    pub address: String,
    /// Extra request headers sent with the handshake.
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Option<Duration>,
    pub connection: ConnectionConfig,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), ..Self::default() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.connection.keepalive_interval = Some(interval);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Applied to every connection the registry builds.
    pub connection: ConnectionConfig,
    pub origin: OriginPolicy,
}

impl RegistryConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self { connection, origin: OriginPolicy::default() }
    }

    pub fn with_origin(mut self, origin: OriginPolicy) -> Self {
        self.origin = origin;
        self
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }
}
