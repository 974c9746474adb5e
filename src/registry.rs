use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::join_all;
use futures::{Sink, Stream};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::RegistryConfig;
use crate::connection::{Connection, ConnectionError, Upgrader};
use crate::key::KeyGenerator;
use crate::{rapid_debug, rapid_info, rapid_warn};

/// Response header carrying the key a connection was registered under.
pub const CLIENT_KEY_HEADER: &str = "client-key";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no connection registered under key {0}")]
    KeyNotFound(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Per-key outcome of a broadcast or bulk close in which at least one target failed.
#[derive(Debug, Error)]
#[error("{} of {} connections failed{}", .failures.len(), .attempted, describe_first(.failures))]
pub struct FanOutError {
    pub attempted: usize,
    pub failures: Vec<(String, ConnectionError)>,
}

impl FanOutError {
    /// The first failure, in snapshot order.
    pub fn first(&self) -> Option<&(String, ConnectionError)> {
        self.failures.first()
    }

    pub fn failed_keys(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(key, _)| key.as_str())
    }
}

fn describe_first(failures: &[(String, ConnectionError)]) -> String {
    failures
        .first()
        .map(|(key, e)| format!(" (first: {key}: {e})"))
        .unwrap_or_default()
}

/// Point-in-time listing of the registry, for status endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistryStatus {
    pub count: usize,
    pub keys: Vec<String>,
}

/// Keyed collection of live connections.
///
/// All operations are safe from any number of tasks. Fan-out operations work
/// on a snapshot taken when they start; connections registered meanwhile are
/// not included.
pub struct Registry {
    cfg: RegistryConfig,
    connections: DashMap<String, Connection>,
    keys: KeyGenerator,
    upgrader: Upgrader,
}

impl Registry {
    pub fn new(cfg: RegistryConfig) -> Self {
        Self::with_key_generator(cfg, KeyGenerator::new())
    }

    pub fn with_key_generator(cfg: RegistryConfig, keys: KeyGenerator) -> Self {
        let upgrader = Upgrader::new(cfg.origin);
        Self { cfg, connections: DashMap::new(), keys, upgrader }
    }

    /// Wraps `socket` in a connection tracked under `key`.
    ///
    /// A connection already registered under `key` is displaced: its close
    /// signal fires before this returns and its socket is closed in the
    /// background.
    pub fn register<T>(&self, key: impl Into<String>, socket: T) -> Connection
    where
        T: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + 'static,
    {
        let key = key.into();
        let conn = Connection::from_socket(socket, self.cfg.connection());

        if let Some(displaced) = self.connections.insert(key.clone(), conn.clone()) {
            rapid_info!("Connection {} displaced from key {}", displaced.id(), key);
            displaced.close_in_background();
        }
        rapid_info!("Connection {} registered as {}", conn.id(), key);

        conn
    }

    /// Registers `socket` under a freshly generated key.
    pub fn register_with_key<T>(&self, socket: T) -> (String, Connection)
    where
        T: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + 'static,
    {
        let key = self.keys.generate();
        let conn = self.register(key.clone(), socket);
        (key, conn)
    }

    /// Upgrades a raw stream, telling the peer its key through
    /// [`CLIENT_KEY_HEADER`], and registers the result.
    pub async fn accept<S>(&self, stream: S) -> Result<(String, Connection), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let key = self.keys.generate();
        let socket = match self.upgrader.upgrade(stream, &[(CLIENT_KEY_HEADER, key.as_str())]).await {
            Ok(socket) => socket,
            Err(e) => {
                rapid_warn!("Upgrade for {} failed: {e}", key);
                return Err(e);
            }
        };
        let conn = self.register(key.clone(), socket);
        Ok((key, conn))
    }

    /// Stops tracking `key`. The connection itself stays open.
    pub fn unregister(&self, key: &str) {
        if let Some((_, conn)) = self.connections.remove(key) {
            rapid_info!("Connection {} unregistered from {}", conn.id(), key);
        }
    }

    pub fn get(&self, key: &str) -> Option<Connection> {
        // clone out so no map guard is held across an await
        self.connections.get(key).map(|entry| entry.value().clone())
    }

    pub async fn send(&self, key: &str, payload: impl Into<Bytes>) -> Result<(), RegistryError> {
        let Some(conn) = self.get(key) else {
            rapid_debug!("Send to unknown key {}", key);
            return Err(RegistryError::KeyNotFound(key.to_owned()));
        };
        conn.send(payload).await?;
        Ok(())
    }

    /// Sends `payload` to every registered connection concurrently.
    ///
    /// Every target is attempted; failures are collected rather than
    /// short-circuiting.
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<(), FanOutError> {
        self.fan_out_send(None, payload.into()).await
    }

    /// Like [`broadcast`](Self::broadcast) but skips the connection under `exclude`.
    pub async fn broadcast_to_other(&self, exclude: &str, payload: impl Into<Bytes>) -> Result<(), FanOutError> {
        self.fan_out_send(Some(exclude), payload.into()).await
    }

    /// Closes every registered connection concurrently.
    ///
    /// The table is left as is; callers unregister what they no longer want.
    pub async fn close(&self) -> Result<(), FanOutError> {
        let targets = self.snapshot(None);
        rapid_info!("Closing {} connections", targets.len());

        let attempted = targets.len();
        let results = join_all(targets.into_iter().map(|(key, conn)| async move {
            conn.close().await.map_err(|e| (key, e))
        }))
        .await;

        Self::collect("close", attempted, results)
    }

    pub fn keys(&self) -> HashSet<String> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.connections.contains_key(key)
    }

    pub fn status(&self) -> RegistryStatus {
        let mut keys: Vec<String> = self.keys().into_iter().collect();
        keys.sort_unstable();
        RegistryStatus { count: keys.len(), keys }
    }

    fn snapshot(&self, exclude: Option<&str>) -> Vec<(String, Connection)> {
        self.connections
            .iter()
            .filter(|entry| exclude != Some(entry.key().as_str()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    async fn fan_out_send(&self, exclude: Option<&str>, payload: Bytes) -> Result<(), FanOutError> {
        let targets = self.snapshot(exclude);
        let attempted = targets.len();
        rapid_debug!(
            "Broadcast of {} B to {} connections{}",
            payload.len(),
            attempted,
            exclude.map(|k| format!(" (excluding {k})")).unwrap_or_default()
        );

        let results = join_all(targets.into_iter().map(|(key, conn)| {
            let payload = payload.clone();
            async move { conn.send(payload).await.map_err(|e| (key, e)) }
        }))
        .await;

        Self::collect("broadcast", attempted, results)
    }

    fn collect(
        op: &str,
        attempted: usize,
        results: Vec<Result<(), (String, ConnectionError)>>,
    ) -> Result<(), FanOutError> {
        let failures: Vec<_> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            return Ok(());
        }

        for (key, e) in &failures {
            rapid_warn!("{op} to {key} failed: {e}");
        }
        rapid_warn!("{op} finished: {} errors / {} connections", failures.len(), attempted);
        Err(FanOutError { attempted, failures })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.len())
            .field("origin", &self.upgrader.policy())
            .finish()
    }
}
