use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::connection::error::ConnectionError;
use crate::message::{FrameKind, Inbound};
use crate::{rapid_debug, rapid_trace, rapid_warn};

type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// Close signal fired, socket teardown in progress.
    Closing,
    Closed,
}

/// A duplex message channel over one WebSocket.
///
/// Cloning is cheap and every clone drives the same socket. Three tasks run
/// behind each connection: the inbound pump reads frames into a bounded
/// queue, the outbound pump writes queued frames, and the keepalive pump
/// pings the peer on a timer. All of them stop once the connection closes.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    frame_kind: FrameKind,
    keepalive: Option<Duration>,
    close_timeout: Duration,
    sink: tokio::sync::Mutex<Option<FrameSink>>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    outbound_tx: mpsc::Sender<Message>,
    state: Mutex<ConnectionState>,
    close_tx: watch::Sender<bool>,
}

impl Connection {
    /// Wraps an already-handshaken socket and starts its pumps.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_socket<T>(socket: T, cfg: &ConnectionConfig) -> Self
    where
        T: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + 'static,
    {
        let (sink, stream) = socket.split::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(cfg.inbound_capacity());
        let (outbound_tx, outbound_rx) = mpsc::channel::<Message>(cfg.outbound_capacity());
        let (close_tx, _) = watch::channel(false);

        let sink: FrameSink = Box::pin(sink);
        let stream: FrameStream = Box::pin(stream);

        let inner = Arc::new(Inner {
            id: Uuid::new_v4(),
            frame_kind: cfg.frame_kind,
            keepalive: cfg.keepalive_interval.filter(|period| !period.is_zero()),
            close_timeout: cfg.close_timeout,
            sink: tokio::sync::Mutex::new(Some(sink)),
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            state: Mutex::new(ConnectionState::Open),
            close_tx,
        });

        tokio::spawn(Inner::keepalive_pump(Arc::clone(&inner)));
        tokio::spawn(Inner::inbound_pump(Arc::clone(&inner), stream, inbound_tx));
        tokio::spawn(Inner::outbound_pump(Arc::clone(&inner), outbound_rx));

        rapid_debug!("Connection {} started", inner.id);
        Self { inner }
    }

    #[inline] pub fn id(&self) -> Uuid                 { self.inner.id }
    #[inline] pub fn state(&self) -> ConnectionState   { *self.inner.state() }
    #[inline] pub fn is_closed(&self) -> bool          { *self.inner.close_tx.borrow() }

    /// Resolves once the close signal has fired. Returns immediately after that.
    pub async fn closed(&self) {
        self.inner.closed().await
    }

    /// Waits for the next payload from the peer.
    ///
    /// Fails with [`ConnectionError::ConnectionClosed`] once the connection is
    /// closing, even if payloads are still queued.
    pub async fn receive(&self) -> Result<Bytes, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::ConnectionClosed);
        }
        tokio::select! {
            biased;
            _ = self.inner.closed() => Err(ConnectionError::ConnectionClosed),
            payload = async {
                let mut rx = self.inner.inbound_rx.lock().await;
                rx.recv().await
            } => payload.ok_or(ConnectionError::ConnectionClosed),
        }
    }

    /// Queues a payload for the peer, waiting while the outbound queue is full.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::ConnectionClosed);
        }
        let frame = self.inner.frame_kind.encode(payload.into())?;
        tokio::select! {
            biased;
            _ = self.inner.closed() => Err(ConnectionError::ConnectionClosed),
            res = self.inner.outbound_tx.send(frame) => res.map_err(|_| ConnectionError::ConnectionClosed),
        }
    }

    /// Closes the connection. Idempotent.
    ///
    /// Only the first call tears the socket down and reports its error; later
    /// and concurrent calls return `Ok(())` right away.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        self.inner.close().await
    }

    /// Fires the close signal now and finishes the socket teardown on a
    /// background task, logging any error.
    pub(crate) fn close_in_background(&self) {
        if !self.inner.signal_close() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.release_socket().await {
                rapid_warn!("Connection {}: closing displaced socket failed: {e}", inner.id);
            }
        });
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn closed(&self) {
        let mut rx = self.close_tx.subscribe();
        // the sender lives as long as `self`, so this only returns once fired
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Moves `Open -> Closing` and fires the signal. True for the one caller
    /// that made the transition.
    fn signal_close(&self) -> bool {
        let mut state = self.state();
        if *state != ConnectionState::Open {
            return false;
        }
        *state = ConnectionState::Closing;
        self.close_tx.send_replace(true);
        true
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        if !self.signal_close() {
            return Ok(());
        }
        rapid_debug!("Connection {} closing", self.id);
        self.release_socket().await
    }

    /// Sends the close frame and drops the write half. The read half goes
    /// away with the inbound pump.
    async fn release_socket(&self) -> Result<(), ConnectionError> {
        let sink = self.sink.lock().await.take();
        let result = match sink {
            Some(mut sink) => match time::timeout(self.close_timeout, sink.close()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => Ok(()),
                Ok(Err(e)) => Err(ConnectionError::Transport(e)),
                Err(_) => Err(ConnectionError::CloseTimeout),
            },
            None => Ok(()),
        };
        *self.state() = ConnectionState::Closed;
        rapid_debug!("Connection {} closed", self.id);
        result
    }

    async fn write(&self, frame: Message) -> Result<(), ConnectionError> {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.send(frame).await.map_err(ConnectionError::Transport),
            None => Err(ConnectionError::ConnectionClosed),
        }
    }

    /* ----------------------------------------------------------------
       Pumps
    ---------------------------------------------------------------- */
    async fn inbound_pump(self: Arc<Self>, mut stream: FrameStream, tx: mpsc::Sender<Bytes>) {
        rapid_debug!("Inbound pump started for connection {}", self.id);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.closed() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(msg)) => match Inbound::from(msg) {
                    Inbound::Payload(payload) => {
                        rapid_trace!("Connection {} received {} bytes", self.id, payload.len());
                        let pushed = tokio::select! {
                            biased;
                            _ = self.closed() => false,
                            res = tx.send(payload) => res.is_ok(),
                        };
                        if !pushed {
                            break;
                        }
                    }
                    Inbound::Control => continue,
                    Inbound::Close(frame) => {
                        rapid_debug!("Connection {} closed by peer: {:?}", self.id, frame);
                        break;
                    }
                },
                Some(Err(e)) => {
                    rapid_warn!("Read error on connection {}: {e}", self.id);
                    break;
                }
                None => {
                    rapid_debug!("Stream ended for connection {}", self.id);
                    break;
                }
            }
        }

        drop(stream);
        if let Err(e) = self.close().await {
            rapid_debug!("Close after inbound pump failed for {}: {e}", self.id);
        }
    }

    async fn outbound_pump(self: Arc<Self>, mut rx: mpsc::Receiver<Message>) {
        rapid_debug!("Outbound pump started for connection {}", self.id);

        loop {
            // queued frames are abandoned once the signal fires
            let frame = tokio::select! {
                biased;
                _ = self.closed() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let sent = tokio::select! {
                biased;
                _ = self.closed() => break,
                res = self.write(frame) => res,
            };
            if let Err(e) = sent {
                rapid_warn!("Write error on connection {}: {e}", self.id);
                break;
            }
        }

        if let Err(e) = self.close().await {
            rapid_debug!("Close after outbound pump failed for {}: {e}", self.id);
        }
    }

    async fn keepalive_pump(self: Arc<Self>) {
        let Some(period) = self.keepalive else {
            self.closed().await;
            return;
        };
        rapid_debug!("Keepalive pump started for connection {} every {:?}", self.id, period);

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.closed() => break,
                _ = ticker.tick() => {}
            }

            let sent = tokio::select! {
                biased;
                _ = self.closed() => break,
                res = self.write(Message::Ping(Bytes::new())) => res,
            };
            // a lost ping is not fatal, the read/write pumps decide when the socket is dead
            if let Err(e) = sent {
                rapid_warn!("Keepalive ping failed on connection {}: {e}", self.id);
            }
        }
    }
}
