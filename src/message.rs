use bytes::Bytes;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::connection::error::ConnectionError;

/// Frame type used when a payload is written to the socket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    #[default]
    Text,
    Binary,
}

impl FrameKind {
    /// Wraps a payload into a data frame. Text frames must carry valid UTF-8.
    pub fn encode(self, payload: Bytes) -> Result<Message, ConnectionError> {
        match self {
            FrameKind::Text => {
                let text = Utf8Bytes::try_from(payload).map_err(ConnectionError::InvalidText)?;
                Ok(Message::Text(text))
            }
            FrameKind::Binary => Ok(Message::Binary(payload)),
        }
    }
}

/// What the inbound pump does with a frame read from the socket.
#[derive(Debug)]
pub(crate) enum Inbound {
    Payload(Bytes),
    /// Ping, pong and raw frames; the transport answers pings itself.
    Control,
    Close(Option<CloseFrame>),
}

impl From<Message> for Inbound {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(_) | Message::Binary(_) => Inbound::Payload(msg.into_data()),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Control,
            Message::Close(frame) => Inbound::Close(frame),
        }
    }
}
