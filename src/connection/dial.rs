use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Response;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

use crate::config::ClientConfig;
use crate::connection::io_core::Connection;
use crate::connection::error::ConnectionError;
use crate::{rapid_debug, rapid_info, rapid_warn};

impl Connection {
    /// Dials `cfg.address()`, performs the WebSocket handshake and starts the
    /// connection's pumps.
    ///
    /// The handshake response is handed back so the caller can read headers
    /// the server attached, such as [`CLIENT_KEY_HEADER`](crate::CLIENT_KEY_HEADER).
    pub async fn open(cfg: &ClientConfig) -> Result<(Connection, Response), ConnectionError> {
        let mut request = cfg.address().into_client_request()?;
        for (name, value) in cfg.headers() {
            let (name, value) = header_pair(name, value)?;
            request.headers_mut().append(name, value);
        }
        rapid_debug!("Dialing {}", cfg.address());

        let handshake = connect_async(request);
        let dialed = match cfg.connect_timeout() {
            Some(limit) => time::timeout(limit, handshake)
                .await
                .map_err(|_| ConnectionError::HandshakeTimeout)?,
            None => handshake.await,
        };

        let (socket, response) = match dialed {
            Ok(ok) => ok,
            Err(e) => {
                rapid_warn!("Handshake with {} failed: {e}", cfg.address());
                return Err(e.into());
            }
        };

        let conn = Connection::from_socket(socket, cfg.connection());
        rapid_info!("Connection {} established to {} ({})", conn.id(), cfg.address(), response.status());
        Ok((conn, response))
    }
}

pub(crate) fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ConnectionError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ConnectionError::InvalidHeader(format!("{name}: {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| ConnectionError::InvalidHeader(format!("{name}: {e}")))?;
    Ok((header_name, header_value))
}
