use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HOST, ORIGIN};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::connection::dial::header_pair;
use crate::connection::error::ConnectionError;
use crate::{rapid_debug, rapid_warn};

/// Which `Origin` headers the server handshake accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginPolicy {
    /// Accept every origin.
    #[default]
    Any,
    /// Accept a request only when its origin names the host it was sent to.
    /// Requests without an `Origin` header are accepted.
    SameOrigin,
}

impl OriginPolicy {
    pub fn allows(self, request: &Request) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::SameOrigin => same_origin(request),
        }
    }
}

fn same_origin(request: &Request) -> bool {
    let Some(origin) = request.headers().get(ORIGIN) else {
        return true;
    };
    let Some(origin) = origin.to_str().ok().and_then(|o| o.parse::<Uri>().ok()) else {
        return false;
    };
    let host = request.headers().get(HOST).and_then(|h| h.to_str().ok());
    match (origin.authority(), host) {
        (Some(authority), Some(host)) => authority.as_str().eq_ignore_ascii_case(host),
        _ => false,
    }
}

/// Server side of the WebSocket handshake.
#[derive(Clone, Copy, Debug, Default)]
pub struct Upgrader {
    policy: OriginPolicy,
}

impl Upgrader {
    pub fn new(policy: OriginPolicy) -> Self {
        Self { policy }
    }

    /// Accepts any origin.
    pub fn permissive() -> Self {
        Self::new(OriginPolicy::Any)
    }

    pub fn same_origin() -> Self {
        Self::new(OriginPolicy::SameOrigin)
    }

    pub fn policy(&self) -> OriginPolicy {
        self.policy
    }

    /// Runs the handshake on `stream`, attaching `headers` to the 101 response.
    ///
    /// Requests refused by the origin policy are answered with `403 Forbidden`
    /// and surface as a transport error.
    pub async fn upgrade<S>(
        &self,
        stream: S,
        headers: &[(&str, &str)],
    ) -> Result<WebSocketStream<S>, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let extra = headers
            .iter()
            .map(|(name, value)| header_pair(name, value))
            .collect::<Result<Vec<_>, _>>()?;
        let policy = self.policy;

        let callback = move |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            if !policy.allows(request) {
                rapid_warn!("Rejecting upgrade of {} from origin {:?}", request.uri(), request.headers().get(ORIGIN));
                let mut refusal = ErrorResponse::new(Some("origin not allowed".to_owned()));
                *refusal.status_mut() = StatusCode::FORBIDDEN;
                return Err(refusal);
            }
            for (name, value) in extra {
                response.headers_mut().append(name, value);
            }
            rapid_debug!("Upgrading request for {}", request.uri());
            Ok(response)
        };

        Ok(accept_hdr_async(stream, callback).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: Option<&str>, origin: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/ws");
        if let Some(host) = host {
            builder = builder.header(HOST, host);
        }
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn any_accepts_foreign_origins() {
        let req = request(Some("chat.local:8080"), Some("http://evil.example"));
        assert!(OriginPolicy::Any.allows(&req));
    }

    #[test]
    fn same_origin_matches_host_case_insensitively() {
        let req = request(Some("Chat.Local:8080"), Some("http://chat.local:8080"));
        assert!(OriginPolicy::SameOrigin.allows(&req));
    }

    #[test]
    fn same_origin_rejects_other_hosts() {
        let req = request(Some("chat.local:8080"), Some("http://evil.example"));
        assert!(!OriginPolicy::SameOrigin.allows(&req));

        let no_host = request(None, Some("http://chat.local"));
        assert!(!OriginPolicy::SameOrigin.allows(&no_host));
    }

    #[test]
    fn same_origin_allows_missing_origin() {
        assert!(OriginPolicy::SameOrigin.allows(&request(Some("chat.local"), None)));
    }

    #[tokio::test]
    async fn upgrade_validates_headers_before_io() {
        let (server, _client) = tokio::io::duplex(1024);
        let res = Upgrader::permissive().upgrade(server, &[("bad header", "x")]).await;
        assert!(matches!(res, Err(ConnectionError::InvalidHeader(_))));
    }
}
