pub mod config;
pub mod connection;
pub mod key;
pub mod message;
pub mod rapid_log;
pub mod registry;

/* Re-exports */
pub use config::{ClientConfig, ConnectionConfig, RegistryConfig};
pub use connection::{Connection, ConnectionError, ConnectionState, OriginPolicy, Upgrader};
pub use key::KeyGenerator;
pub use message::FrameKind;
pub use registry::{FanOutError, Registry, RegistryError, RegistryStatus, CLIENT_KEY_HEADER};
pub use tokio_tungstenite::tungstenite::Message;
