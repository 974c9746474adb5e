pub mod io_core;
pub mod dial;
pub mod error;
pub mod upgrade;

pub use io_core::{Connection, ConnectionState};
pub use error::ConnectionError;
pub use upgrade::{OriginPolicy, Upgrader};
