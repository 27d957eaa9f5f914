//! WebSocket Tunnel Gateway
//!
//! Accepts a tunneling protocol carried in WebSocket binary frames, checks the
//! client identifier embedded in the handshake header, connects to the TCP
//! target the header names and relays bytes both ways until either side closes.
//! Plain HTTP requests on the same port get a short liveness response.

pub mod auth;
pub mod config;
pub mod error;
pub mod header;
pub mod http;
pub mod proxy;
pub mod relay;
pub mod security;
pub mod session;

// Re-export commonly used types and functions
pub use auth::Identifier;
pub use config::{Config, GatewayConfig, ListenConfig, TunnelConfig, load_config};
pub use error::{HeaderError, SessionError, TransportError};
pub use header::{AddressType, ParsedHeader, TargetDescriptor, decode_address, parse_header};
pub use proxy::{handle_connection, serve};
pub use relay::{RelayEnd, RelayOptions, relay};
pub use session::run_session;
