//! WebSocket-to-TCP/UDP relay
//!
//! An edge relay that accepts WebSocket connections carrying a VLESS-style
//! length-prefixed binary handshake and pipes the payload to the requested
//! TCP destination, with a single fallback retry when the destination
//! accepts but sends nothing. UDP is supported for DNS only (port 53) and
//! is resolved over DNS-over-HTTPS.

pub mod address;
pub mod config;
pub mod cursor;
pub mod dial;
pub mod dns;
pub mod early_data;
pub mod header;
pub mod security;
pub mod session;
pub mod stream;
pub mod tls;

// Re-export commonly used types and functions
pub use config::{
    Config, FallbackConfig, ListenConfig, RelayConfig, RelaySettings, TlsConfig, load_config,
};
pub use dial::DialError;
pub use dns::{DohClient, Resolve};
pub use header::{Command, ConnectionRequest, HeaderError, parse_header};
pub use security::{is_proxy_ip_allowed, parse_original_client_ip};
pub use session::{BUFFER_SIZE, handle_connection, run_session};
pub use stream::InboundStream;
pub use tls::load_tls_config;
