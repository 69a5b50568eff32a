//! Network layer.
//!
//! WebSocket transport, authentication, the binary trade codec and the
//! dispatcher that drives the trading core. Everything stateful about
//! a connection lives here; the `trade/` core never sees a socket.

pub mod auth;
pub mod codec;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims};
pub use codec::{
    decode_client_message, decode_server_message, encode_client_message, encode_server_message,
    CodecError, ItemWire, PlainItemWire,
};
pub use handler::{CharacterGateway, TradeNetworkHandler};
pub use protocol::{
    AuthRequest, ControlMessage, ControlResponse, ErrorCode, TradeClientMessage,
    TradeServerMessage,
};
pub use registry::{RegistryError, SessionHandle, TradeRegistry};
pub use server::{Directory, ServerConfig, TradeServer, TradeServerError};
