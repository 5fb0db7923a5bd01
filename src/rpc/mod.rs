//! Local RPC Connection Module
//!
//! This module connects to the RPC endpoint a desktop chat client exposes on
//! localhost, authorizes against it, and follows the user's active voice
//! channel.
//!
//! # Architecture
//!
//! The module is organized by concern, with each submodule having a single responsibility:
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `transport`  | WebSocket connect/send/receive                        |
//! | `protocol`   | JSON command envelopes, inbound frame classification  |
//! | `handshake`  | Explicit handshake states and pure transitions        |
//! | `auth`       | Authorization code to access token exchange           |
//! | `navigation` | Overlay location changes, deduplicated                |
//! | `session`    | One connection, driven from open to close             |
//! | `supervisor` | Port rotation and fixed-delay reconnection            |
//!
//! # Key Design Principles
//!
//! ## 1. Make Invalid States Unrepresentable
//!
//! - The handshake is a `HandshakeState` enum, not a set of flags
//! - The authorization code only exists inside `AwaitingTokenExchange`
//! - `AUTHENTICATE` can only be produced from `AwaitingTokenExchange`
//!
//! ## 2. One Owner Per Connection
//!
//! - The supervisor owns the attempt counter and the current `Connection`
//! - A `Session` owns its `Transport` and handshake state
//! - Late token results carry a `ConnectionId` and are dropped by any other session
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use voice_overlay::rpc::{HttpTokenExchange, Supervisor, WatchSink};
//! use voice_overlay::Config;
//!
//! let config = Config::default();
//! let exchange = HttpTokenExchange::new(&config.token_url, config.token_timeout())?;
//! let (sink, mut location) = WatchSink::new();
//!
//! let handle = Supervisor::new(config, Arc::new(exchange), Box::new(sink))?.spawn();
//!
//! while location.changed().await.is_ok() {
//!     println!("{:?}", *location.borrow());
//! }
//! handle.stop().await;
//! ```

mod auth;
mod handshake;
mod navigation;
mod protocol;
mod session;
mod supervisor;
mod transport;

pub use auth::{AccessToken, AuthSession, HttpTokenExchange, TokenExchange};
pub use handshake::{
    Action, HandshakeFailure, HandshakeParams, HandshakePhase, HandshakeState, Transition,
};
pub use navigation::{NavigationSink, Navigator, WatchSink};
pub use protocol::{
    decode_frame, encode_command, encode_subscribe, AuthorizeOutcome, InboundEvent, InboundFrame,
    OutboundCommand, VoiceSelection,
};
pub use session::{ConnectionId, SessionEnd};
pub use supervisor::{Connection, ConnectionState, Supervisor, SupervisorHandle, SupervisorStatus};
pub use transport::Transport;
