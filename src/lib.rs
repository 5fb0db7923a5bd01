//! Voice Overlay - follows the active voice channel of a local desktop client
//!
//! Connects to the RPC endpoint the desktop client exposes on localhost,
//! authorizes, subscribes to voice channel changes, and turns each change
//! into an overlay location.
//!
//! ## Flow
//!
//! ```text
//! ws://localhost:6463..6472        streamkit token endpoint
//!          │                                 ▲
//!          ▼                                 │ code → access_token
//!   Supervisor ─▶ Session ─▶ Handshake ──────┘
//!                               │
//!                               ▼
//!                   /overlay/voice/{guild}/{channel}
//! ```

pub mod config;
pub mod error;
pub mod rpc;

// Re-exports
pub use config::Config;
pub use error::RpcError;
