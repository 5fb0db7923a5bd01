//! RPC Wire Protocol
//!
//! Single responsibility: Encode command envelopes and decode inbound frames
//! into typed events.
//!
//! # Wire Format
//!
//! Every message is a JSON text frame.
//!
//! ## Outbound command
//! ```text
//! {
//!     "cmd": "AUTHORIZE",    // Command name
//!     "args": { ... },       // Arguments, `{}` when none
//!     "nonce": "AUTHORIZE",  // Correlation token, echoed back by the peer
//!     "evt": "..."           // SUBSCRIBE only
//! }
//! ```
//!
//! ## Inbound frame
//! ```text
//! {
//!     "cmd": "DISPATCH" | <command being answered>,
//!     "evt": "READY" | "ERROR" | ...,   // optional
//!     "data": { ... },                   // optional
//!     "nonce": "..."                     // optional
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RpcError;

pub const CMD_DISPATCH: &str = "DISPATCH";
pub const CMD_AUTHORIZE: &str = "AUTHORIZE";
pub const CMD_AUTHENTICATE: &str = "AUTHENTICATE";
pub const CMD_SUBSCRIBE: &str = "SUBSCRIBE";
pub const CMD_GET_SELECTED_VOICE_CHANNEL: &str = "GET_SELECTED_VOICE_CHANNEL";

pub const EVT_READY: &str = "READY";
pub const EVT_ERROR: &str = "ERROR";
pub const EVT_VOICE_CHANNEL_SELECT: &str = "VOICE_CHANNEL_SELECT";

/// A command ready to be serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundCommand {
    pub cmd: String,
    pub args: Map<String, Value>,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
}

impl OutboundCommand {
    /// Build a command. `nonce` defaults to the command name.
    pub fn new(cmd: &str, args: Option<Map<String, Value>>, nonce: Option<&str>) -> Self {
        Self {
            cmd: cmd.to_string(),
            args: args.unwrap_or_default(),
            nonce: nonce.unwrap_or(cmd).to_string(),
            evt: None,
        }
    }

    /// Build a SUBSCRIBE for `event`. The nonce is the event name.
    pub fn subscribe(event: &str, args: Option<Map<String, Value>>) -> Self {
        Self {
            cmd: CMD_SUBSCRIBE.to_string(),
            args: args.unwrap_or_default(),
            nonce: event.to_string(),
            evt: Some(event.to_string()),
        }
    }

    pub fn encode(&self) -> Result<String, RpcError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Serialize `{cmd, args, nonce}`.
pub fn encode_command(
    cmd: &str,
    args: Option<Map<String, Value>>,
    nonce: Option<&str>,
) -> Result<String, RpcError> {
    OutboundCommand::new(cmd, args, nonce).encode()
}

/// Serialize `{cmd: "SUBSCRIBE", args, evt, nonce: evt}`.
pub fn encode_subscribe(event: &str, args: Option<Map<String, Value>>) -> Result<String, RpcError> {
    OutboundCommand::subscribe(event, args).encode()
}

/// A frame received from the peer.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub cmd: String,
    #[serde(default)]
    pub evt: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl InboundFrame {
    fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }

    fn is_error(&self) -> bool {
        self.evt.as_deref() == Some(EVT_ERROR)
    }
}

/// Decode a raw text frame.
pub fn decode_frame(raw: &str) -> Result<InboundFrame, RpcError> {
    serde_json::from_str(raw).map_err(|e| RpcError::MalformedFrame(e.to_string()))
}

/// The active voice channel reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSelection {
    pub guild_id: String,
    pub channel_id: String,
}

impl VoiceSelection {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Overlay location for this selection.
    pub fn path(&self) -> String {
        format!("/overlay/voice/{}/{}", self.guild_id, self.channel_id)
    }

    /// Read a selection from `data`, taking the channel id from `channel_field`.
    /// A missing or null guild id means no selection.
    fn from_frame(frame: &InboundFrame, channel_field: &str) -> Option<Self> {
        let guild_id = frame.data_str("guild_id").filter(|g| !g.is_empty())?;
        let channel_id = frame.data_str(channel_field)?;
        Some(Self::new(guild_id, channel_id))
    }
}

/// Result of an AUTHORIZE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    Code(String),
    Denied(String),
}

/// A decoded frame, classified by its `(cmd, evt)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `DISPATCH/READY`
    Ready,
    /// `DISPATCH/VOICE_CHANNEL_SELECT` push notification
    VoiceChannelSelect(Option<VoiceSelection>),
    /// Response to AUTHORIZE
    Authorize(AuthorizeOutcome),
    /// Response to AUTHENTICATE
    Authenticate { denied: bool },
    /// Response to GET_SELECTED_VOICE_CHANNEL
    SelectedVoiceChannel(Option<VoiceSelection>),
    /// Anything else, including SUBSCRIBE acknowledgements
    Unrecognized { cmd: String, evt: Option<String> },
}

impl InboundEvent {
    pub fn from_frame(frame: &InboundFrame) -> Self {
        match (frame.cmd.as_str(), frame.evt.as_deref()) {
            (CMD_DISPATCH, Some(EVT_READY)) => Self::Ready,
            (CMD_DISPATCH, Some(EVT_VOICE_CHANNEL_SELECT)) => {
                Self::VoiceChannelSelect(VoiceSelection::from_frame(frame, "channel_id"))
            }
            (CMD_AUTHORIZE, _) => {
                // On error the peer reuses `data.code` for a numeric error code.
                let outcome = match frame.data_str("code") {
                    Some(code) if !frame.is_error() => AuthorizeOutcome::Code(code.to_string()),
                    _ => AuthorizeOutcome::Denied(error_message(frame)),
                };
                Self::Authorize(outcome)
            }
            (CMD_AUTHENTICATE, _) => Self::Authenticate {
                denied: frame.is_error(),
            },
            (CMD_GET_SELECTED_VOICE_CHANNEL, _) if !frame.is_error() => {
                Self::SelectedVoiceChannel(VoiceSelection::from_frame(frame, "id"))
            }
            _ => Self::Unrecognized {
                cmd: frame.cmd.clone(),
                evt: frame.evt.clone(),
            },
        }
    }
}

fn error_message(frame: &InboundFrame) -> String {
    frame
        .data_str("message")
        .unwrap_or("no authorization code in response")
        .to_string()
}
