//! Handshake State Machine
//!
//! Single responsibility: Decide what to do with each inbound event.
//!
//! ```text
//! Idle ─open─▶ AwaitingReady ─READY─▶ AwaitingAuthorize ─AUTHORIZE(code)─▶ AwaitingTokenExchange
//!                                            │                                   │ token
//!                                            ▼ denied                            ▼
//!                                          Failed ◀──── ERROR ──── AwaitingAuthenticate
//!                                                                                │ ok
//!                                                                                ▼
//!                                                                           Subscribed
//! ```
//!
//! Transitions are pure: they take the current state and an event and return
//! the next state plus the actions to perform. Nothing here touches the
//! socket, so frames arriving in a state where they make no sense cannot
//! trigger a command.
//!
//! Voice selections are a side channel. They produce a `Navigate` action in
//! every state and never change the state.

use serde_json::{json, Map, Value};
use tracing::debug;

use super::auth::{AccessToken, AuthSession};
use super::protocol::{
    AuthorizeOutcome, InboundEvent, OutboundCommand, VoiceSelection, CMD_AUTHENTICATE,
    CMD_AUTHORIZE, CMD_GET_SELECTED_VOICE_CHANNEL, EVT_VOICE_CHANNEL_SELECT,
};

/// Fixed inputs to the AUTHORIZE command.
#[derive(Debug, Clone)]
pub struct HandshakeParams {
    pub client_id: String,
    pub scopes: Vec<String>,
}

/// Why a handshake stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    AuthorizationDenied(String),
    TokenExchange(String),
    AuthenticationDenied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingReady,
    AwaitingAuthorize,
    AwaitingTokenExchange(AuthSession),
    AwaitingAuthenticate,
    Subscribed,
    Failed(HandshakeFailure),
}

/// Data-free view of `HandshakeState` for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Idle,
    AwaitingReady,
    AwaitingAuthorize,
    AwaitingTokenExchange,
    AwaitingAuthenticate,
    Subscribed,
    Failed,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send(OutboundCommand),
    ExchangeCode(String),
    Navigate(VoiceSelection),
}

pub type Transition = (HandshakeState, Vec<Action>);

impl HandshakeState {
    pub fn phase(&self) -> HandshakePhase {
        match self {
            Self::Idle => HandshakePhase::Idle,
            Self::AwaitingReady => HandshakePhase::AwaitingReady,
            Self::AwaitingAuthorize => HandshakePhase::AwaitingAuthorize,
            Self::AwaitingTokenExchange(_) => HandshakePhase::AwaitingTokenExchange,
            Self::AwaitingAuthenticate => HandshakePhase::AwaitingAuthenticate,
            Self::Subscribed => HandshakePhase::Subscribed,
            Self::Failed(_) => HandshakePhase::Failed,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The transport finished its upgrade.
    pub fn on_open(self) -> Transition {
        match self {
            Self::Idle => (Self::AwaitingReady, Vec::new()),
            other => (other, Vec::new()),
        }
    }

    /// Route one inbound event.
    pub fn on_event(self, event: &InboundEvent, params: &HandshakeParams) -> Transition {
        match (self, event) {
            (state, InboundEvent::VoiceChannelSelect(selection))
            | (state, InboundEvent::SelectedVoiceChannel(selection)) => {
                let actions = selection.clone().map(Action::Navigate).into_iter().collect();
                (state, actions)
            }

            (Self::AwaitingReady, InboundEvent::Ready) => {
                (Self::AwaitingAuthorize, vec![Action::Send(authorize(params))])
            }

            (Self::AwaitingAuthorize, InboundEvent::Authorize(outcome)) => match outcome {
                AuthorizeOutcome::Code(code) => (
                    Self::AwaitingTokenExchange(AuthSession::new(code.clone())),
                    vec![Action::ExchangeCode(code.clone())],
                ),
                AuthorizeOutcome::Denied(reason) => (
                    Self::Failed(HandshakeFailure::AuthorizationDenied(reason.clone())),
                    Vec::new(),
                ),
            },

            (Self::AwaitingAuthenticate, InboundEvent::Authenticate { denied: true }) => (
                Self::Failed(HandshakeFailure::AuthenticationDenied),
                Vec::new(),
            ),

            (Self::AwaitingAuthenticate, InboundEvent::Authenticate { denied: false }) => (
                Self::Subscribed,
                vec![
                    Action::Send(OutboundCommand::subscribe(EVT_VOICE_CHANNEL_SELECT, None)),
                    Action::Send(OutboundCommand::new(
                        CMD_GET_SELECTED_VOICE_CHANNEL,
                        None,
                        None,
                    )),
                ],
            ),

            (state, event) => {
                debug!(phase = ?state.phase(), event = ?event, "Ignoring frame");
                (state, Vec::new())
            }
        }
    }

    /// The token exchange for this connection resolved.
    pub fn on_token(self, result: Result<AccessToken, String>) -> Transition {
        match self {
            Self::AwaitingTokenExchange(_) => match result {
                Ok(token) => (Self::AwaitingAuthenticate, vec![Action::Send(authenticate(&token))]),
                Err(reason) => (
                    Self::Failed(HandshakeFailure::TokenExchange(reason)),
                    Vec::new(),
                ),
            },
            other => {
                debug!(phase = ?other.phase(), "Ignoring token result outside exchange");
                (other, Vec::new())
            }
        }
    }
}

fn authorize(params: &HandshakeParams) -> OutboundCommand {
    let mut args = Map::new();
    args.insert("client_id".into(), Value::String(params.client_id.clone()));
    args.insert("scopes".into(), json!(params.scopes));
    args.insert("prompt".into(), Value::String("none".into()));
    OutboundCommand::new(CMD_AUTHORIZE, Some(args), None)
}

fn authenticate(token: &AccessToken) -> OutboundCommand {
    let mut args = Map::new();
    args.insert("access_token".into(), Value::String(token.as_str().to_string()));
    OutboundCommand::new(CMD_AUTHENTICATE, Some(args), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::{decode_frame, CMD_SUBSCRIBE};

    fn params() -> HandshakeParams {
        HandshakeParams {
            client_id: "207646673902501888".into(),
            scopes: vec!["rpc".into(), "messages.read".into()],
        }
    }

    fn event(raw: Value) -> InboundEvent {
        InboundEvent::from_frame(&decode_frame(&raw.to_string()).unwrap())
    }

    fn sent(actions: &[Action]) -> Vec<&OutboundCommand> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    /// Drive a fresh state machine up to `AwaitingAuthenticate`.
    fn authenticated_pending() -> HandshakeState {
        let p = params();
        let (state, _) = HandshakeState::Idle.on_open();
        let (state, _) = state.on_event(&InboundEvent::Ready, &p);
        let (state, _) = state.on_event(
            &InboundEvent::Authorize(AuthorizeOutcome::Code("abc".into())),
            &p,
        );
        let (state, _) = state.on_token(Ok(AccessToken::new("tok1")));
        assert_eq!(state, HandshakeState::AwaitingAuthenticate);
        state
    }

    #[test]
    fn test_open_then_ready_emits_single_authorize() {
        let (state, actions) = HandshakeState::Idle.on_open();
        assert_eq!(state, HandshakeState::AwaitingReady);
        assert!(actions.is_empty());

        let (state, actions) =
            state.on_event(&event(serde_json::json!({"cmd": "DISPATCH", "evt": "READY"})), &params());
        assert_eq!(state, HandshakeState::AwaitingAuthorize);

        let commands = sent(&actions);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].cmd, "AUTHORIZE");
        assert_eq!(commands[0].nonce, "AUTHORIZE");
        assert_eq!(commands[0].args["scopes"], json!(["rpc", "messages.read"]));
        assert_eq!(commands[0].args["prompt"], "none");
        assert_eq!(commands[0].args["client_id"], "207646673902501888");
    }

    #[test]
    fn test_second_ready_is_ignored() {
        let (state, _) = HandshakeState::AwaitingReady.on_event(&InboundEvent::Ready, &params());
        let (state, actions) = state.on_event(&InboundEvent::Ready, &params());
        assert_eq!(state, HandshakeState::AwaitingAuthorize);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_authorize_code_requests_exchange() {
        let (state, actions) = HandshakeState::AwaitingAuthorize.on_event(
            &event(json!({"cmd": "AUTHORIZE", "data": {"code": "abc"}})),
            &params(),
        );
        assert_eq!(
            state,
            HandshakeState::AwaitingTokenExchange(AuthSession::new("abc"))
        );
        assert_eq!(actions, vec![Action::ExchangeCode("abc".into())]);
    }

    #[test]
    fn test_token_resolves_to_authenticate() {
        let state = HandshakeState::AwaitingTokenExchange(AuthSession::new("abc"));
        let (state, actions) = state.on_token(Ok(AccessToken::new("tok1")));
        assert_eq!(state, HandshakeState::AwaitingAuthenticate);

        let commands = sent(&actions);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].cmd, "AUTHENTICATE");
        assert_eq!(commands[0].args, {
            let mut m = Map::new();
            m.insert("access_token".into(), json!("tok1"));
            m
        });
    }

    #[test]
    fn test_token_failure_fails_handshake() {
        let state = HandshakeState::AwaitingTokenExchange(AuthSession::new("abc"));
        let (state, actions) = state.on_token(Err("401".into()));
        assert_eq!(
            state,
            HandshakeState::Failed(HandshakeFailure::TokenExchange("401".into()))
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_authenticate_never_sent_without_authorize_and_token() {
        let p = params();
        // A token result before any AUTHORIZE answer must not authenticate.
        for state in [
            HandshakeState::Idle,
            HandshakeState::AwaitingReady,
            HandshakeState::AwaitingAuthorize,
            HandshakeState::AwaitingAuthenticate,
            HandshakeState::Subscribed,
        ] {
            let (next, actions) = state.clone().on_token(Ok(AccessToken::new("tok")));
            assert_eq!(next, state);
            assert!(actions.is_empty());
        }

        // An AUTHORIZE answer outside AwaitingAuthorize is ignored.
        let (state, actions) = HandshakeState::AwaitingReady.on_event(
            &InboundEvent::Authorize(AuthorizeOutcome::Code("abc".into())),
            &p,
        );
        assert_eq!(state, HandshakeState::AwaitingReady);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_authorize_denied_fails() {
        let (state, actions) = HandshakeState::AwaitingAuthorize.on_event(
            &event(json!({"cmd": "AUTHORIZE", "evt": "ERROR", "data": {"code": 5000, "message": "denied"}})),
            &params(),
        );
        assert_eq!(
            state,
            HandshakeState::Failed(HandshakeFailure::AuthorizationDenied("denied".into()))
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_authorize_without_code_fails() {
        let (state, actions) = HandshakeState::AwaitingAuthorize
            .on_event(&event(json!({"cmd": "AUTHORIZE", "data": {}})), &params());
        assert!(matches!(
            state,
            HandshakeState::Failed(HandshakeFailure::AuthorizationDenied(_))
        ));
        assert!(actions.is_empty());
    }

    #[test]
    fn test_authenticate_success_subscribes_then_queries() {
        let (state, actions) = authenticated_pending()
            .on_event(&event(json!({"cmd": "AUTHENTICATE", "data": {}})), &params());
        assert_eq!(state, HandshakeState::Subscribed);

        let commands = sent(&actions);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].cmd, CMD_SUBSCRIBE);
        assert_eq!(commands[0].evt.as_deref(), Some("VOICE_CHANNEL_SELECT"));
        assert!(commands[0].args.is_empty());
        assert_eq!(commands[1].cmd, "GET_SELECTED_VOICE_CHANNEL");
    }

    #[test]
    fn test_authenticate_error_is_terminal() {
        let p = params();
        let (state, actions) = authenticated_pending()
            .on_event(&event(json!({"cmd": "AUTHENTICATE", "evt": "ERROR"})), &p);
        assert_eq!(
            state,
            HandshakeState::Failed(HandshakeFailure::AuthenticationDenied)
        );
        assert!(actions.is_empty());

        let (state, actions) = state.on_event(&InboundEvent::Ready, &p);
        assert!(state.is_failed());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_voice_select_navigates_without_changing_state() {
        let p = params();
        let push = event(json!({"cmd": "DISPATCH", "evt": "VOICE_CHANNEL_SELECT",
                                "data": {"guild_id": "G", "channel_id": "C"}}));

        for state in [
            HandshakeState::AwaitingAuthorize,
            HandshakeState::AwaitingTokenExchange(AuthSession::new("abc")),
            HandshakeState::Subscribed,
        ] {
            let (next, actions) = state.clone().on_event(&push, &p);
            assert_eq!(next, state);
            assert_eq!(actions, vec![Action::Navigate(VoiceSelection::new("G", "C"))]);
        }
    }

    #[test]
    fn test_selected_channel_response_navigates_with_id_field() {
        let (state, actions) = HandshakeState::Subscribed.on_event(
            &event(json!({"cmd": "GET_SELECTED_VOICE_CHANNEL",
                          "data": {"guild_id": "G", "id": "C2", "name": "General"}})),
            &params(),
        );
        assert_eq!(state, HandshakeState::Subscribed);
        assert_eq!(actions, vec![Action::Navigate(VoiceSelection::new("G", "C2"))]);
    }

    #[test]
    fn test_unrecognized_frames_are_inert() {
        for raw in [
            json!({"cmd": "DISPATCH", "evt": "MESSAGE_CREATE", "data": {"guild_id": "G"}}),
            json!({"cmd": "SUBSCRIBE", "evt": "VOICE_CHANNEL_SELECT"}),
            json!({"cmd": "SET_ACTIVITY"}),
            json!({"cmd": "DISPATCH", "evt": "VOICE_CHANNEL_SELECT", "data": {"guild_id": null}}),
        ] {
            let (state, actions) = HandshakeState::Subscribed.on_event(&event(raw), &params());
            assert_eq!(state, HandshakeState::Subscribed);
            assert!(actions.is_empty());
        }
    }
}
