//! RPC Session
//!
//! Single responsibility: Drive one connection from open to close.
//!
//! A `Session` owns the `Transport` for a single connection attempt and the
//! handshake state for it. It reads frames in delivery order, feeds them
//! through the state machine and performs the resulting actions. It never
//! reconnects. When the transport fails or the peer goes away, `run()`
//! returns and the supervisor decides what happens next.
//!
//! The token exchange runs in a spawned task so frames keep flowing while it
//! is in flight. Its result comes back over a channel tagged with the
//! connection id. Anything tagged for another connection is dropped.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::auth::{AccessToken, TokenExchange};
use super::handshake::{Action, HandshakeFailure, HandshakeParams, HandshakeState, Transition};
use super::navigation::Navigator;
use super::protocol::{decode_frame, InboundEvent};
use super::supervisor::SupervisorStatus;
use super::transport::Transport;
use crate::error::RpcError;

/// Identity of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The transport failed or could not be opened
    TransportError(RpcError),
    /// The peer closed the connection
    Closed,
    /// The handshake failed and the session was configured to give up on it
    HandshakeFailed(HandshakeFailure),
}

/// Everything a session needs from its supervisor.
pub struct SessionContext<'a> {
    pub params: &'a HandshakeParams,
    pub exchange: Arc<dyn TokenExchange>,
    pub navigator: &'a mut Navigator,
    pub status: &'a watch::Sender<SupervisorStatus>,
    pub reconnect_on_auth_failure: bool,
}

struct TokenResult {
    connection: ConnectionId,
    result: Result<AccessToken, RpcError>,
}

enum Step {
    Frame(Result<Option<String>, RpcError>),
    Token(TokenResult),
}

pub struct Session<'a> {
    id: ConnectionId,
    transport: Transport,
    state: HandshakeState,
    ctx: SessionContext<'a>,
    tokens_tx: mpsc::Sender<TokenResult>,
    tokens_rx: mpsc::Receiver<TokenResult>,
    exchange_task: Option<JoinHandle<()>>,
}

impl<'a> Session<'a> {
    pub fn new(id: ConnectionId, transport: Transport, ctx: SessionContext<'a>) -> Self {
        let (tokens_tx, tokens_rx) = mpsc::channel(1);
        Self {
            id,
            transport,
            state: HandshakeState::Idle,
            ctx,
            tokens_tx,
            tokens_rx,
            exchange_task: None,
        }
    }

    /// Process frames until the connection ends.
    pub async fn run(mut self) -> SessionEnd {
        self.advance(HandshakeState::on_open);

        let end = loop {
            let step = tokio::select! {
                incoming = self.transport.recv() => Step::Frame(incoming),
                Some(token) = self.tokens_rx.recv() => Step::Token(token),
            };

            let outcome = match step {
                Step::Frame(Ok(Some(text))) => self.handle_text(&text).await,
                Step::Frame(Ok(None)) => break SessionEnd::Closed,
                Step::Frame(Err(RpcError::MalformedFrame(e))) => {
                    warn!(connection = self.id.0, error = %e, "Dropping undecodable frame");
                    Ok(())
                }
                Step::Frame(Err(e)) => break SessionEnd::TransportError(e),
                Step::Token(token) => self.handle_token(token).await,
            };

            if let Err(e) = outcome {
                break SessionEnd::TransportError(e);
            }

            if let HandshakeState::Failed(failure) = &self.state {
                if self.ctx.reconnect_on_auth_failure {
                    break SessionEnd::HandshakeFailed(failure.clone());
                }
            }
        };

        if let Some(task) = self.exchange_task.take() {
            task.abort();
        }
        self.transport.close().await;
        end
    }

    async fn handle_text(&mut self, text: &str) -> Result<(), RpcError> {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = self.id.0, error = %e, "Dropping malformed frame");
                return Ok(());
            }
        };

        let event = InboundEvent::from_frame(&frame);
        let params = self.ctx.params;
        let actions = self.advance(|state| state.on_event(&event, params));
        self.perform(actions).await
    }

    async fn handle_token(&mut self, token: TokenResult) -> Result<(), RpcError> {
        if token.connection != self.id {
            debug!(
                connection = self.id.0,
                stale = token.connection.0,
                "Discarding token result from another connection"
            );
            return Ok(());
        }
        self.exchange_task = None;

        let result = token.result.map_err(|e| {
            warn!(connection = self.id.0, error = %e, "Token exchange failed");
            e.to_string()
        });

        let actions = self.advance(|state| state.on_token(result));
        self.perform(actions).await
    }

    async fn perform(&mut self, actions: Vec<Action>) -> Result<(), RpcError> {
        for action in actions {
            match action {
                Action::Send(command) => {
                    debug!(connection = self.id.0, cmd = %command.cmd, nonce = %command.nonce, "Sending command");
                    self.transport.send(command.encode()?).await?;
                }
                Action::ExchangeCode(code) => self.spawn_exchange(code),
                Action::Navigate(selection) => {
                    self.ctx.navigator.navigate(&selection);
                }
            }
        }
        Ok(())
    }

    fn spawn_exchange(&mut self, code: String) {
        let exchange = Arc::clone(&self.ctx.exchange);
        let tx = self.tokens_tx.clone();
        let connection = self.id;

        self.exchange_task = Some(tokio::spawn(async move {
            let result = exchange.exchange_code(&code).await;
            // The session may already be gone
            let _ = tx.send(TokenResult { connection, result }).await;
        }));
    }

    /// Apply a transition to the current state and publish the new phase.
    fn advance(&mut self, transition: impl FnOnce(HandshakeState) -> Transition) -> Vec<Action> {
        let previous = self.state.phase();
        let (state, actions) = transition(std::mem::replace(&mut self.state, HandshakeState::Idle));

        let phase = state.phase();
        if phase != previous {
            match &state {
                HandshakeState::Subscribed => {
                    info!(connection = self.id.0, "Subscribed to voice channel changes")
                }
                HandshakeState::Failed(failure) => {
                    warn!(connection = self.id.0, failure = ?failure, "Handshake failed")
                }
                _ => debug!(connection = self.id.0, phase = ?phase, "Handshake advanced"),
            }
            self.ctx.status.send_modify(|status| status.handshake = phase);
        }

        self.state = state;
        actions
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.exchange_task.take() {
            task.abort();
        }
    }
}
