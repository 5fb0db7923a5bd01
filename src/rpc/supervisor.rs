//! Connection Supervisor
//!
//! Single responsibility: Keep exactly one connection to the peer alive,
//! reconnecting as needed.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                     Supervisor                          │
//! │  - Owns the attempt counter and port rotation           │
//! │  - Owns the Navigator (location survives reconnects)    │
//! │  - Reconnects after a fixed delay, forever              │
//! └────────────────────────────────────────────────────────┘
//!                            │ one at a time
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                      Session                            │
//! │  - One Transport, one handshake                         │
//! │  - Ends on transport error or close                     │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!               ┌────────────┼────────────┐
//!               ▼            ▼            ▼
//!          Transport      Protocol     Handshake
//! ```
//!
//! # Reconnection Policy
//!
//! When a session ends for any reason other than shutdown:
//! 1. Mark the connection closed
//! 2. Wait `reconnect_delay` (250 ms by default)
//! 3. Open a new connection on the next port in the rotation
//!
//! There is no attempt limit and no backoff. The counter is never reset, so
//! the rotation keeps cycling through `base_port..base_port + port_range`.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::auth::TokenExchange;
use super::handshake::{HandshakeParams, HandshakePhase};
use super::navigation::{NavigationSink, Navigator};
use super::session::{ConnectionId, Session, SessionContext, SessionEnd};
use super::transport::Transport;
use crate::config::Config;
use crate::error::RpcError;

/// Lifecycle of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// One connection attempt. Replaced, never reused, on every reconnect.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub endpoint: String,
    pub state: ConnectionState,
}

/// Snapshot published after every lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// Connection attempts started so far
    pub attempts: u64,
    /// Port of the current or most recent attempt
    pub port: Option<u16>,
    pub connection: ConnectionState,
    pub handshake: HandshakePhase,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            attempts: 0,
            port: None,
            connection: ConnectionState::Closed,
            handshake: HandshakePhase::Idle,
        }
    }
}

pub struct Supervisor {
    config: Config,
    params: HandshakeParams,
    exchange: Arc<dyn TokenExchange>,
    navigator: Navigator,
    attempts: u64,
    current: Option<Connection>,
    status: watch::Sender<SupervisorStatus>,
}

impl Supervisor {
    pub fn new(
        config: Config,
        exchange: Arc<dyn TokenExchange>,
        sink: Box<dyn NavigationSink>,
    ) -> Result<Self, RpcError> {
        config.validate()?;

        let params = HandshakeParams {
            client_id: config.client_id.clone(),
            scopes: config.scopes.clone(),
        };
        let (status, _) = watch::channel(SupervisorStatus::default());

        Ok(Self {
            config,
            params,
            exchange,
            navigator: Navigator::new(sink),
            attempts: 0,
            current: None,
            status,
        })
    }

    /// Subscribe to status snapshots.
    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.subscribe()
    }

    /// Run on a background task.
    pub fn spawn(self) -> SupervisorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status = self.status();
        let task = tokio::spawn(self.run(shutdown_rx));

        SupervisorHandle {
            shutdown: shutdown_tx,
            status,
            task,
        }
    }

    /// Connect, run sessions and reconnect until `shutdown` flips to true
    /// or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            host = %self.config.host,
            base_port = self.config.base_port,
            port_range = self.config.port_range,
            "Starting connection supervisor"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let end = tokio::select! {
                end = self.attempt() => end,
                _ = shutdown.changed() => break,
            };
            self.mark_closed();

            match end {
                SessionEnd::TransportError(e) => {
                    warn!(attempt = self.attempts, error = %e, "Connection lost")
                }
                SessionEnd::Closed => info!(attempt = self.attempts, "Peer closed connection"),
                SessionEnd::HandshakeFailed(failure) => {
                    warn!(attempt = self.attempts, failure = ?failure, "Reconnecting after handshake failure")
                }
            }

            debug!(delay_ms = self.config.reconnect_delay_ms, "Scheduling reconnect");
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.mark_closed();
        info!(attempts = self.attempts, "Connection supervisor stopped");
    }

    /// One connection attempt, start to finish.
    async fn attempt(&mut self) -> SessionEnd {
        let attempt = self.attempts;
        self.attempts += 1;

        let id = ConnectionId(attempt);
        let port = self.config.port_for_attempt(attempt);
        let endpoint = match self.config.endpoint_url(attempt) {
            Ok(endpoint) => endpoint,
            Err(e) => return SessionEnd::TransportError(e),
        };

        // Replaces the previous attempt's Connection
        self.current = Some(Connection {
            id,
            endpoint: endpoint.clone(),
            state: ConnectionState::Connecting,
        });
        let attempts = self.attempts;
        self.status.send_modify(|status| {
            status.attempts = attempts;
            status.port = Some(port);
            status.connection = ConnectionState::Connecting;
            status.handshake = HandshakePhase::Idle;
        });

        let transport = match Transport::connect(
            &endpoint,
            &self.config.origin,
            self.config.connect_timeout(),
        )
        .await
        {
            Ok(transport) => transport,
            Err(e) => return SessionEnd::TransportError(e),
        };

        info!(attempt = attempt, port = port, "Connected to RPC endpoint");
        self.set_connection_state(ConnectionState::Open);

        let ctx = SessionContext {
            params: &self.params,
            exchange: Arc::clone(&self.exchange),
            navigator: &mut self.navigator,
            status: &self.status,
            reconnect_on_auth_failure: self.config.reconnect_on_auth_failure,
        };
        Session::new(id, transport, ctx).run().await
    }

    fn set_connection_state(&mut self, state: ConnectionState) {
        if let Some(connection) = self.current.as_mut() {
            connection.state = state;
        }
        self.status.send_modify(|status| status.connection = state);
    }

    fn mark_closed(&mut self) {
        self.set_connection_state(ConnectionState::Closed);
    }

    /// The current or most recent connection attempt.
    pub fn connection(&self) -> Option<&Connection> {
        self.current.as_ref()
    }

    /// Last location handed to the navigation sink.
    pub fn location(&self) -> Option<&str> {
        self.navigator.current()
    }
}

/// Handle to a supervisor running on a background task.
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<SupervisorStatus>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    /// Stop reconnecting, close the current connection and wait for the task.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Supervisor task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::auth::AccessToken;
    use crate::rpc::navigation::WatchSink;
    use async_trait::async_trait;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;

    struct NoExchange;

    #[async_trait]
    impl TokenExchange for NoExchange {
        async fn exchange_code(&self, _code: &str) -> Result<AccessToken, RpcError> {
            Err(RpcError::TokenExchange("unused".into()))
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn supervisor(config: Config) -> Supervisor {
        let (sink, _) = WatchSink::new();
        Supervisor::new(config, Arc::new(NoExchange), Box::new(sink)).unwrap()
    }

    #[test]
    fn test_status_default() {
        let status = SupervisorStatus::default();
        assert_eq!(status.attempts, 0);
        assert_eq!(status.connection, ConnectionState::Closed);
        assert_eq!(status.handshake, HandshakePhase::Idle);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let (sink, _) = WatchSink::new();
        let config = Config {
            port_range: 0,
            ..Config::default()
        };
        let result = Supervisor::new(config, Arc::new(NoExchange), Box::new(sink));
        assert!(matches!(result, Err(RpcError::Config(_))));
    }

    #[tokio::test]
    async fn test_refused_connections_retry_with_fixed_delay() {
        let port = closed_port().await;
        let config = Config {
            host: "127.0.0.1".into(),
            base_port: port,
            port_range: 1,
            reconnect_delay_ms: 100,
            ..Config::default()
        };
        let sup = supervisor(config);
        let mut status = sup.status();
        let handle = sup.spawn();

        let started = Instant::now();
        status.wait_for(|s| s.attempts >= 3).await.unwrap();
        // Two full delays separate attempt 1 from attempt 3.
        assert!(started.elapsed() >= Duration::from_millis(200));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_attempt_rotates_port() {
        let config = Config {
            host: "127.0.0.1".into(),
            base_port: closed_port().await.min(u16::MAX - 2),
            port_range: 3,
            ..Config::default()
        };
        let expected: Vec<u16> = (0..4).map(|n| config.port_for_attempt(n)).collect();
        let mut sup = supervisor(config);

        let mut ports = Vec::new();
        for _ in 0..4 {
            let end = sup.attempt().await;
            assert!(matches!(end, SessionEnd::TransportError(_)));
            ports.push(sup.status.borrow().port.unwrap());
        }
        assert_eq!(ports, expected);
        assert_eq!(ports[0], ports[3]);
        assert_eq!(sup.connection().unwrap().id, ConnectionId(3));
    }
}
