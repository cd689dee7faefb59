// ────────────────────────────────
// src/server/listener.rs
// Accepts client connections and runs one proxy session per connection.
// ────────────────────────────────
use super::handler::ConnectionHandler;
use crate::config::{ListenConfig, MetricsConfig};
use crate::health::HealthChecker;
use crate::load_balancer::LoadBalancer;
use crate::metrics::{start_metrics_server, MetricsCollector, MetricsRegistry};
use crate::protocol::{ClientRequest, ClientResponse};
use crate::proxy::ProxySession;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

/// An accepted client connection, already decoded into request/response
/// channels by the transport.
#[derive(Debug)]
pub struct ClientConnection {
    pub peer: Option<SocketAddr>,
    pub requests: mpsc::Receiver<ClientRequest>,
    pub responses: mpsc::Sender<ClientResponse>,
}

/// The transport's end of a [`ClientConnection`].
#[derive(Debug)]
pub struct ClientHandle {
    pub requests: mpsc::Sender<ClientRequest>,
    pub responses: mpsc::Receiver<ClientResponse>,
}

impl ClientConnection {
    /// Creates a connected pair with bounded queues in both directions.
    pub fn channel(peer: Option<SocketAddr>, capacity: usize) -> (ClientConnection, ClientHandle) {
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (response_tx, response_rx) = mpsc::channel(capacity);
        (
            ClientConnection {
                peer,
                requests: request_rx,
                responses: response_tx,
            },
            ClientHandle {
                requests: request_tx,
                responses: response_rx,
            },
        )
    }
}

/// Source of inbound client connections.
#[async_trait]
pub trait Acceptor: Send {
    /// Waits for the next connection; `None` once the transport has closed.
    async fn accept(&mut self) -> Option<ClientConnection>;
}

#[async_trait]
impl Acceptor for mpsc::Receiver<ClientConnection> {
    async fn accept(&mut self) -> Option<ClientConnection> {
        self.recv().await
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

/// Owns the general-purpose and bind load balancers and spawns a
/// [`ProxySession`] for every accepted client.
pub struct ProxyListener {
    general: Arc<LoadBalancer>,
    bind: Arc<LoadBalancer>,
    health: Arc<HealthChecker>,
    sessions: Arc<DashMap<Uuid, SessionInfo>>,
    metrics: Option<Arc<MetricsRegistry>>,
    metrics_config: MetricsConfig,
    listen: ListenConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyListener {
    pub(crate) fn new(
        general: Arc<LoadBalancer>,
        bind: Arc<LoadBalancer>,
        health: Arc<HealthChecker>,
        metrics: Option<Arc<MetricsRegistry>>,
        metrics_config: MetricsConfig,
        listen: ListenConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            general,
            bind,
            health,
            sessions: Arc::new(DashMap::new()),
            metrics,
            metrics_config,
            listen,
            shutdown_tx,
        }
    }

    pub fn general_balancer(&self) -> &Arc<LoadBalancer> {
        &self.general
    }

    pub fn bind_balancer(&self) -> &Arc<LoadBalancer> {
        &self.bind
    }

    /// Address the client-facing acceptor is expected to bind.
    pub fn listen_address(&self) -> String {
        self.listen.address()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> Vec<(Uuid, SessionInfo)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Asks a running [`serve`](Self::serve) to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Accepts connections until the acceptor closes or [`shutdown`](Self::shutdown)
    /// is called, then aborts the remaining sessions and closes every pool.
    pub async fn serve<A: Acceptor>(&self, mut acceptor: A) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        if self.metrics_config.enabled {
            if let Some(registry) = &self.metrics {
                let addr: SocketAddr = ([0, 0, 0, 0], self.metrics_config.port).into();
                start_metrics_server(addr, registry.clone(), self.metrics_config.path.clone())
                    .await?;
            }
        }

        let health = tokio::spawn(self.health.clone().start());
        let mut sessions = JoinSet::new();
        info!(
            listen = %self.listen_address(),
            backends = self.general.pools().len(),
            strategy = self.general.strategy(),
            "LDAP proxy accepting connections"
        );

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                accepted = acceptor.accept() => {
                    let Some(connection) = accepted else {
                        info!("Acceptor closed");
                        break;
                    };
                    self.spawn_session(&mut sessions, connection);
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "Session task failed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(sessions = sessions.len(), "Shutting down listener");
        drop(acceptor);
        sessions.shutdown().await;

        self.health.shutdown();
        if let Err(err) = health.await {
            warn!(error = %err, "Heartbeat task failed");
        }

        self.general.close().await;
        self.bind.close().await;
        info!("All backend pools closed");
        Ok(())
    }

    fn spawn_session(&self, sessions: &mut JoinSet<()>, connection: ClientConnection) {
        let collector = self.collector();
        let session = Arc::new(ProxySession::new(
            self.general.clone(),
            self.bind.clone(),
            connection.peer,
            collector.clone(),
        ));
        let id = session.id();

        self.sessions.insert(
            id,
            SessionInfo {
                peer: connection.peer,
                connected_at: Utc::now(),
            },
        );
        if let Some(metrics) = &collector {
            metrics.session_opened();
        }
        info!(session = %id, peer = ?connection.peer, "Client connected");

        let guard = SessionGuard {
            id,
            registry: self.sessions.clone(),
            metrics: collector,
        };
        sessions.spawn(async move {
            let _guard = guard;
            ConnectionHandler::new(session).run(connection).await;
        });
    }

    fn collector(&self) -> Option<Arc<MetricsCollector>> {
        self.metrics.as_ref().map(|registry| registry.collector())
    }
}

/// Unregisters a session however its task ends, including abort.
struct SessionGuard {
    id: Uuid,
    registry: Arc<DashMap<Uuid, SessionInfo>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
        if let Some(metrics) = &self.metrics {
            metrics.session_closed();
        }
    }
}
