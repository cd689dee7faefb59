// src/proxy/pool.rs
use super::backend::{BackendConnection, BackendConnector, BackendEndpoint, BackendError};
use super::sink::ResponseSink;
use crate::config::PoolConfig;
use crate::metrics::MetricsCollector;
use crate::protocol::{BindRequest, Operation, OperationResult, Request, ResultCode};
use chrono::{DateTime, Utc};
use deadpool::managed::{self, BuildError, Metrics, Object, PoolError, RecycleError, RecycleResult, Timeouts};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Pool size used when `max_connections` is unset.
///
/// Large enough that checkouts never wait in practice; deadpool needs a
/// finite size to size its semaphore and slot queue.
pub const UNBOUNDED_MAX_SIZE: usize = 1024;

/// Identity a pool's connections carry toward the backend.
#[derive(Clone)]
pub enum ConnectionIdentity {
    /// Every new connection is bound as the proxy service account.
    Service { dn: String, password: String },
    /// Connections stay unauthenticated until a client binds on them.
    Unauthenticated,
}

impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionIdentity::Service { dn, .. } => write!(f, "Service({dn})"),
            ConnectionIdentity::Unauthenticated => f.write_str("Unauthenticated"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("no backend servers configured")]
    NoBackends,

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: BackendError,
    },

    #[error("timed out connecting to {endpoint}")]
    Timeout { endpoint: String },

    #[error("service bind to {endpoint} rejected with {code}: {message}")]
    ServiceBind {
        endpoint: String,
        code: ResultCode,
        message: String,
    },

    #[error("connection pool for {endpoint} is closed")]
    Closed { endpoint: String },

    #[error("connection pool for {endpoint} failed: {message}")]
    Pool { endpoint: String, message: String },
}

/// A pooled backend connection and the last time it was known to be alive.
struct BackendLink {
    conn: Box<dyn BackendConnection>,
    alive_at: Instant,
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
    connect_failures: AtomicU64,
    heartbeat_failures: AtomicU64,
    active: AtomicUsize,
}

/// deadpool manager for connections to one backend server.
///
/// `create` opens the transport and, for service pools, binds it as the
/// service account. `recycle` re-checks connections that have not been seen
/// alive for a heartbeat interval.
struct BackendManager {
    name: &'static str,
    endpoint: BackendEndpoint,
    identity: ConnectionIdentity,
    connector: Arc<dyn BackendConnector>,
    config: PoolConfig,
    counters: PoolCounters,
    metrics: Option<Arc<MetricsCollector>>,
}

impl BackendManager {
    async fn open(&self) -> Result<Box<dyn BackendConnection>, ConnectError> {
        let endpoint = self.endpoint.id();
        let connect_timeout = self.config.connect_timeout();

        let mut conn = match timeout(connect_timeout, self.connector.connect(&self.endpoint)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(source)) => return Err(ConnectError::Connect { endpoint, source }),
            Err(_) => return Err(ConnectError::Timeout { endpoint }),
        };

        if let ConnectionIdentity::Service { dn, password } = &self.identity {
            let bind = Request::new(Operation::Bind(BindRequest::simple(
                dn.clone(),
                password.as_bytes().to_vec(),
            )));
            let sink = ResponseSink::discard();
            match timeout(connect_timeout, conn.execute(bind, &sink)).await {
                Ok(Ok(result)) if result.is_success() => {}
                Ok(Ok(OperationResult { code, message, .. })) => {
                    return Err(ConnectError::ServiceBind {
                        endpoint,
                        code,
                        message,
                    });
                }
                Ok(Err(source)) => return Err(ConnectError::Connect { endpoint, source }),
                Err(_) => return Err(ConnectError::Timeout { endpoint }),
            }
        }

        Ok(conn)
    }

    fn heartbeat_failed(&self, reason: &str) {
        self.counters.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_heartbeat_failure(self.name, &self.endpoint.id());
        }
        debug!(pool = self.name, endpoint = %self.endpoint, reason, "Idle connection failed heartbeat");
    }

    async fn heartbeat(&self, link: &mut BackendLink) -> Result<(), String> {
        match timeout(self.config.heartbeat_timeout(), link.conn.heartbeat()).await {
            Ok(Ok(())) => {
                link.alive_at = Instant::now();
                Ok(())
            }
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("timed out".to_string()),
        }
    }
}

impl managed::Manager for BackendManager {
    type Type = BackendLink;
    type Error = ConnectError;

    async fn create(&self) -> Result<BackendLink, ConnectError> {
        match self.open().await {
            Ok(conn) => {
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                debug!(pool = self.name, endpoint = %self.endpoint, identity = ?self.identity, "Opened backend connection");
                Ok(BackendLink {
                    conn,
                    alive_at: Instant::now(),
                })
            }
            Err(err) => {
                self.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_connect_failure(self.name, &self.endpoint.id());
                }
                warn!(pool = self.name, endpoint = %self.endpoint, error = %err, "Backend connect failed");
                Err(err)
            }
        }
    }

    async fn recycle(&self, link: &mut BackendLink, _: &Metrics) -> RecycleResult<ConnectError> {
        if link.alive_at.elapsed() < self.config.heartbeat_interval() {
            return Ok(());
        }
        self.heartbeat(link).await.map_err(|reason| {
            self.heartbeat_failed(&reason);
            RecycleError::Message(reason.into())
        })
    }
}

/// Point-in-time view of a pool's counters.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub endpoint: String,
    pub created: u64,
    pub acquired: u64,
    /// Connections handed back healthy.
    pub released: u64,
    /// Connections handed back broken and closed.
    pub discarded: u64,
    pub connect_failures: u64,
    pub heartbeat_failures: u64,
    pub active: usize,
    pub idle: usize,
    pub max_size: usize,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Outcome of one heartbeat sweep over a pool's idle connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    pub checked: usize,
    pub failed: usize,
}

/// Connections to a single backend server, opened lazily and reused.
pub struct ConnectionPool {
    pool: managed::Pool<BackendManager>,
    closed: AtomicBool,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,
}

impl ConnectionPool {
    pub fn new(
        name: &'static str,
        endpoint: BackendEndpoint,
        identity: ConnectionIdentity,
        connector: Arc<dyn BackendConnector>,
        config: PoolConfig,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, BuildError> {
        let max_size = config.max_connections.unwrap_or(UNBOUNDED_MAX_SIZE);
        let manager = BackendManager {
            name,
            endpoint,
            identity,
            connector,
            config,
            counters: PoolCounters::default(),
            metrics,
        };
        let pool = managed::Pool::builder(manager).max_size(max_size).build()?;

        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
            last_heartbeat: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        self.manager().name
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.manager().endpoint
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.manager().identity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn manager(&self) -> &BackendManager {
        self.pool.manager()
    }

    fn counters(&self) -> &PoolCounters {
        &self.manager().counters
    }

    /// Hands out an idle connection, or opens a new one when none is idle.
    ///
    /// With a connection ceiling configured this waits for a slot first.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, ConnectError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let object = self.pool.get().await.map_err(|err| self.pool_error(err))?;

        self.counters().acquired.fetch_add(1, Ordering::Relaxed);
        self.counters().active.fetch_add(1, Ordering::Relaxed);
        self.update_idle_gauge();

        Ok(PooledConnection {
            object: Some(object),
            pool: Arc::clone(self),
        })
    }

    fn return_connection(&self, mut object: Object<BackendManager>, healthy: bool) {
        self.counters().active.fetch_sub(1, Ordering::Relaxed);

        if healthy {
            self.counters().released.fetch_add(1, Ordering::Relaxed);
            if !self.is_closed() {
                object.alive_at = Instant::now();
                drop(object);
                self.update_idle_gauge();
                return;
            }
        } else {
            self.counters().discarded.fetch_add(1, Ordering::Relaxed);
            debug!(pool = self.name(), endpoint = %self.endpoint(), "Discarding backend connection");
        }

        close_in_background(Object::take(object).conn);
        self.update_idle_gauge();
    }

    /// Sends a heartbeat over every idle connection, closing the ones that
    /// fail or time out.
    pub async fn heartbeat_idle(&self) -> HeartbeatOutcome {
        let mut outcome = HeartbeatOutcome::default();
        let started = Instant::now();
        // Zero wait: only idle connections are visited, never a checkout slot
        // another operation is queued for.
        let no_wait = Timeouts {
            wait: Some(Duration::ZERO),
            ..Timeouts::default()
        };

        for _ in 0..self.pool.status().available {
            if self.is_closed() || self.pool.status().available == 0 {
                break;
            }
            let Ok(mut object) = self.pool.timeout_get(&no_wait).await else {
                break;
            };
            outcome.checked += 1;

            // Already checked by `recycle` on the way out.
            if object.alive_at > started {
                continue;
            }

            if let Err(reason) = self.manager().heartbeat(&mut object).await {
                outcome.failed += 1;
                self.manager().heartbeat_failed(&reason);
                Object::take(object).conn.close().await;
            }
        }

        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        self.update_idle_gauge();
        outcome
    }

    /// Stops handing out connections and closes every idle one.
    ///
    /// Connections currently in use are closed when they are released.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let no_wait = Timeouts {
            wait: Some(Duration::ZERO),
            ..Timeouts::default()
        };
        let mut count = 0;
        while self.pool.status().available > 0 {
            let Ok(object) = self.pool.timeout_get(&no_wait).await else {
                break;
            };
            Object::take(object).conn.close().await;
            count += 1;
        }
        self.pool.close();

        self.update_idle_gauge();
        info!(pool = self.name(), endpoint = %self.endpoint(), closed = count, "Connection pool closed");
    }

    pub fn idle_count(&self) -> usize {
        self.pool.status().available
    }

    pub fn stats(&self) -> PoolStats {
        let counters = self.counters();
        let status = self.pool.status();
        PoolStats {
            endpoint: self.endpoint().id(),
            created: counters.created.load(Ordering::Relaxed),
            acquired: counters.acquired.load(Ordering::Relaxed),
            released: counters.released.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            connect_failures: counters.connect_failures.load(Ordering::Relaxed),
            heartbeat_failures: counters.heartbeat_failures.load(Ordering::Relaxed),
            active: counters.active.load(Ordering::Relaxed),
            idle: status.available,
            max_size: status.max_size,
            last_heartbeat: *self
                .last_heartbeat
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn update_idle_gauge(&self) {
        if let Some(metrics) = &self.manager().metrics {
            metrics.set_idle_connections(self.name(), &self.endpoint().id(), self.idle_count());
        }
    }

    fn pool_error(&self, err: PoolError<ConnectError>) -> ConnectError {
        let endpoint = self.endpoint().id();
        match err {
            PoolError::Backend(err) => err,
            PoolError::Closed => ConnectError::Closed { endpoint },
            PoolError::Timeout(_) => ConnectError::Timeout { endpoint },
            other => ConnectError::Pool {
                endpoint,
                message: other.to_string(),
            },
        }
    }

    fn closed_error(&self) -> ConnectError {
        ConnectError::Closed {
            endpoint: self.endpoint().id(),
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.name())
            .field("endpoint", self.endpoint())
            .field("identity", self.identity())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Runs a retired connection's close hook without blocking the caller.
fn close_in_background(mut conn: Box<dyn BackendConnection>) {
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move { conn.close().await });
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Held exclusively by one operation. It goes back to its pool exactly once:
/// through [`release`](Self::release), or, if dropped without it, as a
/// discarded connection.
pub struct PooledConnection {
    object: Option<Object<BackendManager>>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    pub fn endpoint(&self) -> &BackendEndpoint {
        self.pool.endpoint()
    }

    pub async fn execute(
        &mut self,
        request: Request,
        sink: &ResponseSink,
    ) -> Result<OperationResult, BackendError> {
        match self.object.as_mut() {
            Some(link) => link.conn.execute(request, sink).await,
            None => Err(BackendError::Closed),
        }
    }

    /// Returns the connection to the idle set, or closes it when `healthy`
    /// is false.
    pub fn release(mut self, healthy: bool) {
        if let Some(object) = self.object.take() {
            self.pool.return_connection(object, healthy);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // Dropped mid-operation: the connection state is unknown.
        if let Some(object) = self.object.take() {
            self.pool.return_connection(object, false);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name())
            .field("endpoint", self.pool.endpoint())
            .finish()
    }
}
