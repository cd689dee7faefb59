// src/proxy/session.rs
use super::error::{PolicyViolation, ProxyError};
use super::sink::ResponseSink;
use crate::load_balancer::LoadBalancer;
use crate::metrics::MetricsCollector;
use crate::protocol::{
    Control, Operation, OperationKind, OperationResult, Request, CANCEL_OID, START_TLS_OID,
};
use arc_swap::ArcSwapOption;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Authorization state of a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// Bound as this DN; forwarded requests assert it as proxied identity.
    Authenticated(Arc<String>),
}

/// What to do with one client request, decided when it is dispatched.
#[derive(Debug)]
pub enum Dispatch {
    /// Answer locally without contacting a backend.
    Reject {
        kind: OperationKind,
        violation: PolicyViolation,
    },
    /// Simple bind, sent over the bind-dedicated balancer.
    ///
    /// `generation` identifies this bind attempt; a result only sets the
    /// session identity if no later bind was dispatched meanwhile.
    /// Unauthenticated binds (a name without a password) never set it.
    Bind {
        name: String,
        unauthenticated: bool,
        generation: u64,
        request: Request,
    },
    /// Any other operation, with authorization controls already applied.
    Forward(Request),
    /// The client unbound; the session ends without a response.
    Close,
}

/// Per-client-connection proxy state.
///
/// Sessions are shared between the operations running for one client,
/// so the proxied identity lives in an atomically swapped slot written by
/// bind and read when every other request is dispatched.
pub struct ProxySession {
    id: Uuid,
    peer: Option<SocketAddr>,
    general: Arc<LoadBalancer>,
    bind: Arc<LoadBalancer>,
    authorization: ArcSwapOption<String>,
    /// Counts bind attempts; guards writes to `authorization` from binds.
    bind_generation: Mutex<u64>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ProxySession {
    pub fn new(
        general: Arc<LoadBalancer>,
        bind: Arc<LoadBalancer>,
        peer: Option<SocketAddr>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            general,
            bind,
            authorization: ArcSwapOption::empty(),
            bind_generation: Mutex::new(0),
            metrics,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        match self.authorization.load_full() {
            Some(dn) => SessionState::Authenticated(dn),
            None => SessionState::Unauthenticated,
        }
    }

    /// Classifies `request` against the session's current state.
    ///
    /// Any bind attempt resets the session to unauthenticated here, before
    /// the backend answers.
    pub fn dispatch(&self, request: Request) -> Dispatch {
        let kind = request.kind();
        let violation = match &request.operation {
            Operation::Unbind => return Dispatch::Close,
            Operation::Bind(bind) => {
                let generation = self.begin_bind();
                if !bind.is_simple() {
                    PolicyViolation::NonSimpleBind(bind.authentication.mechanism().to_string())
                } else {
                    return Dispatch::Bind {
                        name: bind.name.clone(),
                        unauthenticated: bind.is_unauthenticated(),
                        generation,
                        request,
                    };
                }
            }
            Operation::Abandon(_) => PolicyViolation::Abandon,
            Operation::Extended(ext) if ext.oid == CANCEL_OID => PolicyViolation::Cancel,
            Operation::Extended(ext) if ext.oid == START_TLS_OID => PolicyViolation::StartTls,
            _ => return Dispatch::Forward(self.authorize(request)),
        };
        Dispatch::Reject { kind, violation }
    }

    /// Runs a dispatched operation to its terminal result.
    ///
    /// Returns `None` only for [`Dispatch::Close`].
    pub async fn execute(&self, dispatch: Dispatch, sink: &ResponseSink) -> Option<OperationResult> {
        let started = Instant::now();
        let (kind, outcome) = match dispatch {
            Dispatch::Close => return None,
            Dispatch::Reject { kind, violation } => (kind, Err(ProxyError::from(violation))),
            Dispatch::Bind {
                name,
                unauthenticated,
                generation,
                request,
            } => {
                let outcome = self.bind(name, unauthenticated, generation, request, sink).await;
                (OperationKind::Bind, outcome)
            }
            Dispatch::Forward(request) => (request.kind(), self.forward(request, sink).await),
        };

        let (outcome_label, result) = match outcome {
            Ok(result) => {
                let label = if result.is_success() { "success" } else { "backend_failure" };
                (label, result)
            }
            Err(err) => {
                match &err {
                    ProxyError::Policy(_) => {
                        debug!(session = %self.id, message_id = sink.message_id(), operation = %kind, error = %err, "Request rejected")
                    }
                    ProxyError::Connect(_) | ProxyError::Backend(_) => {
                        warn!(session = %self.id, message_id = sink.message_id(), operation = %kind, error = %err, "Request failed")
                    }
                    ProxyError::LocalFault(_) => {
                        error!(session = %self.id, message_id = sink.message_id(), operation = %kind, error = %err, "Request failed")
                    }
                }
                (err.kind(), OperationResult::from(err))
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_operation(kind.as_str(), outcome_label, started.elapsed());
        }
        Some(result)
    }

    /// Dispatches and executes in one step.
    pub async fn handle(&self, request: Request, sink: &ResponseSink) -> Option<OperationResult> {
        let dispatch = self.dispatch(request);
        self.execute(dispatch, sink).await
    }

    async fn bind(
        &self,
        name: String,
        unauthenticated: bool,
        generation: u64,
        request: Request,
        sink: &ResponseSink,
    ) -> Result<OperationResult, ProxyError> {
        let mut conn = self.bind.acquire().await?;
        let endpoint = conn.endpoint().clone();

        match conn.execute(request, sink).await {
            Ok(result) => {
                conn.release(true);
                if !result.is_success() {
                    debug!(session = %self.id, dn = %name, code = %result.code, "Client bind rejected");
                } else if unauthenticated {
                    // Accepted without a password: nobody was authenticated.
                    warn!(session = %self.id, dn = %name, %endpoint, "Unauthenticated bind accepted by backend; session stays anonymous");
                } else if self.complete_bind(generation, &name) {
                    info!(session = %self.id, dn = %name, %endpoint, "Client bound");
                } else {
                    debug!(session = %self.id, dn = %name, "Bind result superseded by a later bind");
                }
                Ok(result)
            }
            Err(err) => {
                conn.release(false);
                Err(err.into())
            }
        }
    }

    async fn forward(&self, request: Request, sink: &ResponseSink) -> Result<OperationResult, ProxyError> {
        let kind = request.kind();
        let mut conn = self.general.acquire().await?;
        debug!(
            session = %self.id,
            message_id = sink.message_id(),
            operation = %kind,
            endpoint = %conn.endpoint(),
            "Forwarding request"
        );

        match conn.execute(request, sink).await {
            Ok(result) => {
                conn.release(true);
                Ok(result)
            }
            Err(err) => {
                conn.release(false);
                Err(err.into())
            }
        }
    }

    /// Replaces any client-sent proxied authorization control with the
    /// session's own.
    fn authorize(&self, mut request: Request) -> Request {
        let before = request.controls.len();
        request.controls.retain(|c| !c.is_proxied_authorization());
        if request.controls.len() != before {
            warn!(session = %self.id, peer = ?self.peer, "Stripped client-supplied proxied authorization control");
        }

        if let Some(dn) = self.authorization.load_full() {
            request.controls.push(Control::proxied_authorization(&dn));
        }
        request
    }

    /// Starts a bind attempt: the session drops its identity and any
    /// earlier bind still in flight loses the right to set one.
    fn begin_bind(&self) -> u64 {
        let mut generation = self.lock_generation();
        *generation += 1;
        self.authorization.store(None);
        *generation
    }

    /// Stores `dn` as the session identity unless another bind started
    /// after `generation`.
    fn complete_bind(&self, generation: u64, dn: &str) -> bool {
        let current = self.lock_generation();
        if *current != generation {
            return false;
        }
        self.authorization.store(Some(Arc::new(dn.to_string())));
        true
    }

    fn lock_generation(&self) -> std::sync::MutexGuard<'_, u64> {
        self.bind_generation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}
