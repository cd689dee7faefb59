//! Shared utilities for integration tests: an in-memory directory that
//! stands in for the backend codec and records everything it is sent.
#![allow(dead_code)]

use async_trait::async_trait;
use ldap_proxy::config::PoolConfig;
use ldap_proxy::load_balancer::LoadBalancer;
use ldap_proxy::protocol::{
    Attribute, Authentication, Intermediate, Operation, OperationKind, OperationResult, Request,
    ResultCode, SearchEntry,
};
use ldap_proxy::proxy::{
    BackendConnection, BackendConnector, BackendEndpoint, BackendError, ConnectionIdentity,
    ConnectionPool, ProxySession, ResponseSink,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const SERVICE_DN: &str = "dn";
pub const SERVICE_PASSWORD: &str = "password";

/// A request as seen by one backend.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub endpoint: String,
    pub request: Request,
}

#[derive(Default)]
struct DirectoryState {
    users: HashMap<String, Vec<u8>>,
    entries: Vec<SearchEntry>,
    requests: Vec<Recorded>,
    connects: HashMap<String, usize>,
    refused: HashSet<String>,
    scripted: HashMap<OperationKind, OperationResult>,
    lenient_binds: bool,
    bind_gate: Option<Arc<Semaphore>>,
    failing: bool,
    hanging: bool,
    panicking: bool,
}

/// In-memory directory reachable under any endpoint name.
///
/// Simple binds succeed for known users and for anonymous binds, searches
/// return the configured entries, everything else succeeds unless a result
/// was scripted for its kind.
#[derive(Clone)]
pub struct MockDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        let directory = Self {
            state: Arc::new(Mutex::new(DirectoryState::default())),
        };
        directory.add_user(SERVICE_DN, SERVICE_PASSWORD);
        directory
    }

    pub fn add_user(&self, dn: &str, password: &str) {
        self.lock().users.insert(dn.to_string(), password.as_bytes().to_vec());
    }

    pub fn add_entry(&self, dn: &str) {
        self.lock().entries.push(SearchEntry {
            dn: dn.to_string(),
            attributes: vec![Attribute::new("cn", [dn.as_bytes().to_vec()])],
        });
    }

    /// Answer every non-bind operation of `kind` with `result`.
    pub fn respond_with(&self, kind: OperationKind, result: OperationResult) {
        self.lock().scripted.insert(kind, result);
    }

    /// Accept simple binds that name a DN but carry no password.
    pub fn accept_unauthenticated_binds(&self) {
        self.lock().lenient_binds = true;
    }

    /// Hold client bind results until the returned semaphore gets a permit.
    pub fn hold_binds(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.lock().bind_gate = Some(gate.clone());
        gate
    }

    /// Refuse new connections to `endpoint`.
    pub fn refuse(&self, endpoint: &str) {
        self.lock().refused.insert(endpoint.to_string());
    }

    /// Fail every non-bind operation with a lost connection.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Never answer non-bind operations.
    pub fn set_hanging(&self, hanging: bool) {
        self.lock().hanging = hanging;
    }

    /// Panic while executing non-bind operations.
    pub fn set_panicking(&self, panicking: bool) {
        self.lock().panicking = panicking;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.lock().requests.clone()
    }

    /// Requests of `kind`, excluding the proxy's own service binds.
    pub fn requests_of(&self, kind: OperationKind) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.request.kind() == kind)
            .filter(|r| !is_service_bind(&r.request))
            .collect()
    }

    pub fn requests_to(&self, endpoint: &str, kind: OperationKind) -> usize {
        self.requests_of(kind)
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }

    pub fn connects(&self, endpoint: &str) -> usize {
        self.lock().connects.get(endpoint).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.lock().connects.values().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap()
    }
}

fn is_service_bind(request: &Request) -> bool {
    matches!(&request.operation, Operation::Bind(bind) if bind.name == SERVICE_DN)
}

#[async_trait]
impl BackendConnector for MockDirectory {
    async fn connect(
        &self,
        endpoint: &BackendEndpoint,
    ) -> Result<Box<dyn BackendConnection>, BackendError> {
        let id = endpoint.id();
        let mut state = self.lock();
        if state.refused.contains(&id) {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        *state.connects.entry(id.clone()).or_insert(0) += 1;
        Ok(Box::new(MockConnection {
            endpoint: id,
            directory: self.clone(),
        }))
    }
}

struct MockConnection {
    endpoint: String,
    directory: MockDirectory,
}

enum Behaviour {
    Answer(OperationResult, Vec<SearchEntry>),
    Held(Arc<Semaphore>, OperationResult),
    Fail,
    Hang,
    Panic,
}

#[async_trait]
impl BackendConnection for MockConnection {
    async fn execute(
        &mut self,
        request: Request,
        sink: &ResponseSink,
    ) -> Result<OperationResult, BackendError> {
        let behaviour = {
            let mut state = self.directory.lock();
            state.requests.push(Recorded {
                endpoint: self.endpoint.clone(),
                request: request.clone(),
            });

            match &request.operation {
                Operation::Bind(bind) => {
                    let accepted = match &bind.authentication {
                        Authentication::Simple(password) if password.is_empty() => {
                            bind.name.is_empty() || state.lenient_binds
                        }
                        Authentication::Simple(_) if bind.name.is_empty() => false,
                        Authentication::Simple(password) => {
                            state.users.get(&bind.name) == Some(password)
                        }
                        Authentication::Sasl { .. } => false,
                    };
                    let result = if accepted {
                        OperationResult::success()
                    } else {
                        OperationResult::new(ResultCode::INVALID_CREDENTIALS, "invalid credentials")
                    };
                    match &state.bind_gate {
                        Some(gate) if bind.name != SERVICE_DN => Behaviour::Held(gate.clone(), result),
                        _ => Behaviour::Answer(result, Vec::new()),
                    }
                }
                _ if state.panicking => Behaviour::Panic,
                _ if state.failing => Behaviour::Fail,
                _ if state.hanging => Behaviour::Hang,
                operation => {
                    let result = state
                        .scripted
                        .get(&request.kind())
                        .cloned()
                        .unwrap_or_else(OperationResult::success);
                    let entries = match operation {
                        Operation::Search(_) => state.entries.clone(),
                        _ => Vec::new(),
                    };
                    Behaviour::Answer(result, entries)
                }
            }
        };

        match behaviour {
            Behaviour::Answer(result, entries) => {
                for entry in entries {
                    sink.send(Intermediate::Entry(entry)).await;
                }
                Ok(result)
            }
            Behaviour::Held(gate, result) => {
                let _permit = gate.acquire().await;
                Ok(result)
            }
            Behaviour::Fail => Err(BackendError::Closed),
            Behaviour::Hang => {
                futures::future::pending::<()>().await;
                Err(BackendError::Closed)
            }
            Behaviour::Panic => panic!("backend codec bug"),
        }
    }

    async fn heartbeat(&mut self) -> Result<(), BackendError> {
        if self.directory.lock().failing {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Balancers built directly over a [`MockDirectory`], bypassing the
/// server builder.
pub struct TestProxy {
    pub directory: MockDirectory,
    pub general: Arc<LoadBalancer>,
    pub bind: Arc<LoadBalancer>,
}

impl TestProxy {
    pub fn new(backends: &[&str]) -> Self {
        Self::with_config(backends, PoolConfig::default())
    }

    pub fn with_config(backends: &[&str], config: PoolConfig) -> Self {
        let directory = MockDirectory::new();
        let connector: Arc<dyn BackendConnector> = Arc::new(directory.clone());
        let service = ConnectionIdentity::Service {
            dn: SERVICE_DN.to_string(),
            password: SERVICE_PASSWORD.to_string(),
        };

        let pools = |name: &'static str, identity: ConnectionIdentity| -> Vec<Arc<ConnectionPool>> {
            backends
                .iter()
                .map(|addr| {
                    Arc::new(ConnectionPool::new(
                        name,
                        addr.parse().unwrap(),
                        identity.clone(),
                        connector.clone(),
                        config.clone(),
                        None,
                    )
                    .unwrap())
                })
                .collect()
        };

        let failover = config.failover;
        let general = LoadBalancer::round_robin("general", pools("general", service))
            .with_failover(failover);
        let bind = LoadBalancer::round_robin("bind", pools("bind", ConnectionIdentity::Unauthenticated))
            .with_failover(failover);

        Self {
            directory,
            general: Arc::new(general),
            bind: Arc::new(bind),
        }
    }

    pub fn session(&self) -> ProxySession {
        ProxySession::new(self.general.clone(), self.bind.clone(), None, None)
    }

    /// Sum of (acquired, released, discarded) over every pool.
    pub fn checkout_totals(&self) -> (u64, u64, u64) {
        self.general
            .pools()
            .iter()
            .chain(self.bind.pools())
            .map(|pool| pool.stats())
            .fold((0, 0, 0), |(a, r, d), s| (a + s.acquired, r + s.released, d + s.discarded))
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Awaits `future`, failing the test after two seconds.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}
