// src/server/handler.rs
use super::listener::ClientConnection;
use crate::protocol::OperationResult;
use crate::proxy::{Dispatch, ProxyError, ProxySession, ResponseSink};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Drives one client connection: every request is dispatched against the
/// session in arrival order, then runs as its own task.
pub struct ConnectionHandler {
    session: Arc<ProxySession>,
}

impl ConnectionHandler {
    pub fn new(session: Arc<ProxySession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<ProxySession> {
        &self.session
    }

    /// Runs until the client disconnects or unbinds.
    ///
    /// Operations still in flight at that point are aborted; dropping them
    /// discards the backend connections they hold.
    pub async fn run(self, connection: ClientConnection) {
        let ClientConnection {
            mut requests,
            responses,
            ..
        } = connection;
        let session_id = self.session.id();
        let peer = self.session.peer();
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                next = requests.recv() => {
                    let Some(request) = next else {
                        debug!(session = %session_id, ?peer, "Client disconnected");
                        break;
                    };

                    let dispatch = self.session.dispatch(request.request);
                    if matches!(dispatch, Dispatch::Close) {
                        debug!(session = %session_id, ?peer, "Client unbound");
                        break;
                    }

                    let sink = ResponseSink::new(request.message_id, responses.clone());
                    in_flight.spawn(run_operation(self.session.clone(), dispatch, sink));
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        error!(session = %session_id, error = %err, "Operation task failed");
                    }
                }
            }
        }

        let abandoned = in_flight.len();
        in_flight.shutdown().await;
        info!(session = %session_id, ?peer, abandoned, "Session closed");
    }
}

async fn run_operation(session: Arc<ProxySession>, dispatch: Dispatch, sink: ResponseSink) {
    let outcome = AssertUnwindSafe(session.execute(dispatch, &sink))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Some(result)) => result,
        Ok(None) => return,
        Err(_) => {
            error!(session = %session.id(), message_id = sink.message_id(), "Operation panicked");
            OperationResult::from(ProxyError::LocalFault("operation aborted unexpectedly".into()))
        }
    };

    if !sink.finish(result).await {
        debug!(session = %session.id(), message_id = sink.message_id(), "Client gone before result was delivered");
    }
}
