// src/proxy/sink.rs
use crate::protocol::{ClientResponse, Intermediate, OperationResult};
use tokio::sync::mpsc;

/// Relays responses for one client operation back to the client's writer.
///
/// Backend connections push streamed search items through [`send`]; the
/// terminal result is written by the server once the operation finishes.
///
/// [`send`]: ResponseSink::send
#[derive(Debug, Clone)]
pub struct ResponseSink {
    message_id: i32,
    tx: Option<mpsc::Sender<ClientResponse>>,
}

impl ResponseSink {
    pub fn new(message_id: i32, tx: mpsc::Sender<ClientResponse>) -> Self {
        Self {
            message_id,
            tx: Some(tx),
        }
    }

    /// A sink that drops everything, for requests the proxy issues itself.
    pub fn discard() -> Self {
        Self {
            message_id: 0,
            tx: None,
        }
    }

    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    /// Relays one intermediate item. Returns `false` once the client is gone.
    pub async fn send(&self, item: Intermediate) -> bool {
        match &self.tx {
            Some(tx) => tx
                .send(ClientResponse::Intermediate {
                    message_id: self.message_id,
                    item,
                })
                .await
                .is_ok(),
            None => true,
        }
    }

    pub(crate) async fn finish(&self, result: OperationResult) -> bool {
        match &self.tx {
            Some(tx) => tx
                .send(ClientResponse::Done {
                    message_id: self.message_id,
                    result,
                })
                .await
                .is_ok(),
            None => true,
        }
    }
}
