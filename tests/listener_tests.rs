// tests/listener_tests.rs
mod common;

use common::{eventually, within, MockDirectory};
use ldap_proxy::config::ProxyConfig;
use ldap_proxy::metrics::MetricsRegistry;
use ldap_proxy::protocol::{
    BindRequest, ClientRequest, ClientResponse, ExtendedRequest, Intermediate, Operation,
    OperationKind, Request, ResultCode, SearchRequest, SearchScope, CANCEL_OID,
};
use ldap_proxy::server::{ClientConnection, ClientHandle, ProxyListener, ServerBuilder};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Harness {
    directory: MockDirectory,
    listener: Arc<ProxyListener>,
    connections: mpsc::Sender<ClientConnection>,
    serving: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start(backends: &[&str]) -> Self {
        Self::start_with(backends, None)
    }

    fn start_with(backends: &[&str], metrics: Option<Arc<MetricsRegistry>>) -> Self {
        let directory = MockDirectory::new();
        let config = ProxyConfig::new(backends.iter().map(|b| b.to_string()).collect());
        let mut builder = ServerBuilder::new(config).with_connector(Arc::new(directory.clone()));
        if let Some(registry) = metrics {
            builder = builder.with_metrics(registry);
        }
        let listener = Arc::new(builder.build().unwrap());

        let (connections, acceptor) = mpsc::channel(8);
        let serving = tokio::spawn({
            let listener = listener.clone();
            async move { listener.serve(acceptor).await }
        });

        Self {
            directory,
            listener,
            connections,
            serving,
        }
    }

    async fn connect(&self) -> ClientHandle {
        let (connection, handle) = ClientConnection::channel(None, 16);
        self.connections.send(connection).await.unwrap();
        handle
    }

    async fn stop(self) -> Arc<ProxyListener> {
        self.listener.shutdown();
        within(self.serving).await.unwrap().unwrap();
        self.listener
    }
}

fn search(base: &str) -> Request {
    Request::new(Operation::Search(SearchRequest::new(
        base,
        SearchScope::WholeSubtree,
        "(objectClass=*)",
    )))
}

async fn next_response(handle: &mut ClientHandle) -> ClientResponse {
    within(handle.responses.recv()).await.unwrap()
}

#[tokio::test]
async fn build_requires_a_connector() {
    let config = ProxyConfig::new(vec!["ldap1:389".into()]);
    assert!(ServerBuilder::new(config).build().is_err());
}

#[tokio::test]
async fn build_rejects_invalid_configuration() {
    let directory = MockDirectory::new();
    let config = ProxyConfig::new(Vec::new());
    let built = ServerBuilder::new(config)
        .with_connector(Arc::new(directory))
        .build();
    assert!(built.is_err());
}

#[tokio::test]
async fn build_creates_general_and_bind_pools_per_backend() {
    let directory = MockDirectory::new();
    let mut config = ProxyConfig::new(vec!["ldap1:389".into(), "ldap://ldap2".into()]);
    config.listen.port = 1389;
    let listener = ServerBuilder::new(config)
        .with_connector(Arc::new(directory.clone()))
        .build()
        .unwrap();

    let general: Vec<_> = listener
        .general_balancer()
        .pools()
        .iter()
        .map(|p| p.endpoint().id())
        .collect();
    assert_eq!(general, ["ldap1:389", "ldap2:389"]);
    assert_eq!(listener.bind_balancer().pools().len(), 2);
    assert_eq!(listener.general_balancer().strategy(), "round_robin");
    assert_eq!(listener.listen_address(), "0.0.0.0:1389");
    // Pools are lazy.
    assert_eq!(directory.total_connects(), 0);
}

#[tokio::test]
async fn search_streams_entries_before_single_result() {
    let harness = Harness::start(&["ldap1:389"]);
    for dn in ["cn=a,dc=example", "cn=b,dc=example", "cn=c,dc=example"] {
        harness.directory.add_entry(dn);
    }
    let mut client = harness.connect().await;

    client
        .requests
        .send(ClientRequest::new(5, search("dc=example")))
        .await
        .unwrap();

    let mut entries = Vec::new();
    let result = loop {
        match next_response(&mut client).await {
            ClientResponse::Intermediate { message_id, item } => {
                assert_eq!(message_id, 5);
                match item {
                    Intermediate::Entry(entry) => entries.push(entry.dn),
                    other => panic!("unexpected intermediate {other:?}"),
                }
            }
            ClientResponse::Done { message_id, result } => {
                assert_eq!(message_id, 5);
                break result;
            }
        }
    };

    assert_eq!(entries, ["cn=a,dc=example", "cn=b,dc=example", "cn=c,dc=example"]);
    assert!(result.is_success());
    assert!(client.responses.try_recv().is_err());
    harness.stop().await;
}

#[tokio::test]
async fn rejected_request_gets_local_result() {
    let harness = Harness::start(&["ldap1:389"]);
    let mut client = harness.connect().await;

    let sasl = Request::new(Operation::Bind(BindRequest::sasl("cn=x", "EXTERNAL")));
    client.requests.send(ClientRequest::new(1, sasl)).await.unwrap();

    match next_response(&mut client).await {
        ClientResponse::Done { message_id, result } => {
            assert_eq!(message_id, 1);
            assert_eq!(result.code, ResultCode::PROTOCOL_ERROR);
        }
        other => panic!("unexpected response {other:?}"),
    }
    assert!(harness.directory.requests().is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn bind_on_one_connection_does_not_leak_to_another() {
    let harness = Harness::start(&["ldap1:389"]);
    harness.directory.add_user("uid=alice,dc=example", "secret");
    let mut alice = harness.connect().await;
    let mut anonymous = harness.connect().await;

    let bind = Request::new(Operation::Bind(BindRequest::simple(
        "uid=alice,dc=example",
        b"secret".to_vec(),
    )));
    alice.requests.send(ClientRequest::new(1, bind)).await.unwrap();
    assert!(matches!(next_response(&mut alice).await, ClientResponse::Done { result, .. } if result.is_success()));

    anonymous
        .requests
        .send(ClientRequest::new(1, search("dc=example")))
        .await
        .unwrap();
    next_response(&mut anonymous).await;
    alice
        .requests
        .send(ClientRequest::new(2, search("dc=example")))
        .await
        .unwrap();
    next_response(&mut alice).await;

    let searches = harness.directory.requests_of(OperationKind::Search);
    assert!(searches[0].request.proxied_authorization().is_none());
    assert_eq!(
        searches[1].request.proxied_authorization().and_then(|c| c.proxied_dn()),
        Some("uid=alice,dc=example")
    );
    harness.stop().await;
}

#[tokio::test]
async fn unbind_ends_the_session() {
    let harness = Harness::start(&["ldap1:389"]);
    let mut client = harness.connect().await;
    eventually(|| harness.listener.active_sessions() == 1).await;

    client
        .requests
        .send(ClientRequest::new(3, Request::new(Operation::Unbind)))
        .await
        .unwrap();

    assert!(within(client.responses.recv()).await.is_none());
    eventually(|| harness.listener.active_sessions() == 0).await;
    harness.stop().await;
}

#[tokio::test]
async fn disconnect_abandons_in_flight_operations() {
    let harness = Harness::start(&["ldap1:389"]);
    harness.directory.set_hanging(true);
    let client = harness.connect().await;

    client
        .requests
        .send(ClientRequest::new(9, search("dc=example")))
        .await
        .unwrap();
    eventually(|| harness.directory.requests_of(OperationKind::Search).len() == 1).await;

    drop(client);
    eventually(|| harness.listener.active_sessions() == 0).await;

    let stats = harness.listener.general_balancer().pools()[0].stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.active, 0);
    harness.stop().await;
}

#[tokio::test]
async fn operations_on_one_connection_run_concurrently() {
    let harness = Harness::start(&["ldap1:389"]);
    harness.directory.set_hanging(true);
    let mut client = harness.connect().await;

    client
        .requests
        .send(ClientRequest::new(1, search("dc=slow")))
        .await
        .unwrap();
    eventually(|| harness.directory.requests_of(OperationKind::Search).len() == 1).await;

    // Rejections never reach the hanging backend.
    let cancel = Request::new(Operation::Extended(ExtendedRequest::new(CANCEL_OID)));
    client.requests.send(ClientRequest::new(2, cancel)).await.unwrap();

    let response = next_response(&mut client).await;
    assert_eq!(response.message_id(), 2);
    harness.stop().await;
}

#[tokio::test]
async fn backend_panic_becomes_operations_error() {
    let harness = Harness::start(&["ldap1:389"]);
    harness.directory.set_panicking(true);
    let mut client = harness.connect().await;

    client
        .requests
        .send(ClientRequest::new(4, search("dc=example")))
        .await
        .unwrap();

    match next_response(&mut client).await {
        ClientResponse::Done { message_id, result } => {
            assert_eq!(message_id, 4);
            assert_eq!(result.code, ResultCode::OPERATIONS_ERROR);
        }
        other => panic!("unexpected response {other:?}"),
    }

    // The session survives the fault.
    harness.directory.set_panicking(false);
    client
        .requests
        .send(ClientRequest::new(5, search("dc=example")))
        .await
        .unwrap();
    assert!(matches!(next_response(&mut client).await, ClientResponse::Done { result, .. } if result.is_success()));
    harness.stop().await;
}

#[tokio::test]
async fn shutdown_closes_every_pool() {
    let harness = Harness::start(&["ldap1:389", "ldap2:389"]);
    let mut client = harness.connect().await;
    client
        .requests
        .send(ClientRequest::new(1, search("dc=example")))
        .await
        .unwrap();
    next_response(&mut client).await;

    let listener = harness.stop().await;

    for pool in listener
        .general_balancer()
        .pools()
        .iter()
        .chain(listener.bind_balancer().pools())
    {
        assert!(pool.is_closed());
        assert_eq!(pool.idle_count(), 0);
    }
    assert_eq!(listener.active_sessions(), 0);
    assert!(within(client.responses.recv()).await.is_none());
}

#[tokio::test]
async fn closed_acceptor_stops_serving() {
    let harness = Harness::start(&["ldap1:389"]);
    let Harness {
        connections,
        serving,
        listener,
        ..
    } = harness;

    drop(connections);
    within(serving).await.unwrap().unwrap();
    assert!(listener.general_balancer().pools()[0].is_closed());
}

#[tokio::test]
async fn sessions_are_counted_in_metrics() {
    let registry = Arc::new(MetricsRegistry::new().unwrap());
    let harness = Harness::start_with(&["ldap1:389"], Some(registry.clone()));
    let mut client = harness.connect().await;

    client
        .requests
        .send(ClientRequest::new(1, search("dc=example")))
        .await
        .unwrap();
    next_response(&mut client).await;

    let metrics = registry.collector();
    assert_eq!(metrics.active_sessions.get(), 1);
    assert_eq!(
        metrics
            .operations_total
            .with_label_values(&["search", "success"])
            .get(),
        1
    );

    drop(client);
    eventually(|| metrics.active_sessions.get() == 0).await;
    harness.stop().await;
}
