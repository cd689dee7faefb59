// src/metrics/exporter.rs
use super::MetricsRegistry;
use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Serves the Prometheus text exposition at `path` on a background task.
///
/// Returns the bound address, which differs from `addr` when it asks for an
/// ephemeral port.
pub async fn start_metrics_server(
    addr: SocketAddr,
    registry: Arc<MetricsRegistry>,
    path: String,
) -> Result<SocketAddr> {
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    if req.uri().path() == path.as_str() {
                        let mut response = Response::new(Body::from(registry.gather()));
                        response.headers_mut().insert(
                            CONTENT_TYPE,
                            HeaderValue::from_static("text/plain; version=0.0.4"),
                        );
                        Ok::<_, Infallible>(response)
                    } else {
                        let mut response = Response::new(Body::from("Not Found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        Ok::<_, Infallible>(response)
                    }
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics server to {}", addr))?
        .serve(make_service);
    let bound = server.local_addr();

    info!(
        "Metrics server listening on http://{}{}",
        bound,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Client;

    #[tokio::test]
    async fn serves_exposition_on_configured_path() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        registry.collector().session_opened();

        let addr = start_metrics_server(([127, 0, 0, 1], 0).into(), registry, "/metrics".into())
            .await
            .unwrap();
        let client = Client::new();

        let uri = format!("http://{}/metrics", addr).parse().unwrap();
        let response = client.get(uri).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("ldap_proxy_active_sessions 1"));

        let uri = format!("http://{}/other", addr).parse().unwrap();
        let response = client.get(uri).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
