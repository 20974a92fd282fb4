//! Liveness endpoint polled by the registry's health check.

use std::future::Future;

use axum::{Router, http::StatusCode, routing::any, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use miniservice_core::{Error, HEALTH_PATH};

/// `/health` answers every method with 200. `/metrics` is mounted only when
/// a Prometheus handle is supplied.
pub fn router(metrics: Option<PrometheusHandle>) -> Router {
    let mut app = Router::new().route(HEALTH_PATH, any(health));
    if let Some(handle) = metrics {
        app = app.route(
            "/metrics",
            get(move || {
                let rendered = handle.render();
                async move { rendered }
            }),
        );
    }
    app.layer(TraceLayer::new_for_http())
}

async fn health() -> StatusCode {
    tracing::debug!("health probe");
    metrics::counter!("miniservice_health_probes_total").increment(1);
    StatusCode::OK
}

/// Serves the probe until `shutdown` resolves. The listener is closed when
/// this returns.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::network("failed serving health check", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn request(addr: std::net::SocketAddr, method: &str, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let req = format!("{method} {path} HTTP/1.1\r\nHost: probe\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn answers_health_with_ok_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, router(None), async {
            let _ = stopped.await;
        }));

        assert!(request(addr, "GET", "/health").await.starts_with("HTTP/1.1 200"));
        assert!(request(addr, "POST", "/health").await.starts_with("HTTP/1.1 200"));
        assert!(request(addr, "GET", "/metrics").await.starts_with("HTTP/1.1 404"));

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
