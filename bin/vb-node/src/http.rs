//! Prometheus scrape endpoint.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn render(registry: &Registry) -> Response<Body> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => Response::builder()
            .status(200)
            .header(hyper::header::CONTENT_TYPE, encoder.format_type())
            .body(Body::from(buffer))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            Response::builder()
                .status(500)
                .body(Body::from(e.to_string()))
                .unwrap_or_else(|_| Response::new(Body::empty()))
        }
    }
}

fn route(registry: &Registry, req: &Request<Body>) -> Response<Body> {
    match req.uri().path() {
        "/metrics" => render(registry),
        _ => Response::builder()
            .status(404)
            .body(Body::from("Not Found"))
            .unwrap_or_else(|_| Response::new(Body::empty())),
    }
}

/// Serve `/metrics` until `shutdown` is cancelled.
pub async fn serve_metrics(
    registry: Registry,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = route(&registry, &req);
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(%addr, "Metrics endpoint listening");
    server
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntCounter;

    #[test]
    fn test_metrics_route_renders_registry() {
        let registry = Registry::new();
        let counter = IntCounter::new("vb_test_total", "test counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let req = Request::get("/metrics").body(Body::empty()).unwrap();
        let response = route(&registry, &req);
        assert_eq!(response.status(), 200);
    }

    #[test]
    fn test_unknown_route_is_404() {
        let registry = Registry::new();
        let req = Request::get("/other").body(Body::empty()).unwrap();
        assert_eq!(route(&registry, &req).status(), 404);
    }
}
