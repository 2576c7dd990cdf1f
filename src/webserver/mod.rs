use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::{net::SocketAddr, sync::Arc};

use crate::errors::{AggError, Result};

struct State {
    registry: Registry,
}

/// Serve the registry in the Prometheus text format until the process
/// exits.
pub async fn run_webserver(addr: SocketAddr, registry: Registry) -> Result<()> {
    let shared_state = Arc::new(State { registry });

    let app = Router::new()
        .route("/metrics", get(get_metrics))
        .layer(Extension(shared_state));

    tracing::info!("Starting metrics server on {addr:?}");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|err| AggError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))
}

fn render(registry: &Registry) -> prometheus::Result<Vec<u8>> {
    let mut body = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut body)?;
    Ok(body)
}

async fn get_metrics(Extension(state): Extension<Arc<State>>) -> Response {
    match render(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
