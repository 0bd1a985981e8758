use std::net::SocketAddr;

use axum::{
    http::{HeaderName, Request, Uri},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::field::Empty;

use crate::{ai, auth, error::AppError, health, state::AppState, todos};

const REQUEST_ID: &str = "x-request-id";

async fn not_found(uri: Uri) -> AppError {
    tracing::debug!(%uri, "no route matched");
    AppError::NotFound("route")
}

/// Mounts every resource router. axum refuses to merge two handlers for the
/// same method and path, so a shadowed route fails at startup.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/auth", auth::router())
        .merge(todos::router())
        .merge(ai::router())
        .fallback(not_found)
}

pub fn build_app(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID);

    routes()
        .with_state(state)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    let request_id = req
                        .headers()
                        .get(REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-")
                        .to_string();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        %request_id,
                        status = Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[test]
    fn routes_compose_without_overlap() {
        let _ = build_app(AppState::fake());
    }

    #[test]
    fn overlapping_routes_are_rejected() {
        let result = std::panic::catch_unwind(|| {
            routes().merge(Router::new().route("/health", get(|| async { "shadow" })))
        });
        assert!(result.is_err());
    }
}
