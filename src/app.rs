use std::net::SocketAddr;

use axum::{middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::rate_limit::{rate_limit_api, rate_limit_auth, rate_limit_profile};
use crate::state::AppState;
use crate::{auth, contacts, users};

pub fn build_app(state: AppState) -> Router {
    let auth_routes = auth::router()
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_auth));
    let profile_routes = users::profile_router()
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_profile));
    let api_routes = contacts::router()
        .merge(users::account_router())
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_api));

    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(auth_routes)
                .merge(profile_routes)
                .merge(api_routes)
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
