use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use governor::Quota;
use nonzero_ext::nonzero;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    email::EmailRequest,
    logging::{ApiError, LogError, WebResult},
    model::SendRequest,
    rate_limiter::RateLimiterLayer,
    report::DeliveryReport,
    server_state::ServerState,
    transport::HttpTransport,
};

const SERVICE_NAME: &str = "push-relay";
const DEFAULT_PORT: u16 = 8080;

async fn health(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "webpush": state.dispatcher.webpush_enabled(),
        "fcm": state.dispatcher.fcm_enabled(),
    }))
}

async fn vapid_public_key(State(state): State<ServerState>) -> WebResult<Json<Value>> {
    let public_key = state.dispatcher.vapid_public_key().ok_or_else(|| {
        ApiError::new(StatusCode::NOT_FOUND, "Web Push not configured (VAPID keys missing)")
    })?;

    Ok(Json(json!({ "publicKey": public_key })))
}

async fn send(
    State(state): State<ServerState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> WebResult<Json<DeliveryReport>> {
    let Json(request) = body.log_error_bad_request()?;
    let (tokens, notification) = request.validate().log_error_bad_request()?;

    tracing::info!(recipients = tokens.len(), "Dispatching notification.");
    let report = state.dispatcher.dispatch(&tokens, &notification).await;

    Ok(Json(report))
}

async fn send_email(
    State(state): State<ServerState>,
    body: Result<Json<EmailRequest>, JsonRejection>,
) -> WebResult<Json<Value>> {
    let mailer = state.mailer.as_ref().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Email not configured (RESEND_API_KEY missing)",
        )
    })?;

    let Json(request) = body.log_error_bad_request()?;
    let message = request.validate().log_error_bad_request()?;

    let id = mailer
        .send(state.transport.as_ref(), &message)
        .await
        .log_error_bad_gateway()?;

    Ok(Json(json!({ "success": true, "id": id })))
}

pub fn router(state: ServerState) -> Router {
    let quota = Quota::per_second(nonzero!(10u32)).allow_burst(nonzero!(30u32));

    Router::new()
        .route("/health", get(health))
        .route("/vapid-public-key", get(vapid_public_key))
        .route("/send", post(send))
        .route("/send-email", post(send_email))
        .layer(RateLimiterLayer::new(quota))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(port: Option<u16>, config: Config) -> anyhow::Result<()> {
    let port = port.or(config.port).unwrap_or(DEFAULT_PORT);

    let transport = Arc::new(HttpTransport::new(config.timeout)?);
    let app = router(ServerState::new(&config, transport));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
