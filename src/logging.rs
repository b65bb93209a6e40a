use std::fmt::Display;

use anyhow::anyhow;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

const LOG_MODULES: &[&str] = &["push_relay", "tower_http"];

/// Installs the global subscriber. `RUST_LOG` replaces the default filter;
/// `LOG_JSON` switches to Stackdriver-formatted JSON lines.
pub fn init_logging() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let mut filter = EnvFilter::default();
            for module in LOG_MODULES {
                filter = filter.add_directive(format!("{}=info", module).parse()?);
            }
            filter
        }
    };

    if std::env::var("LOG_JSON").is_ok() {
        tracing_log::LogTracer::init()?;
        let subscriber = Registry::default()
            .with(env_filter)
            .with(tracing_stackdriver::layer());

        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init()
            .map_err(|e| anyhow!("Could not set up global logger: {}", e))?;
    }

    Ok(())
}

/// Error returned from handlers, rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl ToString) -> Self {
        ApiError {
            status,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type WebResult<T> = std::result::Result<T, ApiError>;

pub trait LogError<T> {
    fn log_error_bad_request(self) -> WebResult<T>;
    fn log_error_bad_gateway(self) -> WebResult<T>;
}

impl<T, E> LogError<T> for Result<T, E>
where
    E: Display,
{
    fn log_error_bad_request(self) -> WebResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(error) => {
                tracing::warn!(%error, "Rejected request.");

                Err(ApiError::new(StatusCode::BAD_REQUEST, error))
            }
        }
    }

    fn log_error_bad_gateway(self) -> WebResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(error) => {
                tracing::error!(%error, "Upstream call failed.");

                Err(ApiError::new(StatusCode::BAD_GATEWAY, error))
            }
        }
    }
}
