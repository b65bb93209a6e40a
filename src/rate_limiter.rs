use axum::{
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use serde_json::json;
use std::sync::Arc;
use tower::{Layer, Service};

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// Above this many tracked clients, idle entries are swept on the next request.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Drops clients whose quota has fully replenished. Returns how many remain.
fn forget_idle_clients(rate_limiter: &KeyedLimiter, max_tracked: usize) -> usize {
    if rate_limiter.len() > max_tracked {
        rate_limiter.retain_recent();
        rate_limiter.shrink_to_fit();
        tracing::debug!(tracked = rate_limiter.len(), "Swept idle rate limiter entries.");
    }
    rate_limiter.len()
}

/// Per-client limit keyed on `x-forwarded-for`. Clones share one limiter.
#[derive(Clone)]
pub struct RateLimiterLayer {
    rate_limiter: Arc<KeyedLimiter>,
    quota: Quota,
}

impl RateLimiterLayer {
    pub fn new(quota: Quota) -> Self {
        RateLimiterLayer {
            rate_limiter: Arc::new(RateLimiter::dashmap(quota)),
            quota,
        }
    }
}

impl<S> Layer<S> for RateLimiterLayer {
    type Service = RateLimiterMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimiterMiddleware {
            rate_limiter: self.rate_limiter.clone(),
            inner,
            quota: self.quota,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiterMiddleware<S> {
    rate_limiter: Arc<KeyedLimiter>,
    inner: S,
    quota: Quota,
}

impl<S, ReqBody> Service<Request<ReqBody>> for RateLimiterMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;

    type Error = S::Error;

    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // https://github.com/tower-rs/tower/issues/547
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let rate_limiter = self.rate_limiter.clone();
        let quota = self.quota;

        Box::pin(async move {
            let ip = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|d| d.to_str().ok())
                .and_then(|d| d.split(',').next())
                .map(str::trim)
                .unwrap_or("unknown")
                .to_owned();

            forget_idle_clients(&rate_limiter, MAX_TRACKED_CLIENTS);

            if rate_limiter.check_key(&ip).is_err() {
                tracing::warn!(%ip, "Rate limited.");

                let error = format!("Rate limit of API calls exceeded. {:?}", quota);
                return Ok((StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": error })))
                    .into_response());
            }

            inner.call(req).await
        })
    }
}
