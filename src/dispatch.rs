use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::Instrument;

use crate::config::Config;
use crate::fcm::{FcmClient, FcmError};
use crate::model::{NotificationPayload, PushSubscription};
use crate::recipient::{classify, Recipient};
use crate::report::{truncate_token, DeliveryReport, DeliveryResult};
use crate::transport::Transport;
use crate::vapid::VapidSigner;
use crate::webpush::{WebPushError, WebPushSender};

/// Fans one notification out to a batch of recipient tokens.
///
/// Either channel may be unconfigured; recipients of that kind then fail
/// individually while the rest of the batch is still delivered.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    webpush: Option<WebPushSender>,
    fcm: Option<FcmClient>,
    concurrency: usize,
}

/// State shared by every recipient of one batch.
struct Batch<'a> {
    notification: &'a NotificationPayload,
    payload: Result<Vec<u8>, String>,
    fcm_access: Option<Result<String, String>>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        webpush: Option<WebPushSender>,
        fcm: Option<FcmClient>,
        concurrency: usize,
    ) -> Self {
        Dispatcher {
            transport,
            webpush,
            fcm,
            concurrency: concurrency.max(1),
        }
    }

    /// Builds both channels from configuration. Unusable credentials are
    /// logged and leave the channel disabled.
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let webpush = config.vapid.as_ref().and_then(|vapid| {
            match VapidSigner::new(&vapid.public_key, &vapid.private_key, &vapid.subject) {
                Ok(signer) => Some(WebPushSender::new(signer, config.ttl)),
                Err(error) => {
                    tracing::warn!(%error, "VAPID keys are unusable; Web Push is disabled.");
                    None
                }
            }
        });

        let fcm = config.firebase.as_ref().and_then(|firebase| {
            match FcmClient::from_json(&firebase.service_account, firebase.project_id.as_deref()) {
                Ok(client) => {
                    tracing::info!(project = client.project_id(), "Using FCM project.");
                    Some(client)
                }
                Err(error) => {
                    tracing::warn!(%error, "Firebase service account is unusable; FCM is disabled.");
                    None
                }
            }
        });

        tracing::info!(
            webpush = webpush.is_some(),
            fcm = fcm.is_some(),
            "Push channels configured."
        );

        Self::new(transport, webpush, fcm, config.concurrency)
    }

    pub fn webpush_enabled(&self) -> bool {
        self.webpush.is_some()
    }

    pub fn fcm_enabled(&self) -> bool {
        self.fcm.is_some()
    }

    pub fn vapid_public_key(&self) -> Option<&str> {
        self.webpush.as_ref().map(WebPushSender::public_key)
    }

    /// Delivers to every token and reports per-token outcomes in input order.
    /// A failing recipient never prevents delivery to the others.
    pub async fn dispatch(
        &self,
        tokens: &[String],
        notification: &NotificationPayload,
    ) -> DeliveryReport {
        let recipients: Vec<(&str, Recipient<'_>)> = tokens
            .iter()
            .map(|token| (token.as_str(), classify(token)))
            .collect();

        let needs_fcm = recipients
            .iter()
            .any(|(_, recipient)| matches!(recipient, Recipient::Fcm(_)));
        let fcm_access = if needs_fcm {
            Some(self.fcm_access().await)
        } else {
            None
        };

        let batch = Batch {
            notification,
            payload: serde_json::to_vec(notification).map_err(|e| e.to_string()),
            fcm_access,
        };

        let batch = &batch;
        let deliveries: Vec<BoxFuture<'_, DeliveryResult>> = recipients
            .into_iter()
            .map(|(token, recipient)| {
                let span = tracing::info_span!(
                    "deliver",
                    token = %truncate_token(token),
                    kind = ?recipient.kind()
                );
                self.deliver(token, recipient, batch).instrument(span).boxed()
            })
            .collect();

        let results = stream::iter(deliveries)
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let report = DeliveryReport::collect(results);
        tracing::info!(sent = report.sent, failed = report.failed, "Batch dispatched.");
        report
    }

    async fn fcm_access(&self) -> Result<String, String> {
        let client = self
            .fcm
            .as_ref()
            .ok_or_else(|| FcmError::NotConfigured.to_string())?;

        client
            .access_token(self.transport.as_ref())
            .await
            .map_err(|error| {
                tracing::error!(%error, "Could not obtain an FCM access token.");
                error.to_string()
            })
    }

    async fn deliver(
        &self,
        token: &str,
        recipient: Recipient<'_>,
        batch: &Batch<'_>,
    ) -> DeliveryResult {
        let kind = recipient.kind();

        let result = match recipient {
            Recipient::Rejected { error, .. } => DeliveryResult::failed(token, kind, error),
            Recipient::WebPush(subscription) => {
                match self.send_webpush(&subscription, batch).await {
                    Ok(message_id) => DeliveryResult::sent(token, kind, message_id),
                    Err(error) if error.is_expired() => DeliveryResult::expired(token, kind, error),
                    Err(error) => DeliveryResult::failed(token, kind, error),
                }
            }
            Recipient::Fcm(fcm_token) => match self.send_fcm(fcm_token, batch).await {
                Ok(name) => DeliveryResult::sent(token, kind, Some(name)),
                Err(error) => DeliveryResult::failed(token, kind, error),
            },
        };

        match &result.error {
            None => tracing::info!("Delivered."),
            Some(error) => tracing::warn!(%error, expired = result.expired, "Delivery failed."),
        }
        result
    }

    async fn send_webpush(
        &self,
        subscription: &PushSubscription,
        batch: &Batch<'_>,
    ) -> Result<Option<String>, WebPushError> {
        let sender = self.webpush.as_ref().ok_or(WebPushError::NotConfigured)?;
        let payload = batch
            .payload
            .as_deref()
            .map_err(|e| WebPushError::Payload(e.clone()))?;

        sender
            .send(self.transport.as_ref(), subscription, payload)
            .await
    }

    async fn send_fcm(&self, token: &str, batch: &Batch<'_>) -> Result<String, String> {
        let (client, access_token) = match (&self.fcm, &batch.fcm_access) {
            (Some(client), Some(Ok(access_token))) => (client, access_token),
            (_, Some(Err(error))) => return Err(error.clone()),
            _ => return Err(FcmError::NotConfigured.to_string()),
        };

        client
            .send(self.transport.as_ref(), access_token, token, batch.notification)
            .await
            .map_err(|e| e.to_string())
    }
}
