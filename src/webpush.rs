use chrono::{DateTime, Utc};

use crate::ece::{self, EceError, SubscriberKeys};
use crate::model::PushSubscription;
use crate::transport::{OutboundRequest, Transport, TransportError};
use crate::vapid::{VapidError, VapidSigner};

pub const DEFAULT_TTL_SECONDS: u32 = 86_400;

#[derive(Debug, thiserror::Error)]
pub enum WebPushError {
    #[error("Web Push not configured (VAPID keys missing)")]
    NotConfigured,

    #[error("could not encode payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Encryption(#[from] EceError),

    #[error(transparent)]
    Vapid(#[from] VapidError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("subscription expired (410 Gone): {body}")]
    Expired { body: String },

    #[error("push service returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl WebPushError {
    pub fn is_expired(&self) -> bool {
        matches!(self, WebPushError::Expired { .. })
    }
}

/// Sends encrypted, VAPID-signed messages to raw Web Push endpoints.
#[derive(Clone)]
pub struct WebPushSender {
    signer: VapidSigner,
    ttl: u32,
}

impl WebPushSender {
    pub fn new(signer: VapidSigner, ttl: u32) -> Self {
        WebPushSender { signer, ttl }
    }

    pub fn public_key(&self) -> &str {
        self.signer.public_key()
    }

    /// Builds the complete request for one subscriber. Subscriber keys are
    /// validated before any key generation takes place.
    pub fn build_request(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<OutboundRequest, WebPushError> {
        let subscriber =
            SubscriberKeys::from_base64(&subscription.keys.p256dh, &subscription.keys.auth)?;
        let authorization = self.signer.authorization(&subscription.endpoint, now)?;
        let body = ece::encrypt(payload, &subscriber)?;

        Ok(OutboundRequest::post(&subscription.endpoint)
            .header("Authorization", authorization)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Encoding", "aes128gcm")
            .header("TTL", self.ttl.to_string())
            .body(body))
    }

    /// Returns the push service's message location, when it sends one.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Result<Option<String>, WebPushError> {
        let request = self.build_request(subscription, payload, Utc::now())?;
        let response = transport.post(request).await?;

        match response.status {
            200 | 201 => Ok(response.location),
            410 => Err(WebPushError::Expired {
                body: response.body,
            }),
            status => Err(WebPushError::Rejected {
                status,
                body: response.body,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_b64url;
    use crate::model::SubscriptionKeys;
    use crate::transport::testing::RecordingTransport;
    use crate::vapid::generate_keys;
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    use p256::SecretKey;
    use rand::rngs::OsRng;

    fn subscription(endpoint: &str) -> PushSubscription {
        let receiver = SecretKey::random(&mut OsRng);
        PushSubscription {
            endpoint: endpoint.to_string(),
            keys: SubscriptionKeys {
                p256dh: encode_b64url(receiver.public_key().to_encoded_point(false).as_bytes()),
                auth: encode_b64url(&[9u8; 16]),
            },
        }
    }

    fn sender() -> WebPushSender {
        let (public, private) = generate_keys();
        let signer = VapidSigner::new(&public, &private, "mailto:ops@example.com").unwrap();
        WebPushSender::new(signer, DEFAULT_TTL_SECONDS)
    }

    #[test]
    fn request_headers_and_body() {
        let sender = sender();
        let subscription = subscription("https://push.example/ep1");

        let request = sender
            .build_request(&subscription, br#"{"title":"Hi","body":"Test"}"#, Utc::now())
            .unwrap();

        assert_eq!(request.url, "https://push.example/ep1");
        assert_eq!(request.header_value("content-encoding"), Some("aes128gcm"));
        assert_eq!(
            request.header_value("content-type"),
            Some("application/octet-stream")
        );
        assert_eq!(request.header_value("ttl"), Some("86400"));

        let authorization = request.header_value("authorization").unwrap();
        assert!(authorization.starts_with("vapid t="));
        assert!(authorization.ends_with(sender.public_key()));

        assert_eq!(
            request.body[ece::RECORD_SIZE_OFFSET..ece::KEY_ID_LEN_OFFSET],
            [0u8, 0, 0x10, 0]
        );
        assert_eq!(request.body[ece::KEY_ID_LEN_OFFSET], 0x41);
    }

    #[test]
    fn bad_keys_fail_before_signing() {
        let sender = sender();
        let mut subscription = subscription("not a url");
        subscription.keys.auth = "AAAA".to_string();

        let err = sender
            .build_request(&subscription, b"{}", Utc::now())
            .unwrap_err();

        assert!(matches!(
            err,
            WebPushError::Encryption(EceError::IncompleteSubscription(_))
        ));
    }

    #[tokio::test]
    async fn plain_http_endpoint_is_never_contacted() {
        let transport = RecordingTransport::always(201, "");

        let err = sender()
            .send(&transport, &subscription("http://10.0.0.5/internal"), b"{}")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WebPushError::Vapid(VapidError::InvalidEndpoint(_))
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn gone_is_expired() {
        let transport = RecordingTransport::always(410, "push subscription has unsubscribed");

        let err = sender()
            .send(&transport, &subscription("https://push.example/ep1"), b"{}")
            .await
            .unwrap_err();

        assert!(err.is_expired());
        assert!(err.to_string().contains("410"));
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn server_error_is_not_expired() {
        let transport = RecordingTransport::always(500, "internal error");

        let err = sender()
            .send(&transport, &subscription("https://push.example/ep1"), b"{}")
            .await
            .unwrap_err();

        assert!(!err.is_expired());
        assert_eq!(err.to_string(), "push service returned 500: internal error");
    }

    #[tokio::test]
    async fn created_is_success() {
        let transport = RecordingTransport::always(201, "");

        let result = sender()
            .send(&transport, &subscription("https://push.example/ep1"), b"{}")
            .await;

        assert!(result.is_ok());
        assert_eq!(transport.requests().len(), 1);
    }
}
