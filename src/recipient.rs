use serde::Deserialize;

use crate::encoding::decode_b64_any;
use crate::model::{PushSubscription, SubscriptionKeys};
use crate::report::DeliveryKind;

pub const WEBPUSH_PREFIX: &str = "webpush:";

/// Token shapes from clients that registered before Web Push subscriptions
/// were wrapped as `webpush:` tokens.
const LEGACY_PREFIXES: &[&str] = &["ios-pwa-", "https://"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecipientError {
    #[error("old token format, please re-register for notifications")]
    LegacyFormat,

    #[error("invalid webpush token: {0}")]
    Undecodable(String),

    #[error("incomplete subscription: missing {0}")]
    Incomplete(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recipient<'a> {
    WebPush(PushSubscription),
    Fcm(&'a str),
    Rejected {
        kind: DeliveryKind,
        error: RecipientError,
    },
}

impl Recipient<'_> {
    pub fn kind(&self) -> DeliveryKind {
        match self {
            Recipient::WebPush(_) => DeliveryKind::WebPush,
            Recipient::Fcm(_) => DeliveryKind::Fcm,
            Recipient::Rejected { kind, .. } => *kind,
        }
    }
}

/// Buckets a token by its prefix. Web Push tokens are decoded and checked for
/// completeness here so that no key generation happens for unusable input.
pub fn classify(token: &str) -> Recipient<'_> {
    if let Some(encoded) = token.strip_prefix(WEBPUSH_PREFIX) {
        return match decode_subscription(encoded) {
            Ok(subscription) => Recipient::WebPush(subscription),
            Err(error) => Recipient::Rejected {
                kind: DeliveryKind::WebPush,
                error,
            },
        };
    }

    if LEGACY_PREFIXES.iter().any(|prefix| token.starts_with(prefix)) {
        return Recipient::Rejected {
            kind: DeliveryKind::Invalid,
            error: RecipientError::LegacyFormat,
        };
    }

    Recipient::Fcm(token)
}

#[derive(Deserialize)]
struct RawSubscription {
    endpoint: Option<String>,
    keys: Option<RawKeys>,
}

#[derive(Deserialize)]
struct RawKeys {
    p256dh: Option<String>,
    auth: Option<String>,
}

fn decode_subscription(encoded: &str) -> Result<PushSubscription, RecipientError> {
    let json = decode_b64_any(encoded).map_err(|e| RecipientError::Undecodable(e.to_string()))?;
    let raw: RawSubscription =
        serde_json::from_slice(&json).map_err(|e| RecipientError::Undecodable(e.to_string()))?;

    let endpoint = present(raw.endpoint).ok_or(RecipientError::Incomplete("endpoint"))?;
    let keys = raw.keys.ok_or(RecipientError::Incomplete("keys"))?;
    let p256dh = present(keys.p256dh).ok_or(RecipientError::Incomplete("keys.p256dh"))?;
    let auth = present(keys.auth).ok_or(RecipientError::Incomplete("keys.auth"))?;

    Ok(PushSubscription {
        endpoint,
        keys: SubscriptionKeys { p256dh, auth },
    })
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Wraps a subscription as a recipient token.
pub fn webpush_token(subscription: &PushSubscription) -> Result<String, serde_json::Error> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    Ok(format!(
        "{}{}",
        WEBPUSH_PREFIX,
        STANDARD.encode(serde_json::to_vec(subscription)?)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::json;

    fn token(value: serde_json::Value) -> String {
        format!("{}{}", WEBPUSH_PREFIX, STANDARD.encode(value.to_string()))
    }

    #[test]
    fn webpush_prefix_is_web_push() {
        let subscription = PushSubscription {
            endpoint: "https://push.example/ep1".to_string(),
            keys: SubscriptionKeys {
                p256dh: "BCVxsr7N".to_string(),
                auth: "BTBZMqHH6r4Tts7J_aSIgg".to_string(),
            },
        };
        let token = webpush_token(&subscription).unwrap();

        assert_eq!(classify(&token), Recipient::WebPush(subscription));
    }

    #[test]
    fn legacy_formats_are_rejected() {
        for token in ["ios-pwa-xyz", "https://fcm.googleapis.com/fcm/send/abc"] {
            let recipient = classify(token);
            assert_eq!(
                recipient,
                Recipient::Rejected {
                    kind: DeliveryKind::Invalid,
                    error: RecipientError::LegacyFormat,
                }
            );
        }
        assert!(RecipientError::LegacyFormat.to_string().contains("old"));
    }

    #[test]
    fn bare_tokens_are_fcm() {
        let token = "fMEGr0x1:APA91bHunvzW2longtoken";

        assert_eq!(classify(token), Recipient::Fcm(token));
        assert_eq!(classify(token).kind(), DeliveryKind::Fcm);
    }

    #[test]
    fn missing_auth_is_incomplete() {
        let token = token(json!({
            "endpoint": "https://push.example/ep1",
            "keys": {"p256dh": "BCVxsr7N"}
        }));

        assert_eq!(
            classify(&token),
            Recipient::Rejected {
                kind: DeliveryKind::WebPush,
                error: RecipientError::Incomplete("keys.auth"),
            }
        );
    }

    #[test]
    fn empty_fields_are_incomplete() {
        let blank_endpoint = token(json!({
            "endpoint": "",
            "keys": {"p256dh": "BCVxsr7N", "auth": "abc"}
        }));

        assert!(matches!(
            classify(&blank_endpoint),
            Recipient::Rejected {
                error: RecipientError::Incomplete("endpoint"),
                ..
            }
        ));

        let no_keys = token(json!({"endpoint": "https://push.example/ep1"}));
        assert!(matches!(
            classify(&no_keys),
            Recipient::Rejected {
                error: RecipientError::Incomplete("keys"),
                ..
            }
        ));
    }

    #[test]
    fn garbage_after_prefix_is_undecodable() {
        assert!(matches!(
            classify("webpush:%%%"),
            Recipient::Rejected {
                error: RecipientError::Undecodable(_),
                ..
            }
        ));

        let not_json = format!("{}{}", WEBPUSH_PREFIX, STANDARD.encode("hello"));
        assert!(matches!(
            classify(&not_json),
            Recipient::Rejected {
                error: RecipientError::Undecodable(_),
                ..
            }
        ));
    }
}
