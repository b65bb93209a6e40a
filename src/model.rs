use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A browser's Web Push registration, as produced by `PushManager.subscribe()`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Notification fields forwarded to every recipient. For Web Push this is the
/// exact JSON the service worker receives.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl NotificationPayload {
    pub fn new(title: &str, body: &str) -> Self {
        NotificationPayload {
            title: title.to_string(),
            body: body.to_string(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    /// Click target carried in `data.url` or `data.link`.
    pub fn link(&self) -> Option<&str> {
        let data = self.data.as_ref()?;

        data.get("url")
            .or_else(|| data.get("link"))
            .and_then(Value::as_str)
    }
}

/// Body of `POST /send`. Fields are optional so that validation can produce a
/// specific message instead of a generic deserialization failure.
#[derive(Deserialize, Debug, Default)]
pub struct SendRequest {
    #[serde(default)]
    pub tokens: Option<Vec<String>>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

impl SendRequest {
    pub fn validate(self) -> Result<(Vec<String>, NotificationPayload), &'static str> {
        let tokens = match self.tokens {
            Some(tokens) if !tokens.is_empty() => tokens,
            _ => return Err("tokens must be a non-empty array"),
        };

        let title = self.title.filter(|t| !t.is_empty()).ok_or("title is required")?;
        let body = self.body.filter(|b| !b.is_empty()).ok_or("body is required")?;

        let mut payload = NotificationPayload::new(&title, &body);
        payload.data = self.data;

        Ok((tokens, payload))
    }
}
