use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::model::NotificationPayload;
use crate::transport::{OutboundRequest, Transport, TransportError};

pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const FCM_API_BASE: &str = "https://fcm.googleapis.com/v1/projects";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const DEFAULT_LINK: &str = "/";

/// The fields of a Google service-account key file that the token exchange needs.
#[derive(Deserialize, Clone)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FcmError {
    #[error("Firebase not configured")]
    NotConfigured,

    #[error("invalid Firebase service account: {0}")]
    ServiceAccount(String),

    #[error("could not sign token request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("could not encode request: {0}")]
    Encoding(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("access token exchange returned {status}: {body}")]
    TokenExchange { status: u16, body: String },

    #[error("FCM returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Response(String),
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    assertion: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Clone)]
pub struct FcmClient {
    account: ServiceAccount,
    encoding_key: EncodingKey,
    project_id: String,
}

impl FcmClient {
    /// Parses the service-account JSON. An explicit project id wins over the
    /// one embedded in the key file.
    pub fn from_json(service_account: &str, project_id: Option<&str>) -> Result<Self, FcmError> {
        let account: ServiceAccount = serde_json::from_str(service_account)
            .map_err(|e| FcmError::ServiceAccount(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| FcmError::ServiceAccount(format!("private_key: {}", e)))?;
        let project_id = project_id
            .map(str::to_owned)
            .or_else(|| account.project_id.clone())
            .ok_or_else(|| FcmError::ServiceAccount("no project id".to_string()))?;

        Ok(FcmClient {
            account,
            encoding_key,
            project_id,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn token_uri(&self) -> &str {
        self.account.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }

    /// RS256 JWT-bearer assertion for the `firebase.messaging` scope.
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String, FcmError> {
        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: FCM_SCOPE,
            aud: self.token_uri(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        };

        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    pub async fn access_token(&self, transport: &dyn Transport) -> Result<String, FcmError> {
        let assertion = self.assertion(Utc::now())?;
        let form = serde_urlencoded::to_string(TokenRequest {
            grant_type: JWT_BEARER_GRANT,
            assertion: &assertion,
        })
        .map_err(|e| FcmError::Encoding(e.to_string()))?;

        let request = OutboundRequest::post(self.token_uri())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form.into_bytes());
        let response = transport.post(request).await?;

        if !response.is_success() {
            return Err(FcmError::TokenExchange {
                status: response.status,
                body: response.body,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&response.body).map_err(|e| FcmError::Response(e.to_string()))?;
        Ok(token.access_token)
    }

    /// Sends one message and returns the FCM message name.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        access_token: &str,
        token: &str,
        notification: &NotificationPayload,
    ) -> Result<String, FcmError> {
        let url = format!("{}/{}/messages:send", FCM_API_BASE, self.project_id);
        let request = OutboundRequest::json(&url, &message(token, notification))
            .map_err(|e| FcmError::Encoding(e.to_string()))?
            .header("Authorization", format!("Bearer {}", access_token));

        let response = transport.post(request).await?;

        if !response.is_success() {
            return Err(FcmError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        let sent: SendResponse =
            serde_json::from_str(&response.body).map_err(|e| FcmError::Response(e.to_string()))?;
        Ok(sent.name)
    }
}

/// HTTP v1 message body. FCM only accepts string values in `data`.
pub fn message(token: &str, notification: &NotificationPayload) -> Value {
    let link = notification.link().unwrap_or(DEFAULT_LINK);

    let mut data: Map<String, Value> = notification
        .data
        .iter()
        .flatten()
        .map(|(key, value)| (key.clone(), Value::String(stringify(value))))
        .collect();
    data.insert("click_action".to_string(), Value::String(link.to_string()));
    data.insert("link".to_string(), Value::String(link.to_string()));

    // fcm_options.link must be an absolute HTTPS URL.
    let fcm_options = if link.starts_with("https://") {
        json!({ "link": link })
    } else {
        json!({})
    };

    json!({
        "message": {
            "token": token,
            "notification": {
                "title": notification.title,
                "body": notification.body,
            },
            "data": data,
            "webpush": {
                "notification": {
                    "title": notification.title,
                    "body": notification.body,
                },
                "fcm_options": fcm_options,
            },
        }
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
