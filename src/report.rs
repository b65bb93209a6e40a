use serde::Serialize;

/// Characters of a recipient token kept in results and logs.
const TOKEN_PREFIX_CHARS: usize = 20;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    WebPush,
    Fcm,
    Invalid,
}

#[derive(Serialize, Debug, Clone)]
pub struct DeliveryResult {
    pub token: String,
    pub success: bool,

    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set when the push service answered 410 Gone.
    pub expired: bool,

    #[serde(rename = "type")]
    pub kind: DeliveryKind,
}

impl DeliveryResult {
    pub fn sent(token: &str, kind: DeliveryKind, message_id: Option<String>) -> Self {
        DeliveryResult {
            token: truncate_token(token),
            success: true,
            message_id,
            error: None,
            expired: false,
            kind,
        }
    }

    pub fn failed(token: &str, kind: DeliveryKind, error: impl ToString) -> Self {
        DeliveryResult {
            token: truncate_token(token),
            success: false,
            message_id: None,
            error: Some(error.to_string()),
            expired: false,
            kind,
        }
    }

    pub fn expired(token: &str, kind: DeliveryKind, error: impl ToString) -> Self {
        DeliveryResult {
            expired: true,
            ..Self::failed(token, kind, error)
        }
    }
}

#[derive(Serialize, Debug)]
pub struct DeliveryReport {
    pub success: bool,
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<DeliveryResult>,
    pub errors: Vec<String>,
}

impl DeliveryReport {
    pub fn collect(results: Vec<DeliveryResult>) -> Self {
        let errors: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| format!("{}: {}", r.token, r.error.as_deref().unwrap_or("unknown error")))
            .collect();
        let failed = errors.len();

        DeliveryReport {
            success: errors.is_empty(),
            sent: results.len() - failed,
            failed,
            results,
            errors,
        }
    }
}

pub fn truncate_token(token: &str) -> String {
    let mut chars = token.chars();
    let prefix: String = chars.by_ref().take(TOKEN_PREFIX_CHARS).collect();

    if chars.next().is_some() {
        format!("{}...", prefix)
    } else {
        prefix
    }
}
