use serde::{Deserialize, Serialize};

use crate::config::EmailSettings;
use crate::transport::{OutboundRequest, Transport, TransportError};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("could not encode e-mail: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("e-mail provider returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Addresses {
    One(String),
    Many(Vec<String>),
}

impl Addresses {
    fn is_empty(&self) -> bool {
        match self {
            Addresses::One(address) => address.trim().is_empty(),
            Addresses::Many(addresses) => addresses.iter().all(|a| a.trim().is_empty()),
        }
    }
}

/// Body of `POST /send-email`.
#[derive(Deserialize, Debug, Default)]
pub struct EmailRequest {
    #[serde(default)]
    pub to: Option<Addresses>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl EmailRequest {
    pub fn validate(self) -> Result<EmailMessage, &'static str> {
        let to = self
            .to
            .filter(|to| !to.is_empty())
            .ok_or("to is required")?;
        let subject = self
            .subject
            .filter(|s| !s.trim().is_empty())
            .ok_or("subject is required")?;
        if self.html.is_none() && self.text.is_none() {
            return Err("html or text is required");
        }

        Ok(EmailMessage {
            to,
            subject,
            html: self.html,
            text: self.text,
        })
    }
}

pub struct EmailMessage {
    pub to: Addresses,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

#[derive(Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: &'a Addresses,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Deserialize)]
struct ResendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Forwards e-mail to the Resend API.
pub struct Mailer {
    api_key: String,
    from: String,
}

impl Mailer {
    pub fn new(settings: &EmailSettings) -> Self {
        Mailer {
            api_key: settings.api_key.clone(),
            from: settings.from.clone(),
        }
    }

    /// Returns the provider's message id, when it sends one.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        message: &EmailMessage,
    ) -> Result<Option<String>, EmailError> {
        let body = ResendEmail {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            html: message.html.as_deref(),
            text: message.text.as_deref(),
        };
        let request = OutboundRequest::json(RESEND_API_URL, &body)?
            .header("Authorization", format!("Bearer {}", self.api_key));

        let response = transport.post(request).await?;
        if !response.is_success() {
            return Err(EmailError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        Ok(serde_json::from_str::<ResendResponse>(&response.body)
            .ok()
            .and_then(|sent| sent.id))
    }
}
