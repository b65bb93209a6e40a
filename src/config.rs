use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

use crate::webpush::DEFAULT_TTL_SECONDS;

const DEFAULT_VAPID_SUBJECT: &str = "mailto:admin@localhost";
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_EMAIL_FROM: &str = "onboarding@resend.dev";

pub struct VapidSettings {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

pub struct FirebaseSettings {
    pub service_account: String,
    pub project_id: Option<String>,
}

pub struct EmailSettings {
    pub api_key: String,
    pub from: String,
}

/// Runtime configuration. Secrets that are absent leave their channel
/// unconfigured instead of failing startup.
pub struct Config {
    pub port: Option<u16>,
    pub vapid: Option<VapidSettings>,
    pub firebase: Option<FirebaseSettings>,
    pub email: Option<EmailSettings>,
    pub ttl: u32,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let vapid = match (var("VAPID_PUBLIC_KEY"), var("VAPID_PRIVATE_KEY")) {
            (Some(public_key), Some(private_key)) => Some(VapidSettings {
                public_key,
                private_key,
                subject: var("VAPID_SUBJECT")
                    .unwrap_or_else(|| DEFAULT_VAPID_SUBJECT.to_string()),
            }),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "Only one of VAPID_PUBLIC_KEY and VAPID_PRIVATE_KEY is set; Web Push is disabled."
                );
                None
            }
        };

        let firebase = var("FIREBASE_SERVICE_ACCOUNT").map(|service_account| FirebaseSettings {
            service_account,
            project_id: var("FIREBASE_PROJECT_ID"),
        });

        let email = var("RESEND_API_KEY").map(|api_key| EmailSettings {
            api_key,
            from: var("EMAIL_FROM").unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
        });

        let timeout_seconds = parse(&var, "PUSH_TIMEOUT_SECONDS")?.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        let concurrency: usize = parse(&var, "PUSH_CONCURRENCY")?.unwrap_or(DEFAULT_CONCURRENCY);

        Ok(Config {
            port: parse(&var, "PORT")?,
            vapid,
            firebase,
            email,
            ttl: parse(&var, "PUSH_TTL_SECONDS")?.unwrap_or(DEFAULT_TTL_SECONDS),
            timeout: Duration::from_secs(timeout_seconds),
            concurrency: concurrency.max(1),
        })
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("Could not parse {} from {:?}.", name, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config(&[]).unwrap();

        assert!(config.vapid.is_none());
        assert!(config.firebase.is_none());
        assert!(config.email.is_none());
        assert_eq!(config.port, None);
        assert_eq!(config.ttl, 86_400);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn reads_secrets() {
        let config = config(&[
            ("VAPID_PUBLIC_KEY", "pub"),
            ("VAPID_PRIVATE_KEY", " priv "),
            ("FIREBASE_SERVICE_ACCOUNT", "{}"),
            ("FIREBASE_PROJECT_ID", "demo"),
            ("PORT", "9000"),
        ])
        .unwrap();

        let vapid = config.vapid.unwrap();
        assert_eq!(vapid.private_key, "priv");
        assert_eq!(vapid.subject, "mailto:admin@localhost");
        assert_eq!(config.firebase.unwrap().project_id.as_deref(), Some("demo"));
        assert_eq!(config.port, Some(9000));
    }

    #[test]
    fn half_a_vapid_pair_disables_web_push() {
        let config = config(&[("VAPID_PUBLIC_KEY", "pub")]).unwrap();

        assert!(config.vapid.is_none());
    }

    #[test]
    fn blank_values_count_as_missing() {
        let config = config(&[("FIREBASE_SERVICE_ACCOUNT", "   ")]).unwrap();

        assert!(config.firebase.is_none());
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(config(&[("PORT", "eighty")]).is_err());
        assert!(config(&[("PUSH_TTL_SECONDS", "-1")]).is_err());
    }

    #[test]
    fn concurrency_is_at_least_one() {
        let config = config(&[("PUSH_CONCURRENCY", "0")]).unwrap();

        assert_eq!(config.concurrency, 1);
    }
}
