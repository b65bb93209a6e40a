use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ece::PUBLIC_KEY_LEN;
use crate::encoding::{decode_b64url, encode_b64url};

/// Push services reject tokens that expire more than 24 hours out.
pub const TOKEN_LIFETIME_HOURS: i64 = 24;

const PRIVATE_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum VapidError {
    #[error("invalid VAPID private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid VAPID public key: {0}")]
    InvalidPublicKey(String),

    #[error("VAPID public key does not belong to the private key")]
    KeyMismatch,

    #[error("VAPID subject must be a mailto: or https: URI, got {0:?}")]
    InvalidSubject(String),

    #[error("invalid push endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("could not encode VAPID token: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct JwtHeader {
    typ: &'static str,
    alg: &'static str,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct VapidClaims {
    pub aud: String,
    pub exp: i64,
    pub sub: String,
}

/// Signs RFC 8292 tokens for the application server's identity.
#[derive(Clone)]
pub struct VapidSigner {
    signing_key: SigningKey,
    public_key: String,
    subject: String,
}

impl VapidSigner {
    /// Imports a raw 32-byte P-256 scalar and its uncompressed public point,
    /// both base64url. The public key is checked against the private key so a
    /// mismatched pair fails here rather than at every push service.
    pub fn new(public_key: &str, private_key: &str, subject: &str) -> Result<Self, VapidError> {
        let private_bytes = decode_b64url(private_key)
            .map_err(|e| VapidError::InvalidPrivateKey(e.to_string()))?;
        if private_bytes.len() != PRIVATE_KEY_LEN {
            return Err(VapidError::InvalidPrivateKey(format!(
                "expected {} bytes, got {}",
                PRIVATE_KEY_LEN,
                private_bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&private_bytes)
            .map_err(|_| VapidError::InvalidPrivateKey("not a valid P-256 scalar".to_string()))?;

        let public_bytes =
            decode_b64url(public_key).map_err(|e| VapidError::InvalidPublicKey(e.to_string()))?;
        if public_bytes.len() != PUBLIC_KEY_LEN {
            return Err(VapidError::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LEN,
                public_bytes.len()
            )));
        }
        if signing_key.verifying_key().to_encoded_point(false).as_bytes() != public_bytes.as_slice() {
            return Err(VapidError::KeyMismatch);
        }

        if !(subject.starts_with("mailto:") || subject.starts_with("https:")) {
            return Err(VapidError::InvalidSubject(subject.to_string()));
        }

        Ok(VapidSigner {
            signing_key,
            public_key: encode_b64url(&public_bytes),
            subject: subject.to_string(),
        })
    }

    /// Base64url uncompressed public key, as handed to `PushManager.subscribe()`.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn claims(&self, endpoint: &str, now: DateTime<Utc>) -> Result<VapidClaims, VapidError> {
        Ok(VapidClaims {
            aud: audience(endpoint)?,
            exp: (now + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
            sub: self.subject.clone(),
        })
    }

    /// ES256 JWT scoped to the endpoint's push service.
    pub fn token(&self, endpoint: &str, now: DateTime<Utc>) -> Result<String, VapidError> {
        let header = JwtHeader {
            typ: "JWT",
            alg: "ES256",
        };
        let claims = self.claims(endpoint, now)?;

        let signing_input = format!(
            "{}.{}",
            encode_b64url(&serde_json::to_vec(&header)?),
            encode_b64url(&serde_json::to_vec(&claims)?)
        );
        let signature: Signature = self.signing_key.sign(signing_input.as_bytes());

        Ok(format!("{}.{}", signing_input, encode_b64url(&signature.to_bytes())))
    }

    /// Value for the `Authorization` header of a Web Push request.
    pub fn authorization(&self, endpoint: &str, now: DateTime<Utc>) -> Result<String, VapidError> {
        Ok(format!(
            "vapid t={}, k={}",
            self.token(endpoint, now)?,
            self.public_key
        ))
    }
}

/// Origin of the push endpoint: scheme and host, plus the port when it is not
/// the scheme's default. Push services are only reachable over HTTPS, so any
/// other scheme is refused before a request is built.
pub fn audience(endpoint: &str) -> Result<String, VapidError> {
    let url = Url::parse(endpoint).map_err(|e| VapidError::InvalidEndpoint(e.to_string()))?;

    match url.scheme() {
        "https" if url.host().is_some() => Ok(url.origin().ascii_serialization()),
        scheme => Err(VapidError::InvalidEndpoint(format!(
            "expected an https URL, got scheme {:?}",
            scheme
        ))),
    }
}

/// Fresh key pair as `(public, private)` base64url strings.
pub fn generate_keys() -> (String, String) {
    let signing_key = SigningKey::random(&mut OsRng);
    let public = signing_key.verifying_key().to_encoded_point(false);

    (
        encode_b64url(public.as_bytes()),
        encode_b64url(&signing_key.to_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use p256::ecdsa::{signature::Verifier, VerifyingKey};

    const SUBJECT: &str = "mailto:ops@example.com";

    fn signer() -> VapidSigner {
        let (public, private) = generate_keys();
        VapidSigner::new(&public, &private, SUBJECT).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn decode_part<T: serde::de::DeserializeOwned>(part: &str) -> T {
        serde_json::from_slice(&decode_b64url(part).unwrap()).unwrap()
    }

    #[test]
    fn audience_is_origin_without_path() {
        assert_eq!(
            audience("https://fcm.googleapis.com/fcm/send/abc123").unwrap(),
            "https://fcm.googleapis.com"
        );
        assert_eq!(
            audience("https://updates.push.services.mozilla.com/wpush/v2/gAAA").unwrap(),
            "https://updates.push.services.mozilla.com"
        );
    }

    #[test]
    fn audience_keeps_non_default_port() {
        assert_eq!(
            audience("https://push.example:8443/ep1").unwrap(),
            "https://push.example:8443"
        );
        assert_eq!(audience("https://push.example:443/ep1").unwrap(), "https://push.example");
    }

    #[test]
    fn audience_rejects_non_https_endpoints() {
        assert!(audience("not a url").is_err());
        assert!(audience("mailto:someone@example.com").is_err());
        assert!(audience("http://push.example/ep1").is_err());
        assert!(audience("http://169.254.169.254/latest/meta-data").is_err());
    }

    #[test]
    fn token_claims() {
        let signer = signer();

        let token = signer
            .token("https://fcm.googleapis.com/fcm/send/abc123", now())
            .unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header: serde_json::Value = decode_part(parts[0]);
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["typ"], "JWT");

        let claims: VapidClaims = decode_part(parts[1]);
        assert_eq!(claims.aud, "https://fcm.googleapis.com");
        assert_eq!(claims.sub, SUBJECT);
        assert_eq!(claims.exp - now().timestamp(), 24 * 60 * 60);
    }

    #[test]
    fn expiry_never_exceeds_a_day() {
        let signer = signer();
        let issued = Utc::now();

        let claims = signer.claims("https://push.example/ep1", issued).unwrap();

        assert!(claims.exp > issued.timestamp());
        assert!(claims.exp - issued.timestamp() <= 24 * 60 * 60);
    }

    #[test]
    fn signature_verifies_with_public_key() {
        let signer = signer();
        let token = signer.token("https://push.example/ep1", now()).unwrap();

        let (signing_input, signature) = token.rsplit_once('.').unwrap();
        let signature = Signature::from_slice(&decode_b64url(signature).unwrap()).unwrap();
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&decode_b64url(signer.public_key()).unwrap()).unwrap();

        assert!(verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .is_ok());
    }

    #[test]
    fn authorization_header_format() {
        let signer = signer();

        let header = signer.authorization("https://push.example/ep1", now()).unwrap();

        assert!(header.starts_with("vapid t="));
        assert!(header.ends_with(&format!(", k={}", signer.public_key())));
    }

    #[test]
    fn rejects_malformed_private_key() {
        let (public, _) = generate_keys();

        assert!(matches!(
            VapidSigner::new(&public, "short", SUBJECT),
            Err(VapidError::InvalidPrivateKey(_))
        ));
        assert!(matches!(
            VapidSigner::new(&public, "not base64!", SUBJECT),
            Err(VapidError::InvalidPrivateKey(_))
        ));
        assert!(matches!(
            VapidSigner::new(&public, &encode_b64url(&[0u8; 32]), SUBJECT),
            Err(VapidError::InvalidPrivateKey(_))
        ));
    }

    #[test]
    fn rejects_mismatched_key_pair() {
        let (public, _) = generate_keys();
        let (_, private) = generate_keys();

        assert!(matches!(
            VapidSigner::new(&public, &private, SUBJECT),
            Err(VapidError::KeyMismatch)
        ));
    }

    #[test]
    fn rejects_bad_subject() {
        let (public, private) = generate_keys();

        assert!(matches!(
            VapidSigner::new(&public, &private, "ops@example.com"),
            Err(VapidError::InvalidSubject(_))
        ));
    }
}
