//! `aes128gcm` content coding for Web Push messages.
//!
//! The key schedule follows RFC 8291 §3.4 and the framing follows RFC 8188 §2.
//! Only single-record messages are produced: the whole plaintext plus its
//! padding delimiter must fit in one record of [`RECORD_SIZE`] bytes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::encoding::decode_b64url;

pub const SALT_LEN: usize = 16;
pub const PUBLIC_KEY_LEN: usize = 65;
pub const AUTH_SECRET_LEN: usize = 16;
pub const RECORD_SIZE: u32 = 4096;

const SHARED_SECRET_LEN: usize = 32;
const IKM_LEN: usize = 32;
const CEK_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// Marks the final record. With a single record there is no further padding.
const LAST_RECORD_DELIMITER: u8 = 0x02;

// Envelope header: salt(16) | rs(4, big-endian) | idlen(1) | keyid(65)
pub const SALT_OFFSET: usize = 0;
pub const RECORD_SIZE_OFFSET: usize = SALT_OFFSET + SALT_LEN;
pub const KEY_ID_LEN_OFFSET: usize = RECORD_SIZE_OFFSET + 4;
pub const KEY_ID_OFFSET: usize = KEY_ID_LEN_OFFSET + 1;
pub const HEADER_LEN: usize = KEY_ID_OFFSET + PUBLIC_KEY_LEN;

/// Largest plaintext that fits in one record next to the delimiter and tag.
pub const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - TAG_LEN - 1;

const WEBPUSH_INFO: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

#[derive(Debug, thiserror::Error)]
pub enum EceError {
    #[error("incomplete subscription: {0}")]
    IncompleteSubscription(&'static str),

    #[error("payload too large: {len} bytes exceeds the single-record limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("AES-GCM encryption failed")]
    Encryption,
}

/// Subscriber key material from a push subscription, validated up front.
#[derive(Clone)]
pub struct SubscriberKeys {
    public_key: PublicKey,
    public_bytes: [u8; PUBLIC_KEY_LEN],
    auth: [u8; AUTH_SECRET_LEN],
}

impl SubscriberKeys {
    pub fn from_base64(p256dh: &str, auth: &str) -> Result<Self, EceError> {
        let p256dh = decode_b64url(p256dh)
            .map_err(|_| EceError::IncompleteSubscription("keys.p256dh is not valid base64url"))?;
        let auth = decode_b64url(auth)
            .map_err(|_| EceError::IncompleteSubscription("keys.auth is not valid base64url"))?;

        Self::from_bytes(&p256dh, &auth)
    }

    pub fn from_bytes(p256dh: &[u8], auth: &[u8]) -> Result<Self, EceError> {
        let public_bytes = uncompressed_point(p256dh).ok_or(EceError::IncompleteSubscription(
            "keys.p256dh must be a 65-byte uncompressed P-256 point",
        ))?;
        let public_key = PublicKey::from_sec1_bytes(&public_bytes)
            .map_err(|_| EceError::IncompleteSubscription("keys.p256dh is not a point on P-256"))?;
        let auth: [u8; AUTH_SECRET_LEN] = auth
            .try_into()
            .map_err(|_| EceError::IncompleteSubscription("keys.auth must be 16 bytes"))?;

        Ok(SubscriberKeys {
            public_key,
            public_bytes,
            auth,
        })
    }
}

fn uncompressed_point(bytes: &[u8]) -> Option<[u8; PUBLIC_KEY_LEN]> {
    let point: [u8; PUBLIC_KEY_LEN] = bytes.try_into().ok()?;
    (point[0] == UNCOMPRESSED_POINT_TAG).then_some(point)
}

/// Per-message content-encryption key and nonce. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ContentKeys {
    pub cek: [u8; CEK_LEN],
    pub nonce: [u8; NONCE_LEN],
}

/// Derives the CEK and nonce for one message.
///
/// The first stage binds the ECDH output to the auth secret and both public
/// keys, producing the IKM. The second stage expands the IKM with the
/// envelope salt into the CEK and nonce.
pub fn derive_content_keys(
    shared_secret: &[u8],
    auth_secret: &[u8],
    subscriber_public: &[u8],
    ephemeral_public: &[u8],
    salt: &[u8; SALT_LEN],
) -> Result<ContentKeys, EceError> {
    if shared_secret.len() != SHARED_SECRET_LEN {
        return Err(EceError::IncompleteSubscription("ECDH shared secret must be 32 bytes"));
    }
    if auth_secret.len() != AUTH_SECRET_LEN {
        return Err(EceError::IncompleteSubscription("keys.auth must be 16 bytes"));
    }
    if uncompressed_point(subscriber_public).is_none() {
        return Err(EceError::IncompleteSubscription(
            "keys.p256dh must be a 65-byte uncompressed P-256 point",
        ));
    }
    if uncompressed_point(ephemeral_public).is_none() {
        return Err(EceError::KeyDerivation);
    }

    let mut key_info = Vec::with_capacity(WEBPUSH_INFO.len() + 2 * PUBLIC_KEY_LEN);
    key_info.extend_from_slice(WEBPUSH_INFO);
    key_info.extend_from_slice(subscriber_public);
    key_info.extend_from_slice(ephemeral_public);

    let mut ikm = Zeroizing::new([0u8; IKM_LEN]);
    Hkdf::<Sha256>::new(Some(auth_secret), shared_secret)
        .expand(&key_info, ikm.as_mut_slice())
        .map_err(|_| EceError::KeyDerivation)?;

    let content = Hkdf::<Sha256>::new(Some(salt), ikm.as_slice());
    let mut keys = ContentKeys {
        cek: [0u8; CEK_LEN],
        nonce: [0u8; NONCE_LEN],
    };
    content
        .expand(CEK_INFO, &mut keys.cek)
        .map_err(|_| EceError::KeyDerivation)?;
    content
        .expand(NONCE_INFO, &mut keys.nonce)
        .map_err(|_| EceError::KeyDerivation)?;

    Ok(keys)
}

/// Encrypts `plaintext` for one subscriber with a fresh ephemeral key pair and
/// salt, returning the complete request body.
pub fn encrypt(plaintext: &[u8], subscriber: &SubscriberKeys) -> Result<Vec<u8>, EceError> {
    let ephemeral = SecretKey::random(&mut OsRng);
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    seal(plaintext, subscriber, &ephemeral, &salt)
}

fn seal(
    plaintext: &[u8],
    subscriber: &SubscriberKeys,
    ephemeral: &SecretKey,
    salt: &[u8; SALT_LEN],
) -> Result<Vec<u8>, EceError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(EceError::PayloadTooLarge {
            len: plaintext.len(),
            max: MAX_PLAINTEXT_LEN,
        });
    }

    let ephemeral_point = ephemeral.public_key().to_encoded_point(false);
    let key_id: [u8; PUBLIC_KEY_LEN] = ephemeral_point
        .as_bytes()
        .try_into()
        .map_err(|_| EceError::KeyDerivation)?;

    let shared = p256::ecdh::diffie_hellman(
        ephemeral.to_nonzero_scalar(),
        subscriber.public_key.as_affine(),
    );

    let keys = derive_content_keys(
        shared.raw_secret_bytes(),
        &subscriber.auth,
        &subscriber.public_bytes,
        &key_id,
        salt,
    )?;

    let mut record = Zeroizing::new(Vec::with_capacity(plaintext.len() + 1));
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD_DELIMITER);

    let cipher = Aes128Gcm::new_from_slice(&keys.cek).map_err(|_| EceError::Encryption)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&keys.nonce), record.as_slice())
        .map_err(|_| EceError::Encryption)?;

    Ok(assemble_envelope(salt, &key_id, &ciphertext))
}

fn assemble_envelope(
    salt: &[u8; SALT_LEN],
    key_id: &[u8; PUBLIC_KEY_LEN],
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut body = vec![0u8; HEADER_LEN];

    body[SALT_OFFSET..RECORD_SIZE_OFFSET].copy_from_slice(salt);
    body[RECORD_SIZE_OFFSET..KEY_ID_LEN_OFFSET].copy_from_slice(&RECORD_SIZE.to_be_bytes());
    body[KEY_ID_LEN_OFFSET] = PUBLIC_KEY_LEN as u8;
    body[KEY_ID_OFFSET..HEADER_LEN].copy_from_slice(key_id);
    body.extend_from_slice(ciphertext);

    body
}
