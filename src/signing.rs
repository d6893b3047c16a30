//! Time-bounded capability tokens for reading private storage objects.
//!
//! A token is `base64url(bucket/key|exp) . base64url(hmac[..16])`, where the
//! MAC is HMAC-SHA256 over the plain payload. Holding a valid token is enough
//! to read the object until `exp` (unix seconds).

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 16;

/// Nominal lifetime of a playback URL.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(3600);

/// Longest lifetime a token can be issued for. Longer requests are capped.
pub const MAX_URL_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed token")]
    Malformed,

    #[error("Token does not match object")]
    WrongObject,

    #[error("Token expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,
}

#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    default_ttl: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: impl Into<Vec<u8>>, default_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Issue a token for `bucket/key`. Returns the token and its expiry.
    pub fn sign(&self, bucket: &str, key: &str, ttl: Option<Duration>) -> (String, i64) {
        self.sign_at(bucket, key, ttl, chrono::Utc::now().timestamp())
    }

    pub fn sign_at(&self, bucket: &str, key: &str, ttl: Option<Duration>, now: i64) -> (String, i64) {
        let ttl = ttl.unwrap_or(self.default_ttl).min(MAX_URL_TTL);
        let exp = now.saturating_add(ttl.as_secs() as i64);
        let payload = format!("{}/{}|{}", bucket, key, exp);

        let signature = self.mac(payload.as_bytes()).finalize().into_bytes();
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(&signature[..SIGNATURE_LEN])
        );

        (token, exp)
    }

    pub fn verify(&self, bucket: &str, key: &str, token: &str) -> Result<(), SignatureError> {
        self.verify_at(bucket, key, token, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        bucket: &str,
        key: &str,
        token: &str,
        now: i64,
    ) -> Result<(), SignatureError> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(SignatureError::Malformed)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(SignatureError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| SignatureError::Malformed)?;
        if signature.len() != SIGNATURE_LEN {
            return Err(SignatureError::Malformed);
        }

        self.mac(payload.as_bytes())
            .verify_truncated_left(&signature)
            .map_err(|_| SignatureError::InvalidSignature)?;

        let (object, exp) = payload.rsplit_once('|').ok_or(SignatureError::Malformed)?;
        if object != format!("{}/{}", bucket, key) {
            return Err(SignatureError::WrongObject);
        }

        let exp: i64 = exp.parse().map_err(|_| SignatureError::Malformed)?;
        if exp < now {
            return Err(SignatureError::Expired);
        }

        Ok(())
    }

    fn mac(&self, payload: &[u8]) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(payload);
        mac
    }
}
