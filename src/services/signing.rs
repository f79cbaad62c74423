//! HMAC-SHA256 signing and verification for the dev store's URLs.
//!
//! Signed URLs carry their authorization in query parameters:
//! `expires` (unix seconds), the scoped `content-type` and `max-size`
//! for uploads, and `sig`, the hex HMAC over a canonical string of
//! method, key, scope, and expiry. Verification checks expiry first,
//! then compares signatures in constant time.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signed url has expired")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
    #[error("malformed signature")]
    Malformed,
}

/// Single-key signer. The secret comes from configuration and is shared
/// by URL generation and the store's verifying endpoints.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length")
    }

    fn upload_payload(key: &str, content_type: &str, max_size: Option<u64>, expires: i64) -> String {
        let max = max_size.map_or_else(|| "-".to_string(), |n| n.to_string());
        format!("PUT\n{key}\n{content_type}\n{max}\n{expires}")
    }

    fn read_payload(key: &str, expires: i64) -> String {
        format!("GET\n{key}\n{expires}")
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, payload: &str, sig_hex: &str) -> Result<(), SignatureError> {
        let sig = hex::decode(sig_hex).map_err(|_| SignatureError::Malformed)?;
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| SignatureError::Mismatch)
    }

    /// Hex signature scoping an upload to key, content type, size cap,
    /// and expiry.
    pub fn sign_upload(
        &self,
        key: &str,
        content_type: &str,
        max_size: Option<u64>,
        expires: i64,
    ) -> String {
        self.sign(&Self::upload_payload(key, content_type, max_size, expires))
    }

    pub fn verify_upload(
        &self,
        key: &str,
        content_type: &str,
        max_size: Option<u64>,
        expires: i64,
        sig_hex: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        if expires < now.timestamp() {
            return Err(SignatureError::Expired);
        }
        self.verify(
            &Self::upload_payload(key, content_type, max_size, expires),
            sig_hex,
        )
    }

    /// Hex signature scoping a read to key and expiry.
    pub fn sign_read(&self, key: &str, expires: i64) -> String {
        self.sign(&Self::read_payload(key, expires))
    }

    pub fn verify_read(
        &self,
        key: &str,
        expires: i64,
        sig_hex: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        if expires < now.timestamp() {
            return Err(SignatureError::Expired);
        }
        self.verify(&Self::read_payload(key, expires), sig_hex)
    }
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("test-secret")
    }

    #[test]
    fn upload_signature_roundtrip() {
        let s = signer();
        let expires = Utc::now().timestamp() + 60;
        let sig = s.sign_upload("images/a.png", "image/png", Some(1024), expires);
        assert!(
            s.verify_upload("images/a.png", "image/png", Some(1024), expires, &sig, Utc::now())
                .is_ok()
        );
    }

    #[test]
    fn expired_signature_is_rejected() {
        let s = signer();
        let expires = Utc::now().timestamp() - 1;
        let sig = s.sign_upload("images/a.png", "image/png", None, expires);
        assert_eq!(
            s.verify_upload("images/a.png", "image/png", None, expires, &sig, Utc::now()),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn tampered_scope_is_rejected() {
        let s = signer();
        let expires = Utc::now().timestamp() + 60;
        let sig = s.sign_upload("images/a.png", "image/png", Some(1024), expires);
        // different key
        assert_eq!(
            s.verify_upload("images/b.png", "image/png", Some(1024), expires, &sig, Utc::now()),
            Err(SignatureError::Mismatch)
        );
        // lifted size cap
        assert_eq!(
            s.verify_upload("images/a.png", "image/png", None, expires, &sig, Utc::now()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn read_and_upload_signatures_are_distinct() {
        let s = signer();
        let expires = Utc::now().timestamp() + 60;
        let sig = s.sign_read("images/a.png", expires);
        assert_eq!(
            s.verify_upload("images/a.png", "image/png", None, expires, &sig, Utc::now()),
            Err(SignatureError::Mismatch)
        );
    }
}
