//! HMAC session key for user certificates.
//!
//! A user certificate is `base64(HMAC-SHA256(secret, content))` followed by
//! a newline and the content itself. The broker only checks the HMAC; the
//! content is opaque and may be handed to an external verifier.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Certificate verification failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// The certificate has no newline between hash and content.
    #[error("certificate has no hash/content separator")]
    MissingSeparator,

    /// The hash part is not valid base64.
    #[error("certificate hash is not base64")]
    InvalidBase64,

    /// The HMAC does not match the content.
    #[error("certificate hash mismatched")]
    HashMismatch,
}

/// Shared secret used to sign and verify user certificates.
#[derive(Clone)]
pub struct SessionKey {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never log the secret
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

impl SessionKey {
    /// Wrap a secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// Split a certificate into `(hash, content)` at the first newline.
    pub fn split(cert: &str) -> Result<(&str, &str), CertificateError> {
        cert.split_once('\n').ok_or(CertificateError::MissingSeparator)
    }

    fn mac(&self) -> HmacSha256 {
        // INVARIANT: HMAC accepts keys of any length, new_from_slice cannot
        // fail for Hmac<Sha256>
        #[allow(clippy::expect_used)]
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    /// Produce a certificate for `content`.
    #[must_use]
    pub fn generate_certificate(&self, content: &str) -> String {
        let mut mac = self.mac();
        mac.update(content.as_bytes());
        let hash = BASE64.encode(mac.finalize().into_bytes());
        format!("{hash}\n{content}")
    }

    /// Verify a certificate, returning its content on success.
    ///
    /// Comparison is constant-time via `Mac::verify_slice`.
    pub fn verify<'a>(&self, cert: &'a str) -> Result<&'a str, CertificateError> {
        let (hash_str, content) = Self::split(cert)?;
        let hash = BASE64.decode(hash_str).map_err(|_| CertificateError::InvalidBase64)?;
        let mut mac = self.mac();
        mac.update(content.as_bytes());
        mac.verify_slice(&hash).map_err(|_| CertificateError::HashMismatch)?;
        Ok(content)
    }
}
