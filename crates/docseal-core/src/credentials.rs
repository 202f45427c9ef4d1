//! Signer identities, PIN hashes, and TOTP codes.
//!
//! # Security model
//!
//! - PINs are stored as `pbkdf2_sha256$<iterations>$<salt>$<base64 digest>`
//!   (PBKDF2-HMAC-SHA256, 32-byte digest). The plaintext PIN is never stored.
//! - Digest comparison uses `subtle::ConstantTimeEq`.
//! - TOTP follows RFC 6238: SHA-1, 6 digits, 30-second step, one step of
//!   skew either way. Secrets are stored base32.
//! - Credentials supplied for a signing attempt are zeroized on drop.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use totp_rs::{Algorithm, Secret, TOTP};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::blob::BlobRef;
use crate::error::{CredentialError, VerificationFailure};

/// Algorithm tag of stored PIN hashes.
pub const PIN_HASH_ALGORITHM: &str = "pbkdf2_sha256";

/// Iterations used for new PIN hashes.
pub const DEFAULT_PIN_ITERATIONS: u32 = 600_000;

const PIN_DIGEST_LEN: usize = 32;
const MIN_PIN_LEN: usize = 4;
const MAX_PIN_LEN: usize = 20;

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// A resolved signer, as the identity provider knows them.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signer {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub signature_image_ref: Option<BlobRef>,
    #[serde(default)]
    pub pin_hash: Option<String>,
    #[serde(default)]
    pub totp_secret: Option<String>,
    #[serde(default)]
    pub totp_enabled: bool,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("signature_image_ref", &self.signature_image_ref)
            .field("pin_hash", &self.pin_hash.as_ref().map(|_| "[REDACTED]"))
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "[REDACTED]"))
            .field("totp_enabled", &self.totp_enabled)
            .finish()
    }
}

/// What a signer presents for one signing attempt.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SigningCredentials {
    pub pin: String,
    pub totp_code: Option<String>,
}

impl SigningCredentials {
    #[must_use]
    pub fn new(pin: impl Into<String>, totp_code: Option<String>) -> Self {
        Self {
            pin: pin.into(),
            totp_code,
        }
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("pin", &"[REDACTED]")
            .field("totp_code", &self.totp_code.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Result of checking a signer's credentials. The flags are recorded in the
/// audit log whatever the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub pin_verified: bool,
    pub totp_verified: bool,
    pub failure: Option<VerificationFailure>,
}

impl Verification {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Check a signer's image, PIN, and (when enabled) TOTP code, in that order.
/// Stops at the first failure.
#[must_use]
pub fn verify_signer(signer: &Signer, credentials: &SigningCredentials, unix_time: u64) -> Verification {
    let mut verification = Verification {
        pin_verified: false,
        totp_verified: false,
        failure: None,
    };
    let fail = |mut v: Verification, reason| {
        v.failure = Some(reason);
        v
    };

    if signer.signature_image_ref.is_none() {
        return fail(verification, VerificationFailure::MissingSignatureImage);
    }

    let Some(pin_hash) = signer.pin_hash.as_deref() else {
        return fail(verification, VerificationFailure::CredentialsUnavailable);
    };
    match verify_pin(&credentials.pin, pin_hash) {
        Ok(true) => verification.pin_verified = true,
        Ok(false) => return fail(verification, VerificationFailure::IncorrectPin),
        Err(e) => {
            tracing::warn!(signer = %signer.id, error = %e, "stored PIN hash unusable");
            return fail(verification, VerificationFailure::CredentialsUnavailable);
        }
    }

    if !signer.totp_enabled {
        return verification;
    }
    let Some(code) = credentials.totp_code.as_deref().filter(|c| !c.trim().is_empty()) else {
        return fail(verification, VerificationFailure::MissingTotpCode);
    };
    let Some(secret) = signer.totp_secret.as_deref() else {
        return fail(verification, VerificationFailure::CredentialsUnavailable);
    };
    match verify_totp(secret, code.trim(), unix_time) {
        Ok(true) => {
            verification.totp_verified = true;
            verification
        }
        Ok(false) => fail(verification, VerificationFailure::InvalidTotpCode),
        Err(e) => {
            tracing::warn!(signer = %signer.id, error = %e, "stored TOTP secret unusable");
            fail(verification, VerificationFailure::CredentialsUnavailable)
        }
    }
}

/// Check a PIN against the length policy.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidPin`] if it is too short or too long.
pub fn validate_pin(pin: &str) -> Result<(), CredentialError> {
    let len = pin.chars().count();
    if (MIN_PIN_LEN..=MAX_PIN_LEN).contains(&len) {
        Ok(())
    } else {
        Err(CredentialError::InvalidPin {
            reason: format!("must be {MIN_PIN_LEN} to {MAX_PIN_LEN} characters"),
        })
    }
}

/// Hash a PIN with a random salt and [`DEFAULT_PIN_ITERATIONS`].
///
/// # Errors
///
/// Returns [`CredentialError::InvalidPin`] if the PIN fails the length policy.
pub fn hash_pin(pin: &str) -> Result<String, CredentialError> {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    hash_pin_with(pin, &salt, DEFAULT_PIN_ITERATIONS)
}

/// Hash a PIN with an explicit salt and iteration count.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidPin`] if the PIN fails the length
/// policy, and [`CredentialError::MalformedHash`] for an empty salt, a salt
/// containing `$`, or zero iterations.
pub fn hash_pin_with(pin: &str, salt: &str, iterations: u32) -> Result<String, CredentialError> {
    validate_pin(pin)?;
    if salt.is_empty() || salt.contains('$') || iterations == 0 {
        return Err(CredentialError::MalformedHash {
            reason: "salt must be non-empty without '$' and iterations positive".to_owned(),
        });
    }
    let digest = derive(pin, salt, iterations);
    Ok(format!(
        "{PIN_HASH_ALGORITHM}${iterations}${salt}${}",
        STANDARD.encode(digest)
    ))
}

/// Verify a PIN against a stored hash in constant time.
///
/// # Errors
///
/// Returns [`CredentialError::MalformedHash`] if the stored hash cannot be
/// read.
pub fn verify_pin(pin: &str, encoded: &str) -> Result<bool, CredentialError> {
    let malformed = |reason: &str| CredentialError::MalformedHash {
        reason: reason.to_owned(),
    };
    let mut parts = encoded.splitn(4, '$');
    let (Some(algorithm), Some(iterations), Some(salt), Some(digest)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed("expected algorithm$iterations$salt$digest"));
    };
    if algorithm != PIN_HASH_ALGORITHM {
        return Err(malformed("unsupported algorithm"));
    }
    let iterations: u32 = iterations
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| malformed("bad iteration count"))?;
    let expected = STANDARD
        .decode(digest)
        .map_err(|_| malformed("digest is not base64"))?;
    if expected.len() != PIN_DIGEST_LEN {
        return Err(malformed("digest has the wrong length"));
    }

    let actual = derive(pin, salt, iterations);
    Ok(bool::from(actual.as_slice().ct_eq(&expected)))
}

fn derive(pin: &str, salt: &str, iterations: u32) -> [u8; PIN_DIGEST_LEN] {
    let mut out = [0u8; PIN_DIGEST_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(pin.as_bytes(), salt.as_bytes(), iterations, &mut out);
    out
}

fn totp(secret: &str) -> Result<TOTP, CredentialError> {
    let invalid = |reason: String| CredentialError::InvalidTotpSecret { reason };
    let bytes = Secret::Encoded(secret.trim().to_ascii_uppercase())
        .to_bytes()
        .map_err(|e| invalid(format!("{e:?}")))?;
    TOTP::new(Algorithm::SHA1, TOTP_DIGITS, TOTP_SKEW, TOTP_STEP, bytes)
        .map_err(|e| invalid(e.to_string()))
}

/// Verify a 6-digit code within one step of `unix_time`. Codes that are not
/// exactly six ASCII digits never verify.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidTotpSecret`] if the secret is not
/// base32 or shorter than 128 bits.
pub fn verify_totp(secret: &str, code: &str, unix_time: u64) -> Result<bool, CredentialError> {
    let totp = totp(secret)?;
    if code.len() != TOTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }
    Ok(totp.check(code, unix_time))
}

/// The code valid at `unix_time`.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidTotpSecret`] if the secret is unusable.
pub fn totp_code(secret: &str, unix_time: u64) -> Result<String, CredentialError> {
    Ok(totp(secret)?.generate(unix_time))
}

/// Resolves user ids to signers.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// The signer with this id, if known.
    async fn signer(&self, user_id: &str) -> Option<Signer>;
}

/// In-process identity directory.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    signers: RwLock<BTreeMap<String, Signer>>,
}

impl MemoryIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_signers(signers: impl IntoIterator<Item = Signer>) -> Self {
        Self {
            signers: RwLock::new(signers.into_iter().map(|s| (s.id.clone(), s)).collect()),
        }
    }

    /// Load a JSON array of signers.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the document is not an array of signers.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let signers: Vec<Signer> = serde_json::from_slice(bytes)?;
        Ok(Self::with_signers(signers))
    }

    /// Add or replace a signer.
    pub async fn insert(&self, signer: Signer) {
        self.signers.write().await.insert(signer.id.clone(), signer);
    }

    pub async fn len(&self) -> usize {
        self.signers.read().await.len()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn signer(&self, user_id: &str) -> Option<Signer> {
        self.signers.read().await.get(user_id).cloned()
    }
}

impl fmt::Debug for MemoryIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryIdentityProvider").finish_non_exhaustive()
    }
}
