//! Compact signed-token verification.
//!
//! A token is `header.payload.signature`, each segment unpadded base64url.
//! Every verifier is pinned to exactly one [`Algorithm`] chosen by the
//! operator; the `alg` named in the token header is only ever compared
//! against that pin, never used to pick a scheme.
//!
//! Two implementations exist, one per deployment mode:
//! - [`Hs256Verifier`]: HMAC-SHA256 bound to a shared secret
//! - [`EdDsaVerifier`]: Ed25519 bound to a PEM public key

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::manifest::TaskClaims;

pub mod eddsa;
pub mod hs256;
pub mod issue;

pub use eddsa::EdDsaVerifier;
pub use hs256::Hs256Verifier;

/// Decoded claim mapping carried in a verified payload segment.
pub type ClaimMap = serde_json::Map<String, serde_json::Value>;

/// Signature algorithm a verifier is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// HMAC-SHA256 over the signing input with a shared secret.
    #[serde(rename = "HS256")]
    Hs256,
    /// Ed25519 signature over the signing input.
    #[serde(rename = "EdDSA")]
    EdDsa,
}

impl Algorithm {
    /// Header `alg` value for this algorithm.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::EdDsa => "EdDSA",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = TokenError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "HS256" => Ok(Self::Hs256),
            "EdDSA" => Ok(Self::EdDsa),
            _ => Err(TokenError::UnsupportedAlgorithm),
        }
    }
}

/// Token verification failures. None of these are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Not exactly three unpadded base64url segments, or the header is not a JSON object.
    #[error("token is not a well-formed compact token")]
    MalformedToken,
    /// Header `alg` is missing or differs from the pinned algorithm.
    #[error("token algorithm does not match the pinned algorithm")]
    UnsupportedAlgorithm,
    /// No secret or public key was supplied.
    #[error("verification key material is missing")]
    MissingKeyMaterial,
    /// The supplied public key could not be decoded.
    #[error("verification key material is invalid")]
    InvalidKeyMaterial,
    /// The signature does not verify over the signing input.
    #[error("token signature is invalid")]
    SignatureInvalid,
    /// The payload is authentic but is not a valid claim set.
    #[error("token payload is not a valid claim set")]
    MalformedPayload,
}

impl TokenError {
    /// Stable snake_case tag for machine-readable reporting.
    pub fn kind(self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::MissingKeyMaterial => "missing_key_material",
            Self::InvalidKeyMaterial => "invalid_key_material",
            Self::SignatureInvalid => "signature_invalid",
            Self::MalformedPayload => "malformed_payload",
        }
    }
}

/// Verifies compact tokens against one pinned algorithm and one key.
///
/// Implementations hold no mutable state and may be reused for any number
/// of tokens.
pub trait Verifier: Send + Sync {
    /// The algorithm this verifier is pinned to.
    fn algorithm(&self) -> Algorithm;

    /// Verify `compact` and return the decoded claim mapping.
    ///
    /// # Errors
    ///
    /// Returns the specific [`TokenError`] for the first check that fails.
    fn verify_claims(&self, compact: &str) -> Result<ClaimMap, TokenError>;

    /// Verify `compact` and decode the claim mapping into [`TaskClaims`].
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::MalformedPayload`] when the authentic payload
    /// does not match the claim schema, or any error from [`Verifier::verify_claims`].
    fn verify(&self, compact: &str) -> Result<TaskClaims, TokenError> {
        let claims = self.verify_claims(compact)?;
        serde_json::from_value(serde_json::Value::Object(claims))
            .map_err(|_| TokenError::MalformedPayload)
    }
}

/// A compact token split into its segments, with the header checked.
#[derive(Debug)]
pub(crate) struct CompactToken<'a> {
    signing_input: &'a str,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

impl<'a> CompactToken<'a> {
    /// Split and decode `compact`, requiring the header `alg` to equal `pinned`.
    pub(crate) fn parse(compact: &'a str, pinned: Algorithm) -> Result<Self, TokenError> {
        let segments: Vec<&str> = compact.split('.').collect();
        let [header_segment, payload_segment, signature_segment] = segments.as_slice() else {
            return Err(TokenError::MalformedToken);
        };

        let header_raw = decode_segment(header_segment)?;
        let payload = decode_segment(payload_segment)?;
        let signature = decode_segment(signature_segment)?;

        let header: ClaimMap =
            serde_json::from_slice(&header_raw).map_err(|_| TokenError::MalformedToken)?;
        let alg = header.get("alg").and_then(serde_json::Value::as_str);
        if alg != Some(pinned.as_str()) {
            return Err(TokenError::UnsupportedAlgorithm);
        }

        // Header and payload segments are contiguous in `compact`.
        let signing_len = header_segment
            .len()
            .checked_add(1)
            .and_then(|n| n.checked_add(payload_segment.len()))
            .ok_or(TokenError::MalformedToken)?;
        let signing_input = compact
            .get(..signing_len)
            .ok_or(TokenError::MalformedToken)?;

        Ok(Self {
            signing_input,
            payload,
            signature,
        })
    }

    /// The literal `header.payload` bytes that were signed.
    pub(crate) fn signing_input(&self) -> &[u8] {
        self.signing_input.as_bytes()
    }

    /// Decoded signature bytes.
    pub(crate) fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Decode the payload into a claim mapping. Call only after the signature verified.
    pub(crate) fn into_claims(self) -> Result<ClaimMap, TokenError> {
        serde_json::from_slice(&self.payload).map_err(|_| TokenError::MalformedPayload)
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::MalformedToken)
}

/// Encode raw bytes as an unpadded base64url segment.
pub(crate) fn encode_segment(raw: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(raw)
}
