//! Ed25519 verifier bound to a PEM-encoded public key.

use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, VerifyingKey};

use super::{Algorithm, ClaimMap, CompactToken, TokenError, Verifier};

/// Key state captured once at construction.
#[derive(Debug, Clone)]
enum KeyState {
    Ready(VerifyingKey),
    Missing,
    Invalid,
}

/// Verifier pinned to `EdDSA` (Ed25519).
///
/// The public key is decoded when the verifier is built. A missing or
/// undecodable key does not fail construction; it is reported by every
/// verification, after the header algorithm check, so the error ordering
/// matches the symmetric verifier.
#[derive(Debug, Clone)]
pub struct EdDsaVerifier {
    key: KeyState,
}

impl EdDsaVerifier {
    /// Bind a verifier to a `-----BEGIN PUBLIC KEY-----` (SPKI) PEM document.
    pub fn from_public_key_pem(pem: &str) -> Self {
        let trimmed = pem.trim();
        let key = if trimmed.is_empty() {
            KeyState::Missing
        } else {
            match VerifyingKey::from_public_key_pem(trimmed) {
                Ok(key) => KeyState::Ready(key),
                Err(_) => KeyState::Invalid,
            }
        };
        Self { key }
    }

    /// Bind a verifier to an already decoded key.
    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        Self {
            key: KeyState::Ready(key),
        }
    }
}

impl Verifier for EdDsaVerifier {
    fn algorithm(&self) -> Algorithm {
        Algorithm::EdDsa
    }

    fn verify_claims(&self, compact: &str) -> Result<ClaimMap, TokenError> {
        let token = CompactToken::parse(compact, Algorithm::EdDsa)?;
        let key = match &self.key {
            KeyState::Ready(key) => key,
            KeyState::Missing => return Err(TokenError::MissingKeyMaterial),
            KeyState::Invalid => return Err(TokenError::InvalidKeyMaterial),
        };

        let signature =
            Signature::from_slice(token.signature()).map_err(|_| TokenError::SignatureInvalid)?;
        key.verify_strict(token.signing_input(), &signature)
            .map_err(|_| TokenError::SignatureInvalid)?;

        token.into_claims()
    }
}
