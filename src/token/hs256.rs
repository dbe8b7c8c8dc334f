//! HMAC-SHA256 verifier bound to a shared secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{Algorithm, ClaimMap, CompactToken, TokenError, Verifier};

type HmacSha256 = Hmac<Sha256>;

/// Verifier pinned to `HS256`.
#[derive(Clone)]
pub struct Hs256Verifier {
    secret: Vec<u8>,
}

impl Hs256Verifier {
    /// Bind a verifier to `secret`. An empty secret is accepted here and
    /// rejected on every verification with [`TokenError::MissingKeyMaterial`].
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Hs256Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hs256Verifier")
            .field("secret", &"__REDACTED__")
            .finish()
    }
}

/// Compute the HMAC-SHA256 tag over `signing_input`.
pub(crate) fn compute_tag(secret: &[u8], signing_input: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidKeyMaterial)?;
    mac.update(signing_input);
    Ok(mac.finalize().into_bytes().to_vec())
}

impl Verifier for Hs256Verifier {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Hs256
    }

    fn verify_claims(&self, compact: &str) -> Result<ClaimMap, TokenError> {
        let token = CompactToken::parse(compact, Algorithm::Hs256)?;
        if self.secret.is_empty() {
            return Err(TokenError::MissingKeyMaterial);
        }

        let expected = compute_tag(&self.secret, token.signing_input())?;
        let supplied = token.signature();
        // ct_eq on slices of different length is false without leaking contents.
        if !bool::from(expected.as_slice().ct_eq(supplied)) {
            return Err(TokenError::SignatureInvalid);
        }

        token.into_claims()
    }
}
