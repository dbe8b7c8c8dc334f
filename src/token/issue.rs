//! Compact token issuance for operators and fixtures.
//!
//! Produces `{"alg":..,"typ":"JWT"}` headers and compact JSON payloads, the
//! same shape the control plane signs task manifests with.

use ed25519_dalek::{Signer, SigningKey};
use serde::Serialize;

use super::hs256::compute_tag;
use super::{encode_segment, Algorithm, TokenError};

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

fn signing_input(alg: Algorithm, claims: &impl Serialize) -> Result<String, TokenError> {
    let header = serde_json::to_vec(&Header {
        alg: alg.as_str(),
        typ: "JWT",
    })
    .map_err(|_| TokenError::MalformedToken)?;
    let payload = serde_json::to_vec(claims).map_err(|_| TokenError::MalformedPayload)?;
    Ok(format!(
        "{}.{}",
        encode_segment(&header),
        encode_segment(&payload)
    ))
}

/// Sign `claims` as an `HS256` compact token.
///
/// # Errors
///
/// Returns [`TokenError::MissingKeyMaterial`] for an empty secret.
pub fn sign_hs256(claims: &impl Serialize, secret: &[u8]) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingKeyMaterial);
    }
    let signing = signing_input(Algorithm::Hs256, claims)?;
    let tag = compute_tag(secret, signing.as_bytes())?;
    Ok(format!("{signing}.{}", encode_segment(&tag)))
}

/// Sign `claims` as an `EdDSA` compact token.
///
/// # Errors
///
/// Returns [`TokenError::MalformedPayload`] if `claims` cannot be serialized.
pub fn sign_eddsa(claims: &impl Serialize, key: &SigningKey) -> Result<String, TokenError> {
    let signing = signing_input(Algorithm::EdDsa, claims)?;
    let signature = key.sign(signing.as_bytes());
    Ok(format!("{signing}.{}", encode_segment(&signature.to_bytes())))
}
