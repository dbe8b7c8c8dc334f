//! Algorithm pinning: the header never selects the scheme.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::EncodePublicKey;
use ed25519_dalek::SigningKey;

use tollgate::token::issue::{sign_eddsa, sign_hs256};
use tollgate::token::{Algorithm, EdDsaVerifier, Hs256Verifier, TokenError, Verifier};

fn payload() -> serde_json::Value {
    serde_json::json!({
        "task_context": {"task_id": "task-1", "tenant_id": "tenant-a"},
        "target_urn": "urn:target:ip:10.0.0.5",
        "tool_sha256": "sha256:def"
    })
}

#[test]
fn hs256_token_keyed_with_public_pem_is_refused_by_eddsa_verifier() {
    let key = SigningKey::from_bytes(&[9; 32]);
    let pem = key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("pem encoding");

    // A valid HS256 signature using the public key text as the shared secret.
    let forged = sign_hs256(&payload(), pem.as_bytes()).expect("should sign");
    assert_eq!(
        EdDsaVerifier::from_public_key_pem(&pem).verify(&forged),
        Err(TokenError::UnsupportedAlgorithm)
    );
}

#[test]
fn eddsa_token_is_refused_by_hs256_verifier() {
    let compact =
        sign_eddsa(&payload(), &SigningKey::from_bytes(&[9; 32])).expect("should sign");
    assert_eq!(
        Hs256Verifier::new("secret").verify(&compact),
        Err(TokenError::UnsupportedAlgorithm)
    );
}

#[test]
fn unsigned_and_foreign_algorithms_are_refused() {
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload()).expect("json"));
    for alg in ["none", "None", "RS256", "HS512", "hs256", "HS256 ", ""] {
        let header = URL_SAFE_NO_PAD.encode(format!(r#"{{"alg":"{alg}","typ":"JWT"}}"#));
        let compact = format!("{header}.{body}.");
        assert_eq!(
            Hs256Verifier::new("secret").verify(&compact),
            Err(TokenError::UnsupportedAlgorithm),
            "alg {alg:?}"
        );
    }
}

#[test]
fn verifiers_report_their_pin() {
    assert_eq!(Hs256Verifier::new("s").algorithm(), Algorithm::Hs256);
    assert_eq!(
        EdDsaVerifier::from_public_key_pem("").algorithm(),
        Algorithm::EdDsa
    );
}
