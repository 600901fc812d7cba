//! PKCE (Proof Key for Code Exchange) per RFC 7636 and per-attempt session state
//!
//! The verifier stays in process memory for the duration of one sign-in
//! attempt and is sent only to the token endpoint; the S256 challenge goes
//! out in the authorization URL. The state token is the CSRF correlator
//! between the browser redirect we start and the callback we receive.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Random bytes behind a verifier. 48 bytes encode to 64 characters, inside
/// the 43-128 range RFC 7636 allows.
const VERIFIER_BYTES: usize = 48;

/// Random bytes behind a state token.
const STATE_BYTES: usize = 32;

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a cryptographically random PKCE code verifier (URL-safe base64).
pub fn generate_verifier() -> String {
    random_token::<VERIFIER_BYTES>()
}

/// Generate an unpredictable CSRF state token (URL-safe base64).
pub fn generate_state() -> String {
    random_token::<STATE_BYTES>()
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Secrets for one interactive sign-in attempt.
///
/// The challenge is derived from the verifier at construction and never
/// regenerated on its own. Dropped (and zeroized) when the attempt ends.
#[derive(Debug)]
pub struct AuthSession {
    state: Secret<String>,
    verifier: Secret<String>,
    challenge: String,
}

impl AuthSession {
    pub fn new() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            state: Secret::new(generate_state()),
            verifier: Secret::new(verifier),
            challenge,
        }
    }

    pub fn state(&self) -> &Secret<String> {
        &self.state
    }

    pub fn verifier(&self) -> &Secret<String> {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}
