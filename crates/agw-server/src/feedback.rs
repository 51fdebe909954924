// SPDX-License-Identifier: MIT OR Apache-2.0
//! Feedback tokens.
//!
//! Every successful run is issued an HMAC-signed token binding
//! `{run_id, tenant_uid, exp}` so an untrusted client-side app can post
//! feedback about the run without holding an API key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime in seconds.
const TOKEN_TTL_SECS: i64 = 60 * 60 * 24 * 30;

/// Signs and verifies feedback tokens.
#[derive(Clone)]
pub struct FeedbackSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for FeedbackSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackSigner").finish_non_exhaustive()
    }
}

impl FeedbackSigner {
    /// Build a signer around a secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue a token for a run.
    #[must_use]
    pub fn sign(&self, run_id: Uuid, tenant_uid: u64) -> String {
        let exp = chrono::Utc::now().timestamp() + TOKEN_TTL_SECS;
        self.sign_with_exp(run_id, tenant_uid, exp)
    }

    fn sign_with_exp(&self, run_id: Uuid, tenant_uid: u64, exp: i64) -> String {
        let payload = format!("{run_id}:{tenant_uid}:{exp}");
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Verify a token and return `(run_id, tenant_uid)` when valid and
    /// unexpired.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<(Uuid, u64)> {
        let (payload_b64, signature_b64) = token.split_once('.')?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;

        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(&payload);
        mac.verify_slice(&signature).ok()?;

        let payload = String::from_utf8(payload).ok()?;
        let mut parts = payload.split(':');
        let run_id: Uuid = parts.next()?.parse().ok()?;
        let tenant_uid: u64 = parts.next()?.parse().ok()?;
        let exp: i64 = parts.next()?.parse().ok()?;
        if exp < chrono::Utc::now().timestamp() {
            return None;
        }
        Some((run_id, tenant_uid))
    }
}
