//! Bearer-token auth middleware, enabled only when both `AUTH_JWT_SECRET`
//! and `AUTH_DATABASE_URL` are set per spec.md §6's env var table.
//!
//! This is a constant-time shared-secret check, not full JWT verification
//! — see DESIGN.md's Open Questions for why that scope was cut.

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Identity of whoever presented a valid bearer token. There is no user
/// database behind this auth layer, so it's a fixed fingerprint of the
/// token itself rather than a real user id — good enough to trace a task
/// back to the caller that submitted it. `require_bearer_token` injects one
/// into request extensions on every successful check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Principal(pub String);

#[derive(Clone)]
pub struct AuthState {
    /// SHA-256 of the configured secret, compared in constant time against
    /// the SHA-256 of whatever bearer token the caller presents. Hashing
    /// first means a secret of any length compares in fixed time.
    expected_hash: [u8; 32],
}

impl AuthState {
    pub fn from_secret(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        Self {
            expected_hash: hasher.finalize().into(),
        }
    }

    fn verify(&self, token: &str) -> bool {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let got: [u8; 32] = hasher.finalize().into();
        got.ct_eq(&self.expected_hash).into()
    }

    /// Fingerprint a validated token into a [`Principal`]. Only the first
    /// 8 bytes of the digest are kept — this identifies the caller, it
    /// doesn't need to be collision-resistant against an adversary who
    /// already holds the secret.
    fn principal_for(&self, token: &str) -> Principal {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let fingerprint = digest[..8].iter().map(|b| format!("{b:02x}")).collect::<String>();
        Principal(fingerprint)
    }
}

pub async fn require_bearer_token(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(auth) = &state.auth else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    match token {
        Some(t) if auth.verify(&t) => {
            request.extensions_mut().insert(auth.principal_for(&t));
            Ok(next.run(request).await)
        }
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_the_exact_configured_secret() {
        let auth = AuthState::from_secret("s3cr3t");
        assert!(auth.verify("s3cr3t"));
    }

    #[test]
    fn rejects_a_wrong_token() {
        let auth = AuthState::from_secret("s3cr3t");
        assert!(!auth.verify("wrong"));
    }

    #[test]
    fn rejects_a_prefix_of_the_secret() {
        let auth = AuthState::from_secret("s3cr3t");
        assert!(!auth.verify("s3cr"));
    }

    #[test]
    fn empty_token_never_matches_a_nonempty_secret() {
        let auth = AuthState::from_secret("s3cr3t");
        assert!(!auth.verify(""));
    }

    #[test]
    fn principal_for_is_stable_for_the_same_token() {
        let auth = AuthState::from_secret("s3cr3t");
        assert_eq!(auth.principal_for("s3cr3t"), auth.principal_for("s3cr3t"));
    }

    #[test]
    fn principal_for_differs_across_tokens() {
        let auth = AuthState::from_secret("s3cr3t");
        assert_ne!(auth.principal_for("token-a"), auth.principal_for("token-b"));
    }
}
