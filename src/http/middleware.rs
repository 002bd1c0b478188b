//! Authentication middleware and shared-secret verification

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::app::AppState;
use crate::game::ActorId;

type HmacSha256 = Hmac<Sha256>;

/// Maps bearer credentials to actor identities and guards privileged calls
pub struct AuthGateway {
    /// Per-process MAC key; comparisons go through tags so they run in constant time
    key: [u8; 32],
    start_tag: Option<Vec<u8>>,
}

impl AuthGateway {
    /// `None` (or an empty secret) puts privileged start in open mode
    pub fn new(start_secret: Option<&str>) -> Self {
        let key: [u8; 32] = rand::random();
        let start_tag = start_secret
            .filter(|s| !s.is_empty())
            .map(|secret| Self::tag(&key, secret).finalize().into_bytes().to_vec());
        Self { key, start_tag }
    }

    fn tag(key: &[u8], value: &str) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(value.as_bytes());
        mac
    }

    pub fn is_open(&self) -> bool {
        self.start_tag.is_none()
    }

    /// Check the shared secret presented for a privileged start
    pub fn verify_start_secret(&self, provided: Option<&str>) -> Result<(), AuthError> {
        let Some(expected) = &self.start_tag else {
            return Ok(());
        };
        let provided = provided.ok_or(AuthError::MissingCredential)?;
        Self::tag(&self.key, provided)
            .verify_slice(expected)
            .map_err(|_| AuthError::InvalidSecret)
    }

    /// A submission credential is the actor id itself
    pub fn actor_from_token(&self, token: &str) -> Result<AuthenticatedActor, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        Ok(AuthenticatedActor {
            actor_id: token.to_string(),
        })
    }
}

/// Authentication error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Invalid start secret")]
    InvalidSecret,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

/// Actor identity attached to authenticated submissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedActor {
    pub actor_id: ActorId,
}

/// Middleware to require an actor bearer credential
pub async fn require_actor(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let TypedHeader(auth) = bearer.ok_or(AuthError::MissingCredential)?;
    let actor = state.auth.actor_from_token(auth.token())?;

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(actor);

    Ok(next.run(request).await)
}

/// Middleware guarding privileged match start
pub async fn require_start_secret(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let provided = bearer.as_ref().map(|TypedHeader(auth)| auth.token());
    if let Err(e) = state.auth.verify_start_secret(provided) {
        tracing::warn!(error = %e, "Rejected privileged start");
        return Err(e);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_allows_everything() {
        let gateway = AuthGateway::new(None);
        assert!(gateway.is_open());
        assert_eq!(gateway.verify_start_secret(None), Ok(()));
        assert_eq!(gateway.verify_start_secret(Some("anything")), Ok(()));

        assert!(AuthGateway::new(Some("")).is_open());
    }

    #[test]
    fn test_secret_checked() {
        let gateway = AuthGateway::new(Some("s3cret"));
        assert!(!gateway.is_open());
        assert_eq!(gateway.verify_start_secret(Some("s3cret")), Ok(()));
        assert_eq!(gateway.verify_start_secret(Some("s3cre")), Err(AuthError::InvalidSecret));
        assert_eq!(gateway.verify_start_secret(None), Err(AuthError::MissingCredential));
    }

    #[test]
    fn test_bearer_is_actor_identity() {
        let gateway = AuthGateway::new(None);
        assert_eq!(gateway.actor_from_token(" alice ").unwrap().actor_id, "alice");
        assert_eq!(gateway.actor_from_token("  "), Err(AuthError::MissingCredential));
    }
}
