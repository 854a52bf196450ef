//! Request handlers for the external HTTP API (§6). Handlers are thin —
//! each resolves the caller's identity, calls exactly one core service or
//! repository method, and maps the result to JSON.

pub mod admin;
pub mod audio;
pub mod credits;
pub mod synthesize;
pub mod voices;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::HttpError;

/// Stands in for the authentication layer §1 marks as an external
/// collaborator this core does not own: callers present the already-
/// authenticated user id in a header set by whatever reverse proxy or
/// session middleware terminates auth in front of this service. See
/// DESIGN.md for why a header extractor is the right stand-in here
/// rather than a hand-rolled session/JWT implementation this core has no
/// contract for.
pub struct UserId(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("X-User-Id")
            .ok_or_else(|| HttpError::Forbidden("missing X-User-Id header".into()))?
            .to_str()
            .map_err(|_| HttpError::BadRequest("X-User-Id header is not valid text".into()))?;
        let id = raw
            .parse::<i64>()
            .map_err(|_| HttpError::BadRequest("X-User-Id header is not a valid integer".into()))?;
        Ok(Self(id))
    }
}
