// Caller identity extractor
// Decision: Authentication happens upstream; the gateway forwards the caller
// in `x-actor-id` and `x-actor-admin`

use axum::{extract::FromRequestParts, http::request::Parts};
use outreach_engine::Actor;
use uuid::Uuid;

use super::common::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ADMIN_HEADER: &str = "x-actor-admin";

/// The authenticated caller of a mutating request
#[derive(Debug, Clone, Copy)]
pub struct RequestActor(pub Actor);

impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .ok_or_else(|| ApiError::bad_request("missing x-actor-id header"))?
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| ApiError::bad_request("x-actor-id must be a UUID"))?;

        let is_admin = parts
            .headers
            .get(ACTOR_ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);

        Ok(RequestActor(Actor { id, is_admin }))
    }
}
