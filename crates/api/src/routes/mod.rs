//! HTTP route handlers.

pub mod cart;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod products;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::{AggregateId, UserId};
use saga::Storefront;

use crate::error::ApiError;

/// Header carrying the acting user's id.
pub const USER_HEADER: &str = "x-user-id";

/// Shared application state.
pub struct AppState {
    pub storefront: Storefront,
    /// `"memory"` or `"postgres"`, reported by `/health`.
    pub backend: &'static str,
}

/// The user on whose behalf the request acts, read from [`USER_HEADER`].
///
/// Authentication happens upstream; this only parses the id.
#[derive(Debug, Clone, Copy)]
pub struct ActingUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for ActingUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ApiError::MissingUser(format!("missing {USER_HEADER} header")))?;

        value
            .to_str()
            .ok()
            .and_then(|raw| raw.parse::<UserId>().ok())
            .map(ActingUser)
            .ok_or_else(|| ApiError::MissingUser(format!("invalid {USER_HEADER} header")))
    }
}

pub(crate) fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    id.parse::<AggregateId>()
        .map_err(|_| ApiError::BadRequest(format!("invalid id: {id}")))
}
