//! Custom Axum Extractors
//!
//! Identity is asserted by the gateway in front of this service: it forwards
//! the authenticated user in `x-user-id` and their role in `x-user-role`.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    Json,
};
use serde::de::DeserializeOwned;

use leasehold_types::{Actor, UserId};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

// =============================================================================
// Current Party Extractor
// =============================================================================

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct CurrentParty(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentParty
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(CurrentParty)
    }
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| UserId::parse(v.trim()).ok())
        .ok_or(ApiError::MissingIdentity)?;

    match headers.get(USER_ROLE_HEADER).map(|v| v.to_str()) {
        None => Ok(Actor::user(user_id)),
        Some(Ok("user")) => Ok(Actor::user(user_id)),
        Some(Ok("admin")) => Ok(Actor::admin(user_id)),
        Some(_) => Err(ApiError::MissingIdentity),
    }
}

// =============================================================================
// Client Context Extractor
// =============================================================================

/// Network evidence attached to a signature
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: String,
    pub device: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        // first hop of x-forwarded-for is the client
        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .or_else(|| header("x-real-ip"))
            .unwrap_or("unknown")
            .to_string();
        let device = header("user-agent").unwrap_or("unknown").to_string();

        Ok(ClientContext { ip, device })
    }
}

// =============================================================================
// JSON Body Extractor
// =============================================================================

/// `Json<T>` whose rejection renders as an [`ApiError`]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::InvalidRequestBody(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}
