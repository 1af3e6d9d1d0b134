//! Custom Axum extractors for the relay surface.

use axum::async_trait;
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;

/// Request id, honored from `x-request-id` or generated at the edge.
///
/// The request-id layers in the router set the header before routing, so
/// the generated fallback here only fires in tests that call handlers
/// directly.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);
        Ok(Self(id))
    }
}

/// User group resolved from the `X-Relay-Group` header.
///
/// Token-based group resolution is out of scope; deployments that need it
/// put an authenticating proxy in front and have it set the header.
#[derive(Debug, Clone)]
pub struct RelayGroup(pub String);

impl RelayGroup {
    /// Group used when the header is absent.
    pub const DEFAULT: &'static str = "default";
}

#[async_trait]
impl<S> FromRequestParts<S> for RelayGroup
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let group = parts
            .headers
            .get("x-relay-group")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| Self::DEFAULT.to_string(), String::from);
        Ok(Self(group))
    }
}

/// JSON body extractor that answers rejections in the error envelope.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> axum::extract::FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = axum::body::Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read request body: {e}")))?;

        let value: T = serde_json::from_slice(&bytes).map_err(|e| {
            debug!(error = %e, "json parse error");
            ApiError::bad_request(format!("invalid JSON: {e}"))
        })?;

        Ok(Self(value))
    }
}
