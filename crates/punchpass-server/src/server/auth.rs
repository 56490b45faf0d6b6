//! Shared-secret authorization for the device web service.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::AppState;
use super::error::ApiError;

/// Schemes wallet clients use for the pass authentication token.
const SCHEMES: &[&str] = &["ApplePass ", "Bearer "];

/// Token presented in the `Authorization` header, scheme stripped.
pub fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    SCHEMES
        .iter()
        .find_map(|scheme| value.strip_prefix(scheme))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Constant-time comparison. No configured secret authorizes nothing.
pub fn is_authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    match (presented_token(headers), secret) {
        (Some(token), Some(secret)) if !secret.is_empty() => {
            bool::from(token.as_bytes().ct_eq(secret.as_bytes()))
        }
        _ => false,
    }
}

/// Extractor that rejects requests without the shared secret.
pub struct DeviceAuth;

impl FromRequestParts<AppState> for DeviceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if is_authorized(&parts.headers, state.auth_secret.as_deref()) {
            Ok(Self)
        } else {
            debug!(path = %parts.uri.path(), "Rejected device request");
            Err(ApiError::Unauthorized)
        }
    }
}
