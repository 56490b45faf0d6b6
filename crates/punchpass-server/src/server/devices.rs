//! Wallet client web service (`/v1`).
//!
//! Unknown passes and registrations answer with a bare status code.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use punchpass_core::time::{from_millis, parse_since, to_rfc3339};

use super::AppState;
use super::auth::DeviceAuth;
use super::error::ApiError;
use crate::storage::RegistrationOutcome;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub push_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinceQuery {
    pub passes_updated_since: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialsResponse {
    pub serial_numbers: Vec<String>,
    pub last_updated: String,
}

#[derive(Debug, Deserialize)]
pub struct LogBody {
    #[serde(default)]
    pub logs: Vec<String>,
}

/// `POST /v1/devices/{device}/registrations/{passType}/{serial}`
pub async fn register(
    _auth: DeviceAuth,
    State(state): State<AppState>,
    Path((device, pass_type, serial)): Path<(String, String, String)>,
    Json(body): Json<RegisterBody>,
) -> Result<StatusCode, ApiError> {
    let push_token = body.push_token.trim();
    if push_token.is_empty() {
        return Err(ApiError::BadRequest("pushToken must not be empty".into()));
    }
    if state.passes.pass_type().is_some_and(|configured| configured != pass_type) {
        return Ok(StatusCode::NOT_FOUND);
    }
    let Some(card) = state.db.get_card_by_serial(&serial).await? else {
        return Ok(StatusCode::NOT_FOUND);
    };

    let outcome = state
        .registry
        .register(&device, &pass_type, &serial, &card.id, push_token)
        .await?;
    Ok(match outcome {
        RegistrationOutcome::Created => StatusCode::CREATED,
        RegistrationOutcome::Updated => StatusCode::OK,
    })
}

/// `DELETE /v1/devices/{device}/registrations/{passType}/{serial}`
pub async fn unregister(
    _auth: DeviceAuth,
    State(state): State<AppState>,
    Path((device, pass_type, serial)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    if state.registry.unregister(&device, &pass_type, &serial).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// `GET /v1/devices/{device}/registrations/{passType}?passesUpdatedSince=T`
pub async fn list_serials(
    _auth: DeviceAuth,
    State(state): State<AppState>,
    Path((device, pass_type)): Path<(String, String)>,
    Query(query): Query<SinceQuery>,
) -> Result<Response, ApiError> {
    let since = match query.passes_updated_since.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_since(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("Invalid passesUpdatedSince {raw:?}"))
        })?),
    };

    let changed = state
        .registry
        .list_serials_for_device(&device, &pass_type, since)
        .await?;
    if changed.serial_numbers.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(SerialsResponse {
        serial_numbers: changed.serial_numbers,
        last_updated: to_rfc3339(changed.last_updated),
    })
    .into_response())
}

/// `GET /v1/passes/{passType}/{serial}`
pub async fn latest_pass(
    _auth: DeviceAuth,
    State(state): State<AppState>,
    Path((pass_type, serial)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(since) = if_modified_since(&headers) {
        let Some(last_modified) = state.passes.last_modified(&pass_type, &serial).await? else {
            return Ok(StatusCode::NOT_FOUND.into_response());
        };
        if last_modified <= since.timestamp_millis() {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let Some((bundle, last_modified)) = state.passes.bundle_for_serial(&pass_type, &serial).await?
    else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    Ok((
        [
            (header::CONTENT_TYPE, bundle.mime_type().to_string()),
            (header::LAST_MODIFIED, http_date(last_modified)),
        ],
        bundle.archive,
    )
        .into_response())
}

/// `POST /v1/log`
pub async fn client_log(Json(body): Json<LogBody>) -> StatusCode {
    for message in &body.logs {
        warn!(message = %message, "Wallet client log");
    }
    if !body.logs.is_empty() {
        info!(count = body.logs.len(), "Received wallet client logs");
    }
    StatusCode::OK
}

/// IMF-fixdate, e.g. `Tue, 03 Mar 2026 10:00:00 GMT`. Sub-second times
/// round up so echoing the header back never hides the change it names.
pub fn http_date(ms: i64) -> String {
    let secs = ms.div_euclid(1000) + i64::from(ms.rem_euclid(1000) != 0);
    from_millis(secs * 1000)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn if_modified_since(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = headers.get(header::IF_MODIFIED_SINCE)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
