//! Operational API used by the business back office.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::info;

use punchpass_core::time::unix_millis;

use super::AppState;
use super::error::ApiError;
use crate::notification::{Notification, NotificationDraft};
use crate::schedule::DispatchSummary;
use crate::updates::RefreshReport;

/// `GET /api/cards/{cardId}/pass`
pub async fn download_pass(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Response, ApiError> {
    let bundle = state.passes.bundle_for_card(&card_id).await?;
    let disposition = format!("attachment; filename=\"{}\"", bundle.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, bundle.mime_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bundle.archive,
    )
        .into_response())
}

/// `POST /api/cards/{cardId}/refresh`
pub async fn refresh_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Json<RefreshReport>, ApiError> {
    if state.db.get_card(&card_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Card not found: {card_id}")));
    }
    Ok(Json(state.updater.refresh_card(&card_id).await?))
}

/// `POST /api/notifications`
pub async fn create_notification(
    State(state): State<AppState>,
    Json(draft): Json<NotificationDraft>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    let notification = draft.validate(unix_millis())?;
    state.db.insert_notification(&notification).await?;
    info!(
        notification_id = %notification.id,
        delivery_mode = %notification.delivery_mode,
        schedule_type = %notification.schedule_type,
        "Notification created"
    );
    Ok((StatusCode::CREATED, Json(notification)))
}

/// `GET /api/notifications/{id}`
pub async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    state
        .db
        .get_notification(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Notification not found: {id}")))
}

/// `POST /api/notifications/{id}/send`
pub async fn send_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DispatchSummary>, ApiError> {
    Ok(Json(state.dispatcher.send_now(&id).await?))
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}
