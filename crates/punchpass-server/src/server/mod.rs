//! HTTP surface: the wallet client web service under `/v1` and the
//! operational endpoints under `/api`.

pub mod api;
pub mod auth;
pub mod devices;
pub mod error;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::passes::PassService;
use crate::registry::DeviceRegistry;
use crate::schedule::Dispatcher;
use crate::storage::ServerDatabase;
use crate::updates::PassUpdater;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: ServerDatabase,
    pub registry: DeviceRegistry,
    pub passes: Arc<PassService>,
    pub updater: Arc<PassUpdater>,
    pub dispatcher: Arc<Dispatcher>,
    /// Shared secret for `/v1` device requests. Unset rejects them all.
    pub auth_secret: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/devices/{device}/registrations/{pass_type}/{serial}",
            post(devices::register).delete(devices::unregister),
        )
        .route(
            "/v1/devices/{device}/registrations/{pass_type}",
            get(devices::list_serials),
        )
        .route("/v1/passes/{pass_type}/{serial}", get(devices::latest_pass))
        .route("/v1/log", post(devices::client_log))
        .route("/api/cards/{card_id}/pass", get(api::download_pass))
        .route("/api/cards/{card_id}/refresh", post(api::refresh_card))
        .route("/api/notifications", post(api::create_notification))
        .route("/api/notifications/{id}", get(api::get_notification))
        .route("/api/notifications/{id}/send", post(api::send_notification))
        .route("/healthz", get(api::healthz))
        .with_state(state)
}
