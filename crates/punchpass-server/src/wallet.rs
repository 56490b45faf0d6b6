//! Google Wallet object sync, consumed as an opaque capability.
//!
//! Callers only see success/failure plus the response body; the REST client
//! itself lives behind [`WalletSync`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

/// Result of one wallet-sync call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    pub success: bool,
    pub status: Option<u16>,
    pub body: String,
}

impl SyncResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            success: true,
            status: Some(200),
            body: body.into(),
        }
    }

    pub fn failed(status: Option<u16>, body: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            body: body.into(),
        }
    }
}

/// A text module shown on the wallet object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextModule {
    pub id: String,
    pub header: String,
    pub body: String,
}

/// Fields patched on a loyalty object before an alert is posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletObjectPatch {
    pub loyalty_points: i64,
    pub max_points: i64,
    pub rewards: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hero_image_url: Option<String>,
    pub text_modules: Vec<TextModule>,
}

/// An alert message attached to a wallet object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletMessage {
    /// Stable per notification execution, so retries are identifiable.
    pub id: String,
    pub header: String,
    pub body: String,
}

#[async_trait]
pub trait WalletSync: Send + Sync {
    async fn patch_object(&self, object_id: &str, patch: &WalletObjectPatch) -> SyncResponse;

    async fn add_message(&self, object_id: &str, message: &WalletMessage) -> SyncResponse;

    /// `false` when no wallet credentials are configured.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Used when wallet sync is not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledWalletSync;

#[async_trait]
impl WalletSync for DisabledWalletSync {
    async fn patch_object(&self, _object_id: &str, _patch: &WalletObjectPatch) -> SyncResponse {
        SyncResponse::failed(None, "wallet sync disabled")
    }

    async fn add_message(&self, _object_id: &str, _message: &WalletMessage) -> SyncResponse {
        SyncResponse::failed(None, "wallet sync disabled")
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// [`WalletSync`] forwarding to a wallet-objects REST endpoint
/// (`{base}/loyaltyObject/{id}` and `{base}/loyaltyObject/{id}/addMessage`).
pub struct HttpWalletSync {
    http: reqwest::Client,
    base_url: String,
    bearer: Option<String>,
}

impl HttpWalletSync {
    pub fn new(base_url: impl Into<String>, bearer: Option<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self::with_client(http, base_url, bearer))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        bearer: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer,
        }
    }

    fn object_url(&self, object_id: &str) -> String {
        format!("{}/loyaltyObject/{object_id}", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> SyncResponse {
        let request = match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Wallet sync request failed");
                return SyncResponse::failed(None, e.to_string());
            }
        };
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            debug!(status = status.as_u16(), "Wallet sync accepted");
            SyncResponse {
                success: true,
                status: Some(status.as_u16()),
                body,
            }
        } else {
            SyncResponse::failed(Some(status.as_u16()), body)
        }
    }
}

#[async_trait]
impl WalletSync for HttpWalletSync {
    async fn patch_object(&self, object_id: &str, patch: &WalletObjectPatch) -> SyncResponse {
        self.send(self.http.patch(self.object_url(object_id)).json(patch))
            .await
    }

    async fn add_message(&self, object_id: &str, message: &WalletMessage) -> SyncResponse {
        let url = format!("{}/addMessage", self.object_url(object_id));
        self.send(self.http.post(url).json(&serde_json::json!({ "message": message })))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn patch_omits_missing_hero() {
        let patch = WalletObjectPatch {
            loyalty_points: 3,
            max_points: 10,
            rewards: 1,
            hero_image_url: None,
            text_modules: vec![],
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["loyaltyPoints"], 3);
        assert!(json.get("heroImageUrl").is_none());
    }

    #[tokio::test]
    async fn disabled_sync_reports_failure() {
        let sync = DisabledWalletSync;
        assert!(!sync.is_enabled());
        let message = WalletMessage {
            id: "m".into(),
            header: "h".into(),
            body: "b".into(),
        };
        assert!(!sync.add_message("obj", &message).await.success);
    }

    #[tokio::test]
    async fn http_sync_hits_object_and_message_routes() {
        use axum::extract::Path;
        use axum::http::{HeaderMap, StatusCode};
        use axum::routing::{patch, post};

        async fn patch_object(Path(id): Path<String>, headers: HeaderMap) -> StatusCode {
            let authed = headers
                .get("authorization")
                .is_some_and(|v| v == "Bearer secret");
            if authed && id == "obj-1" {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            }
        }

        async fn add_message(Path(id): Path<String>) -> (StatusCode, String) {
            if id == "obj-1" {
                (StatusCode::OK, r#"{"ok":true}"#.into())
            } else {
                (StatusCode::NOT_FOUND, "no such object".into())
            }
        }

        let app = axum::Router::new()
            .route("/loyaltyObject/{id}", patch(patch_object))
            .route("/loyaltyObject/{id}/addMessage", post(add_message));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let _ = rustls::crypto::ring::default_provider().install_default();
        let sync = HttpWalletSync::new(format!("http://{addr}/"), Some("secret".into())).unwrap();

        let patch = WalletObjectPatch {
            loyalty_points: 1,
            max_points: 5,
            rewards: 0,
            hero_image_url: Some("https://cdn.example/h.png".into()),
            text_modules: vec![],
        };
        assert!(sync.patch_object("obj-1", &patch).await.success);

        let message = WalletMessage {
            id: "n-e".into(),
            header: "Hi".into(),
            body: "Body".into(),
        };
        assert_eq!(sync.add_message("obj-1", &message).await.body, r#"{"ok":true}"#);

        let missing = sync.add_message("obj-2", &message).await;
        assert!(!missing.success);
        assert_eq!(missing.status, Some(404));
        assert_eq!(missing.body, "no such object");
    }
}
