//! APNs HTTP/2 client for pass update pushes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ApnsTokenProvider, PushError, PushFailure, PushReceipt, PushSender, token_prefix};

pub const PRODUCTION_HOST: &str = "api.push.apple.com";
pub const SANDBOX_HOST: &str = "api.sandbox.push.apple.com";

/// Reasons after which a device token will never be accepted again.
const PERMANENT_REASONS: &[&str] = &["Unregistered", "BadDeviceToken", "DeviceTokenNotForTopic"];

#[derive(Debug, Deserialize)]
struct ErrorBody {
    reason: Option<String>,
}

/// Classify a non-2xx gateway response.
pub fn classify(status: u16, body: &str) -> PushFailure {
    let reason = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.reason)
        .unwrap_or_else(|| format!("HTTP {status}"));

    if status == 410 || PERMANENT_REASONS.contains(&reason.as_str()) {
        PushFailure::permanent(Some(status), reason)
    } else {
        PushFailure::transient(Some(status), reason)
    }
}

/// [`PushSender`] talking to the APNs provider API.
pub struct ApnsClient {
    http: reqwest::Client,
    tokens: Arc<ApnsTokenProvider>,
    base_url: String,
}

impl ApnsClient {
    /// Client for the production or sandbox gateway.
    pub fn new(tokens: Arc<ApnsTokenProvider>, sandbox: bool) -> Result<Self, PushError> {
        let http = reqwest::Client::builder()
            .http2_prior_knowledge()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PushError::Http(e.to_string()))?;
        let host = if sandbox { SANDBOX_HOST } else { PRODUCTION_HOST };
        Ok(Self::with_base_url(http, tokens, format!("https://{host}")))
    }

    /// Client against an arbitrary base URL (a local gateway in tests).
    pub fn with_base_url(
        http: reqwest::Client,
        tokens: Arc<ApnsTokenProvider>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn device_url(&self, push_token: &str) -> String {
        format!("{}/3/device/{push_token}", self.base_url)
    }
}

#[async_trait]
impl PushSender for ApnsClient {
    async fn push(&self, push_token: &str, topic: &str) -> Result<PushReceipt, PushFailure> {
        let bearer = self
            .tokens
            .token()
            .map_err(|e| PushFailure::transient(None, format!("ProviderToken: {e}")))?;

        let response = self
            .http
            .post(self.device_url(push_token))
            .header("authorization", format!("bearer {bearer}"))
            .header("apns-topic", topic)
            .header("apns-push-type", "background")
            .header("apns-priority", "5")
            .body("{}")
            .send()
            .await
            .map_err(|e| {
                warn!(token = token_prefix(push_token), error = %e, "APNs request failed");
                PushFailure::transient(None, format!("RequestFailed: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            let apns_id = response
                .headers()
                .get("apns-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            debug!(token = token_prefix(push_token), "APNs push accepted");
            return Ok(PushReceipt { apns_id });
        }

        let body = response.text().await.unwrap_or_default();
        let failure = classify(status.as_u16(), &body);
        warn!(
            token = token_prefix(push_token),
            status = status.as_u16(),
            reason = %failure.reason,
            permanent = failure.is_permanent(),
            "APNs push rejected"
        );
        Err(failure)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::push::FailureKind;

    #[test]
    fn permanent_reasons() {
        for reason in PERMANENT_REASONS {
            let body = format!(r#"{{"reason":"{reason}"}}"#);
            assert_eq!(classify(400, &body).kind, FailureKind::Permanent, "{reason}");
        }
    }

    #[test]
    fn gone_is_permanent_even_without_body() {
        let failure = classify(410, "");
        assert!(failure.is_permanent());
        assert_eq!(failure.reason, "HTTP 410");
        assert_eq!(failure.status, Some(410));
    }

    #[test]
    fn other_failures_are_transient() {
        assert_eq!(
            classify(429, r#"{"reason":"TooManyRequests"}"#).kind,
            FailureKind::Transient
        );
        assert_eq!(classify(503, "<html>").kind, FailureKind::Transient);
        let failure = classify(403, r#"{"reason":"ExpiredProviderToken"}"#);
        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(failure.reason, "ExpiredProviderToken");
    }

    fn tokens() -> Arc<ApnsTokenProvider> {
        let key = rcgen::KeyPair::generate().unwrap();
        Arc::new(ApnsTokenProvider::new(key.serialize_pem().as_bytes(), "K", "T").unwrap())
    }

    /// Local stand-in for the gateway, speaking HTTP/1.1.
    async fn gateway() -> String {
        use axum::extract::Path;
        use axum::http::{HeaderMap, StatusCode};
        use axum::response::IntoResponse;
        use axum::routing::post;

        async fn device(Path(token): Path<String>, headers: HeaderMap) -> axum::response::Response {
            let ok_headers = headers.get("apns-push-type").is_some_and(|v| v == "background")
                && headers.get("apns-topic").is_some_and(|v| v == "pass.test")
                && headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("bearer "));
            if !ok_headers {
                return (StatusCode::BAD_REQUEST, r#"{"reason":"MissingHeaders"}"#).into_response();
            }
            match token.as_str() {
                "good" => (StatusCode::OK, [("apns-id", "apns-123")]).into_response(),
                "dead" => (StatusCode::GONE, r#"{"reason":"Unregistered"}"#).into_response(),
                _ => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    r#"{"reason":"ServiceUnavailable"}"#,
                )
                    .into_response(),
            }
        }

        let app = axum::Router::new().route("/3/device/{token}", post(device));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn http_client() -> reqwest::Client {
        let _ = rustls::crypto::ring::default_provider().install_default();
        reqwest::Client::builder().build().unwrap()
    }

    #[test]
    fn device_url_uses_sandbox_host() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = ApnsClient::new(tokens(), true).unwrap();
        assert_eq!(
            client.device_url("abc"),
            "https://api.sandbox.push.apple.com/3/device/abc"
        );
    }

    #[tokio::test]
    async fn push_reports_receipt_and_classified_failures() {
        let base = gateway().await;
        let client = ApnsClient::with_base_url(http_client(), tokens(), format!("{base}/"));

        let receipt = client.push("good", "pass.test").await.unwrap();
        assert_eq!(receipt.apns_id.as_deref(), Some("apns-123"));

        let dead = client.push("dead", "pass.test").await.unwrap_err();
        assert!(dead.is_permanent());
        assert_eq!(dead.reason, "Unregistered");

        let busy = client.push("busy", "pass.test").await.unwrap_err();
        assert_eq!(busy.kind, FailureKind::Transient);
        assert_eq!(busy.status, Some(503));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_transient() {
        let client = ApnsClient::with_base_url(http_client(), tokens(), "http://127.0.0.1:1");
        let err = client.push("good", "pass.test").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Transient);
        assert!(err.reason.starts_with("RequestFailed"));
    }
}
