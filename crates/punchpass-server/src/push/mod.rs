//! Wake-up pushes for wallet passes (APNs).
//!
//! - [`ApnsTokenProvider`] signs and caches the ES256 provider token
//! - [`ApnsClient`] sends background pushes over HTTP/2 and classifies failures
//! - [`PushSender`] is the seam the update and dispatch code depends on

pub mod apns;
pub mod token;

use async_trait::async_trait;
use futures_util::future::join_all;

pub use apns::{ApnsClient, PRODUCTION_HOST, SANDBOX_HOST, classify};
pub use token::ApnsTokenProvider;

/// Errors setting up push delivery.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("APNs signing key error: {0}")]
    Key(String),

    #[error("APNs token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP client error: {0}")]
    Http(String),
}

/// Whether a failed push is worth retrying on a later event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The token will never work again; its registrations should go.
    Permanent,
    Transient,
}

/// A push the gateway (or the transport) did not accept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason} (status {status:?}, {kind:?})")]
pub struct PushFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub reason: String,
}

impl PushFailure {
    pub fn transient(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            status,
            reason: reason.into(),
        }
    }

    pub fn permanent(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            status,
            reason: reason.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }
}

/// An accepted push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReceipt {
    /// Gateway-assigned notification id (`apns-id`), when returned.
    pub apns_id: Option<String>,
}

/// Sends a content-changed push for one device token.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn push(&self, push_token: &str, topic: &str) -> Result<PushReceipt, PushFailure>;

    /// `false` when no gateway credentials are configured.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Sender used when APNs credentials are missing. Every push fails
/// transiently so registrations are kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredPush;

#[async_trait]
impl PushSender for UnconfiguredPush {
    async fn push(&self, _push_token: &str, _topic: &str) -> Result<PushReceipt, PushFailure> {
        Err(PushFailure::transient(None, "NotConfigured"))
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Push every token concurrently. Results come back in input order; one
/// token's failure never affects the others.
pub async fn push_all(
    sender: &dyn PushSender,
    tokens: &[String],
    topic: &str,
) -> Vec<(String, Result<PushReceipt, PushFailure>)> {
    join_all(tokens.iter().map(|token| async move {
        let result = sender.push(token, topic).await;
        (token.clone(), result)
    }))
    .await
}

/// First eight characters of a push token, for logs.
pub fn token_prefix(token: &str) -> &str {
    token
        .char_indices()
        .nth(8)
        .map_or(token, |(idx, _)| &token[..idx])
}
