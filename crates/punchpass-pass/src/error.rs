//! Pass building error types.

use std::path::PathBuf;

/// Errors from building a pass bundle.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// A required setting or file is missing. Raised before any external
    /// process is started.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signing certificate not found at {}", .0.display())]
    MissingCertificate(PathBuf),

    #[error(transparent)]
    Signing(#[from] SignError),

    #[error("Image error: {0}")]
    Image(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The signing step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignStep {
    ExtractCertificate,
    ExtractKey,
    ExtractChain,
    SignDetached,
}

impl std::fmt::Display for SignStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ExtractCertificate => "extract certificate",
            Self::ExtractKey => "extract private key",
            Self::ExtractChain => "extract certificate chain",
            Self::SignDetached => "sign manifest",
        })
    }
}

/// Errors from a [`Signer`](crate::signer::Signer) step.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("Failed to {step}: could not start signer: {message}")]
    Spawn { step: SignStep, message: String },

    #[error("Failed to {step} (exit {status}): {stderr}")]
    Failed {
        step: SignStep,
        status: String,
        stderr: String,
    },

    #[error("Failed to {step}: {message}")]
    Io { step: SignStep, message: String },
}

impl SignError {
    pub const fn step(&self) -> SignStep {
        match self {
            Self::Spawn { step, .. } | Self::Failed { step, .. } | Self::Io { step, .. } => *step,
        }
    }
}

/// Errors from fetching remote artwork.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),

    #[error("Image request failed: {0}")]
    Request(String),

    #[error("Image request returned status {0}")]
    Status(u16),

    #[error("Image too large: {0} bytes")]
    TooLarge(usize),
}
