//! Manifest signing.
//!
//! [`Signer`] splits PKCS#12 handling into the four steps a detached
//! CMS signature needs. [`OpenSslSigner`] runs each step as an `openssl`
//! child process; an in-process implementation can replace it without
//! touching the bundle builder.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{SignError, SignStep};

/// Environment variable carrying the PKCS#12 password into the child, so it
/// never shows up in the process list.
const PASSWORD_ENV: &str = "PUNCHPASS_P12_PASSWORD";

/// Signing capability used by the bundle builder.
///
/// Each method writes its product to `out`. Steps run in order; each one's
/// output feeds the next.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn extract_certificate(
        &self,
        p12: &Path,
        password: &str,
        out: &Path,
    ) -> Result<(), SignError>;

    async fn extract_key(&self, p12: &Path, password: &str, out: &Path) -> Result<(), SignError>;

    /// Extract intermediate certificates. An empty file is a valid result.
    async fn extract_chain(&self, p12: &Path, password: &str, out: &Path)
    -> Result<(), SignError>;

    /// Write a DER detached signature over `manifest` to `out`.
    async fn sign_detached(
        &self,
        manifest: &Path,
        certificate: &Path,
        key: &Path,
        chain: Option<&Path>,
        out: &Path,
    ) -> Result<(), SignError>;
}

/// [`Signer`] backed by the `openssl` command line tool.
#[derive(Debug, Clone)]
pub struct OpenSslSigner {
    program: PathBuf,
    /// Pass `-legacy` to `pkcs12` for containers using RC2/3DES (the format
    /// Keychain exports). Requires OpenSSL 3.
    legacy: bool,
}

impl Default for OpenSslSigner {
    fn default() -> Self {
        Self::new("openssl")
    }
}

impl OpenSslSigner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            legacy: false,
        }
    }

    #[must_use]
    pub const fn with_legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    fn pkcs12_args(&self, p12: &Path, out: &Path, selector: &[&str]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["pkcs12".into()];
        if self.legacy {
            args.push("-legacy".into());
        }
        args.extend(["-in".into(), p12.as_os_str().to_owned()]);
        args.extend(selector.iter().map(OsString::from));
        args.extend([
            "-out".into(),
            out.as_os_str().to_owned(),
            "-passin".into(),
            format!("env:{PASSWORD_ENV}").into(),
        ]);
        args
    }

    async fn run(
        &self,
        step: SignStep,
        args: Vec<OsString>,
        password: Option<&str>,
    ) -> Result<(), SignError> {
        debug!(program = %self.program.display(), %step, "Running signer step");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args).kill_on_drop(true);
        if let Some(password) = password {
            cmd.env(PASSWORD_ENV, password);
        }

        let output = cmd.output().await.map_err(|e| SignError::Spawn {
            step,
            message: e.to_string(),
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(SignError::Failed {
                step,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl Signer for OpenSslSigner {
    async fn extract_certificate(
        &self,
        p12: &Path,
        password: &str,
        out: &Path,
    ) -> Result<(), SignError> {
        let args = self.pkcs12_args(p12, out, &["-clcerts", "-nokeys"]);
        self.run(SignStep::ExtractCertificate, args, Some(password))
            .await
    }

    async fn extract_key(&self, p12: &Path, password: &str, out: &Path) -> Result<(), SignError> {
        let args = self.pkcs12_args(p12, out, &["-nocerts", "-nodes"]);
        self.run(SignStep::ExtractKey, args, Some(password)).await
    }

    async fn extract_chain(
        &self,
        p12: &Path,
        password: &str,
        out: &Path,
    ) -> Result<(), SignError> {
        let args = self.pkcs12_args(p12, out, &["-cacerts", "-nokeys"]);
        self.run(SignStep::ExtractChain, args, Some(password)).await
    }

    async fn sign_detached(
        &self,
        manifest: &Path,
        certificate: &Path,
        key: &Path,
        chain: Option<&Path>,
        out: &Path,
    ) -> Result<(), SignError> {
        let mut args: Vec<OsString> = vec![
            "smime".into(),
            "-binary".into(),
            "-sign".into(),
            "-signer".into(),
            certificate.as_os_str().to_owned(),
            "-inkey".into(),
            key.as_os_str().to_owned(),
        ];
        if let Some(chain) = chain {
            args.extend(["-certfile".into(), chain.as_os_str().to_owned()]);
        }
        args.extend([
            "-in".into(),
            manifest.as_os_str().to_owned(),
            "-out".into(),
            out.as_os_str().to_owned(),
            "-outform".into(),
            "DER".into(),
        ]);
        self.run(SignStep::SignDetached, args, None).await
    }
}
