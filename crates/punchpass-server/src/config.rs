//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use punchpass_pass::SigningMaterial;

pub const DEFAULT_BATCH_SIZE: u32 = 20;
pub const MAX_BATCH_SIZE: u32 = 100;
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const MIN_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Names the environment variable that has to be set.
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Cannot determine home directory")]
    NoHomeDir,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "punchpass-server")]
#[command(
    version,
    about = "Punchpass server - wallet pass web service and notification scheduler"
)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "PUNCHPASS_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long, env = "PUNCHPASS_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "PUNCHPASS_LOG_JSON")]
    pub log_json: bool,

    /// Pass type identifier, e.g. `pass.com.example.loyalty`.
    #[arg(long, env = "PUNCHPASS_PASS_TYPE_ID")]
    pub pass_type_id: Option<String>,

    /// Apple developer team identifier.
    #[arg(long, env = "PUNCHPASS_TEAM_ID")]
    pub team_id: Option<String>,

    #[arg(long, env = "PUNCHPASS_ORGANIZATION_NAME", default_value = "Punchpass")]
    pub organization_name: String,

    /// PKCS#12 container with the pass type certificate and key.
    #[arg(long, env = "PUNCHPASS_P12_PATH")]
    pub p12_path: Option<PathBuf>,

    #[arg(
        long,
        env = "PUNCHPASS_P12_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub p12_password: String,

    /// Apple WWDR intermediate certificate (PEM) appended to the chain.
    #[arg(long, env = "PUNCHPASS_WWDR_CERT")]
    pub wwdr_cert: Option<PathBuf>,

    /// `openssl` binary used for signing.
    #[arg(long, env = "PUNCHPASS_OPENSSL", default_value = "openssl")]
    pub openssl: PathBuf,

    /// Pass `-legacy` when reading the PKCS#12 container (OpenSSL 3).
    #[arg(long, env = "PUNCHPASS_OPENSSL_LEGACY")]
    pub openssl_legacy: bool,

    /// Public URL of this server's `/v1` web service, embedded in passes.
    #[arg(long, env = "PUNCHPASS_WEB_SERVICE_URL")]
    pub web_service_url: Option<String>,

    /// Shared secret wallet clients present on device requests.
    #[arg(long, env = "PUNCHPASS_AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    /// APNs signing key (`AuthKey_XXXX.p8`).
    #[arg(long, env = "PUNCHPASS_APNS_KEY_PATH")]
    pub apns_key_path: Option<PathBuf>,

    #[arg(long, env = "PUNCHPASS_APNS_KEY_ID")]
    pub apns_key_id: Option<String>,

    /// Issuer for APNs tokens; defaults to the team identifier.
    #[arg(long, env = "PUNCHPASS_APNS_TEAM_ID")]
    pub apns_team_id: Option<String>,

    /// Use the APNs sandbox gateway.
    #[arg(long, env = "PUNCHPASS_APNS_SANDBOX")]
    pub apns_sandbox: bool,

    /// Directory rendered images are written to.
    #[arg(long, env = "PUNCHPASS_ASSET_DIR", requires = "asset_base_url")]
    pub asset_dir: Option<PathBuf>,

    /// Public URL the asset directory is served from.
    #[arg(long, env = "PUNCHPASS_ASSET_BASE_URL")]
    pub asset_base_url: Option<String>,

    /// Wallet-objects REST endpoint for the Google channel.
    #[arg(long, env = "PUNCHPASS_WALLET_SYNC_URL")]
    pub wallet_sync_url: Option<String>,

    #[arg(long, env = "PUNCHPASS_WALLET_SYNC_TOKEN", hide_env_values = true)]
    pub wallet_sync_token: Option<String>,

    /// Run the notification scheduler in this process.
    #[arg(long, env = "PUNCHPASS_SCHEDULER_ENABLED")]
    pub scheduler_enabled: bool,

    #[arg(long, env = "PUNCHPASS_SCHEDULER_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub scheduler_batch_size: u32,

    #[arg(long, env = "PUNCHPASS_SCHEDULER_INTERVAL_SECS", default_value_t = DEFAULT_INTERVAL_SECS)]
    pub scheduler_interval_secs: u64,
}

/// Effective scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub batch_size: u32,
    pub interval: Duration,
}

/// Resolved APNs credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsSettings {
    pub key_path: PathBuf,
    pub key_id: String,
    pub team_id: String,
    pub sandbox: bool,
}

fn required(value: Option<&String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(name))
}

impl Args {
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => {
                let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
                Ok(home.join(".punchpass").join("punchpass.db"))
            }
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            enabled: self.scheduler_enabled,
            batch_size: self.scheduler_batch_size.clamp(1, MAX_BATCH_SIZE),
            interval: Duration::from_secs(self.scheduler_interval_secs.max(MIN_INTERVAL_SECS)),
        }
    }

    /// Certificate material for pass signing.
    pub fn signing_material(&self) -> Result<SigningMaterial, ConfigError> {
        let p12_path = self
            .p12_path
            .clone()
            .ok_or(ConfigError::Missing("PUNCHPASS_P12_PATH"))?;
        Ok(SigningMaterial {
            p12_path,
            p12_password: self.p12_password.clone(),
            wwdr_certificate: self.wwdr_cert.clone(),
            team_identifier: required(self.team_id.as_ref(), "PUNCHPASS_TEAM_ID")?,
            pass_type_identifier: required(self.pass_type_id.as_ref(), "PUNCHPASS_PASS_TYPE_ID")?,
            organization_name: self.organization_name.clone(),
        })
    }

    /// APNs credentials, `None` when no key is configured.
    pub fn apns(&self) -> Result<Option<ApnsSettings>, ConfigError> {
        let Some(key_path) = self.apns_key_path.clone() else {
            return Ok(None);
        };
        Ok(Some(ApnsSettings {
            key_path,
            key_id: required(self.apns_key_id.as_ref(), "PUNCHPASS_APNS_KEY_ID")?,
            team_id: required(
                self.apns_team_id.as_ref().or(self.team_id.as_ref()),
                "PUNCHPASS_APNS_TEAM_ID",
            )?,
            sandbox: self.apns_sandbox,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["punchpass-server"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn scheduler_defaults() {
        let args = parse(&[]);
        let s = args.scheduler();
        assert_eq!(s.batch_size, 20);
        assert_eq!(s.interval, Duration::from_secs(60));
    }

    #[test]
    fn scheduler_values_are_clamped() {
        let s = parse(&[
            "--scheduler-enabled",
            "--scheduler-batch-size",
            "500",
            "--scheduler-interval-secs",
            "1",
        ])
        .scheduler();
        assert!(s.enabled);
        assert_eq!(s.batch_size, MAX_BATCH_SIZE);
        assert_eq!(s.interval, Duration::from_secs(MIN_INTERVAL_SECS));

        let s = parse(&["--scheduler-batch-size", "0"]).scheduler();
        assert_eq!(s.batch_size, 1);
    }

    #[test]
    fn signing_material_names_missing_setting() {
        let args = parse(&["--p12-path", "/certs/pass.p12", "--team-id", "TEAM"]);
        assert_eq!(
            args.signing_material().unwrap_err(),
            ConfigError::Missing("PUNCHPASS_PASS_TYPE_ID")
        );

        let args = parse(&["--team-id", "TEAM", "--pass-type-id", "pass.x"]);
        assert_eq!(
            args.signing_material().unwrap_err(),
            ConfigError::Missing("PUNCHPASS_P12_PATH")
        );

        let args = parse(&[
            "--p12-path",
            "/certs/pass.p12",
            "--team-id",
            "TEAM",
            "--pass-type-id",
            "pass.x",
        ]);
        let material = args.signing_material().unwrap();
        assert_eq!(material.pass_type_identifier, "pass.x");
        assert_eq!(material.organization_name, "Punchpass");
    }

    #[test]
    fn apns_is_optional_but_complete_when_present() {
        assert_eq!(parse(&[]).apns().unwrap(), None);

        let args = parse(&["--apns-key-path", "/keys/AuthKey.p8"]);
        assert_eq!(
            args.apns().unwrap_err(),
            ConfigError::Missing("PUNCHPASS_APNS_KEY_ID")
        );

        let args = parse(&[
            "--apns-key-path",
            "/keys/AuthKey.p8",
            "--apns-key-id",
            "K1",
            "--team-id",
            "TEAM",
        ]);
        let apns = args.apns().unwrap().unwrap();
        assert_eq!(apns.team_id, "TEAM");
        assert!(!apns.sandbox);
    }

    #[test]
    fn explicit_db_path_wins() {
        let args = parse(&["--db-path", "/data/pp.db"]);
        assert_eq!(args.db_path().unwrap(), PathBuf::from("/data/pp.db"));
    }
}
