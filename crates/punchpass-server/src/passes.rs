//! Issues pass bundles for stored loyalty cards.

use std::sync::Arc;

use tracing::instrument;

use punchpass_core::DatabaseError;
use punchpass_pass::{PassBundle, PassBundleBuilder, PassError, WalletPassDescriptor};

use crate::config::ConfigError;
use crate::registry::DeviceRegistry;
use crate::storage::{LoyaltyCard, ServerDatabase};

#[derive(Debug, thiserror::Error)]
pub enum PassServiceError {
    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Pass signing is not configured: {0}")]
    NotConfigured(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Pass(#[from] PassError),
}

pub struct PassService {
    db: ServerDatabase,
    registry: DeviceRegistry,
    /// Missing signing settings surface on first use, not at startup.
    builder: Result<Arc<PassBundleBuilder>, ConfigError>,
    web_service_url: Option<String>,
    auth_secret: Option<String>,
}

impl PassService {
    pub fn new(
        db: ServerDatabase,
        registry: DeviceRegistry,
        builder: Result<Arc<PassBundleBuilder>, ConfigError>,
        web_service_url: Option<String>,
        auth_secret: Option<String>,
    ) -> Self {
        Self {
            db,
            registry,
            builder,
            web_service_url,
            auth_secret,
        }
    }

    fn builder(&self) -> Result<&PassBundleBuilder, PassServiceError> {
        self.builder
            .as_deref()
            .map_err(|e| PassServiceError::NotConfigured(e.clone()))
    }

    /// Configured pass type, if signing is set up.
    pub fn pass_type(&self) -> Option<&str> {
        self.builder
            .as_ref()
            .ok()
            .map(|b| b.material().pass_type_identifier.as_str())
    }

    /// Descriptor for `card`, carrying the latest delivered notification.
    pub async fn descriptor(&self, card: &LoyaltyCard) -> Result<WalletPassDescriptor, DatabaseError> {
        let latest = self.db.latest_message_for_card(&card.id).await?;
        let (notification_title, notification_message) = latest
            .map(|m| (m.title, Some(m.message)))
            .unwrap_or_default();

        Ok(WalletPassDescriptor {
            card_id: card.id.clone(),
            serial_number: Some(card.effective_serial().to_string()),
            barcode_value: card.barcode_value.clone(),
            customer_name: card.customer_name.clone(),
            customer_email: card.customer_email.clone(),
            business_name: card.business_name.clone(),
            program_name: card.program_name.clone(),
            stamp_count: card.stamp_count,
            max_points: card.max_points,
            rewards_earned: card.rewards_earned,
            card_color: card.card_color.clone(),
            logo_url: card.logo_url.clone(),
            strip_url: card.strip_url.clone(),
            authentication_token: self.auth_secret.clone(),
            web_service_url: self.web_service_url.clone(),
            notification_title,
            notification_message,
        })
    }

    #[instrument(skip(self))]
    pub async fn bundle_for_card(&self, card_id: &str) -> Result<PassBundle, PassServiceError> {
        let builder = self.builder()?;
        let card = self
            .db
            .get_card(card_id)
            .await?
            .ok_or_else(|| PassServiceError::CardNotFound(card_id.to_string()))?;
        let desc = self.descriptor(&card).await?;
        Ok(builder.build(&desc).await?)
    }

    /// Current bundle and its last-modified time (Unix ms) for a registered
    /// pass. `None` for a foreign pass type or an unknown serial.
    #[instrument(skip(self))]
    pub async fn bundle_for_serial(
        &self,
        pass_type: &str,
        serial: &str,
    ) -> Result<Option<(PassBundle, i64)>, PassServiceError> {
        let builder = self.builder()?;
        if builder.material().pass_type_identifier != pass_type {
            return Ok(None);
        }
        let Some(card) = self.db.get_card_by_serial(serial).await? else {
            return Ok(None);
        };

        let last_modified = self
            .registry
            .last_modified(pass_type, serial)
            .await?
            .map_or(card.updated_at, |t| t.max(card.updated_at));
        let desc = self.descriptor(&card).await?;
        let bundle = builder.build(&desc).await?;
        Ok(Some((bundle, last_modified)))
    }

    /// Last-modified time without building, for conditional requests.
    pub async fn last_modified(
        &self,
        pass_type: &str,
        serial: &str,
    ) -> Result<Option<i64>, PassServiceError> {
        if self.pass_type() != Some(pass_type) {
            return Ok(None);
        }
        let Some(card) = self.db.get_card_by_serial(serial).await? else {
            return Ok(None);
        };
        Ok(Some(
            self.registry
                .last_modified(pass_type, serial)
                .await?
                .map_or(card.updated_at, |t| t.max(card.updated_at)),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::notification::{Channel, ScheduleType, TriggerType};
    use crate::storage::NewLog;
    use crate::test_support::{card, notification};

    async fn service(builder: Result<Arc<PassBundleBuilder>, ConfigError>) -> PassService {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        PassService::new(
            db.clone(),
            DeviceRegistry::new(db),
            builder,
            Some("https://pp.example/passkit".into()),
            Some("s3cret".into()),
        )
    }

    #[tokio::test]
    async fn descriptor_carries_card_and_latest_message() {
        let svc = service(Err(ConfigError::Missing("PUNCHPASS_P12_PATH"))).await;
        let mut c = card("c1", "biz");
        c.serial_number = Some("SER-1".into());
        c.stamp_count = 7;
        svc.db.upsert_card(&c).await.unwrap();

        let desc = svc.descriptor(&c).await.unwrap();
        assert_eq!(desc.serial_number.as_deref(), Some("SER-1"));
        assert_eq!(desc.stamp_count, 7);
        assert_eq!(desc.authentication_token.as_deref(), Some("s3cret"));
        assert_eq!(desc.notification_message, None);

        let mut n = notification("n1", ScheduleType::Once);
        n.title = Some("Today".into());
        svc.db.insert_notification(&n).await.unwrap();
        svc.db
            .insert_queued_log(
                NewLog {
                    notification_id: "n1",
                    card_id: "c1",
                    execution_id: "e1",
                    trigger_type: TriggerType::ManualNow,
                    channel: Channel::AppleWallet,
                    scheduled_for: None,
                },
                10,
            )
            .await
            .unwrap();

        let desc = svc.descriptor(&c).await.unwrap();
        assert_eq!(desc.notification_title.as_deref(), Some("Today"));
        assert_eq!(desc.notification_message.as_deref(), Some("message n1"));
    }

    #[tokio::test]
    async fn unconfigured_signing_is_reported_by_name() {
        let svc = service(Err(ConfigError::Missing("PUNCHPASS_P12_PATH"))).await;
        assert_eq!(svc.pass_type(), None);
        let err = svc.bundle_for_card("c1").await.unwrap_err();
        assert!(
            matches!(err, PassServiceError::NotConfigured(ConfigError::Missing("PUNCHPASS_P12_PATH"))),
            "{err}"
        );
        assert_eq!(svc.last_modified("pass.test", "c1").await.unwrap(), None);
    }
}
