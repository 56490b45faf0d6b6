//! Fans one notification out to every card of its business.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use punchpass_core::DatabaseError;
use punchpass_core::time::unix_millis;
use punchpass_pass::artwork::encode_png;
use punchpass_pass::color::Palette;
use punchpass_pass::hero::{HERO_HEIGHT, HERO_WIDTH, HeroSpec, render_stamp_hero};

use super::DispatchError;
use crate::assets::AssetStore;
use crate::notification::{Channel, LogStatus, Notification, TriggerType};
use crate::storage::{LogOutcome, LoyaltyCard, NewLog, ServerDatabase};
use crate::updates::PassUpdater;
use crate::wallet::{TextModule, WalletMessage, WalletObjectPatch, WalletSync};

/// Aggregate counts of one dispatch execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub execution_id: String,
    /// Cards of the business.
    pub targeted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Skipped channel attempts, plus cards with no channel at all.
    pub skipped: usize,
}

impl DispatchSummary {
    fn count(&mut self, status: LogStatus) {
        match status {
            LogStatus::Sent => self.sent += 1,
            LogStatus::Failed => self.failed += 1,
            LogStatus::Skipped => self.skipped += 1,
            LogStatus::Queued => {}
        }
    }
}

pub struct Dispatcher {
    db: ServerDatabase,
    updater: Arc<PassUpdater>,
    wallet: Arc<dyn WalletSync>,
    assets: Arc<dyn AssetStore>,
}

impl Dispatcher {
    pub fn new(
        db: ServerDatabase,
        updater: Arc<PassUpdater>,
        wallet: Arc<dyn WalletSync>,
        assets: Arc<dyn AssetStore>,
    ) -> Self {
        Self {
            db,
            updater,
            wallet,
            assets,
        }
    }

    /// Manual "send now". Schedule state is left untouched.
    pub async fn send_now(&self, notification_id: &str) -> Result<DispatchSummary, DispatchError> {
        let notification = self
            .db
            .get_notification(notification_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(notification_id.to_string()))?;
        self.dispatch(&notification, TriggerType::ManualNow, None).await
    }

    /// Deliver `notification` to every card of its business on every
    /// channel the card has. Channel failures end up in log rows; only
    /// storage errors are returned.
    #[instrument(skip(self, notification), fields(notification_id = %notification.id))]
    pub async fn dispatch(
        &self,
        notification: &Notification,
        trigger: TriggerType,
        scheduled_for: Option<i64>,
    ) -> Result<DispatchSummary, DispatchError> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let cards = self
            .db
            .list_cards_for_business(&notification.business_id)
            .await?;

        let mut summary = DispatchSummary {
            execution_id: execution_id.clone(),
            targeted: cards.len(),
            ..DispatchSummary::default()
        };

        for card in &cards {
            let mut channels = Vec::with_capacity(2);
            match self.updater.registry().has_registrations(&card.id).await {
                Ok(true) => channels.push(Channel::AppleWallet),
                Ok(false) => {}
                Err(e) => {
                    warn!(card_id = %card.id, error = %e, "Registration lookup failed");
                    summary.failed += 1;
                    continue;
                }
            }
            if card.google_object().is_some() {
                channels.push(Channel::GoogleWallet);
            }
            if channels.is_empty() {
                debug!(card_id = %card.id, "Card has no wallet channel");
                summary.skipped += 1;
                continue;
            }

            for channel in channels {
                let log = NewLog {
                    notification_id: &notification.id,
                    card_id: &card.id,
                    execution_id: &execution_id,
                    trigger_type: trigger,
                    channel,
                    scheduled_for,
                };
                match self.deliver_logged(notification, card, log).await {
                    Ok(status) => summary.count(status),
                    Err(e) => {
                        warn!(card_id = %card.id, %channel, error = %e, "Delivery log write failed");
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            execution_id = %summary.execution_id,
            targeted = summary.targeted,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Notification dispatched"
        );
        Ok(summary)
    }

    /// One channel attempt bracketed by its log row. When the final write
    /// fails the row is marked FAILED with `STORAGE_ERROR` if possible.
    async fn deliver_logged(
        &self,
        notification: &Notification,
        card: &LoyaltyCard,
        log: NewLog<'_>,
    ) -> Result<LogStatus, DatabaseError> {
        let channel = log.channel;
        let log_id = self.db.insert_queued_log(log, unix_millis()).await?;

        let outcome = match channel {
            Channel::AppleWallet => self.deliver_apple(card).await,
            Channel::GoogleWallet => {
                self.deliver_google(notification, card, log.execution_id).await
            }
        };
        if outcome.status == LogStatus::Failed {
            warn!(
                card_id = %card.id,
                %channel,
                code = outcome.error_code.as_deref().unwrap_or_default(),
                "Delivery failed"
            );
        }

        if let Err(e) = self.db.finish_log(&log_id, &outcome, unix_millis()).await {
            let fallback = LogOutcome::failed("STORAGE_ERROR", e.to_string());
            if let Err(again) = self.db.finish_log(&log_id, &fallback, unix_millis()).await {
                warn!(log_id = %log_id, error = %again, "Log row left queued");
            }
            return Err(e);
        }
        Ok(outcome.status)
    }

    async fn deliver_apple(&self, card: &LoyaltyCard) -> LogOutcome {
        if !self.updater.push_configured() {
            if let Err(e) = self.updater.touch_card(&card.id).await {
                return LogOutcome::failed("STORAGE_ERROR", e.to_string());
            }
            return LogOutcome::skipped("PUSH_NOT_CONFIGURED", "APNs credentials are not configured");
        }

        match self.updater.refresh_card(&card.id).await {
            Err(e) => LogOutcome::failed("STORAGE_ERROR", e.to_string()),
            Ok(report) if report.pushed > 0 => LogOutcome::sent(report.first_apns_id),
            Ok(report) => match report.first_failure {
                Some(failure) => LogOutcome::failed(failure.reason.clone(), failure.to_string()),
                None => LogOutcome::skipped("NO_DEVICES", "No push tokens registered"),
            },
        }
    }

    async fn deliver_google(
        &self,
        notification: &Notification,
        card: &LoyaltyCard,
        execution_id: &str,
    ) -> LogOutcome {
        let Some(object_id) = card.google_object() else {
            return LogOutcome::skipped("NO_WALLET_OBJECT", "Card has no wallet object");
        };
        if !self.wallet.is_enabled() {
            return LogOutcome::skipped("WALLET_SYNC_DISABLED", "Wallet sync is not configured");
        }

        let header = notification
            .title
            .clone()
            .unwrap_or_else(|| card.business_name.clone());
        let patch = WalletObjectPatch {
            loyalty_points: card.stamp_count.clamp(0, card.max_points.max(1)),
            max_points: card.max_points.max(1),
            rewards: card.rewards_earned.max(0),
            hero_image_url: self.upload_hero(card).await,
            text_modules: vec![TextModule {
                id: "latest-message".to_string(),
                header: header.clone(),
                body: notification.message.clone(),
            }],
        };

        let patched = self.wallet.patch_object(object_id, &patch).await;
        if !patched.success {
            return LogOutcome::failed("PATCH_FAILED", describe(patched.status, patched.body));
        }

        let message = WalletMessage {
            id: format!("{}-{execution_id}", notification.id),
            header,
            body: notification.message.clone(),
        };
        let posted = self.wallet.add_message(object_id, &message).await;
        if !posted.success {
            return LogOutcome::failed("MESSAGE_FAILED", describe(posted.status, posted.body));
        }

        LogOutcome::sent(Some(message.id))
    }

    /// Render and store the stamp hero. `None` when either step fails; the
    /// patch then goes out without an image.
    async fn upload_hero(&self, card: &LoyaltyCard) -> Option<String> {
        let max = card.max_points.max(1);
        let stamps = card.stamp_count.clamp(0, max);
        let hero = render_stamp_hero(&HeroSpec {
            width: HERO_WIDTH,
            height: HERO_HEIGHT,
            palette: Palette::resolve(card.card_color.as_deref()),
            stamps: u32::try_from(stamps).unwrap_or(0),
            max_stamps: u32::try_from(max).unwrap_or(1),
            filled_icon: None,
            unfilled_icon: None,
        });

        let png = match encode_png(&hero) {
            Ok(png) => png,
            Err(e) => {
                warn!(card_id = %card.id, error = %e, "Hero encoding failed");
                return None;
            }
        };

        let key = format!("heroes/{}-{stamps}-{max}.png", card.id);
        match self.assets.put(&key, png, "image/png").await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(card_id = %card.id, error = %e, "Hero upload failed");
                None
            }
        }
    }
}

fn describe(status: Option<u16>, body: String) -> String {
    if body.trim().is_empty() {
        status.map_or_else(|| "no response".to_string(), |s| format!("HTTP {s}"))
    } else {
        body
    }
}
