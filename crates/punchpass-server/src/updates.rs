//! Pass content changes: advance watermarks, wake devices, prune dead tokens.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use punchpass_core::DatabaseError;

use crate::push::{PushFailure, PushSender, push_all, token_prefix};
use crate::registry::DeviceRegistry;

/// Outcome of refreshing one card's passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Registered passes touched.
    pub passes: usize,
    pub pushed: usize,
    /// Registrations removed after permanent failures.
    pub pruned: u64,
    pub failed: usize,
    #[serde(skip)]
    pub first_apns_id: Option<String>,
    #[serde(skip)]
    pub first_failure: Option<PushFailure>,
}

pub struct PassUpdater {
    registry: DeviceRegistry,
    sender: Arc<dyn PushSender>,
}

impl PassUpdater {
    pub fn new(registry: DeviceRegistry, sender: Arc<dyn PushSender>) -> Self {
        Self { registry, sender }
    }

    pub const fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn push_configured(&self) -> bool {
        self.sender.is_configured()
    }

    /// Advance the watermark of every registered pass of `card_id` without
    /// pushing. Devices pick the change up on their next poll.
    pub async fn touch_card(&self, card_id: &str) -> Result<usize, DatabaseError> {
        let passes = self.registry.passes_for_card(card_id).await?;
        for (pass_type, serial) in &passes {
            self.registry.touch(pass_type, serial, card_id).await?;
        }
        Ok(passes.len())
    }

    /// Mark every registered pass of `card_id` as changed and push its
    /// devices. Push failures are counted, never returned as errors.
    #[instrument(skip(self))]
    pub async fn refresh_card(&self, card_id: &str) -> Result<RefreshReport, DatabaseError> {
        let mut report = RefreshReport::default();

        for (pass_type, serial) in self.registry.passes_for_card(card_id).await? {
            report.passes += 1;
            let tokens = self.registry.touch(&pass_type, &serial, card_id).await?;

            for (token, result) in push_all(self.sender.as_ref(), &tokens, &pass_type).await {
                match result {
                    Ok(receipt) => {
                        report.pushed += 1;
                        if report.first_apns_id.is_none() {
                            report.first_apns_id = receipt.apns_id;
                        }
                    }
                    Err(failure) => {
                        report.failed += 1;
                        if failure.is_permanent() {
                            report.pruned += self.registry.prune_push_token(&token).await?;
                        } else {
                            warn!(
                                token = token_prefix(&token),
                                reason = %failure.reason,
                                "Push failed, keeping registration"
                            );
                        }
                        if report.first_failure.is_none() {
                            report.first_failure = Some(failure);
                        }
                    }
                }
            }
        }

        info!(
            passes = report.passes,
            pushed = report.pushed,
            failed = report.failed,
            pruned = report.pruned,
            "Card passes refreshed"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::push::PushReceipt;
    use crate::storage::ServerDatabase;

    #[derive(Default)]
    struct RecordingSender {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn push(&self, push_token: &str, topic: &str) -> Result<PushReceipt, PushFailure> {
            self.calls
                .lock()
                .unwrap()
                .push((push_token.to_string(), topic.to_string()));
            match push_token {
                "dead" => Err(PushFailure::permanent(Some(410), "Unregistered")),
                "flaky" => Err(PushFailure::transient(Some(503), "ServiceUnavailable")),
                _ => Ok(PushReceipt {
                    apns_id: Some(format!("apns-{push_token}")),
                }),
            }
        }
    }

    async fn setup() -> (PassUpdater, Arc<RecordingSender>) {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        let registry = DeviceRegistry::new(db);
        registry.register("d1", "pass.test", "s1", "card", "good").await.unwrap();
        registry.register("d2", "pass.test", "s1", "card", "dead").await.unwrap();
        registry.register("d3", "pass.test", "s1", "card", "flaky").await.unwrap();
        registry.register("d2", "pass.test", "s9", "other", "dead").await.unwrap();
        let sender = Arc::new(RecordingSender::default());
        (PassUpdater::new(registry, sender.clone()), sender)
    }

    #[tokio::test]
    async fn refresh_pushes_every_device_and_prunes_dead_tokens() {
        let (updater, sender) = setup().await;

        let report = updater.refresh_card("card").await.unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(report.pushed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.pruned, 2, "both rows carrying the dead token go");
        assert_eq!(report.first_apns_id.as_deref(), Some("apns-good"));

        let calls = sender.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, topic)| topic == "pass.test"));

        let registry = updater.registry();
        assert!(registry.has_registrations("card").await.unwrap());
        assert!(!registry.has_registrations("other").await.unwrap());
    }

    #[tokio::test]
    async fn card_without_registrations_is_a_no_op() {
        let (updater, sender) = setup().await;
        let report = updater.refresh_card("nobody").await.unwrap();
        assert_eq!(report, RefreshReport::default());
        assert!(sender.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn touch_card_advances_watermarks_without_pushing() {
        let (updater, sender) = setup().await;
        let registry = updater.registry();
        let before = registry.last_modified("pass.test", "s1").await.unwrap().unwrap();

        assert_eq!(updater.touch_card("card").await.unwrap(), 1);
        let after = registry.last_modified("pass.test", "s1").await.unwrap().unwrap();
        assert!(after > before);
        assert!(sender.calls.lock().unwrap().is_empty());
        assert_eq!(updater.touch_card("nobody").await.unwrap(), 0);
    }

    #[test]
    fn report_serializes_counts_only() {
        let report = RefreshReport {
            passes: 1,
            pushed: 2,
            pruned: 3,
            failed: 4,
            first_apns_id: Some("x".into()),
            first_failure: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"passes": 1, "pushed": 2, "pruned": 3, "failed": 4})
        );
    }
}
