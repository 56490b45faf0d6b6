//! Device registry: which devices listen for which pass, and when each pass
//! last changed.

use tracing::{debug, info, instrument};

use punchpass_core::DatabaseError;
use punchpass_core::time::unix_millis;

use crate::push::token_prefix;
use crate::storage::{NewRegistration, RegistrationOutcome, ServerDatabase};

/// Serials that changed after a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedSerials {
    pub serial_numbers: Vec<String>,
    /// Latest effective change time among the returned serials, or the
    /// current time when none changed.
    pub last_updated: i64,
}

#[derive(Clone)]
pub struct DeviceRegistry {
    db: ServerDatabase,
}

impl DeviceRegistry {
    pub const fn new(db: ServerDatabase) -> Self {
        Self { db }
    }

    /// Register `device` for a pass, replacing its push token in place.
    #[instrument(skip(self, push_token), fields(token = token_prefix(push_token)))]
    pub async fn register(
        &self,
        device: &str,
        pass_type: &str,
        serial: &str,
        card_id: &str,
        push_token: &str,
    ) -> Result<RegistrationOutcome, DatabaseError> {
        let outcome = self
            .db
            .upsert_registration(
                NewRegistration {
                    device_library_identifier: device,
                    pass_type_identifier: pass_type,
                    serial_number: serial,
                    card_id,
                    push_token,
                },
                unix_millis(),
            )
            .await?;
        info!(?outcome, "Device registered for pass");
        Ok(outcome)
    }

    /// Returns whether a registration existed.
    #[instrument(skip(self))]
    pub async fn unregister(
        &self,
        device: &str,
        pass_type: &str,
        serial: &str,
    ) -> Result<bool, DatabaseError> {
        let removed = self.db.delete_registration(device, pass_type, serial).await?;
        if removed {
            info!("Device unregistered from pass");
        }
        Ok(removed)
    }

    /// Serials of `pass_type` followed by `device` that changed strictly
    /// after `since` (all of them when `since` is `None`).
    pub async fn list_serials_for_device(
        &self,
        device: &str,
        pass_type: &str,
        since: Option<i64>,
    ) -> Result<ChangedSerials, DatabaseError> {
        let rows = self.db.serials_for_device(device, pass_type).await?;

        let changed: Vec<(String, i64)> = rows
            .into_iter()
            .filter(|(_, updated)| since.is_none_or(|t| *updated > t))
            .collect();
        let last_updated = changed
            .iter()
            .map(|(_, updated)| *updated)
            .max()
            .unwrap_or_else(unix_millis);

        debug!(device, pass_type, ?since, count = changed.len(), "Listed changed serials");
        Ok(ChangedSerials {
            serial_numbers: changed.into_iter().map(|(serial, _)| serial).collect(),
            last_updated,
        })
    }

    /// Mark a pass as changed and return the push tokens to notify.
    pub async fn touch(
        &self,
        pass_type: &str,
        serial: &str,
        card_id: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        self.db
            .touch_serial(pass_type, serial, card_id, unix_millis())
            .await
    }

    /// Drop every registration for a push token the gateway reported dead.
    pub async fn prune_push_token(&self, push_token: &str) -> Result<u64, DatabaseError> {
        let removed = self.db.delete_registrations_by_push_token(push_token).await?;
        info!(token = token_prefix(push_token), removed, "Pruned dead push token");
        Ok(removed)
    }

    /// (pass type, serial) pairs with at least one registration for a card.
    pub async fn passes_for_card(
        &self,
        card_id: &str,
    ) -> Result<Vec<(String, String)>, DatabaseError> {
        self.db.passes_for_card(card_id).await
    }

    pub async fn has_registrations(&self, card_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.db.count_registrations_for_card(card_id).await? > 0)
    }

    /// Time the pass last changed, if it has ever been registered or touched.
    pub async fn last_modified(
        &self,
        pass_type: &str,
        serial: &str,
    ) -> Result<Option<i64>, DatabaseError> {
        Ok(self
            .db
            .get_serial_update(pass_type, serial)
            .await?
            .map(|mark| mark.updated_at))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn registry() -> DeviceRegistry {
        DeviceRegistry::new(ServerDatabase::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn since_now_is_empty_and_since_epoch_is_everything() {
        let reg = registry().await;
        reg.register("dev", "pass.test", "s1", "card-1", "tok-1").await.unwrap();
        reg.register("dev", "pass.test", "s2", "card-2", "tok-1").await.unwrap();

        let all = reg.list_serials_for_device("dev", "pass.test", Some(0)).await.unwrap();
        assert_eq!(all.serial_numbers, ["s1", "s2"]);

        let now = unix_millis();
        let none = reg.list_serials_for_device("dev", "pass.test", Some(now)).await.unwrap();
        assert!(none.serial_numbers.is_empty());
        assert!(none.last_updated >= now);

        let unfiltered = reg.list_serials_for_device("dev", "pass.test", None).await.unwrap();
        assert_eq!(unfiltered.serial_numbers.len(), 2);
        assert_eq!(unfiltered.last_updated, all.last_updated);
    }

    #[tokio::test]
    async fn touch_moves_serial_past_previous_watermark() {
        let reg = registry().await;
        reg.register("dev", "pass.test", "s1", "card-1", "tok-1").await.unwrap();
        let before = reg.list_serials_for_device("dev", "pass.test", None).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let tokens = reg.touch("pass.test", "s1", "card-1").await.unwrap();
        assert_eq!(tokens, ["tok-1"]);

        let after = reg
            .list_serials_for_device("dev", "pass.test", Some(before.last_updated))
            .await
            .unwrap();
        assert_eq!(after.serial_numbers, ["s1"]);
        assert!(after.last_updated > before.last_updated);
        assert_eq!(
            reg.last_modified("pass.test", "s1").await.unwrap(),
            Some(after.last_updated)
        );
    }

    #[tokio::test]
    async fn register_is_idempotent_and_unregister_reports_existence() {
        let reg = registry().await;
        let first = reg.register("dev", "pass.test", "s1", "card-1", "tok-1").await.unwrap();
        let again = reg.register("dev", "pass.test", "s1", "card-1", "tok-2").await.unwrap();
        assert_eq!(first, RegistrationOutcome::Created);
        assert_eq!(again, RegistrationOutcome::Updated);
        assert_eq!(reg.passes_for_card("card-1").await.unwrap().len(), 1);

        assert!(reg.unregister("dev", "pass.test", "s1").await.unwrap());
        assert!(!reg.unregister("dev", "pass.test", "s1").await.unwrap());
        assert!(!reg.has_registrations("card-1").await.unwrap());
    }

    #[tokio::test]
    async fn prune_removes_all_rows_for_token() {
        let reg = registry().await;
        reg.register("dev-1", "pass.test", "s1", "card-1", "dead").await.unwrap();
        reg.register("dev-1", "pass.test", "s2", "card-2", "dead").await.unwrap();
        reg.register("dev-2", "pass.test", "s1", "card-1", "live").await.unwrap();

        assert_eq!(reg.prune_push_token("dead").await.unwrap(), 2);
        assert_eq!(reg.touch("pass.test", "s1", "card-1").await.unwrap(), ["live"]);
        assert!(!reg.has_registrations("card-2").await.unwrap());
    }
}
