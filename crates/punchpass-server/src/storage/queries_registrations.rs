//! Device registration and update watermark queries.

use super::db::ServerDatabase;
use super::models::{DeviceRegistration, SerialUpdate};
use punchpass_core::DatabaseError;

/// Registration request for one (device, pass type, serial).
#[derive(Debug, Clone, Copy)]
pub struct NewRegistration<'a> {
    pub device_library_identifier: &'a str,
    pub pass_type_identifier: &'a str,
    pub serial_number: &'a str,
    pub card_id: &'a str,
    pub push_token: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Created,
    Updated,
}

impl ServerDatabase {
    // =========================================================================
    // Registrations
    // =========================================================================

    /// Upsert a registration. A first-time registration also creates (or
    /// re-points) the pass watermark in the same transaction, leaving its
    /// time untouched when it already exists.
    pub async fn upsert_registration(
        &self,
        reg: NewRegistration<'_>,
        now: i64,
    ) -> Result<RegistrationOutcome, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM device_registrations \
             WHERE device_library_identifier = ? AND pass_type_identifier = ? AND serial_number = ?",
        )
        .bind(reg.device_library_identifier)
        .bind(reg.pass_type_identifier)
        .bind(reg.serial_number)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO device_registrations (device_library_identifier, pass_type_identifier, \
             serial_number, card_id, push_token, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(device_library_identifier, pass_type_identifier, serial_number) \
             DO UPDATE SET card_id = excluded.card_id, push_token = excluded.push_token, \
             updated_at = excluded.updated_at",
        )
        .bind(reg.device_library_identifier)
        .bind(reg.pass_type_identifier)
        .bind(reg.serial_number)
        .bind(reg.card_id)
        .bind(reg.push_token)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let outcome = if existing.is_some() {
            RegistrationOutcome::Updated
        } else {
            sqlx::query(
                "INSERT INTO serial_updates (pass_type_identifier, serial_number, card_id, updated_at) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT(pass_type_identifier, serial_number) \
                 DO UPDATE SET card_id = excluded.card_id",
            )
            .bind(reg.pass_type_identifier)
            .bind(reg.serial_number)
            .bind(reg.card_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            RegistrationOutcome::Created
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Delete a registration. Returns `true` if a row was deleted.
    pub async fn delete_registration(
        &self,
        device_library_identifier: &str,
        pass_type_identifier: &str,
        serial_number: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM device_registrations \
             WHERE device_library_identifier = ? AND pass_type_identifier = ? AND serial_number = ?",
        )
        .bind(device_library_identifier)
        .bind(pass_type_identifier)
        .bind(serial_number)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every registration carrying `push_token`. Returns the number of
    /// rows removed.
    pub async fn delete_registrations_by_push_token(
        &self,
        push_token: &str,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM device_registrations WHERE push_token = ?")
            .bind(push_token)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_registration(
        &self,
        device_library_identifier: &str,
        pass_type_identifier: &str,
        serial_number: &str,
    ) -> Result<Option<DeviceRegistration>, DatabaseError> {
        let reg = sqlx::query_as::<_, DeviceRegistration>(
            "SELECT * FROM device_registrations \
             WHERE device_library_identifier = ? AND pass_type_identifier = ? AND serial_number = ?",
        )
        .bind(device_library_identifier)
        .bind(pass_type_identifier)
        .bind(serial_number)
        .fetch_optional(self.pool())
        .await?;

        Ok(reg)
    }

    /// Serials a device follows for one pass type, each with its effective
    /// change time: the later of the watermark and the registration itself.
    pub async fn serials_for_device(
        &self,
        device_library_identifier: &str,
        pass_type_identifier: &str,
    ) -> Result<Vec<(String, i64)>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT r.serial_number, MAX(r.updated_at, COALESCE(s.updated_at, 0)) \
             FROM device_registrations r \
             LEFT JOIN serial_updates s \
               ON s.pass_type_identifier = r.pass_type_identifier \
              AND s.serial_number = r.serial_number \
             WHERE r.device_library_identifier = ? AND r.pass_type_identifier = ? \
             ORDER BY r.serial_number",
        )
        .bind(device_library_identifier)
        .bind(pass_type_identifier)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Distinct (pass type, serial) pairs registered for a card.
    pub async fn passes_for_card(
        &self,
        card_id: &str,
    ) -> Result<Vec<(String, String)>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT DISTINCT pass_type_identifier, serial_number FROM device_registrations \
             WHERE card_id = ? ORDER BY pass_type_identifier, serial_number",
        )
        .bind(card_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    pub async fn count_registrations_for_card(&self, card_id: &str) -> Result<i64, DatabaseError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM device_registrations WHERE card_id = ?")
                .bind(card_id)
                .fetch_one(self.pool())
                .await?;

        Ok(count)
    }

    // =========================================================================
    // Watermarks
    // =========================================================================

    /// Advance the watermark of a pass and return the push tokens registered
    /// for it. The watermark never moves backwards and always lands past the
    /// whole second it was in, since `Last-Modified` only carries seconds.
    pub async fn touch_serial(
        &self,
        pass_type_identifier: &str,
        serial_number: &str,
        card_id: &str,
        now: i64,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO serial_updates (pass_type_identifier, serial_number, card_id, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(pass_type_identifier, serial_number) \
             DO UPDATE SET card_id = excluded.card_id, \
             updated_at = MAX(serial_updates.updated_at, excluded.updated_at, \
             ((serial_updates.updated_at + 999) / 1000) * 1000 + 1)",
        )
        .bind(pass_type_identifier)
        .bind(serial_number)
        .bind(card_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let tokens: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT push_token FROM device_registrations \
             WHERE pass_type_identifier = ? AND serial_number = ? ORDER BY push_token",
        )
        .bind(pass_type_identifier)
        .bind(serial_number)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(tokens)
    }

    pub async fn get_serial_update(
        &self,
        pass_type_identifier: &str,
        serial_number: &str,
    ) -> Result<Option<SerialUpdate>, DatabaseError> {
        let row = sqlx::query_as::<_, SerialUpdate>(
            "SELECT * FROM serial_updates WHERE pass_type_identifier = ? AND serial_number = ?",
        )
        .bind(pass_type_identifier)
        .bind(serial_number)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }
}
