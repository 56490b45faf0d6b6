//! Loyalty card read-model queries.

use super::db::ServerDatabase;
use super::models::{LatestMessage, LoyaltyCard};
use punchpass_core::DatabaseError;

impl ServerDatabase {
    /// Insert or replace a card. The CRUD layer owns these rows; the server
    /// writes them only when seeding.
    pub async fn upsert_card(&self, card: &LoyaltyCard) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO loyalty_cards (id, business_id, business_name, program_name, \
             customer_name, customer_email, stamp_count, max_points, rewards_earned, card_color, \
             logo_url, strip_url, serial_number, barcode_value, google_object_id, created_at, \
             updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET business_id = excluded.business_id, \
             business_name = excluded.business_name, program_name = excluded.program_name, \
             customer_name = excluded.customer_name, customer_email = excluded.customer_email, \
             stamp_count = excluded.stamp_count, max_points = excluded.max_points, \
             rewards_earned = excluded.rewards_earned, card_color = excluded.card_color, \
             logo_url = excluded.logo_url, strip_url = excluded.strip_url, \
             serial_number = excluded.serial_number, barcode_value = excluded.barcode_value, \
             google_object_id = excluded.google_object_id, updated_at = excluded.updated_at",
        )
        .bind(&card.id)
        .bind(&card.business_id)
        .bind(&card.business_name)
        .bind(&card.program_name)
        .bind(&card.customer_name)
        .bind(&card.customer_email)
        .bind(card.stamp_count)
        .bind(card.max_points)
        .bind(card.rewards_earned)
        .bind(&card.card_color)
        .bind(&card.logo_url)
        .bind(&card.strip_url)
        .bind(&card.serial_number)
        .bind(&card.barcode_value)
        .bind(&card.google_object_id)
        .bind(card.created_at)
        .bind(card.updated_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_card(&self, id: &str) -> Result<Option<LoyaltyCard>, DatabaseError> {
        let card = sqlx::query_as::<_, LoyaltyCard>("SELECT * FROM loyalty_cards WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(card)
    }

    /// Find a card by the serial printed on its pass (stored serial, else id).
    pub async fn get_card_by_serial(
        &self,
        serial: &str,
    ) -> Result<Option<LoyaltyCard>, DatabaseError> {
        let card = sqlx::query_as::<_, LoyaltyCard>(
            "SELECT * FROM loyalty_cards \
             WHERE COALESCE(NULLIF(TRIM(serial_number), ''), id) = ? \
             LIMIT 1",
        )
        .bind(serial)
        .fetch_optional(self.pool())
        .await?;

        Ok(card)
    }

    pub async fn list_cards_for_business(
        &self,
        business_id: &str,
    ) -> Result<Vec<LoyaltyCard>, DatabaseError> {
        let cards = sqlx::query_as::<_, LoyaltyCard>(
            "SELECT * FROM loyalty_cards WHERE business_id = ? ORDER BY created_at, id",
        )
        .bind(business_id)
        .fetch_all(self.pool())
        .await?;

        Ok(cards)
    }

    /// The notification most recently queued or sent to `card_id`.
    pub async fn latest_message_for_card(
        &self,
        card_id: &str,
    ) -> Result<Option<LatestMessage>, DatabaseError> {
        let latest = sqlx::query_as::<_, LatestMessage>(
            "SELECT n.title, n.message FROM notification_logs l \
             JOIN notifications n ON n.id = l.notification_id \
             WHERE l.card_id = ? AND l.status IN ('QUEUED', 'SENT') \
             ORDER BY l.created_at DESC, l.rowid DESC LIMIT 1",
        )
        .bind(card_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(latest)
    }
}
