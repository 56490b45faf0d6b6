//! Data models for Punchpass server storage.

use serde::{Deserialize, Serialize};

/// A customer's loyalty card, as published by the business CRUD layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyCard {
    pub id: String,
    pub business_id: String,
    pub business_name: String,
    pub program_name: Option<String>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub stamp_count: i64,
    pub max_points: i64,
    pub rewards_earned: i64,
    pub card_color: Option<String>,
    pub logo_url: Option<String>,
    pub strip_url: Option<String>,
    pub serial_number: Option<String>,
    pub barcode_value: Option<String>,
    pub google_object_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl LoyaltyCard {
    /// Serial used on the pass: the stored serial, else the card id.
    pub fn effective_serial(&self) -> &str {
        self.serial_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.id)
    }

    pub fn google_object(&self) -> Option<&str> {
        self.google_object_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceRegistration {
    pub device_library_identifier: String,
    pub pass_type_identifier: String,
    pub serial_number: String,
    pub card_id: String,
    pub push_token: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// "Last changed" watermark of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SerialUpdate {
    pub pass_type_identifier: String,
    pub serial_number: String,
    pub card_id: String,
    pub updated_at: i64,
}

/// Raw `notifications` row; see [`crate::notification::Notification`] for
/// the typed form.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationRow {
    pub id: String,
    pub business_id: String,
    pub title: Option<String>,
    pub message: String,
    pub status: String,
    pub delivery_mode: String,
    pub schedule_type: String,
    pub scheduled_at: Option<i64>,
    pub repeat_pattern: Option<String>,
    pub repeat_days: String,
    pub monthly_day_of_month: Option<i64>,
    pub repeat_time_local: Option<String>,
    pub timezone: Option<String>,
    pub next_run_at: Option<i64>,
    pub last_run_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLog {
    pub id: String,
    pub notification_id: String,
    pub card_id: String,
    pub execution_id: String,
    pub trigger_type: String,
    pub channel: String,
    pub status: String,
    pub scheduled_for: Option<i64>,
    pub attempted_at: Option<i64>,
    pub provider_message_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// Title and text of the notification most recently delivered to a card.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LatestMessage {
    pub title: Option<String>,
    pub message: String,
}
