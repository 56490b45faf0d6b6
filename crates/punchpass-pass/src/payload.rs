//! `pass.json` model for store-card passes.

use serde::Serialize;

/// Change message templates are limited so the lock-screen banner stays short.
pub const MAX_MESSAGE_CHARS: usize = 180;

/// Root of `pass.json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassPayload {
    pub format_version: u8,
    pub pass_type_identifier: String,
    pub serial_number: String,
    pub team_identifier: String,
    pub organization_name: String,
    pub description: String,
    pub logo_text: String,
    pub background_color: String,
    pub foreground_color: String,
    pub label_color: String,
    pub barcodes: Vec<Barcode>,
    pub store_card: StoreCard,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,
    #[serde(rename = "webServiceURL", skip_serializing_if = "Option::is_none")]
    pub web_service_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Barcode {
    pub format: &'static str,
    pub message: String,
    pub message_encoding: &'static str,
    pub alt_text: String,
}

impl Barcode {
    pub fn qr(message: &str) -> Self {
        Self {
            format: "PKBarcodeFormatQR",
            message: message.to_string(),
            message_encoding: "iso-8859-1",
            alt_text: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCard {
    pub header_fields: Vec<Field>,
    pub auxiliary_fields: Vec<Field>,
    pub back_fields: Vec<Field>,
}

/// A label/value pair on the pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub key: String,
    pub label: String,
    pub value: FieldValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(i64),
}

impl Field {
    pub fn text(key: &str, label: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            value: FieldValue::Text(value.into()),
            change_message: None,
        }
    }

    pub fn number(key: &str, label: &str, value: i64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            value: FieldValue::Number(value),
            change_message: None,
        }
    }
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Back field surfacing the latest notification.
///
/// With both a title and a message the banner reads "{title}\n<message>";
/// with only one of them the banner is the value alone.
pub fn notification_field(title: Option<&str>, message: Option<&str>) -> Option<Field> {
    let title = title.map(str::trim).filter(|t| !t.is_empty());
    let message = message.map(str::trim).filter(|m| !m.is_empty());

    let (value, change_message) = match (title, message) {
        (Some(t), Some(m)) => (m, format!("{}\n%@", truncate_chars(t, MAX_MESSAGE_CHARS))),
        (None, Some(m)) => (m, "%@".to_string()),
        (Some(t), None) => (t, "%@".to_string()),
        (None, None) => return None,
    };

    Some(Field {
        key: "latestMessage".to_string(),
        label: "Latest update".to_string(),
        value: FieldValue::Text(truncate_chars(value, MAX_MESSAGE_CHARS)),
        change_message: Some(change_message),
    })
}
