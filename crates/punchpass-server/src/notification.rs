//! Notification domain model.
//!
//! Enumerations are stored as their uppercase wire names (`"ACTIVE"`,
//! `"APPLE_WALLET"`, ...) in both SQLite and JSON.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::storage::NotificationRow;

/// Defines a fieldless enum with a fixed uppercase text form.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownValue {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// A stored or submitted value that is not a known enum tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value: {value:?}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

text_enum!(NotificationStatus { Active => "ACTIVE", Inactive => "INACTIVE" });
text_enum!(DeliveryMode { Now => "NOW", Scheduled => "SCHEDULED" });
text_enum!(ScheduleType { Once => "ONCE", Repeat => "REPEAT" });
text_enum!(RepeatPattern { Weekly => "WEEKLY", Biweekly => "BIWEEKLY", Monthly => "MONTHLY" });
text_enum!(
    /// What started a dispatch.
    TriggerType { ManualNow => "MANUAL_NOW", Scheduled => "SCHEDULED" }
);
text_enum!(Channel { AppleWallet => "APPLE_WALLET", GoogleWallet => "GOOGLE_WALLET" });
text_enum!(
    /// Delivery log state. Rows start `Queued` and move to one terminal state.
    LogStatus { Queued => "QUEUED", Sent => "SENT", Failed => "FAILED", Skipped => "SKIPPED" }
);

const WEEKDAY_CODES: [(&str, Weekday); 7] = [
    ("MON", Weekday::Mon),
    ("TUE", Weekday::Tue),
    ("WED", Weekday::Wed),
    ("THU", Weekday::Thu),
    ("FRI", Weekday::Fri),
    ("SAT", Weekday::Sat),
    ("SUN", Weekday::Sun),
];

/// Parse a three-letter weekday code (`MON` .. `SUN`, case-insensitive).
pub fn parse_weekday(code: &str) -> Option<Weekday> {
    let code = code.trim();
    WEEKDAY_CODES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, d)| *d)
}

pub fn weekday_code(day: Weekday) -> &'static str {
    WEEKDAY_CODES[day.num_days_from_monday() as usize].0
}

/// Parse a 24-hour `HH:MM` local time.
pub fn parse_local_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// A notification as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub business_id: String,
    pub title: Option<String>,
    pub message: String,
    pub status: NotificationStatus,
    pub delivery_mode: DeliveryMode,
    pub schedule_type: ScheduleType,
    pub scheduled_at: Option<i64>,
    pub repeat_pattern: Option<RepeatPattern>,
    /// Weekday codes in Monday-first order.
    pub repeat_days: Vec<String>,
    pub monthly_day_of_month: Option<u32>,
    pub repeat_time_local: Option<String>,
    pub timezone: Option<String>,
    pub next_run_at: Option<i64>,
    pub last_run_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Parsed repeat settings of a REPEAT notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recurrence {
    pub pattern: RepeatPattern,
    pub days: Vec<Weekday>,
    pub day_of_month: Option<u32>,
    pub time: NaiveTime,
    pub timezone: String,
    /// Creation instant; fixes which week of a BIWEEKLY cycle is "on".
    pub anchor: DateTime<Utc>,
}

/// Why a notification's repeat settings cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecurrenceError {
    #[error("Notification is not a REPEAT schedule")]
    NotRepeating,

    #[error("Missing repeat setting: {0}")]
    Missing(&'static str),

    #[error("Invalid repeat time {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("Invalid weekday {0:?}")]
    InvalidWeekday(String),
}

impl Notification {
    pub fn is_repeating(&self) -> bool {
        self.schedule_type == ScheduleType::Repeat
    }

    /// Parse the repeat settings.
    pub fn recurrence(&self) -> Result<Recurrence, RecurrenceError> {
        if !self.is_repeating() {
            return Err(RecurrenceError::NotRepeating);
        }
        let pattern = self
            .repeat_pattern
            .ok_or(RecurrenceError::Missing("repeatPattern"))?;
        let raw_time = self
            .repeat_time_local
            .as_deref()
            .ok_or(RecurrenceError::Missing("repeatTimeLocal"))?;
        let time = parse_local_time(raw_time)
            .ok_or_else(|| RecurrenceError::InvalidTime(raw_time.to_string()))?;
        let timezone = self
            .timezone
            .clone()
            .ok_or(RecurrenceError::Missing("timezone"))?;
        let days = self
            .repeat_days
            .iter()
            .map(|d| parse_weekday(d).ok_or_else(|| RecurrenceError::InvalidWeekday(d.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        match pattern {
            RepeatPattern::Monthly if self.monthly_day_of_month.is_none() => {
                return Err(RecurrenceError::Missing("monthlyDayOfMonth"));
            }
            RepeatPattern::Weekly | RepeatPattern::Biweekly if days.is_empty() => {
                return Err(RecurrenceError::Missing("repeatDays"));
            }
            _ => {}
        }

        Ok(Recurrence {
            pattern,
            days,
            day_of_month: self.monthly_day_of_month,
            time,
            timezone,
            anchor: punchpass_core::time::from_millis(self.created_at),
        })
    }

    /// Rebuild from a stored row.
    pub fn from_row(row: NotificationRow) -> Result<Self, UnknownValue> {
        let repeat_pattern = row
            .repeat_pattern
            .as_deref()
            .map(RepeatPattern::from_str)
            .transpose()?;
        Ok(Self {
            status: row.status.parse()?,
            delivery_mode: row.delivery_mode.parse()?,
            schedule_type: row.schedule_type.parse()?,
            repeat_pattern,
            repeat_days: row
                .repeat_days
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect(),
            monthly_day_of_month: row
                .monthly_day_of_month
                .and_then(|d| u32::try_from(d).ok()),
            id: row.id,
            business_id: row.business_id,
            title: row.title,
            message: row.message,
            scheduled_at: row.scheduled_at,
            repeat_time_local: row.repeat_time_local,
            timezone: row.timezone,
            next_run_at: row.next_run_at,
            last_run_at: row.last_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A notification as submitted by a business user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDraft {
    pub business_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    pub delivery_mode: DeliveryMode,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub repeat_pattern: Option<RepeatPattern>,
    #[serde(default)]
    pub repeat_days: Vec<String>,
    #[serde(default)]
    pub monthly_day_of_month: Option<u32>,
    #[serde(default)]
    pub repeat_time_local: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// A draft field that breaks a notification invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

fn invalid(field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field,
        message: message.into(),
    }
}

impl NotificationDraft {
    /// Check every invariant and produce an ACTIVE notification.
    ///
    /// `nextRunAt` starts as `scheduledAt` for one-off scheduled sends and
    /// empty otherwise; REPEAT schedules get theirs on the next scheduler
    /// tick.
    pub fn validate(self, now_ms: i64) -> Result<Notification, ValidationError> {
        let business_id = self.business_id.trim().to_string();
        if business_id.is_empty() {
            return Err(invalid("businessId", "must not be empty"));
        }
        let message = self.message.trim().to_string();
        if message.is_empty() {
            return Err(invalid("message", "must not be empty"));
        }
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        if self.delivery_mode == DeliveryMode::Now && self.schedule_type != ScheduleType::Once {
            return Err(invalid("scheduleType", "NOW delivery must be ONCE"));
        }

        let scheduled_at = self.scheduled_at.map(|t| t.timestamp_millis());
        let mut notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            business_id,
            title,
            message,
            status: NotificationStatus::Active,
            delivery_mode: self.delivery_mode,
            schedule_type: self.schedule_type,
            scheduled_at,
            repeat_pattern: None,
            repeat_days: Vec::new(),
            monthly_day_of_month: None,
            repeat_time_local: None,
            timezone: None,
            next_run_at: None,
            last_run_at: None,
            created_at: now_ms,
            updated_at: now_ms,
        };

        match self.schedule_type {
            ScheduleType::Once => {
                let has_repeat_fields = self.repeat_pattern.is_some()
                    || !self.repeat_days.is_empty()
                    || self.monthly_day_of_month.is_some()
                    || self.repeat_time_local.is_some();
                if has_repeat_fields {
                    return Err(invalid("repeatPattern", "repeat settings require REPEAT"));
                }
                if self.delivery_mode == DeliveryMode::Scheduled {
                    let at = scheduled_at
                        .ok_or_else(|| invalid("scheduledAt", "required for SCHEDULED ONCE"))?;
                    if at <= now_ms {
                        return Err(invalid("scheduledAt", "must be in the future"));
                    }
                    notification.next_run_at = Some(at);
                }
            }
            ScheduleType::Repeat => {
                let pattern = self
                    .repeat_pattern
                    .ok_or_else(|| invalid("repeatPattern", "required for REPEAT"))?;
                let time = self
                    .repeat_time_local
                    .ok_or_else(|| invalid("repeatTimeLocal", "required for REPEAT"))?;
                if parse_local_time(&time).is_none() {
                    return Err(invalid("repeatTimeLocal", format!("{time:?} is not HH:MM")));
                }
                let timezone = self
                    .timezone
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| invalid("timezone", "required for REPEAT"))?;
                if timezone.parse::<chrono_tz::Tz>().is_err() {
                    return Err(invalid("timezone", format!("unknown zone {timezone:?}")));
                }

                if pattern == RepeatPattern::Monthly {
                    if !self.repeat_days.is_empty() {
                        return Err(invalid("repeatDays", "must be empty for MONTHLY"));
                    }
                    let day = self
                        .monthly_day_of_month
                        .ok_or_else(|| invalid("monthlyDayOfMonth", "required for MONTHLY"))?;
                    if !(1..=31).contains(&day) {
                        return Err(invalid("monthlyDayOfMonth", "must be between 1 and 31"));
                    }
                    notification.monthly_day_of_month = Some(day);
                } else {
                    if self.monthly_day_of_month.is_some() {
                        return Err(invalid("monthlyDayOfMonth", "only valid for MONTHLY"));
                    }
                    notification.repeat_days = normalize_days(&self.repeat_days)?;
                }

                notification.repeat_pattern = Some(pattern);
                notification.repeat_time_local = Some(time.trim().to_string());
                notification.timezone = Some(timezone);
            }
        }

        Ok(notification)
    }
}

/// Deduplicate and order weekday codes Monday first.
fn normalize_days(raw: &[String]) -> Result<Vec<String>, ValidationError> {
    let mut seen = [false; 7];
    for code in raw {
        let day = parse_weekday(code)
            .ok_or_else(|| invalid("repeatDays", format!("unknown weekday {code:?}")))?;
        seen[day.num_days_from_monday() as usize] = true;
    }
    let days: Vec<String> = WEEKDAY_CODES
        .iter()
        .zip(seen)
        .filter(|(_, on)| *on)
        .map(|((code, _), _)| (*code).to_string())
        .collect();
    if days.is_empty() {
        return Err(invalid("repeatDays", "at least one weekday is required"));
    }
    Ok(days)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    const NOW: i64 = 1_767_225_600_000; // 2026-01-01T00:00:00Z

    fn draft(delivery: DeliveryMode, schedule: ScheduleType) -> NotificationDraft {
        NotificationDraft {
            business_id: "biz-1".into(),
            title: None,
            message: "Double stamps today".into(),
            delivery_mode: delivery,
            schedule_type: schedule,
            scheduled_at: None,
            repeat_pattern: None,
            repeat_days: Vec::new(),
            monthly_day_of_month: None,
            repeat_time_local: None,
            timezone: None,
        }
    }

    fn weekly() -> NotificationDraft {
        NotificationDraft {
            repeat_pattern: Some(RepeatPattern::Weekly),
            repeat_days: vec!["wed".into(), "MON".into(), "WED".into()],
            repeat_time_local: Some("09:00".into()),
            timezone: Some("Europe/Berlin".into()),
            ..draft(DeliveryMode::Scheduled, ScheduleType::Repeat)
        }
    }

    #[test]
    fn enum_text_forms() {
        assert_eq!(LogStatus::Queued.as_str(), "QUEUED");
        assert_eq!("APPLE_WALLET".parse::<Channel>().unwrap(), Channel::AppleWallet);
        assert_eq!(TriggerType::ManualNow.to_string(), "MANUAL_NOW");
        let err = "DAILY".parse::<RepeatPattern>().unwrap_err();
        assert_eq!(err.kind, "RepeatPattern");
        assert_eq!(
            serde_json::to_value(RepeatPattern::Biweekly).unwrap(),
            serde_json::json!("BIWEEKLY")
        );
    }

    #[test]
    fn weekday_codes() {
        assert_eq!(parse_weekday("fri"), Some(Weekday::Fri));
        assert_eq!(parse_weekday("Friday"), None);
        assert_eq!(weekday_code(Weekday::Sun), "SUN");
    }

    #[test]
    fn now_delivery_must_be_once() {
        let err = draft(DeliveryMode::Now, ScheduleType::Repeat)
            .validate(NOW)
            .unwrap_err();
        assert_eq!(err.field, "scheduleType");

        let n = draft(DeliveryMode::Now, ScheduleType::Once).validate(NOW).unwrap();
        assert_eq!(n.status, NotificationStatus::Active);
        assert_eq!(n.next_run_at, None);
    }

    #[test]
    fn scheduled_once_uses_scheduled_at() {
        let mut d = draft(DeliveryMode::Scheduled, ScheduleType::Once);
        assert_eq!(d.clone().validate(NOW).unwrap_err().field, "scheduledAt");

        d.scheduled_at = Some(punchpass_core::time::from_millis(NOW - 1));
        assert_eq!(d.clone().validate(NOW).unwrap_err().field, "scheduledAt");

        d.scheduled_at = Some(punchpass_core::time::from_millis(NOW + 60_000));
        let n = d.validate(NOW).unwrap();
        assert_eq!(n.next_run_at, Some(NOW + 60_000));
    }

    #[test]
    fn weekly_days_are_normalised() {
        let n = weekly().validate(NOW).unwrap();
        assert_eq!(n.repeat_days, ["MON", "WED"]);
        assert_eq!(n.next_run_at, None);

        let rec = n.recurrence().unwrap();
        assert_eq!(rec.days, [Weekday::Mon, Weekday::Wed]);
        assert_eq!(rec.time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(rec.anchor.timestamp_millis(), NOW);
    }

    #[test]
    fn repeat_requires_settings() {
        let mut d = weekly();
        d.timezone = Some("Mars/Olympus".into());
        assert_eq!(d.validate(NOW).unwrap_err().field, "timezone");

        let mut d = weekly();
        d.repeat_time_local = Some("9am".into());
        assert_eq!(d.validate(NOW).unwrap_err().field, "repeatTimeLocal");

        let mut d = weekly();
        d.repeat_days.clear();
        assert_eq!(d.validate(NOW).unwrap_err().field, "repeatDays");

        let mut d = weekly();
        d.monthly_day_of_month = Some(3);
        assert_eq!(d.validate(NOW).unwrap_err().field, "monthlyDayOfMonth");
    }

    #[test]
    fn monthly_requires_day_and_no_weekdays() {
        let mut d = weekly();
        d.repeat_pattern = Some(RepeatPattern::Monthly);
        assert_eq!(d.clone().validate(NOW).unwrap_err().field, "repeatDays");

        d.repeat_days.clear();
        assert_eq!(d.clone().validate(NOW).unwrap_err().field, "monthlyDayOfMonth");

        d.monthly_day_of_month = Some(32);
        assert_eq!(d.clone().validate(NOW).unwrap_err().field, "monthlyDayOfMonth");

        d.monthly_day_of_month = Some(31);
        let n = d.validate(NOW).unwrap();
        assert_eq!(n.monthly_day_of_month, Some(31));
        assert!(n.repeat_days.is_empty());
    }

    #[test]
    fn once_rejects_repeat_fields() {
        let mut d = draft(DeliveryMode::Now, ScheduleType::Once);
        d.repeat_days = vec!["MON".into()];
        assert_eq!(d.validate(NOW).unwrap_err().field, "repeatPattern");
    }

    #[test]
    fn blank_title_is_dropped() {
        let mut d = draft(DeliveryMode::Now, ScheduleType::Once);
        d.title = Some("   ".into());
        assert_eq!(d.validate(NOW).unwrap().title, None);
    }

    #[test]
    fn recurrence_of_once_is_an_error() {
        let n = draft(DeliveryMode::Now, ScheduleType::Once).validate(NOW).unwrap();
        assert_eq!(n.recurrence(), Err(RecurrenceError::NotRepeating));
    }
}
