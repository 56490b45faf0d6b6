//! Next-occurrence arithmetic for repeating notifications.
//!
//! Occurrences are computed on local calendar days in the schedule's IANA
//! zone and converted to UTC with a two-pass offset lookup, so DST
//! transitions shift the UTC instant instead of the local wall-clock time.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::notification::{Recurrence, RepeatPattern};

/// Months searched for a MONTHLY occurrence.
pub const MONTHLY_LOOKAHEAD: u32 = 36;
/// Local days scanned for a WEEKLY/BIWEEKLY occurrence.
pub const WEEKLY_LOOKAHEAD_DAYS: u64 = 400;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecurrenceCalcError {
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Computes next run times. Owns a cache of parsed zones.
#[derive(Default)]
pub struct RecurrenceCalculator {
    zones: Mutex<HashMap<String, Tz>>,
}

impl RecurrenceCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse (or fetch from cache) an IANA zone.
    pub fn zone(&self, name: &str) -> Result<Tz, RecurrenceCalcError> {
        let mut zones = self.zones.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tz) = zones.get(name) {
            return Ok(*tz);
        }
        let tz: Tz = name
            .parse()
            .map_err(|_| RecurrenceCalcError::UnknownTimezone(name.to_string()))?;
        zones.insert(name.to_string(), tz);
        Ok(tz)
    }

    /// First occurrence strictly after `after`, or `None` when nothing falls
    /// inside the look-ahead window.
    pub fn next_run(
        &self,
        rule: &Recurrence,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RecurrenceCalcError> {
        let tz = self.zone(&rule.timezone)?;
        Ok(match rule.pattern {
            RepeatPattern::Monthly => next_monthly(rule, tz, after),
            RepeatPattern::Weekly | RepeatPattern::Biweekly => next_weekly(rule, tz, after),
        })
    }
}

/// Convert a local wall-clock time to UTC.
///
/// The offset is looked up once from a first guess and again from the
/// corrected instant; the second offset wins.
pub fn local_to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let offset_at = |utc: &NaiveDateTime| {
        i64::from(tz.offset_from_utc_datetime(utc).fix().local_minus_utc())
    };
    let first = local - chrono::Duration::seconds(offset_at(&local));
    let corrected = local - chrono::Duration::seconds(offset_at(&first));
    Utc.from_utc_datetime(&corrected)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return 28;
    };
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| u32::try_from(next.signed_duration_since(first).num_days()).ok())
        .unwrap_or(28)
}

fn next_monthly(rule: &Recurrence, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let target = rule.day_of_month?;
    let local = after.with_timezone(&tz).date_naive();
    let month_start = NaiveDate::from_ymd_opt(local.year(), local.month(), 1)?;

    (0..MONTHLY_LOOKAHEAD).find_map(|i| {
        let month = month_start.checked_add_months(Months::new(i))?;
        let day = target.min(days_in_month(month.year(), month.month()));
        let date = NaiveDate::from_ymd_opt(month.year(), month.month(), day)?;
        let at = local_to_utc(tz, date.and_time(rule.time));
        (at > after).then_some(at)
    })
}

fn next_weekly(rule: &Recurrence, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let start = after.with_timezone(&tz).date_naive();
    let anchor_monday = week_start(rule.anchor.with_timezone(&tz).date_naive());

    (0..WEEKLY_LOOKAHEAD_DAYS).find_map(|i| {
        let day = start.checked_add_days(Days::new(i))?;
        if !rule.days.contains(&day.weekday()) {
            return None;
        }
        if rule.pattern == RepeatPattern::Biweekly {
            let weeks = day
                .signed_duration_since(anchor_monday)
                .num_days()
                .div_euclid(7);
            if weeks.rem_euclid(2) != 0 {
                return None;
            }
        }
        let at = local_to_utc(tz, day.and_time(rule.time));
        (at > after).then_some(at)
    })
}

/// Monday of the week containing `day`.
fn week_start(day: NaiveDate) -> NaiveDate {
    day - Days::new(u64::from(day.weekday().num_days_from_monday()))
}
