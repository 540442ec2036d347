use crate::errors::{Error, Result};
use crate::model::{ActivityRecord, CellSubmission, DateRange};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const SIGNAL_POWER_MIN: f64 = -150.0;
const SIGNAL_POWER_MAX: f64 = 0.0;
const SINR_MIN: f64 = -30.0;
const SINR_MAX: f64 = 50.0;
const NETWORK_TYPES: &[&str] = &["2G", "3G", "4G", "5G"];

/// Naive formats accepted for timestamps, all read as UTC. The month-name
/// forms are what browser clients produce with `toLocaleString`.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%b %d, %Y, %I:%M %p",
    "%d %b %Y %I:%M %p",
];

/// Parses an RFC 3339 instant, one of the naive formats, or a bare date
/// (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Builds the `start_date`/`end_date` range of the summary endpoints.
pub fn parse_date_range(start: Option<&str>, end: Option<&str>) -> Result<DateRange> {
    let parse = |name: &str, value: Option<&str>| -> Result<DateTime<Utc>> {
        let raw = value.ok_or_else(|| Error::Validation(format!("{} is required", name)))?;
        parse_timestamp(raw)
            .ok_or_else(|| Error::Validation(format!("{} {:?} is not a valid date", name, raw)))
    };

    let range = DateRange {
        start: parse("start_date", start)?,
        end: parse("end_date", end)?,
    };

    if range.start > range.end {
        return Err(Error::Validation(
            "start_date must not be after end_date".to_string(),
        ));
    }

    Ok(range)
}

/// Validates a device submission and turns it into a storable record.
/// Submissions without a timestamp are stamped with `now`.
pub fn validate_submission(
    username: &str,
    submission: CellSubmission,
    now: DateTime<Utc>,
) -> Result<ActivityRecord> {
    for (name, value) in [
        ("device_id", &submission.device_id),
        ("operator", &submission.operator),
        ("cell_id", &submission.cell_id),
    ] {
        if value.trim().is_empty() {
            return Err(Error::Validation(format!("{} cannot be empty", name)));
        }
    }

    let network_type = submission.network_type.trim().to_uppercase();
    if !NETWORK_TYPES.contains(&network_type.as_str()) {
        return Err(Error::Validation(format!(
            "Network type {:?} not one of {:?}",
            submission.network_type, NETWORK_TYPES
        )));
    }

    if !(SIGNAL_POWER_MIN..=SIGNAL_POWER_MAX).contains(&submission.signal_power) {
        return Err(Error::Validation(format!(
            "Signal power {} out of range [{}, {}]",
            submission.signal_power, SIGNAL_POWER_MIN, SIGNAL_POWER_MAX
        )));
    }

    if !(SINR_MIN..=SINR_MAX).contains(&submission.sinr) {
        return Err(Error::Validation(format!(
            "SINR {} out of range [{}, {}]",
            submission.sinr, SINR_MIN, SINR_MAX
        )));
    }

    let timestamp = match submission.timestamp.as_deref() {
        Some(raw) => parse_timestamp(raw)
            .ok_or_else(|| Error::Validation(format!("Timestamp {:?} is not a valid date", raw)))?,
        None => now,
    };

    Ok(ActivityRecord {
        username: username.to_string(),
        device_id: submission.device_id.trim().to_string(),
        device_ip: submission.device_ip,
        device_mac: submission.device_mac,
        operator: submission.operator.trim().to_string(),
        signal_power: submission.signal_power,
        sinr: submission.sinr,
        network_type,
        frequency_band: submission.frequency_band,
        cell_id: submission.cell_id,
        timestamp,
    })
}
