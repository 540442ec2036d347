use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A single cell measurement row as submitted by a device
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityRecord {
    pub username: String,
    pub device_id: String,
    pub device_ip: String,
    pub device_mac: String,
    pub operator: String,
    /// dBm
    pub signal_power: f64,
    /// dB
    pub sinr: f64,
    pub network_type: String,
    pub frequency_band: String,
    pub cell_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Identity of a device: the account it reports under plus its own id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub username: String,
    pub device_id: String,
}

/// Latest known state of one device, aggregated over all its records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceActivity {
    pub username: String,
    pub device_id: String,
    pub ip: String,
    pub mac: String,
    pub last_seen: DateTime<Utc>,
}

impl DeviceActivity {
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            username: self.username.clone(),
            device_id: self.device_id.clone(),
        }
    }
}

/// Entry of the currently-connected report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    pub username: String,
    pub device_id: String,
    pub ip: String,
    pub mac: String,
}

impl From<DeviceActivity> for ConnectedDevice {
    fn from(activity: DeviceActivity) -> Self {
        Self {
            username: activity.username,
            device_id: activity.device_id,
            ip: activity.ip,
            mac: activity.mac,
        }
    }
}

/// Body of the device count endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceCountResponse {
    pub connected_devices: usize,
}

/// Inclusive time range for the summary queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Column a share summary is broken down by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Operator,
    NetworkType,
}

impl Category {
    pub fn column(self) -> &'static str {
        match self {
            Category::Operator => "operator",
            Category::NetworkType => "network_type",
        }
    }

    pub fn of(self, record: &ActivityRecord) -> &str {
        match self {
            Category::Operator => &record.operator,
            Category::NetworkType => &record.network_type,
        }
    }
}

/// Radio metric averaged per network type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMetric {
    SignalPower,
    Sinr,
}

impl SignalMetric {
    pub fn column(self) -> &'static str {
        match self {
            SignalMetric::SignalPower => "signal_power",
            SignalMetric::Sinr => "sinr",
        }
    }

    pub fn of(self, record: &ActivityRecord) -> f64 {
        match self {
            SignalMetric::SignalPower => record.signal_power,
            SignalMetric::Sinr => record.sinr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CategoryAverage {
    pub category: String,
    pub average: f64,
}

/// Bucket width of the activity trend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendInterval {
    Minute,
    #[default]
    Hour,
    Day,
    Month,
}

impl TrendInterval {
    /// Name understood by Postgres `date_trunc`.
    pub fn as_str(self) -> &'static str {
        match self {
            TrendInterval::Minute => "minute",
            TrendInterval::Hour => "hour",
            TrendInterval::Day => "day",
            TrendInterval::Month => "month",
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let naive = ts.naive_utc();
        let date = naive.date();
        let truncated = match self {
            TrendInterval::Minute => date.and_hms_opt(naive.hour(), naive.minute(), 0),
            TrendInterval::Hour => date.and_hms_opt(naive.hour(), 0, 0),
            TrendInterval::Day => date.and_hms_opt(0, 0, 0),
            TrendInterval::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
        };
        truncated.map(|t: NaiveDateTime| t.and_utc()).unwrap_or(ts)
    }
}

/// Number of distinct devices active in one trend bucket
#[derive(Debug, Clone, PartialEq)]
pub struct TrendBucket {
    pub bucket: DateTime<Utc>,
    pub devices: i64,
}

/// Body of the activity trend endpoint; the two arrays are parallel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTrend {
    pub timestamps: Vec<String>,
    pub counts: Vec<i64>,
}

/// Lifetime statistics of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatistics {
    pub username: String,
    pub device_id: String,
    pub records_count: i64,
    pub average_signal_power: f64,
    pub average_sinr: f64,
    pub connected_network_types: Vec<String>,
    pub last_seen: DateTime<Utc>,
}

/// Payload of `/submit_data`; the account comes from the caller's token.
#[derive(Debug, Clone, Deserialize)]
pub struct CellSubmission {
    pub operator: String,
    pub signal_power: f64,
    pub sinr: f64,
    pub network_type: String,
    pub frequency_band: String,
    pub cell_id: String,
    pub device_mac: String,
    pub device_ip: String,
    pub device_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}
