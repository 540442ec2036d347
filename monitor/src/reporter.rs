use crate::auth::{Identity, TokenVerifier};
use crate::errors::{Error, Result};
use crate::metrics::{AUTH_REJECTIONS_TOTAL, CONNECTED_DEVICES};
use crate::model::{
    ActivityTrend, Category, CategoryAverage, CategoryCount, CellSubmission, ConnectedDevice,
    DateRange, DeviceActivity, DeviceKey, DeviceStatistics, SignalMetric, TrendInterval,
};
use crate::store::ActivityStore;
use crate::validate::validate_submission;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Answers the admin dashboard queries and accepts device submissions.
///
/// Every operation checks the caller's credential first and touches the
/// store only once that check has passed.
#[derive(Clone)]
pub struct ConnectedDeviceReporter {
    store: Arc<dyn ActivityStore>,
    verifier: Arc<dyn TokenVerifier>,
}

impl ConnectedDeviceReporter {
    pub fn new(store: Arc<dyn ActivityStore>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { store, verifier }
    }

    /// Devices whose most recent activity is at or after `now - window`,
    /// one entry per (username, device_id).
    pub async fn list_connected_devices(
        &self,
        bearer: Option<String>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<ConnectedDevice>> {
        let admin = self.authorize(bearer)?;
        let threshold = connected_threshold(now, window);

        let seen = self.store.devices_seen_since(threshold).await?;
        let connected = select_connected(seen, threshold);

        CONNECTED_DEVICES.set(connected.len() as f64);
        info!(
            admin = %admin.subject,
            %threshold,
            count = connected.len(),
            "Listed connected devices"
        );

        Ok(connected)
    }

    /// Every device ever recorded with its latest address and last-seen time.
    pub async fn list_known_devices(&self, bearer: Option<String>) -> Result<Vec<DeviceActivity>> {
        let admin = self.authorize(bearer)?;

        let devices = dedup_latest(self.store.all_devices().await?);
        debug!(admin = %admin.subject, count = devices.len(), "Listed known devices");

        Ok(devices)
    }

    pub async fn count_known_devices(&self, bearer: Option<String>) -> Result<usize> {
        Ok(self.list_known_devices(bearer).await?.len())
    }

    /// Share of records per network type, as `"NN.NN%"` strings.
    pub async fn network_type_summary(
        &self,
        bearer: Option<String>,
        range: DateRange,
    ) -> Result<BTreeMap<String, String>> {
        self.category_summary(bearer, Category::NetworkType, range).await
    }

    /// Share of records per operator, as `"NN.NN%"` strings.
    pub async fn operator_summary(
        &self,
        bearer: Option<String>,
        range: DateRange,
    ) -> Result<BTreeMap<String, String>> {
        self.category_summary(bearer, Category::Operator, range).await
    }

    /// Mean signal power (dBm) per network type.
    pub async fn signal_power_summary(
        &self,
        bearer: Option<String>,
        range: DateRange,
    ) -> Result<BTreeMap<String, f64>> {
        self.metric_summary(bearer, SignalMetric::SignalPower, range).await
    }

    /// Mean SINR (dB) per network type.
    pub async fn sinr_summary(
        &self,
        bearer: Option<String>,
        range: DateRange,
    ) -> Result<BTreeMap<String, f64>> {
        self.metric_summary(bearer, SignalMetric::Sinr, range).await
    }

    /// Distinct active devices per `interval` bucket within `range`.
    pub async fn device_activity_trend(
        &self,
        bearer: Option<String>,
        range: DateRange,
        interval: TrendInterval,
    ) -> Result<ActivityTrend> {
        let admin = self.authorize(bearer)?;

        let buckets = self.store.activity_trend(interval, range).await?;
        debug!(
            admin = %admin.subject,
            interval = interval.as_str(),
            buckets = buckets.len(),
            "Computed activity trend"
        );

        let (timestamps, counts) = buckets
            .into_iter()
            .map(|b| (b.bucket.to_rfc3339_opts(SecondsFormat::Secs, true), b.devices))
            .unzip();

        Ok(ActivityTrend { timestamps, counts })
    }

    pub async fn device_statistics(
        &self,
        bearer: Option<String>,
        key: DeviceKey,
    ) -> Result<DeviceStatistics> {
        let admin = self.authorize(bearer)?;

        let label = format!("{}/{}", key.username, key.device_id);
        let stats = self
            .store
            .device_statistics(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no records for device {}", label)))?;

        debug!(
            admin = %admin.subject,
            device = %label,
            records = stats.records_count,
            "Computed device statistics"
        );
        Ok(stats)
    }

    /// Validates and stores one measurement. Any signed-in account may submit;
    /// the record is filed under the token's subject.
    pub async fn submit_cell_data(
        &self,
        bearer: Option<String>,
        submission: CellSubmission,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let user = self.verifier.verify_user(bearer).map_err(|e| {
            AUTH_REJECTIONS_TOTAL.inc();
            debug!("Submission rejected: {}", e);
            e
        })?;

        let record = validate_submission(&user.subject, submission, now)?;
        info!(
            username = %record.username,
            device_id = %record.device_id,
            network_type = %record.network_type,
            "Stored cell submission"
        );
        self.store.append(vec![record]).await
    }

    async fn category_summary(
        &self,
        bearer: Option<String>,
        category: Category,
        range: DateRange,
    ) -> Result<BTreeMap<String, String>> {
        let admin = self.authorize(bearer)?;

        let counts = self.store.category_counts(category, range).await?;
        debug!(admin = %admin.subject, column = category.column(), "Computed share summary");

        Ok(share_percentages(&counts))
    }

    async fn metric_summary(
        &self,
        bearer: Option<String>,
        metric: SignalMetric,
        range: DateRange,
    ) -> Result<BTreeMap<String, f64>> {
        let admin = self.authorize(bearer)?;

        let averages = self.store.signal_averages(metric, range).await?;
        debug!(admin = %admin.subject, metric = metric.column(), "Computed metric summary");

        Ok(averages
            .into_iter()
            .map(|CategoryAverage { category, average }| (category, average))
            .collect())
    }

    fn authorize(&self, bearer: Option<String>) -> Result<Identity> {
        self.verifier.verify_admin(bearer).map_err(|e| {
            AUTH_REJECTIONS_TOTAL.inc();
            debug!("Admin check rejected: {}", e);
            e
        })
    }
}

/// Each category's share of the total, formatted to two decimals.
/// Empty when there are no records.
pub fn share_percentages(counts: &[CategoryCount]) -> BTreeMap<String, String> {
    let total: i64 = counts.iter().map(|c| c.count).sum();
    if total <= 0 {
        return BTreeMap::new();
    }

    counts
        .iter()
        .map(|c| {
            let share = c.count as f64 * 100.0 / total as f64;
            (c.category.clone(), format!("{:.2}%", share))
        })
        .collect()
}

/// `now - window`, saturating at the earliest representable instant.
pub fn connected_threshold(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Keeps devices last seen at or after `threshold` (inclusive) and collapses
/// duplicate keys to their newest entry.
pub fn select_connected(
    devices: Vec<DeviceActivity>,
    threshold: DateTime<Utc>,
) -> Vec<ConnectedDevice> {
    dedup_latest(devices.into_iter().filter(|d| d.last_seen >= threshold))
        .into_iter()
        .map(ConnectedDevice::from)
        .collect()
}

/// One entry per key, first-appearance order, newest `last_seen` wins.
fn dedup_latest<I>(devices: I) -> Vec<DeviceActivity>
where
    I: IntoIterator<Item = DeviceActivity>,
{
    let mut index: HashMap<DeviceKey, usize> = HashMap::new();
    let mut out: Vec<DeviceActivity> = Vec::new();

    for device in devices {
        match index.get(&device.key()) {
            Some(&i) => {
                if device.last_seen > out[i].last_seen {
                    out[i] = device;
                }
            }
            None => {
                index.insert(device.key(), out.len());
                out.push(device);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockTokenVerifier;
    use crate::model::{ActivityRecord, TrendBucket};
    use crate::store::{MemoryActivityStore, MockActivityStore};
    use chrono::TimeZone;

    const WINDOW: Duration = Duration::from_secs(5 * 60);

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    fn record(user: &str, device: &str, ip: &str, ts: DateTime<Utc>) -> ActivityRecord {
        ActivityRecord {
            username: user.to_string(),
            device_id: device.to_string(),
            device_ip: ip.to_string(),
            device_mac: format!("mac-{}", ip),
            operator: "Alfa".to_string(),
            signal_power: -90.0,
            sinr: 10.0,
            network_type: "4G".to_string(),
            frequency_band: "1800".to_string(),
            cell_id: "cell-1".to_string(),
            timestamp: ts,
        }
    }

    fn activity(user: &str, device: &str, ip: &str, ts: DateTime<Utc>) -> DeviceActivity {
        DeviceActivity {
            username: user.to_string(),
            device_id: device.to_string(),
            ip: ip.to_string(),
            mac: format!("mac-{}", ip),
            last_seen: ts,
        }
    }

    fn admin_verifier() -> MockTokenVerifier {
        let mut verifier = MockTokenVerifier::new();
        verifier.expect_verify_admin().returning(|_| {
            Ok(Identity {
                subject: "root".to_string(),
            })
        });
        verifier.expect_verify_user().returning(|_| {
            Ok(Identity {
                subject: "root".to_string(),
            })
        });
        verifier
    }

    fn reporter_over(records: Vec<ActivityRecord>) -> ConnectedDeviceReporter {
        ConnectedDeviceReporter::new(
            Arc::new(MemoryActivityStore::new(records)),
            Arc::new(admin_verifier()),
        )
    }

    #[tokio::test]
    async fn test_five_minute_scenario() {
        let reporter = reporter_over(vec![
            record("alice", "dev-a", "10.0.0.1", at(11, 50, 0)),
            record("alice", "dev-a", "10.0.0.2", at(11, 56, 0)),
            record("bob", "dev-b", "10.0.0.3", at(11, 54, 0)),
        ]);

        let connected = reporter
            .list_connected_devices(Some("t".into()), at(12, 0, 0), WINDOW)
            .await
            .unwrap();

        assert_eq!(
            connected,
            vec![ConnectedDevice {
                username: "alice".to_string(),
                device_id: "dev-a".to_string(),
                ip: "10.0.0.2".to_string(),
                mac: "mac-10.0.0.2".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_boundary_is_inclusive() {
        let reporter = reporter_over(vec![
            record("alice", "dev-a", "10.0.0.1", at(11, 55, 0)),
            record("bob", "dev-b", "10.0.0.2", at(11, 54, 59)),
        ]);

        let connected = reporter
            .list_connected_devices(Some("t".into()), at(12, 0, 0), WINDOW)
            .await
            .unwrap();

        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].device_id, "dev-a");
    }

    #[tokio::test]
    async fn test_empty_store() {
        let reporter = reporter_over(Vec::new());
        let connected = reporter
            .list_connected_devices(Some("t".into()), at(12, 0, 0), WINDOW)
            .await
            .unwrap();
        assert!(connected.is_empty());
    }

    #[tokio::test]
    async fn test_each_recent_device_appears_once() {
        let mut records = Vec::new();
        for i in 0..10 {
            records.push(record("alice", "dev-a", &format!("10.0.0.{}", i), at(11, 56, i)));
            records.push(record("bob", "dev-a", &format!("10.0.1.{}", i), at(11, 57, i)));
        }
        let reporter = reporter_over(records);

        let connected = reporter
            .list_connected_devices(Some("t".into()), at(12, 0, 0), WINDOW)
            .await
            .unwrap();

        assert_eq!(connected.len(), 2);
        let alice = connected.iter().find(|d| d.username == "alice").unwrap();
        assert_eq!(alice.ip, "10.0.0.9");
    }

    #[tokio::test]
    async fn test_unauthorized_caller_never_reaches_store() {
        let mut store = MockActivityStore::new();
        store.expect_devices_seen_since().never();
        store.expect_all_devices().never();

        let mut verifier = MockTokenVerifier::new();
        verifier
            .expect_verify_admin()
            .times(2)
            .returning(|_| Err(Error::Forbidden("admin privilege required".to_string())));

        let reporter = ConnectedDeviceReporter::new(Arc::new(store), Arc::new(verifier));

        let result = reporter
            .list_connected_devices(Some("t".into()), at(12, 0, 0), WINDOW)
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));

        let result = reporter.list_known_devices(None).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockActivityStore::new();
        store
            .expect_devices_seen_since()
            .times(1)
            .returning(|_| Err(Error::Database(sqlx::Error::PoolTimedOut)));

        let reporter = ConnectedDeviceReporter::new(Arc::new(store), Arc::new(admin_verifier()));
        let result = reporter
            .list_connected_devices(Some("t".into()), at(12, 0, 0), WINDOW)
            .await;

        assert!(matches!(result, Err(Error::Database(_))));
    }

    #[tokio::test]
    async fn test_store_receives_threshold() {
        let mut store = MockActivityStore::new();
        store
            .expect_devices_seen_since()
            .withf(|threshold| *threshold == Utc.with_ymd_and_hms(2024, 5, 1, 11, 55, 0).unwrap())
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let reporter = ConnectedDeviceReporter::new(Arc::new(store), Arc::new(admin_verifier()));
        reporter
            .list_connected_devices(Some("t".into()), at(12, 0, 0), WINDOW)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_known_devices_and_count() {
        let reporter = reporter_over(vec![
            record("alice", "dev-a", "10.0.0.1", at(9, 0, 0)),
            record("alice", "dev-a", "10.0.0.2", at(11, 56, 0)),
            record("bob", "dev-b", "10.0.0.3", at(10, 0, 0)),
        ]);

        let known = reporter.list_known_devices(Some("t".into())).await.unwrap();
        assert_eq!(known.len(), 2);
        assert_eq!(known[0].username, "alice");
        assert_eq!(known[0].last_seen, at(11, 56, 0));

        assert_eq!(reporter.count_known_devices(Some("t".into())).await.unwrap(), 2);
    }

    #[test]
    fn test_select_connected_collapses_overlapping_rows() {
        let threshold = at(11, 55, 0);
        let rows = vec![
            activity("alice", "dev-a", "10.0.0.1", at(11, 56, 0)),
            activity("alice", "dev-a", "10.0.0.2", at(11, 58, 0)),
            activity("alice", "dev-a", "10.0.0.3", at(11, 57, 0)),
            activity("bob", "dev-b", "10.0.0.4", at(11, 40, 0)),
        ];

        let connected = select_connected(rows, threshold);
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].ip, "10.0.0.2");
    }

    #[test]
    fn test_threshold_saturates() {
        let now = at(12, 0, 0);
        assert_eq!(connected_threshold(now, WINDOW), at(11, 55, 0));
        assert_eq!(
            connected_threshold(now, Duration::from_secs(u64::MAX)),
            DateTime::<Utc>::MIN_UTC
        );
    }

    fn measured(
        user: &str,
        device: &str,
        operator: &str,
        network_type: &str,
        signal_power: f64,
        sinr: f64,
        ts: DateTime<Utc>,
    ) -> ActivityRecord {
        ActivityRecord {
            operator: operator.to_string(),
            network_type: network_type.to_string(),
            signal_power,
            sinr,
            ..record(user, device, "10.0.0.1", ts)
        }
    }

    fn morning() -> DateRange {
        DateRange {
            start: at(8, 0, 0),
            end: at(12, 0, 0),
        }
    }

    fn submission() -> CellSubmission {
        CellSubmission {
            operator: "Touch".to_string(),
            signal_power: -95.0,
            sinr: 7.5,
            network_type: "3G".to_string(),
            frequency_band: "2100".to_string(),
            cell_id: "9001".to_string(),
            device_mac: "02:00:00:00:00:01".to_string(),
            device_ip: "10.1.1.1".to_string(),
            device_id: "dev-z".to_string(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_network_type_and_operator_shares() {
        let reporter = reporter_over(vec![
            measured("alice", "dev-a", "Alfa", "4G", -80.0, 20.0, at(9, 0, 0)),
            measured("alice", "dev-a", "Alfa", "4G", -82.0, 18.0, at(9, 30, 0)),
            measured("bob", "dev-b", "Touch", "3G", -100.0, 5.0, at(10, 0, 0)),
            // Outside the range
            measured("bob", "dev-b", "Touch", "2G", -110.0, 1.0, at(13, 0, 0)),
        ]);

        let networks = reporter
            .network_type_summary(Some("t".into()), morning())
            .await
            .unwrap();
        assert_eq!(networks.len(), 2);
        assert_eq!(networks["4G"], "66.67%");
        assert_eq!(networks["3G"], "33.33%");

        let operators = reporter.operator_summary(Some("t".into()), morning()).await.unwrap();
        assert_eq!(operators["Alfa"], "66.67%");
        assert_eq!(operators["Touch"], "33.33%");
    }

    #[tokio::test]
    async fn test_signal_and_sinr_averages() {
        let reporter = reporter_over(vec![
            measured("alice", "dev-a", "Alfa", "4G", -80.0, 20.0, at(9, 0, 0)),
            measured("alice", "dev-a", "Alfa", "4G", -90.0, 10.0, at(9, 30, 0)),
            measured("bob", "dev-b", "Touch", "3G", -100.0, 5.0, at(10, 0, 0)),
        ]);

        let power = reporter
            .signal_power_summary(Some("t".into()), morning())
            .await
            .unwrap();
        assert_eq!(power["4G"], -85.0);
        assert_eq!(power["3G"], -100.0);

        let sinr = reporter.sinr_summary(Some("t".into()), morning()).await.unwrap();
        assert_eq!(sinr["4G"], 15.0);
        assert_eq!(sinr["3G"], 5.0);
    }

    #[tokio::test]
    async fn test_summaries_over_empty_range() {
        let reporter = reporter_over(vec![record("alice", "dev-a", "10.0.0.1", at(20, 0, 0))]);

        assert!(reporter
            .network_type_summary(Some("t".into()), morning())
            .await
            .unwrap()
            .is_empty());
        assert!(reporter
            .sinr_summary(Some("t".into()), morning())
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_share_percentages() {
        let counts = vec![
            CategoryCount {
                category: "Alfa".to_string(),
                count: 1,
            },
            CategoryCount {
                category: "Touch".to_string(),
                count: 3,
            },
        ];
        let shares = share_percentages(&counts);
        assert_eq!(shares["Alfa"], "25.00%");
        assert_eq!(shares["Touch"], "75.00%");

        assert!(share_percentages(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_activity_trend_shape() {
        let mut store = MockActivityStore::new();
        store
            .expect_activity_trend()
            .withf(|interval, range| *interval == TrendInterval::Hour && *range == morning())
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    TrendBucket {
                        bucket: at(9, 0, 0),
                        devices: 2,
                    },
                    TrendBucket {
                        bucket: at(10, 0, 0),
                        devices: 1,
                    },
                ])
            });

        let reporter = ConnectedDeviceReporter::new(Arc::new(store), Arc::new(admin_verifier()));
        let trend = reporter
            .device_activity_trend(Some("t".into()), morning(), TrendInterval::Hour)
            .await
            .unwrap();

        assert_eq!(
            trend.timestamps,
            vec!["2024-05-01T09:00:00Z".to_string(), "2024-05-01T10:00:00Z".to_string()]
        );
        assert_eq!(trend.counts, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_device_statistics_found_and_missing() {
        let reporter = reporter_over(vec![
            measured("alice", "dev-a", "Alfa", "4G", -80.0, 20.0, at(9, 0, 0)),
            measured("alice", "dev-a", "Alfa", "3G", -100.0, 10.0, at(10, 0, 0)),
        ]);

        let key = DeviceKey {
            username: "alice".to_string(),
            device_id: "dev-a".to_string(),
        };
        let stats = reporter.device_statistics(Some("t".into()), key).await.unwrap();
        assert_eq!(stats.records_count, 2);
        assert_eq!(stats.average_signal_power, -90.0);
        assert_eq!(stats.average_sinr, 15.0);
        assert_eq!(stats.connected_network_types, vec!["3G", "4G"]);
        assert_eq!(stats.last_seen, at(10, 0, 0));

        let missing = DeviceKey {
            username: "alice".to_string(),
            device_id: "nope".to_string(),
        };
        let result = reporter.device_statistics(Some("t".into()), missing).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_summaries_reject_non_admin_before_store() {
        let mut store = MockActivityStore::new();
        store.expect_category_counts().never();
        store.expect_signal_averages().never();
        store.expect_activity_trend().never();
        store.expect_device_statistics().never();

        let mut verifier = MockTokenVerifier::new();
        verifier
            .expect_verify_admin()
            .times(5)
            .returning(|_| Err(Error::Forbidden("admin privilege required".to_string())));

        let reporter = ConnectedDeviceReporter::new(Arc::new(store), Arc::new(verifier));
        let bearer = || Some("t".to_string());

        assert!(reporter.operator_summary(bearer(), morning()).await.is_err());
        assert!(reporter.signal_power_summary(bearer(), morning()).await.is_err());
        assert!(reporter
            .device_activity_trend(bearer(), morning(), TrendInterval::Day)
            .await
            .is_err());
        let key = DeviceKey {
            username: "alice".to_string(),
            device_id: "dev-a".to_string(),
        };
        assert!(reporter.device_statistics(bearer(), key).await.is_err());
        let result = reporter.network_type_summary(bearer(), morning()).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_submission_is_filed_under_token_subject() {
        let store = Arc::new(MemoryActivityStore::new(Vec::new()));

        let mut verifier = MockTokenVerifier::new();
        verifier.expect_verify_admin().never();
        verifier.expect_verify_user().times(1).returning(|_| {
            Ok(Identity {
                subject: "carol".to_string(),
            })
        });

        let reporter = ConnectedDeviceReporter::new(store.clone(), Arc::new(verifier));
        reporter
            .submit_cell_data(Some("t".into()), submission(), at(11, 59, 0))
            .await
            .unwrap();

        let devices = store.all_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].username, "carol");
        assert_eq!(devices[0].device_id, "dev-z");
        assert_eq!(devices[0].last_seen, at(11, 59, 0));
    }

    #[tokio::test]
    async fn test_invalid_submission_is_not_stored() {
        let mut store = MockActivityStore::new();
        store.expect_append().never();

        let reporter = ConnectedDeviceReporter::new(Arc::new(store), Arc::new(admin_verifier()));
        let mut bad = submission();
        bad.sinr = 120.0;

        let result = reporter.submit_cell_data(Some("t".into()), bad, at(12, 0, 0)).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_submission_without_token_is_rejected() {
        let mut store = MockActivityStore::new();
        store.expect_append().never();

        let mut verifier = MockTokenVerifier::new();
        verifier
            .expect_verify_user()
            .times(1)
            .returning(|_| Err(Error::Unauthorized("missing bearer token".to_string())));

        let reporter = ConnectedDeviceReporter::new(Arc::new(store), Arc::new(verifier));
        let result = reporter.submit_cell_data(None, submission(), at(12, 0, 0)).await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }
}
