use crate::config::Config;
use crate::errors::{Error, Result};
use crate::metrics::{STORE_FAILURES_TOTAL, STORE_QUERY_LATENCY_SECONDS};
use crate::model::{
    ActivityRecord, Category, CategoryAverage, CategoryCount, DateRange, DeviceActivity,
    DeviceKey, DeviceStatistics, SignalMetric, TrendBucket, TrendInterval,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const INSERT_ATTEMPTS: u32 = 5;
const INSERT_BASE_DELAY: Duration = Duration::from_millis(100);
const INSERT_MAX_DELAY: Duration = Duration::from_millis(3200);

/// SQLSTATEs worth retrying: connection_exception, connection_does_not_exist,
/// connection_failure, cannot_connect_now, too_many_connections.
const TRANSIENT_SQLSTATES: &[&str] = &["08000", "08003", "08006", "57P03", "53300"];

/// Read access to recorded device activity, plus the append path used by
/// `/submit_data` and the seeder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// One entry per device whose last-seen timestamp is at or after `threshold`.
    async fn devices_seen_since(&self, threshold: DateTime<Utc>) -> Result<Vec<DeviceActivity>>;

    /// One entry per device ever recorded, most recently seen first.
    async fn all_devices(&self) -> Result<Vec<DeviceActivity>>;

    /// Record counts per category value within `range`.
    async fn category_counts(&self, category: Category, range: DateRange)
        -> Result<Vec<CategoryCount>>;

    /// Mean of `metric` per network type within `range`.
    async fn signal_averages(
        &self,
        metric: SignalMetric,
        range: DateRange,
    ) -> Result<Vec<CategoryAverage>>;

    /// Distinct active devices per bucket, oldest bucket first.
    async fn activity_trend(
        &self,
        interval: TrendInterval,
        range: DateRange,
    ) -> Result<Vec<TrendBucket>>;

    /// `None` when the device has no records.
    async fn device_statistics(&self, key: DeviceKey) -> Result<Option<DeviceStatistics>>;

    async fn append(&self, records: Vec<ActivityRecord>) -> Result<()>;
}

pub async fn make_pool(config: &Config) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect(&config.database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Latest record per device key; ties on timestamp go to the most recently
/// inserted row. With `since_threshold` only records at or after `$1` are
/// considered, which keeps exactly the devices whose newest record qualifies.
fn latest_per_device_query(since_threshold: bool) -> String {
    let filter = if since_threshold {
        r#"WHERE "timestamp" >= $1"#
    } else {
        ""
    };

    format!(
        r#"
        SELECT username, device_id, ip, mac, last_seen FROM (
            SELECT DISTINCT ON (username, device_id)
                   username, device_id, device_ip AS ip, device_mac AS mac, "timestamp" AS last_seen
            FROM cell_records
            {}
            ORDER BY username, device_id, "timestamp" DESC, id DESC
        ) latest
        ORDER BY last_seen DESC
        "#,
        filter
    )
}

#[derive(sqlx::FromRow)]
struct StatisticsRow {
    records_count: i64,
    average_signal_power: Option<f64>,
    average_sinr: Option<f64>,
    connected_network_types: Option<Vec<String>>,
    last_seen: Option<DateTime<Utc>>,
}

/// PostgreSQL implementation of [`ActivityStore`] over the `cell_records` table
#[derive(Debug, Clone)]
pub struct PgActivityStore {
    pool: PgPool,
}

impl PgActivityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Runs one store query, recording its latency and counting failures.
async fn timed<T, F>(what: &str, query: F) -> Result<T>
where
    F: Future<Output = sqlx::Result<T>>,
{
    let start = Instant::now();
    let result = query.await;
    STORE_QUERY_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());

    result.map_err(|e| {
        STORE_FAILURES_TOTAL.inc();
        error!("{} query failed: {}", what, e);
        Error::Database(e)
    })
}

#[async_trait]
impl ActivityStore for PgActivityStore {
    async fn devices_seen_since(&self, threshold: DateTime<Utc>) -> Result<Vec<DeviceActivity>> {
        let query = latest_per_device_query(true);
        let devices = timed(
            "Connected devices",
            sqlx::query_as::<_, DeviceActivity>(&query)
                .bind(threshold)
                .fetch_all(&self.pool),
        )
        .await?;

        debug!("{} devices seen since {}", devices.len(), threshold);
        Ok(devices)
    }

    async fn all_devices(&self) -> Result<Vec<DeviceActivity>> {
        let query = latest_per_device_query(false);
        timed(
            "Known devices",
            sqlx::query_as::<_, DeviceActivity>(&query).fetch_all(&self.pool),
        )
        .await
    }

    async fn category_counts(
        &self,
        category: Category,
        range: DateRange,
    ) -> Result<Vec<CategoryCount>> {
        let query = format!(
            r#"
            SELECT {col} AS category, COUNT(*) AS count
            FROM cell_records
            WHERE "timestamp" >= $1 AND "timestamp" <= $2
            GROUP BY {col}
            ORDER BY count DESC, category
            "#,
            col = category.column()
        );

        timed(
            "Category summary",
            sqlx::query_as::<_, CategoryCount>(&query)
                .bind(range.start)
                .bind(range.end)
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn signal_averages(
        &self,
        metric: SignalMetric,
        range: DateRange,
    ) -> Result<Vec<CategoryAverage>> {
        let query = format!(
            r#"
            SELECT network_type AS category, AVG({col}) AS average
            FROM cell_records
            WHERE "timestamp" >= $1 AND "timestamp" <= $2
            GROUP BY network_type
            ORDER BY network_type
            "#,
            col = metric.column()
        );

        timed(
            "Signal summary",
            sqlx::query_as::<_, CategoryAverage>(&query)
                .bind(range.start)
                .bind(range.end)
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn activity_trend(
        &self,
        interval: TrendInterval,
        range: DateRange,
    ) -> Result<Vec<TrendBucket>> {
        let query = r#"
            SELECT date_trunc($3, "timestamp" AT TIME ZONE 'UTC') AS bucket,
                   COUNT(DISTINCT (username, device_id)) AS devices
            FROM cell_records
            WHERE "timestamp" >= $1 AND "timestamp" <= $2
            GROUP BY bucket
            ORDER BY bucket
        "#;

        let rows = timed(
            "Activity trend",
            sqlx::query_as::<_, (NaiveDateTime, i64)>(query)
                .bind(range.start)
                .bind(range.end)
                .bind(interval.as_str())
                .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(bucket, devices)| TrendBucket {
                bucket: bucket.and_utc(),
                devices,
            })
            .collect())
    }

    async fn device_statistics(&self, key: DeviceKey) -> Result<Option<DeviceStatistics>> {
        let query = r#"
            SELECT COUNT(*) AS records_count,
                   AVG(signal_power) AS average_signal_power,
                   AVG(sinr) AS average_sinr,
                   ARRAY_AGG(DISTINCT network_type ORDER BY network_type) AS connected_network_types,
                   MAX("timestamp") AS last_seen
            FROM cell_records
            WHERE username = $1 AND device_id = $2
        "#;

        let row = timed(
            "Device statistics",
            sqlx::query_as::<_, StatisticsRow>(query)
                .bind(&key.username)
                .bind(&key.device_id)
                .fetch_one(&self.pool),
        )
        .await?;

        let Some(last_seen) = row.last_seen.filter(|_| row.records_count > 0) else {
            return Ok(None);
        };

        Ok(Some(DeviceStatistics {
            username: key.username,
            device_id: key.device_id,
            records_count: row.records_count,
            average_signal_power: row.average_signal_power.unwrap_or_default(),
            average_sinr: row.average_sinr.unwrap_or_default(),
            connected_network_types: row.connected_network_types.unwrap_or_default(),
            last_seen,
        }))
    }

    async fn append(&self, records: Vec<ActivityRecord>) -> Result<()> {
        insert_batch(&self.pool, &records).await
    }
}

/// Collapses raw records into one [`DeviceActivity`] per key, keeping the
/// ip/mac of the newest record. Output is ordered by `last_seen` descending.
pub fn latest_per_device<'a, I>(records: I) -> Vec<DeviceActivity>
where
    I: IntoIterator<Item = &'a ActivityRecord>,
{
    let mut latest: HashMap<DeviceKey, DeviceActivity> = HashMap::new();

    for record in records {
        let key = DeviceKey {
            username: record.username.clone(),
            device_id: record.device_id.clone(),
        };
        let newer = latest
            .get(&key)
            .map_or(true, |seen| record.timestamp >= seen.last_seen);
        if newer {
            latest.insert(
                key,
                DeviceActivity {
                    username: record.username.clone(),
                    device_id: record.device_id.clone(),
                    ip: record.device_ip.clone(),
                    mac: record.device_mac.clone(),
                    last_seen: record.timestamp,
                },
            );
        }
    }

    let mut devices: Vec<DeviceActivity> = latest.into_values().collect();
    devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    devices
}

/// Process-local [`ActivityStore`], used for tests and local experiments.
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    records: RwLock<Vec<ActivityRecord>>,
}

impl MemoryActivityStore {
    pub fn new(records: Vec<ActivityRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&[ActivityRecord]) -> T) -> T {
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&records)
    }

    fn in_range(records: &[ActivityRecord], range: DateRange) -> impl Iterator<Item = &ActivityRecord> {
        records.iter().filter(move |r| range.contains(r.timestamp))
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn devices_seen_since(&self, threshold: DateTime<Utc>) -> Result<Vec<DeviceActivity>> {
        Ok(self.read(|records| {
            latest_per_device(records.iter().filter(|r| r.timestamp >= threshold))
        }))
    }

    async fn all_devices(&self) -> Result<Vec<DeviceActivity>> {
        Ok(self.read(|records| latest_per_device(records)))
    }

    async fn category_counts(
        &self,
        category: Category,
        range: DateRange,
    ) -> Result<Vec<CategoryCount>> {
        let counts = self.read(|records| {
            let mut counts: BTreeMap<String, i64> = BTreeMap::new();
            for record in Self::in_range(records, range) {
                *counts.entry(category.of(record).to_string()).or_default() += 1;
            }
            counts
        });

        let mut out: Vec<CategoryCount> = counts
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
        Ok(out)
    }

    async fn signal_averages(
        &self,
        metric: SignalMetric,
        range: DateRange,
    ) -> Result<Vec<CategoryAverage>> {
        let sums = self.read(|records| {
            let mut sums: BTreeMap<String, (f64, u32)> = BTreeMap::new();
            for record in Self::in_range(records, range) {
                let entry = sums.entry(record.network_type.clone()).or_default();
                entry.0 += metric.of(record);
                entry.1 += 1;
            }
            sums
        });

        Ok(sums
            .into_iter()
            .map(|(category, (sum, n))| CategoryAverage {
                category,
                average: sum / f64::from(n),
            })
            .collect())
    }

    async fn activity_trend(
        &self,
        interval: TrendInterval,
        range: DateRange,
    ) -> Result<Vec<TrendBucket>> {
        let buckets: Vec<TrendBucket> = self.read(|records| {
            let mut buckets: BTreeMap<DateTime<Utc>, HashSet<(&str, &str)>> = BTreeMap::new();
            for record in Self::in_range(records, range) {
                buckets
                    .entry(interval.truncate(record.timestamp))
                    .or_default()
                    .insert((record.username.as_str(), record.device_id.as_str()));
            }
            buckets
                .into_iter()
                .map(|(bucket, devices)| TrendBucket {
                    bucket,
                    devices: devices.len() as i64,
                })
                .collect()
        });

        Ok(buckets)
    }

    async fn device_statistics(&self, key: DeviceKey) -> Result<Option<DeviceStatistics>> {
        Ok(self.read(|records| {
            let matching: Vec<&ActivityRecord> = records
                .iter()
                .filter(|r| r.username == key.username && r.device_id == key.device_id)
                .collect();

            let last_seen = matching.iter().map(|r| r.timestamp).max()?;
            let n = matching.len() as f64;
            let network_types: BTreeSet<&str> =
                matching.iter().map(|r| r.network_type.as_str()).collect();

            Some(DeviceStatistics {
                username: key.username.clone(),
                device_id: key.device_id.clone(),
                records_count: matching.len() as i64,
                average_signal_power: matching.iter().map(|r| r.signal_power).sum::<f64>() / n,
                average_sinr: matching.iter().map(|r| r.sinr).sum::<f64>() / n,
                connected_network_types: network_types.into_iter().map(str::to_string).collect(),
                last_seen,
            })
        }))
    }

    async fn append(&self, records: Vec<ActivityRecord>) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(records);
        Ok(())
    }
}

/// Appends activity records, retrying transient connection failures.
/// Every failed attempt counts towards `monitor_store_failures_total`.
pub async fn insert_batch(pool: &PgPool, batch: &[ActivityRecord]) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match insert_batch_inner(pool, batch).await {
            Ok(()) => {
                debug!("Inserted {} activity records", batch.len());
                return Ok(());
            }
            Err(err) => err,
        };

        STORE_FAILURES_TOTAL.inc();

        if attempt >= INSERT_ATTEMPTS || !is_transient_error(&err) {
            error!(
                attempt,
                records = batch.len(),
                "Activity insert failed permanently: {}",
                err
            );
            return Err(Error::Database(err));
        }

        let delay = retry_delay(attempt);
        warn!(
            attempt,
            max_attempts = INSERT_ATTEMPTS,
            "Activity insert failed, retrying in {:?}: {}",
            delay,
            err
        );
        tokio::time::sleep(delay).await;
    }
}

/// Backoff before retry number `attempt` (1-based): doubles from 100ms, capped.
fn retry_delay(attempt: u32) -> Duration {
    INSERT_BASE_DELAY
        .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
        .min(INSERT_MAX_DELAY)
}

async fn insert_batch_inner(pool: &PgPool, batch: &[ActivityRecord]) -> sqlx::Result<()> {
    fn text<'a>(batch: &'a [ActivityRecord], f: impl Fn(&'a ActivityRecord) -> &'a str) -> Vec<&'a str> {
        batch.iter().map(f).collect()
    }

    let usernames = text(batch, |r| &r.username);
    let device_ids = text(batch, |r| &r.device_id);
    let ips = text(batch, |r| &r.device_ip);
    let macs = text(batch, |r| &r.device_mac);
    let operators = text(batch, |r| &r.operator);
    let network_types = text(batch, |r| &r.network_type);
    let bands = text(batch, |r| &r.frequency_band);
    let cell_ids = text(batch, |r| &r.cell_id);
    let signal_powers: Vec<f64> = batch.iter().map(|r| r.signal_power).collect();
    let sinrs: Vec<f64> = batch.iter().map(|r| r.sinr).collect();
    let timestamps: Vec<DateTime<Utc>> = batch.iter().map(|r| r.timestamp).collect();

    let query = r#"
        INSERT INTO cell_records (
            username, device_id, device_ip, device_mac, operator, signal_power, sinr,
            network_type, frequency_band, cell_id, "timestamp"
        )
        SELECT * FROM UNNEST(
            $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::float8[], $7::float8[],
            $8::text[], $9::text[], $10::text[], $11::timestamptz[]
        )
        "#;

    sqlx::query(query)
        .bind(&usernames)
        .bind(&device_ids)
        .bind(&ips)
        .bind(&macs)
        .bind(&operators)
        .bind(&signal_powers)
        .bind(&sinrs)
        .bind(&network_types)
        .bind(&bands)
        .bind(&cell_ids)
        .bind(&timestamps)
        .execute(pool)
        .await?;

    Ok(())
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref())),
        _ => false,
    }
}
