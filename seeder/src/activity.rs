use anyhow::bail;
use chrono::{DateTime, Duration, Utc};
use monitor::model::ActivityRecord;
use rand::seq::SliceRandom;
use rand::Rng;

const OPERATORS: &[&str] = &["Alfa", "Touch"];

/// (network type, frequency bands, signal power range in dBm)
const NETWORKS: &[(&str, &[&str], (f64, f64))] = &[
    ("2G", &["900", "1800"], (-110.0, -70.0)),
    ("3G", &["900", "2100"], (-115.0, -75.0)),
    ("4G", &["800", "1800", "2600"], (-120.0, -80.0)),
    ("5G", &["3500"], (-125.0, -85.0)),
];

pub struct Plan {
    pub users: usize,
    pub devices_per_user: usize,
    pub records_per_device: usize,
    pub spread: Duration,
}

impl Plan {
    /// `None` when the product does not fit in `usize`.
    pub fn total_records(&self) -> Option<usize> {
        self.users
            .checked_mul(self.devices_per_user)?
            .checked_mul(self.records_per_device)
    }
}

/// Builds records for every (user, device) pair with timestamps in `[now - spread, now]`.
pub fn generate(
    rng: &mut impl Rng,
    plan: &Plan,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<ActivityRecord>> {
    let Some(total) = plan.total_records() else {
        bail!(
            "{} users x {} devices x {} records overflows",
            plan.users,
            plan.devices_per_user,
            plan.records_per_device
        );
    };

    let spread_ms = plan.spread.num_milliseconds().max(0);
    let mut records = Vec::with_capacity(total);

    for u in 0..plan.users {
        let username = format!("user{}@example.com", u);
        for d in 0..plan.devices_per_user {
            let device_id = format!("device-{}-{}", u, d);
            let mac = random_mac(&mut *rng);
            // A device stays on one operator's SIM
            let operator = OPERATORS[(u + d) % OPERATORS.len()];

            for _ in 0..plan.records_per_device {
                // Devices occasionally roam to a new address
                let device_ip = format!("10.{}.{}.{}", u % 256, d % 256, rng.gen_range(2..255));
                let offset = rng.gen_range(0..=spread_ms);
                let timestamp = now
                    .checked_sub_signed(Duration::milliseconds(offset))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);

                let (network_type, bands, (low, high)) = NETWORKS[rng.gen_range(0..NETWORKS.len())];
                let frequency_band = bands.choose(&mut *rng).copied().unwrap_or("unknown");

                records.push(ActivityRecord {
                    username: username.clone(),
                    device_id: device_id.clone(),
                    device_ip,
                    device_mac: mac.clone(),
                    operator: operator.to_string(),
                    signal_power: round1(rng.gen_range(low..=high)),
                    sinr: round1(rng.gen_range(-5.0..=30.0)),
                    network_type: network_type.to_string(),
                    frequency_band: frequency_band.to_string(),
                    cell_id: rng.gen_range(1000..65535).to_string(),
                    timestamp,
                });
            }
        }
    }

    Ok(records)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn random_mac(rng: &mut impl Rng) -> String {
    let bytes: [u8; 6] = rng.gen();
    // Locally administered, unicast
    let first = (bytes[0] | 0x02) & 0xfe;
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        first, bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}
