use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

use crate::rules::Policy;

const MAX_REAPER_INTERVAL_SECS: u64 = 24 * 3600;
const MAX_HOLD_EXPIRY_HOURS: i64 = 30 * 24;

/// Daemon settings, read from `VENUELOCK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub reaper_interval: Duration,
    pub metrics_port: Option<u16>,
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5480,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            reaper_interval: Duration::from_secs(3600),
            metrics_port: None,
            policy: Policy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            bind: lookup("VENUELOCK_BIND").unwrap_or(d.bind),
            port: parse_or(&lookup, "VENUELOCK_PORT", d.port),
            data_dir: lookup("VENUELOCK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            max_connections: parse_or(&lookup, "VENUELOCK_MAX_CONNECTIONS", d.max_connections).max(1),
            compact_threshold: parse_or(&lookup, "VENUELOCK_COMPACT_THRESHOLD", d.compact_threshold),
            reaper_interval: Duration::from_secs(
                parse_or(&lookup, "VENUELOCK_REAPER_INTERVAL_SECS", d.reaper_interval.as_secs())
                    .clamp(1, MAX_REAPER_INTERVAL_SECS),
            ),
            metrics_port: lookup("VENUELOCK_METRICS_PORT").and_then(|s| s.parse().ok()),
            policy: Policy {
                hold_expiry: TimeDelta::try_hours(
                    parse_or(&lookup, "VENUELOCK_HOLD_EXPIRY_HOURS", d.policy.hold_expiry.num_hours())
                        .clamp(1, MAX_HOLD_EXPIRY_HOURS),
                )
                .unwrap_or(d.policy.hold_expiry),
                rebooking_lead_days: parse_or(
                    &lookup,
                    "VENUELOCK_REBOOK_LEAD_DAYS",
                    d.policy.rebooking_lead_days,
                ),
                rebooking_horizon_months: parse_or(
                    &lookup,
                    "VENUELOCK_REBOOK_HORIZON_MONTHS",
                    d.policy.rebooking_horizon_months,
                ),
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg.port, 5480);
        assert_eq!(cfg.reaper_interval, Duration::from_secs(3600));
        assert_eq!(cfg.policy, Policy::default());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/reservations.wal"));
        assert!(cfg.metrics_port.is_none());
    }

    #[test]
    fn overrides_and_bad_values() {
        let vars: HashMap<&str, &str> = [
            ("VENUELOCK_PORT", "6000"),
            ("VENUELOCK_HOLD_EXPIRY_HOURS", "12"),
            ("VENUELOCK_REBOOK_LEAD_DAYS", "not-a-number"),
            ("VENUELOCK_METRICS_PORT", "9100"),
        ]
        .into_iter()
        .collect();
        let cfg = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.policy.hold_expiry, TimeDelta::hours(12));
        assert_eq!(cfg.policy.rebooking_lead_days, 7);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let vars: HashMap<&str, &str> = [
            ("VENUELOCK_REAPER_INTERVAL_SECS", "0"),
            ("VENUELOCK_HOLD_EXPIRY_HOURS", "9223372036854775807"),
            ("VENUELOCK_MAX_CONNECTIONS", "0"),
        ]
        .into_iter()
        .collect();
        let cfg = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.reaper_interval, Duration::from_secs(1));
        assert_eq!(cfg.policy.hold_expiry, TimeDelta::hours(MAX_HOLD_EXPIRY_HOURS));
        assert_eq!(cfg.max_connections, 1);

        let cfg = Config::from_lookup(|k| (k == "VENUELOCK_HOLD_EXPIRY_HOURS").then(|| "-5".to_string()));
        assert_eq!(cfg.policy.hold_expiry, TimeDelta::hours(1));
    }
}
