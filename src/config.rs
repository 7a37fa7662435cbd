use std::env;
use std::time::Duration;

use crate::engine::fees::FeePolicy;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub notification_timeout_ms: u64,
    /// Notifications kept per driver inbox; older ones are dropped first.
    pub inbox_capacity: usize,
    /// Max lat/lng difference, in degrees, for two destinations to count as the same drop.
    pub pooling_tolerance_deg: f64,
    pub deadline_buffer_days: i64,
    pub average_speed_kmh: f64,
    pub fees: FeePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            notification_timeout_ms: 2_000,
            inbox_capacity: 100,
            pooling_tolerance_deg: 0.001,
            deadline_buffer_days: 2,
            average_speed_kmh: 40.0,
            fees: FeePolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            notification_timeout_ms: parse_or_default(
                "NOTIFICATION_TIMEOUT_MS",
                defaults.notification_timeout_ms,
            )?,
            inbox_capacity: parse_or_default("INBOX_CAPACITY", defaults.inbox_capacity)?,
            pooling_tolerance_deg: parse_or_default(
                "POOLING_TOLERANCE_DEG",
                defaults.pooling_tolerance_deg,
            )?,
            deadline_buffer_days: parse_or_default(
                "DEADLINE_BUFFER_DAYS",
                defaults.deadline_buffer_days,
            )?,
            average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", defaults.average_speed_kmh)?,
            fees: FeePolicy {
                base_fee: parse_or_default("BASE_FEE", defaults.fees.base_fee)?,
                per_km: parse_or_default("FEE_PER_KM", defaults.fees.per_km)?,
                per_kg: parse_or_default("FEE_PER_KG", defaults.fees.per_kg)?,
                high_urgency_surcharge: parse_or_default(
                    "HIGH_URGENCY_SURCHARGE",
                    defaults.fees.high_urgency_surcharge,
                )?,
                critical_urgency_surcharge: parse_or_default(
                    "CRITICAL_URGENCY_SURCHARGE",
                    defaults.fees.critical_urgency_surcharge,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.inbox_capacity == 0 {
            return Err(AppError::Internal(
                "invalid INBOX_CAPACITY: must be > 0".to_string(),
            ));
        }

        if !(self.pooling_tolerance_deg >= 0.0 && self.pooling_tolerance_deg.is_finite()) {
            return Err(AppError::Internal(
                "invalid POOLING_TOLERANCE_DEG: must be a non-negative number".to_string(),
            ));
        }

        if self.deadline_buffer_days < 0 {
            return Err(AppError::Internal(
                "invalid DEADLINE_BUFFER_DAYS: must be >= 0".to_string(),
            ));
        }

        if !(self.average_speed_kmh > 0.0 && self.average_speed_kmh.is_finite()) {
            return Err(AppError::Internal(
                "invalid AVERAGE_SPEED_KMH: must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
