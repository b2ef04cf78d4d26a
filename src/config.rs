use std::env;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub dispatch_queue_size: usize,
    pub auto_dispatch: bool,
    pub dispatch_radius_m: f64,
    pub dispatch_max_attempts: u32,
    pub store_timeout: Duration,
    pub commit_retries: u32,
    pub fare: FareConfig,
}

/// Tunable pricing constants. Monetary values are in major currency units.
#[derive(Debug, Clone, PartialEq)]
pub struct FareConfig {
    pub base_fare: Decimal,
    pub per_meter: Decimal,
    pub per_minute: Decimal,
    pub average_speed_kmh: f64,
    /// Applied to every quote. Set by the operator, never by the rider or driver.
    pub surge_multiplier: Decimal,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base_fare: Decimal::new(50, 0),
            per_meter: Decimal::new(15, 2),
            per_minute: Decimal::ONE,
            average_speed_kmh: 30.0,
            surge_multiplier: Decimal::ONE,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            dispatch_queue_size: 1024,
            auto_dispatch: false,
            dispatch_radius_m: 5_000.0,
            dispatch_max_attempts: 20,
            store_timeout: Duration::from_millis(2_000),
            commit_retries: 3,
            fare: FareConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        let fare = FareConfig {
            base_fare: parse_or_default("FARE_BASE", defaults.fare.base_fare)?,
            per_meter: parse_or_default("FARE_PER_METER", defaults.fare.per_meter)?,
            per_minute: parse_or_default("FARE_PER_MINUTE", defaults.fare.per_minute)?,
            average_speed_kmh: parse_or_default(
                "FARE_AVERAGE_SPEED_KMH",
                defaults.fare.average_speed_kmh,
            )?,
            surge_multiplier: parse_or_default(
                "FARE_SURGE_MULTIPLIER",
                defaults.fare.surge_multiplier,
            )?,
        };

        if fare.average_speed_kmh <= 0.0 || !fare.average_speed_kmh.is_finite() {
            return Err(AppError::Internal(
                "invalid FARE_AVERAGE_SPEED_KMH: must be positive".to_string(),
            ));
        }

        if fare.surge_multiplier < Decimal::ONE {
            return Err(AppError::Internal(
                "invalid FARE_SURGE_MULTIPLIER: must be >= 1".to_string(),
            ));
        }

        let store_timeout_ms = parse_or_default(
            "STORE_TIMEOUT_MS",
            u64::try_from(defaults.store_timeout.as_millis()).unwrap_or(u64::MAX),
        )?;

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            dispatch_queue_size: parse_or_default(
                "DISPATCH_QUEUE_SIZE",
                defaults.dispatch_queue_size,
            )?,
            auto_dispatch: parse_or_default("AUTO_DISPATCH", defaults.auto_dispatch)?,
            dispatch_radius_m: parse_or_default("DISPATCH_RADIUS_M", defaults.dispatch_radius_m)?,
            dispatch_max_attempts: parse_or_default(
                "DISPATCH_MAX_ATTEMPTS",
                defaults.dispatch_max_attempts,
            )?,
            store_timeout: Duration::from_millis(store_timeout_ms),
            commit_retries: parse_or_default("COMMIT_RETRIES", defaults.commit_retries)?,
            fare,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
