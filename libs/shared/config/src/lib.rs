use std::env;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub notification_webhook_url: Option<String>,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub sweep_interval_seconds: u64,
    pub rules: ClinicRules,
}

/// Tunables for seat accounting, check-in windows and payment deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicRules {
    pub no_show_blacklist_threshold: u32,
    pub waitlist_payment_minutes: i64,
    pub add_on_payment_hours: i64,
    pub add_on_visit_number_start: u32,
    pub check_in_token_floor_seconds: i64,
    pub qr_refresh_interval_seconds: i64,
    pub early_check_in_minutes: i64,
    pub late_cutoff_minutes: i64,
    /// Wall-clock times splitting the clinic day into sessions (morning/afternoon/evening).
    pub session_boundaries: Vec<NaiveTime>,
    pub auto_no_show_grace_minutes: i64,
}

impl Default for ClinicRules {
    fn default() -> Self {
        Self {
            no_show_blacklist_threshold: 3,
            waitlist_payment_minutes: 15,
            add_on_payment_hours: 24,
            add_on_visit_number_start: 101,
            check_in_token_floor_seconds: 1800,
            qr_refresh_interval_seconds: 30,
            early_check_in_minutes: 30,
            late_cutoff_minutes: 10,
            session_boundaries: vec![
                NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
                NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            ],
            auto_no_show_grace_minutes: 30,
        }
    }
}

impl ClinicRules {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let session_boundaries = match env::var("CLINIC_SESSION_BOUNDARIES") {
            Ok(raw) => {
                let parsed: Result<Vec<NaiveTime>, _> = raw
                    .split(',')
                    .map(|part| NaiveTime::parse_from_str(part.trim(), "%H:%M"))
                    .collect();
                match parsed {
                    Ok(mut boundaries) => {
                        boundaries.sort();
                        boundaries
                    }
                    Err(e) => {
                        warn!("CLINIC_SESSION_BOUNDARIES is invalid ({}), using defaults", e);
                        defaults.session_boundaries.clone()
                    }
                }
            }
            Err(_) => defaults.session_boundaries.clone(),
        };

        Self {
            no_show_blacklist_threshold: env_or("CLINIC_NO_SHOW_THRESHOLD", defaults.no_show_blacklist_threshold),
            waitlist_payment_minutes: env_or("CLINIC_WAITLIST_PAYMENT_MINUTES", defaults.waitlist_payment_minutes),
            add_on_payment_hours: env_or("CLINIC_ADD_ON_PAYMENT_HOURS", defaults.add_on_payment_hours),
            add_on_visit_number_start: env_or("CLINIC_ADD_ON_VISIT_NUMBER_START", defaults.add_on_visit_number_start),
            check_in_token_floor_seconds: env_or("CLINIC_CHECK_IN_TOKEN_FLOOR_SECONDS", defaults.check_in_token_floor_seconds),
            qr_refresh_interval_seconds: env_or("CLINIC_QR_REFRESH_SECONDS", defaults.qr_refresh_interval_seconds),
            early_check_in_minutes: env_or("CLINIC_EARLY_CHECK_IN_MINUTES", defaults.early_check_in_minutes),
            late_cutoff_minutes: env_or("CLINIC_LATE_CUTOFF_MINUTES", defaults.late_cutoff_minutes),
            session_boundaries,
            auto_no_show_grace_minutes: env_or("CLINIC_AUTO_NO_SHOW_GRACE_MINUTES", defaults.auto_no_show_grace_minutes),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            redis_url: env::var("REDIS_URL").ok(),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL").ok(),
            database_url: env::var("DATABASE_URL").ok(),
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            sweep_interval_seconds: env_or("SWEEP_INTERVAL_SECONDS", 60),
            rules: ClinicRules::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if config.database_url.is_none() {
            warn!("DATABASE_URL not set, the API will refuse to start");
        }
        if config.redis_url.is_none() {
            warn!("REDIS_URL not set, check-in tokens will be kept in process memory");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty()
    }

    /// Configuration for tests and local tooling: no external services, default rules.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            jwt_secret: jwt_secret.to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            redis_url: None,
            notification_webhook_url: None,
            database_url: None,
            database_max_connections: 10,
            sweep_interval_seconds: 60,
            rules: ClinicRules::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value, using default", key);
            default
        }),
        Err(_) => default,
    }
}
