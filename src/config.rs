use std::env;
use std::time::Duration;

use chrono::FixedOffset;

use crate::services::dispatch::DispatchSettings;

pub const DEFAULT_ROUTING_API_URL: &str =
    "https://maps.googleapis.com/maps/api/distancematrix/json";

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub routing_api_key: Option<String>,
    pub routing_api_url: String,
    pub utc_offset_hours: i32,
    pub dispatch_search_radius_km: f64,
    pub dispatch_offer_timeout_secs: u64,
    pub dispatch_max_attempts: usize,
    pub dispatch_stale_request_secs: i64,
    pub dispatch_sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            jwt_secret: env::var("JWT_SECRET")
                .expect("JWT_SECRET must be set"),
            server_host: env::var("SERVER_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_or("SERVER_PORT", 3000),
            routing_api_key: env::var("ROUTING_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            routing_api_url: env::var("ROUTING_API_URL")
                .unwrap_or_else(|_| DEFAULT_ROUTING_API_URL.to_string()),
            utc_offset_hours: parse_or("UTC_OFFSET_HOURS", 0),
            dispatch_search_radius_km: parse_or("DISPATCH_SEARCH_RADIUS_KM", 10.0),
            dispatch_offer_timeout_secs: parse_or("DISPATCH_OFFER_TIMEOUT_SECS", 15),
            dispatch_max_attempts: parse_or("DISPATCH_MAX_ATTEMPTS", 5),
            dispatch_stale_request_secs: parse_or("DISPATCH_STALE_REQUEST_SECS", 300),
            dispatch_sweep_interval_secs: parse_or("DISPATCH_SWEEP_INTERVAL_SECS", 60),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Offset used for every hour-of-day rule (traffic, surge schedule, zone windows).
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .expect("UTC_OFFSET_HOURS must be between -23 and 23")
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            search_radius_km: self.dispatch_search_radius_km,
            offer_timeout: Duration::from_secs(self.dispatch_offer_timeout_secs),
            max_attempts: self.dispatch_max_attempts,
            stale_request_age: chrono::Duration::seconds(self.dispatch_stale_request_secs),
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid value")),
        Err(_) => default,
    }
}
