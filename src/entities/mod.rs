pub mod pricing_config;
pub mod ride;
pub mod surge_zone;
pub mod user;
