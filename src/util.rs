use std::str::FromStr;

pub const LATITUDE: &str = "LATITUDE";
pub const LONGITUDE: &str = "LONGITUDE";
pub const CITY: &str = "CITY";
pub const TOMTOM_KEY: &str = "TOMTOM_KEY";
pub const OPENWEATHER_KEY: &str = "OPENWEATHER_KEY";
pub const OPEN_METEO_URL: &str = "OPEN_METEO_URL";
pub const COLLECTION_INTERVAL: &str = "COLLECTION_INTERVAL";
pub const DATABASE_PATH: &str = "DATABASE_PATH";
pub const LOG_LEVEL: &str = "LOG_LEVEL";

/// Read a variable from the process environment, treating empty as unset
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a looked-up value, ignoring values that do not parse
pub fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse().ok())
}
