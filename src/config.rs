use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub otp_secret: String,
    pub otp_ttl_seconds: i64,
    pub otp_max_attempts: i32,
    pub signal_floor_dbm: i32,
    pub signal_ceiling_dbm: i32,
    pub distance_ceiling_m: f64,
    pub early_open_minutes: i64,
    pub public_rps: u32,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            otp_secret: get_env("OTP_SECRET")?,
            otp_ttl_seconds: get_env_parse_or("OTP_TTL_SECONDS", 90)?,
            otp_max_attempts: get_env_parse_or("OTP_MAX_ATTEMPTS", 3)?,
            signal_floor_dbm: get_env_parse_or("SIGNAL_FLOOR_DBM", -80)?,
            signal_ceiling_dbm: get_env_parse_or("SIGNAL_CEILING_DBM", -30)?,
            distance_ceiling_m: get_env_parse_or("DISTANCE_CEILING_M", 15.0)?,
            early_open_minutes: get_env_parse_or("EARLY_OPEN_MINUTES", 10)?,
            public_rps: get_env_parse_or("PUBLIC_RPS", 50)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
