use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    /// Geofence radius for check-in gating, meters.
    pub check_in_radius_m: f64,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let check_in_radius_m = match std::env::var("CHECK_IN_RADIUS_M") {
            Ok(raw) => raw
                .parse::<f64>()
                .context("CHECK_IN_RADIUS_M must be a number of meters")?,
            Err(_) => 10.0,
        };

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            check_in_radius_m,
        })
    }
}
