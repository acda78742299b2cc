//! Application configuration
//! Mission: load runtime configuration from the environment, once, at startup

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub settlement_max_backoff_minutes: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./paynexus.db".to_string());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-me".to_string());

        let jwt_expiration_hours = std::env::var("JWT_EXPIRATION_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);

        let settlement_max_backoff_minutes = std::env::var("SETTLEMENT_MAX_BACKOFF_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1440);

        Ok(Self {
            database_path,
            port,
            jwt_secret,
            jwt_expiration_hours,
            settlement_max_backoff_minutes,
        })
    }
}
