use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// `AppConfig` holds all configuration parameters required by the application.
///
/// The configuration is loaded from environment variables (optionally via a
/// `.env` file) or falls back to default values. Fields cover the database,
/// the HTTP server, the image host relay, and admin session settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Database settings ---
    /// Database hostname or service name (e.g. "postgres" in Docker Compose,
    /// "localhost" for local runs).
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database name.
    pub db_name: String,

    // --- HTTP server ---
    /// The port on which the HTTP server will listen.
    pub http_port: u16,

    // --- Image host relay ---
    /// Upload endpoint of the external image host.
    pub image_host_url: String,
    /// Bounded timeout for a single image upload.
    #[serde(deserialize_with = "deserialize_duration")]
    pub upload_timeout: Duration,

    // --- Admin sessions ---
    /// Lifetime of an issued admin session.
    #[serde(deserialize_with = "deserialize_duration")]
    pub session_ttl: Duration,
    /// Bootstrap admin username, seeded at startup.
    pub admin_username: String,
    /// Bootstrap admin password, hashed before it is stored.
    pub admin_password: String,
}

/// Custom deserializer for duration fields.
/// Accepts human-readable formats like "5s", "1m", "24h".
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from a
    /// `.env` file).
    ///
    /// Fields not set via env will be filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid or missing
    /// required values.
    pub fn load() -> Result<Self> {
        // Load from .env file (for Docker environment)
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "postgres")?
            .set_default("db_password", "password")?
            .set_default("db_name", "onix_db")?
            // HTTP
            .set_default("http_port", 3000)?
            // Image host
            .set_default("image_host_url", "https://catbox.moe/user/api.php")?
            .set_default("upload_timeout", "30s")?
            // Admin sessions
            .set_default("session_ttl", "24h")?
            .set_default("admin_username", "admin")?
            .set_default("admin_password", "admin")?
            .add_source(config::Environment::default())
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }
}
