use anyhow::{Context, Result, ensure};

/// Runtime configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    /// Externally reachable base URL; used to build the mock-payment links
    /// and the webhook callback.
    pub app_url: String,
    /// Key material for signing the cart and admin-session cookies.
    pub cookie_secret: String,
    /// Shared secret expected in the `x-mock-signature` webhook header.
    /// Left empty, every webhook delivery is rejected.
    pub webhook_secret: String,
    pub admin_token: String,
}

pub fn load() -> Result<AppConfig> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let app_url =
        std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let cookie_secret = std::env::var("COOKIE_SECRET").context("COOKIE_SECRET is not set")?;
    ensure!(
        cookie_secret.len() >= 32,
        "COOKIE_SECRET must be at least 32 bytes"
    );
    let webhook_secret = std::env::var("MOCK_WEBHOOK_SECRET").unwrap_or_default();
    let admin_token = std::env::var("ADMIN_TOKEN").context("ADMIN_TOKEN is not set")?;

    Ok(AppConfig {
        database_url,
        bind_addr,
        app_url,
        cookie_secret,
        webhook_secret,
        admin_token,
    })
}
