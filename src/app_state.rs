use std::sync::Arc;

use anyhow::Result;
use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use crate::{
    config::AppConfig,
    db::{self, DbPool},
    invalidation::Invalidations,
};

/// Shared per-process state, built once at startup and injected into
/// handlers through axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub http_client: reqwest::Client,
    pub cookie_key: Key,
    pub invalidations: Invalidations,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> Result<Self> {
        let db_pool = db::connect(&config.database_url).await?;
        let cookie_key = Key::derive_from(config.cookie_secret.as_bytes());

        Ok(Self {
            db_pool,
            http_client: reqwest::Client::new(),
            cookie_key,
            invalidations: Invalidations::new(64),
            config: Arc::new(config),
        })
    }
}

/// Lets `SignedCookieJar` find the signing key in the router state.
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
