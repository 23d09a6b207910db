use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub token_secret: String,
    pub token_ttl_days: i64,
    pub notify_mode: String,
    pub notify_webhook_url: String,
    pub strict_transitions: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "autoshop.db".to_string()),
            token_secret: env::var("TOKEN_SECRET").unwrap_or_else(|_| "changeme".to_string()),
            token_ttl_days: env::var("TOKEN_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            notify_mode: env::var("NOTIFY_MODE").unwrap_or_else(|_| "broadcast".to_string()),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default(),
            strict_transitions: env::var("STRICT_TRANSITIONS")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}
