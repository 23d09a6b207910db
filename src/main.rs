use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use autoshop::config::AppConfig;
use autoshop::db;
use autoshop::handlers;
use autoshop::services::notify::{BroadcastChannel, NotificationChannel, WebhookChannel};
use autoshop::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    if config.token_secret == "changeme" {
        tracing::warn!("TOKEN_SECRET is not set, using the insecure default");
    }

    let conn = db::init_db(&config.database_url)?;

    let (events_tx, _) = broadcast::channel(256);

    let notifier: Box<dyn NotificationChannel> = match config.notify_mode.as_str() {
        "webhook" => {
            anyhow::ensure!(
                !config.notify_webhook_url.is_empty(),
                "NOTIFY_WEBHOOK_URL must be set when NOTIFY_MODE=webhook"
            );
            tracing::info!("delivering notifications to webhook {}", config.notify_webhook_url);
            Box::new(WebhookChannel::new(config.notify_webhook_url.clone()))
        }
        _ => {
            tracing::info!("delivering notifications over the event stream");
            Box::new(BroadcastChannel::new(events_tx.clone()))
        }
    };

    if config.strict_transitions {
        tracing::info!("strict status transitions enabled");
    }

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        notifier,
        events_tx,
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
