pub mod appointments;
pub mod auth;
pub mod events;
pub mod health;
pub mod invoices;
pub mod messages;
pub mod vehicles;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::User;
use crate::services::auth::verify_token;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/profile", put(auth::update_profile))
        .route("/api/auth/customers", get(auth::list_customers))
        .route("/api/appointments", post(appointments::create_appointment))
        .route("/api/appointments/my", get(appointments::list_mine))
        .route("/api/appointments/all", get(appointments::list_all))
        .route("/api/appointments/calendar", get(appointments::calendar))
        .route("/api/appointments/stats", get(appointments::stats))
        .route(
            "/api/appointments/:id/status",
            put(appointments::update_status),
        )
        .route("/api/appointments/:id/notes", post(appointments::add_note))
        .route(
            "/api/appointments/:id/cancel",
            put(appointments::cancel_appointment),
        )
        .route("/api/invoices", post(invoices::create_invoice))
        .route("/api/invoices/my", get(invoices::list_mine))
        .route("/api/invoices/all", get(invoices::list_all))
        .route(
            "/api/invoices/:id",
            get(invoices::get_invoice).put(invoices::update_invoice),
        )
        .route("/api/payments/pay", post(invoices::pay))
        .route("/api/vehicles", post(vehicles::create_vehicle))
        .route("/api/vehicles/my", get(vehicles::list_mine))
        .route(
            "/api/vehicles/:id",
            put(vehicles::update_vehicle).delete(vehicles::delete_vehicle),
        )
        .route("/api/messages", post(messages::post_message))
        .route("/api/messages/rooms/all", get(messages::list_rooms))
        .route("/api/messages/:room_id", get(messages::get_room))
        .route("/api/messages/:room_id/read", put(messages::mark_read))
        .route("/api/events", get(events::events_stream))
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> &str {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    auth.strip_prefix("Bearer ").unwrap_or("")
}

/// Resolves a bearer token to a stored user.
pub fn resolve_token(state: &AppState, token: &str) -> Result<User, AppError> {
    let now = chrono::Utc::now().timestamp();
    let user_id =
        verify_token(&state.config.token_secret, token, now).ok_or(AppError::Unauthorized)?;

    let db = state.db()?;
    queries::get_user(&db, &user_id)?.ok_or(AppError::Unauthorized)
}

pub fn current_user(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    resolve_token(state, bearer_token(headers))
}

pub fn require_owner(user: &User) -> Result<(), AppError> {
    if user.is_owner() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// `current_user` plus the owner role check.
pub fn current_owner(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let user = current_user(state, headers)?;
    require_owner(&user)?;
    Ok(user)
}
