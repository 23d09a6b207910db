use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Role, User};
use crate::services::auth::{hash_password, issue_token, verify_password};
use crate::state::AppState;

use super::{current_owner, current_user};

// POST /api/auth/register
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Role,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: User,
}

/// Registers a user and returns a session token. Only the first owner account
/// may self-register; later owner sign-ups are refused.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let name = body.name.trim();
    let email = body.email.trim().to_lowercase();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".to_string()));
    }
    if body.password.is_empty() {
        return Err(AppError::Validation("password is required".to_string()));
    }
    let password_hash = hash_password(&body.password)?;

    let now = Utc::now();
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        email,
        phone: body.phone.filter(|p| !p.trim().is_empty()),
        role: body.role,
        created_at: now.naive_utc(),
    };

    {
        let db = state.db()?;
        if queries::get_user_by_email(&db, &user.email)?.is_some() {
            return Err(AppError::Validation("Email already registered".to_string()));
        }
        if user.is_owner() && queries::count_owners(&db)? > 0 {
            return Err(AppError::Forbidden);
        }
        let tx = db.unchecked_transaction()?;
        queries::insert_user(&tx, &user)?;
        queries::set_password_hash(&tx, &user.id, &password_hash)?;
        tx.commit()?;
    }

    let token = session_token(&state, &user.id)?;
    tracing::info!(user_id = %user.id, role = user.role.as_str(), "user registered");

    Ok((StatusCode::CREATED, Json(SessionResponse { token, user })))
}

fn session_token(state: &AppState, user_id: &str) -> Result<String, AppError> {
    let expires_at = (Utc::now() + Duration::days(state.config.token_ttl_days)).timestamp();
    Ok(issue_token(&state.config.token_secret, user_id, expires_at)?)
}

// POST /api/auth/login
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Unknown email and wrong password get the same 400.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let email = body.email.trim().to_lowercase();
    let credentials = {
        let db = state.db()?;
        queries::get_credentials(&db, &email)?
    };

    let user = match credentials {
        Some((user, hash)) if verify_password(&body.password, &hash) => user,
        _ => return Err(AppError::Validation("Invalid credentials".to_string())),
    };

    let token = session_token(&state, &user.id)?;
    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(SessionResponse { token, user }))
}

// GET /api/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<User>, AppError> {
    Ok(Json(current_user(&state, &headers)?))
}

// PUT /api/auth/profile
#[derive(Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<User>, AppError> {
    let user = current_user(&state, &headers)?;

    let name = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let db = state.db()?;
    queries::update_profile(&db, &user.id, name, body.phone.as_deref())?;

    let updated = queries::get_user(&db, &user.id)?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    Ok(Json(updated))
}

// GET /api/auth/customers
pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>, AppError> {
    current_owner(&state, &headers)?;

    let db = state.db()?;
    Ok(Json(queries::list_customers(&db)?))
}
