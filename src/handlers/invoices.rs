use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Invoice, InvoiceStatus};
use crate::services::invoicing::{self, InvoicePatch, NewInvoice, PaymentReceipt, PaymentRequest};
use crate::state::AppState;

use super::{current_owner, current_user};

// POST /api/invoices
pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewInvoice>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    current_owner(&state, &headers)?;

    let db = state.db()?;
    let invoice = invoicing::create_invoice(&db, body)?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

// PUT /api/invoices/:id
pub async fn update_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<InvoicePatch>,
) -> Result<Json<Invoice>, AppError> {
    current_owner(&state, &headers)?;

    let db = state.db()?;
    Ok(Json(invoicing::update_invoice(&db, &id, patch)?))
}

// GET /api/invoices/:id
pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, AppError> {
    let user = current_user(&state, &headers)?;

    let db = state.db()?;
    let invoice = queries::get_invoice(&db, &id)?
        .filter(|inv| user.is_owner() || inv.customer_id == user.id)
        .ok_or_else(|| AppError::NotFound("invoice not found".to_string()))?;
    Ok(Json(invoice))
}

// GET /api/invoices/my
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Invoice>>, AppError> {
    let user = current_user(&state, &headers)?;

    let db = state.db()?;
    Ok(Json(queries::get_invoices_for_customer(&db, &user.id)?))
}

// GET /api/invoices/all
#[derive(Deserialize)]
pub struct InvoicesQuery {
    pub status: Option<String>,
}

pub async fn list_all(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<InvoicesQuery>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    current_owner(&state, &headers)?;

    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty() && *s != "all")
        .map(InvoiceStatus::parse);

    let db = state.db()?;
    Ok(Json(queries::list_invoices(&db, status)?))
}

// POST /api/payments/pay
pub async fn pay(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PaymentRequest>,
) -> Result<Json<PaymentReceipt>, AppError> {
    let user = current_user(&state, &headers)?;

    let db = state.db()?;
    Ok(Json(invoicing::pay_invoice(&db, &user.id, body)?))
}
