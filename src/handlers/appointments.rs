use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Local;
use serde::Deserialize;

use crate::db::queries::{self, AppointmentFilter};
use crate::errors::AppError;
use crate::models::{Appointment, AppointmentStatus, AppointmentView};
use crate::services::lifecycle::{self, NewAppointment, StatusPatch};
use crate::services::notify;
use crate::services::reporting::{self, AppointmentStats};
use crate::state::AppState;

use super::{current_owner, current_user};

// POST /api/appointments
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewAppointment>,
) -> Result<(StatusCode, Json<AppointmentView>), AppError> {
    let user = current_user(&state, &headers)?;

    let appointment = {
        let db = state.db()?;
        lifecycle::create_appointment(&db, &user.id, body)?
    };

    Ok((
        StatusCode::CREATED,
        Json(AppointmentView {
            appointment,
            customer: Some(user.to_ref()),
        }),
    ))
}

// GET /api/appointments/my
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Appointment>>, AppError> {
    let user = current_user(&state, &headers)?;

    let db = state.db()?;
    let appointments = queries::get_appointments_for_customer(&db, &user.id)?;
    Ok(Json(appointments))
}

// GET /api/appointments/all
#[derive(Deserialize)]
pub struct AllAppointmentsQuery {
    pub status: Option<String>,
    pub month: Option<u32>,
    pub year: Option<i32>,
    pub customer_id: Option<String>,
}

pub async fn list_all(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AllAppointmentsQuery>,
) -> Result<Json<Vec<AppointmentView>>, AppError> {
    current_owner(&state, &headers)?;

    let mut filter = AppointmentFilter {
        customer_id: query.customer_id.filter(|c| !c.is_empty()),
        ..Default::default()
    };

    match query.status.as_deref() {
        None | Some("") | Some("all") => {}
        Some(s) => {
            let status = AppointmentStatus::parse(s)
                .ok_or_else(|| AppError::Validation(format!("unknown status: {s}")))?;
            filter.status = Some(status);
        }
    }

    if let (Some(month), Some(year)) = (query.month, query.year) {
        let (start, end) = reporting::month_range(month, year)
            .ok_or_else(|| AppError::Validation(format!("invalid month: {month}/{year}")))?;
        filter.date_from = Some(start);
        filter.date_to = Some(end);
    }

    let db = state.db()?;
    let appointments = queries::list_appointments(&db, &filter)?;
    Ok(Json(queries::attach_customers(&db, appointments)?))
}

// GET /api/appointments/calendar
#[derive(Deserialize)]
pub struct CalendarQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

pub async fn calendar(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<Vec<AppointmentView>>, AppError> {
    current_owner(&state, &headers)?;

    let mut filter = AppointmentFilter::default();
    if let (Some(start), Some(end)) = (query.start.as_deref(), query.end.as_deref()) {
        let parse = |s: &str, upper: bool| {
            reporting::parse_range_bound(s, upper)
                .ok_or_else(|| AppError::Validation(format!("invalid date: {s}")))
        };
        filter.date_from = Some(parse(start, false)?);
        filter.date_to = Some(parse(end, true)?);
    }

    let db = state.db()?;
    let appointments = queries::list_appointments(&db, &filter)?;
    Ok(Json(queries::attach_customers(&db, appointments)?))
}

// GET /api/appointments/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AppointmentStats>, AppError> {
    current_owner(&state, &headers)?;

    let db = state.db()?;
    let stats = reporting::appointment_stats(&db, Local::now().naive_local())?;
    Ok(Json(stats))
}

// PUT /api/appointments/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<StatusPatch>,
) -> Result<Json<AppointmentView>, AppError> {
    current_owner(&state, &headers)?;

    let view = {
        let db = state.db()?;
        let appointment =
            lifecycle::apply_status_transition(&db, &id, &patch, state.transition_policy())?;
        let customer = queries::get_customer_ref(&db, &appointment.customer_id)?;
        AppointmentView {
            appointment,
            customer,
        }
    };

    notify::emit_status_change(
        state.notifier.as_ref(),
        &view.appointment,
        patch.customer_note().map(str::to_string),
    )
    .await;

    Ok(Json(view))
}

// POST /api/appointments/:id/notes
#[derive(Deserialize)]
pub struct RepairNoteRequest {
    pub text: String,
}

pub async fn add_note(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RepairNoteRequest>,
) -> Result<Json<Appointment>, AppError> {
    let owner = current_owner(&state, &headers)?;

    let db = state.db()?;
    let appointment = lifecycle::add_repair_note(&db, &id, &owner.name, &body.text)?;
    Ok(Json(appointment))
}

// PUT /api/appointments/:id/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, AppError> {
    let user = current_user(&state, &headers)?;

    let db = state.db()?;
    let appointment = lifecycle::cancel_by_customer(&db, &id, &user.id)?;
    Ok(Json(appointment))
}
