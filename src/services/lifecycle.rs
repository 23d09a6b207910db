//! Appointment lifecycle: booking, staff-driven status transitions, customer
//! cancellation and repair notes.
//!
//! Every operation loads, mutates and saves the appointment inside one SQLite
//! transaction, so a transition is atomic with respect to other requests that
//! share the connection. The status history is append-only and its last entry
//! always matches `status`.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Appointment, AppointmentStatus, Part, RepairNote, ServiceType, StatusEntry, VehicleSnapshot,
};

pub const CREATED_NOTE: &str = "Appointment created";
pub const CANCELLED_NOTE: &str = "Cancelled by customer";
pub const DEFAULT_DURATION_MINUTES: i32 = 60;

/// Which status changes an owner may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Any status may follow any other.
    #[default]
    Permissive,
    /// Only the forward edges of the workflow, cancellation before completion,
    /// and re-applying the current status.
    Strict,
}

impl TransitionPolicy {
    pub fn allows(self, from: AppointmentStatus, to: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match self {
            TransitionPolicy::Permissive => true,
            TransitionPolicy::Strict => {
                from == to
                    || matches!(
                        (from, to),
                        (Pending, Confirmed)
                            | (Pending, Cancelled)
                            | (Confirmed, InProgress)
                            | (Confirmed, Cancelled)
                            | (InProgress, Completed)
                            | (InProgress, Cancelled)
                    )
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAppointment {
    pub service: Option<String>,
    pub service_type: Option<ServiceType>,
    pub description: Option<String>,
    pub vehicle: Option<VehicleSnapshot>,
    pub date: Option<String>,
    pub time_slot: Option<String>,
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Owner update request. Absent fields leave the stored value untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusPatch {
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub estimated_cost: Option<Decimal>,
    pub final_cost: Option<Decimal>,
    pub mechanic: Option<String>,
    pub bay: Option<String>,
    pub repair_note: Option<String>,
}

impl StatusPatch {
    pub fn new(status: AppointmentStatus) -> Self {
        Self {
            status,
            notes: None,
            estimated_cost: None,
            final_cost: None,
            mechanic: None,
            bay: None,
            repair_note: None,
        }
    }

    /// The note carried to the customer: the repair note, else the general notes.
    pub fn customer_note(&self) -> Option<&str> {
        non_blank(self.repair_note.as_deref()).or_else(|| non_blank(self.notes.as_deref()))
    }

    pub fn history_note(&self) -> String {
        self.customer_note()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Status updated to {}", self.status))
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.trim().is_empty())
}

/// Accepts a calendar date, a local date-time, or an RFC 3339 instant
/// (converted to the shop's local time).
pub fn parse_appointment_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        return Some(instant.with_timezone(&Local).naive_local());
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{field} is required")))
}

pub fn create_appointment(
    conn: &Connection,
    customer_id: &str,
    req: NewAppointment,
) -> Result<Appointment, AppError> {
    let service = required(req.service, "service")?;
    let raw_date = required(req.date, "date")?;
    let time_slot = required(req.time_slot, "time_slot")?;
    let date = parse_appointment_date(&raw_date)
        .ok_or_else(|| AppError::Validation(format!("invalid date: {raw_date}")))?;

    let duration_minutes = req.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
    if duration_minutes <= 0 {
        return Err(AppError::Validation(
            "duration_minutes must be positive".to_string(),
        ));
    }

    let now = Utc::now().naive_utc();
    let appt = Appointment {
        id: uuid::Uuid::new_v4().to_string(),
        customer_id: customer_id.to_string(),
        service,
        service_type: req.service_type.unwrap_or_default(),
        description: req.description,
        vehicle: req.vehicle,
        date,
        time_slot,
        duration_minutes,
        status: AppointmentStatus::Pending,
        status_history: vec![StatusEntry {
            status: AppointmentStatus::Pending,
            timestamp: now,
            note: Some(CREATED_NOTE.to_string()),
        }],
        mechanic: None,
        bay: None,
        notes: None,
        estimated_cost: None,
        final_cost: None,
        repair_notes: vec![],
        parts: req.parts,
        completed_at: None,
        created_at: now,
        updated_at: now,
    };

    queries::insert_appointment(conn, &appt)?;
    tracing::info!(appointment_id = %appt.id, customer_id, service = %appt.service, "appointment booked");
    Ok(appt)
}

/// Applies an owner update in memory.
///
/// `completed_at` is stamped on the first entry into `completed` and kept
/// afterwards, so re-applying the same update only adds a history entry.
pub fn apply_patch(appt: &mut Appointment, patch: &StatusPatch, now: NaiveDateTime) {
    if let Some(notes) = &patch.notes {
        appt.notes = Some(notes.clone());
    }
    if let Some(cost) = patch.estimated_cost {
        appt.estimated_cost = Some(cost);
    }
    if let Some(cost) = patch.final_cost {
        appt.final_cost = Some(cost);
    }
    if let Some(mechanic) = non_blank(patch.mechanic.as_deref()) {
        appt.mechanic = Some(mechanic.to_string());
    }
    if let Some(bay) = non_blank(patch.bay.as_deref()) {
        appt.bay = Some(bay.to_string());
    }
    // Never cleared: a completed job reopened in permissive mode keeps its
    // original completion time.
    if patch.status == AppointmentStatus::Completed && appt.completed_at.is_none() {
        appt.completed_at = Some(now);
    }
    appt.push_history(patch.status, patch.history_note(), now);
}

pub fn apply_status_transition(
    conn: &Connection,
    id: &str,
    patch: &StatusPatch,
    policy: TransitionPolicy,
) -> Result<Appointment, AppError> {
    let tx = conn.unchecked_transaction()?;

    let mut appt = queries::get_appointment(&tx, id)?
        .ok_or_else(|| AppError::NotFound("appointment not found".to_string()))?;

    if !policy.allows(appt.status, patch.status) {
        return Err(AppError::InvalidTransition {
            from: appt.status,
            to: patch.status,
        });
    }

    let from = appt.status;
    apply_patch(&mut appt, patch, Utc::now().naive_utc());
    queries::save_appointment(&tx, &appt)?;
    tx.commit()?;

    tracing::info!(
        appointment_id = %appt.id,
        from = %from,
        to = %appt.status,
        "appointment status updated"
    );
    Ok(appt)
}

/// Cancels on behalf of the owning customer.
///
/// Unknown id, another customer's appointment and a non-cancellable status
/// all produce the same `NotFound`.
pub fn cancel_by_customer(
    conn: &Connection,
    id: &str,
    customer_id: &str,
) -> Result<Appointment, AppError> {
    let not_found =
        || AppError::NotFound("appointment not found or cannot be cancelled".to_string());

    let tx = conn.unchecked_transaction()?;

    let mut appt = queries::get_appointment(&tx, id)?
        .filter(|a| a.customer_id == customer_id)
        .filter(|a| {
            matches!(
                a.status,
                AppointmentStatus::Pending | AppointmentStatus::Confirmed
            )
        })
        .ok_or_else(not_found)?;

    appt.push_history(
        AppointmentStatus::Cancelled,
        CANCELLED_NOTE.to_string(),
        Utc::now().naive_utc(),
    );
    queries::save_appointment(&tx, &appt)?;
    tx.commit()?;

    tracing::info!(appointment_id = %appt.id, customer_id, "appointment cancelled by customer");
    Ok(appt)
}

pub fn add_repair_note(
    conn: &Connection,
    id: &str,
    author: &str,
    text: &str,
) -> Result<Appointment, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("text is required".to_string()));
    }

    let tx = conn.unchecked_transaction()?;

    let mut appt = queries::get_appointment(&tx, id)?
        .ok_or_else(|| AppError::NotFound("appointment not found".to_string()))?;

    let now = Utc::now().naive_utc();
    appt.repair_notes.push(RepairNote {
        text: text.to_string(),
        author: author.to_string(),
        created_at: now,
    });
    appt.updated_at = now;
    queries::save_appointment(&tx, &appt)?;
    tx.commit()?;

    Ok(appt)
}
