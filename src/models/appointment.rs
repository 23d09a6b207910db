use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub customer_id: String,
    pub service: String,
    pub service_type: ServiceType,
    pub description: Option<String>,
    pub vehicle: Option<VehicleSnapshot>,
    pub date: NaiveDateTime,
    pub time_slot: String,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub status_history: Vec<StatusEntry>,
    pub mechanic: Option<String>,
    pub bay: Option<String>,
    pub notes: Option<String>,
    pub estimated_cost: Option<Decimal>,
    pub final_cost: Option<Decimal>,
    pub repair_notes: Vec<RepairNote>,
    pub parts: Vec<Part>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    /// Records a status change at the end of the history.
    pub fn push_history(&mut self, status: AppointmentStatus, note: String, at: NaiveDateTime) {
        self.status = status;
        self.status_history.push(StatusEntry {
            status,
            timestamp: at,
            note: Some(note),
        });
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in-progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[default]
    Maintenance,
    Repair,
    Inspection,
    Emergency,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Maintenance => "maintenance",
            ServiceType::Repair => "repair",
            ServiceType::Inspection => "inspection",
            ServiceType::Emergency => "emergency",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "repair" => ServiceType::Repair,
            "inspection" => ServiceType::Inspection,
            "emergency" => ServiceType::Emergency,
            _ => ServiceType::Maintenance,
        }
    }
}

/// Copy of the vehicle details taken at booking time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VehicleSnapshot {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
    pub license_plate: Option<String>,
    pub color: Option<String>,
    pub mileage: Option<String>,
    pub vin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEntry {
    pub status: AppointmentStatus,
    pub timestamp: NaiveDateTime,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepairNote {
    pub text: String,
    pub author: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Part {
    pub name: String,
    #[serde(default)]
    pub cost: Decimal,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// Customer identity as embedded in owner-facing appointment responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRef {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub customer: Option<CustomerRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&AppointmentStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!(AppointmentStatus::parse("in-progress"), Some(AppointmentStatus::InProgress));
        assert_eq!(AppointmentStatus::parse("done"), None);
    }

    #[test]
    fn test_service_type_defaults_to_maintenance() {
        assert_eq!(ServiceType::default(), ServiceType::Maintenance);
        assert_eq!(ServiceType::parse("unknown"), ServiceType::Maintenance);
        assert_eq!(ServiceType::parse("emergency"), ServiceType::Emergency);
    }
}
