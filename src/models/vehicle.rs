use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub owner_id: String,
    pub make: String,
    pub model: String,
    pub year: String,
    pub license_plate: String,
    pub vin: String,
    pub color: String,
    pub mileage: Option<i64>,
    pub notes: String,
    pub created_at: NaiveDateTime,
}
