use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Vehicle;
use crate::state::AppState;

use super::current_user;

fn vehicle_not_found() -> AppError {
    AppError::NotFound("vehicle not found".to_string())
}

// GET /api/vehicles/my
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Vehicle>>, AppError> {
    let user = current_user(&state, &headers)?;

    let db = state.db()?;
    Ok(Json(queries::get_vehicles_for_owner(&db, &user.id)?))
}

// POST /api/vehicles
#[derive(Deserialize)]
pub struct NewVehicle {
    pub make: String,
    pub model: String,
    pub year: String,
    #[serde(default)]
    pub license_plate: String,
    #[serde(default)]
    pub vin: String,
    #[serde(default)]
    pub color: String,
    pub mileage: Option<i64>,
    #[serde(default)]
    pub notes: String,
}

pub async fn create_vehicle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewVehicle>,
) -> Result<(StatusCode, Json<Vehicle>), AppError> {
    let user = current_user(&state, &headers)?;

    if [&body.make, &body.model, &body.year]
        .iter()
        .any(|field| field.trim().is_empty())
    {
        return Err(AppError::Validation(
            "make, model and year are required".to_string(),
        ));
    }

    let vehicle = Vehicle {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: user.id,
        make: body.make,
        model: body.model,
        year: body.year,
        license_plate: body.license_plate,
        vin: body.vin,
        color: body.color,
        mileage: body.mileage,
        notes: body.notes,
        created_at: Utc::now().naive_utc(),
    };

    let db = state.db()?;
    queries::insert_vehicle(&db, &vehicle)?;
    Ok((StatusCode::CREATED, Json(vehicle)))
}

// PUT /api/vehicles/:id
#[derive(Deserialize)]
pub struct VehicleUpdate {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
    pub license_plate: Option<String>,
    pub vin: Option<String>,
    pub color: Option<String>,
    pub mileage: Option<i64>,
    pub notes: Option<String>,
}

pub async fn update_vehicle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<VehicleUpdate>,
) -> Result<Json<Vehicle>, AppError> {
    let user = current_user(&state, &headers)?;

    let db = state.db()?;
    let mut vehicle = queries::get_vehicle(&db, &id, &user.id)?.ok_or_else(vehicle_not_found)?;

    if let Some(make) = body.make {
        vehicle.make = make;
    }
    if let Some(model) = body.model {
        vehicle.model = model;
    }
    if let Some(year) = body.year {
        vehicle.year = year;
    }
    if let Some(plate) = body.license_plate {
        vehicle.license_plate = plate;
    }
    if let Some(vin) = body.vin {
        vehicle.vin = vin;
    }
    if let Some(color) = body.color {
        vehicle.color = color;
    }
    if body.mileage.is_some() {
        vehicle.mileage = body.mileage;
    }
    if let Some(notes) = body.notes {
        vehicle.notes = notes;
    }

    if !queries::save_vehicle(&db, &vehicle)? {
        return Err(vehicle_not_found());
    }
    Ok(Json(vehicle))
}

// DELETE /api/vehicles/:id
pub async fn delete_vehicle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = current_user(&state, &headers)?;

    let db = state.db()?;
    if !queries::delete_vehicle(&db, &id, &user.id)? {
        return Err(vehicle_not_found());
    }
    Ok(Json(serde_json::json!({"ok": true})))
}
