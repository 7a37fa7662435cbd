use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::DriverProfile;
use crate::models::notification::Notification;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id/availability", patch(update_availability))
        .route("/drivers/:id/notifications", get(list_notifications))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub vehicle_capacity_kg: f64,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub is_available: bool,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<DriverProfile>, AppError> {
    let driver = state
        .deliveries
        .register_driver(payload.name, payload.vehicle_capacity_kg)
        .await?;
    Ok(Json(driver))
}

async fn list_drivers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DriverProfile>>, AppError> {
    Ok(Json(state.deliveries.list_drivers().await?))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<DriverProfile>, AppError> {
    let driver = state
        .deliveries
        .set_driver_availability(id, payload.is_available)
        .await?;
    Ok(Json(driver))
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<Notification>> {
    Json(state.inbox.inbox(id))
}
