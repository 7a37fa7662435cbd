use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::allocator::PooledDelivery;
use crate::engine::lifecycle::{NewDeliveryRequest, ProofOfDeliveryInput};
use crate::engine::pooling::{CapacityInfo, PoolingCandidate};
use crate::error::AppError;
use crate::models::batch::DeliveryBatch;
use crate::models::delivery::{DeliveryRequest, DeliveryStatus};
use crate::models::location::{parse_location, LocationInput};
use crate::models::payment::DeliveryPayment;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery).get(list_deliveries))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/accept", post(accept_delivery))
        .route("/deliveries/:id/start", post(start_delivery))
        .route("/deliveries/:id/complete", post(complete_delivery))
        .route("/deliveries/:id/cancel", post(cancel_delivery))
        .route("/deliveries/:id/compatible", get(find_compatible))
        .route("/deliveries/:id/batches", post(add_batch).get(list_batches))
        .route("/deliveries/:id/capacity", get(capacity))
        .route("/deliveries/:id/payments", get(list_payments))
}

#[derive(Deserialize)]
pub struct CreateDeliveryPayload {
    pub batch_id: String,
    pub source: LocationInput,
    pub destination: LocationInput,
    pub quantity_kg: f64,
    pub harvest_date: NaiveDate,
    pub freshness_duration_days: u32,
    pub transaction_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<DeliveryStatus>,
}

#[derive(Deserialize)]
pub struct AcceptPayload {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct CapacityQuery {
    pub capacity_kg: f64,
}

#[derive(Deserialize)]
pub struct AddBatchPayload {
    pub candidate_id: Uuid,
    pub driver_id: Uuid,
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDeliveryPayload>,
) -> Result<Json<DeliveryRequest>, AppError> {
    let source = parse_location(payload.source)
        .map_err(|err| AppError::Validation(format!("source: {err}")))?;
    let destination = parse_location(payload.destination)
        .map_err(|err| AppError::Validation(format!("destination: {err}")))?;

    let request = state
        .deliveries
        .create_delivery_request(NewDeliveryRequest {
            batch_id: payload.batch_id,
            source,
            destination,
            quantity_kg: payload.quantity_kg,
            harvest_date: payload.harvest_date,
            freshness_duration_days: payload.freshness_duration_days,
            transaction_id: payload.transaction_id,
        })
        .await?;

    Ok(Json(request))
}

async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DeliveryRequest>>, AppError> {
    Ok(Json(state.deliveries.list_delivery_requests(query.status).await?))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRequest>, AppError> {
    Ok(Json(state.deliveries.get_delivery_request(id).await?))
}

async fn accept_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptPayload>,
) -> Result<Json<DeliveryRequest>, AppError> {
    let request = state
        .deliveries
        .accept_delivery_request(id, payload.driver_id)
        .await?;
    Ok(Json(request))
}

async fn start_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRequest>, AppError> {
    Ok(Json(state.deliveries.start_delivery(id).await?))
}

async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProofOfDeliveryInput>,
) -> Result<Json<DeliveryRequest>, AppError> {
    Ok(Json(state.deliveries.complete_delivery(id, payload).await?))
}

async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRequest>, AppError> {
    Ok(Json(state.deliveries.cancel_delivery_request(id).await?))
}

async fn find_compatible(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<CapacityQuery>,
) -> Result<Json<Vec<PoolingCandidate>>, AppError> {
    let candidates = state
        .deliveries
        .find_compatible_batches(id, query.capacity_kg)
        .await?;
    Ok(Json(candidates))
}

async fn add_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddBatchPayload>,
) -> Result<Json<PooledDelivery>, AppError> {
    let pooled = state
        .deliveries
        .add_batch_to_delivery(id, payload.candidate_id, payload.driver_id)
        .await?;
    Ok(Json(pooled))
}

async fn list_batches(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryBatch>>, AppError> {
    Ok(Json(state.deliveries.delivery_batches(id).await?))
}

async fn capacity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<CapacityQuery>,
) -> Result<Json<CapacityInfo>, AppError> {
    let info = state
        .deliveries
        .delivery_capacity_info(id, query.capacity_kg)
        .await?;
    Ok(Json(info))
}

async fn list_payments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryPayment>>, AppError> {
    Ok(Json(state.deliveries.delivery_payments(id).await?))
}
