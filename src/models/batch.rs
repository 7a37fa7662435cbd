use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryBatch {
    pub id: Uuid,
    pub delivery_request_id: Uuid,
    pub source_request_id: Uuid,
    pub batch_id: String,
    pub owner_id: String,
    pub quantity_kg: f64,
    pub owner_contribution_percentage: f64,
    pub created_at: DateTime<Utc>,
}
