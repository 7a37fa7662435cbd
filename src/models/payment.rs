use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::delivery::PaymentStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayment {
    pub id: Uuid,
    pub delivery_request_id: Uuid,
    pub owner_id: String,
    pub contribution_percentage: f64,
    pub amount: f64,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}
