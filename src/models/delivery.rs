use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::location::Location;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Accepted,
    InTransit,
    Delivered,
    Cancelled,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    SplitPending,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOfDelivery {
    pub signature: String,
    pub photo_urls: Vec<String>,
    pub location: GeoPoint,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub id: Uuid,
    pub batch_id: String,
    pub transaction_id: Option<String>,
    pub source: Location,
    pub destination: Location,
    /// Aggregate load: the host lot plus everything pooled into it.
    pub quantity_kg: f64,
    /// Weight of this request's own lot.
    pub base_quantity_kg: f64,
    pub status: DeliveryStatus,
    pub assigned_driver_id: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivery_deadline: DateTime<Utc>,
    /// Snapshot taken at creation; never refreshed.
    pub urgency_score: u8,
    pub distance_km: f64,
    pub estimated_duration_minutes: u32,
    pub delivery_fee: f64,
    pub owner_contribution_percentage: f64,
    pub payment_status: PaymentStatus,
    pub delivered_on_time: Option<bool>,
    pub proof_of_delivery: Option<ProofOfDelivery>,
    /// Host this request was absorbed into, if it rides in someone else's truck.
    pub pooled_into: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRequest {
    pub fn owner_id(&self) -> &str {
        &self.source.owner_id
    }
}
