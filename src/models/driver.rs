use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
    pub id: Uuid,
    pub name: String,
    pub vehicle_capacity_kg: f64,
    pub is_available: bool,
    /// Host delivery this driver accepted and has not completed yet.
    #[serde(default)]
    pub active_delivery_id: Option<Uuid>,
    pub last_accepted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DriverProfile {
    pub fn can_carry(&self, quantity_kg: f64) -> bool {
        self.vehicle_capacity_kg >= quantity_kg
    }
}
