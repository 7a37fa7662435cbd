use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::engine::lifecycle::{ensure_not_absorbed, ensure_status, DeliveryService};
use crate::error::AppError;
use crate::geo::within_tolerance;
use crate::models::batch::DeliveryBatch;
use crate::models::delivery::{DeliveryRequest, DeliveryStatus};
use crate::models::location::Location;

#[derive(Debug, Clone, Serialize)]
pub struct PoolingCandidate {
    pub request_id: Uuid,
    pub batch_id: String,
    pub owner_id: String,
    pub quantity_kg: f64,
    pub urgency_score: u8,
    pub delivery_fee: f64,
    pub destination: Location,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct CapacityInfo {
    pub used_kg: f64,
    pub available_kg: f64,
    pub utilization_percentage: f64,
}

pub fn used_capacity(host: &DeliveryRequest, batches: &[DeliveryBatch]) -> f64 {
    host.base_quantity_kg + batches.iter().map(|batch| batch.quantity_kg).sum::<f64>()
}

pub fn capacity_info(
    host: &DeliveryRequest,
    batches: &[DeliveryBatch],
    capacity_kg: f64,
) -> CapacityInfo {
    let used_kg = used_capacity(host, batches);

    CapacityInfo {
        used_kg,
        available_kg: (capacity_kg - used_kg).max(0.0),
        utilization_percentage: used_kg * 100.0 / capacity_kg,
    }
}

pub fn contains_batch(host: &DeliveryRequest, batches: &[DeliveryBatch], batch_id: &str) -> bool {
    host.batch_id == batch_id || batches.iter().any(|batch| batch.batch_id == batch_id)
}

/// Pending requests that fit in the remaining space and drop at the host's destination,
/// most urgent first. Input order is kept among equal urgency.
pub fn rank_candidates(
    host: &DeliveryRequest,
    batches: &[DeliveryBatch],
    pending: &[DeliveryRequest],
    capacity_kg: f64,
    tolerance_deg: f64,
) -> Vec<PoolingCandidate> {
    let available_kg = capacity_kg - used_capacity(host, batches);
    if available_kg <= 0.0 {
        return Vec::new();
    }

    let host_drop = host.destination.point();
    let mut candidates: Vec<PoolingCandidate> = pending
        .iter()
        .filter(|request| {
            request.id != host.id
                && request.status == DeliveryStatus::Pending
                && request.quantity_kg <= available_kg
                && within_tolerance(&host_drop, &request.destination.point(), tolerance_deg)
                && !contains_batch(host, batches, &request.batch_id)
        })
        .map(|request| PoolingCandidate {
            request_id: request.id,
            batch_id: request.batch_id.clone(),
            owner_id: request.owner_id().to_string(),
            quantity_kg: request.quantity_kg,
            urgency_score: request.urgency_score,
            delivery_fee: request.delivery_fee,
            destination: request.destination.clone(),
        })
        .collect();

    candidates.sort_by(|a, b| b.urgency_score.cmp(&a.urgency_score));
    candidates
}

pub(crate) fn validate_capacity(capacity_kg: f64) -> Result<(), AppError> {
    if !(capacity_kg > 0.0 && capacity_kg.is_finite()) {
        return Err(AppError::Validation(
            "driver capacity must be a positive number of kg".to_string(),
        ));
    }
    Ok(())
}

impl DeliveryService {
    pub async fn find_compatible_batches(
        &self,
        host_id: Uuid,
        driver_capacity_kg: f64,
    ) -> Result<Vec<PoolingCandidate>, AppError> {
        validate_capacity(driver_capacity_kg)?;

        let host = self.require_request(host_id)?;
        ensure_not_absorbed(&host)?;
        ensure_status(&host, DeliveryStatus::Accepted)?;

        let batches = self.repository.batches_for(host_id)?;
        let mut pending = self.repository.requests_with_status(DeliveryStatus::Pending)?;
        pending.sort_by_key(|request| request.created_at);

        let candidates = rank_candidates(
            &host,
            &batches,
            &pending,
            driver_capacity_kg,
            self.config.pooling_tolerance_deg,
        );

        debug!(
            delivery_id = %host_id,
            candidates = candidates.len(),
            "compatible batches computed"
        );

        Ok(candidates)
    }

    pub async fn delivery_capacity_info(
        &self,
        host_id: Uuid,
        driver_capacity_kg: f64,
    ) -> Result<CapacityInfo, AppError> {
        validate_capacity(driver_capacity_kg)?;

        let host = self.require_request(host_id)?;
        let batches = self.repository.batches_for(host_id)?;

        Ok(capacity_info(&host, &batches, driver_capacity_kg))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::{capacity_info, rank_candidates};
    use crate::models::batch::DeliveryBatch;
    use crate::models::delivery::{DeliveryRequest, DeliveryStatus, PaymentStatus};
    use crate::models::location::Location;

    const TOLERANCE: f64 = 0.001;

    fn location(lat: f64, lng: f64, owner: &str) -> Location {
        Location {
            lat,
            lng,
            address: "test".to_string(),
            owner_id: owner.to_string(),
        }
    }

    fn request(batch_id: &str, quantity_kg: f64, urgency: u8, drop: (f64, f64)) -> DeliveryRequest {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        DeliveryRequest {
            id: Uuid::new_v4(),
            batch_id: batch_id.to_string(),
            transaction_id: None,
            source: location(0.5, 36.0, &format!("owner-{batch_id}")),
            destination: location(drop.0, drop.1, "buyer"),
            quantity_kg,
            base_quantity_kg: quantity_kg,
            status: DeliveryStatus::Pending,
            assigned_driver_id: None,
            accepted_at: None,
            started_at: None,
            delivered_at: None,
            delivery_deadline: now,
            urgency_score: urgency,
            distance_km: 10.0,
            estimated_duration_minutes: 15,
            delivery_fee: 300.0,
            owner_contribution_percentage: 100.0,
            payment_status: PaymentStatus::Pending,
            delivered_on_time: None,
            proof_of_delivery: None,
            pooled_into: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn host() -> DeliveryRequest {
        let mut host = request("host-lot", 300.0, 5, (-1.2864, 36.8172));
        host.status = DeliveryStatus::Accepted;
        host
    }

    fn pooled(host: &DeliveryRequest, batch_id: &str, quantity_kg: f64) -> DeliveryBatch {
        DeliveryBatch {
            id: Uuid::new_v4(),
            delivery_request_id: host.id,
            source_request_id: Uuid::new_v4(),
            batch_id: batch_id.to_string(),
            owner_id: "someone".to_string(),
            quantity_kg,
            owner_contribution_percentage: 0.0,
            created_at: host.created_at,
        }
    }

    #[test]
    fn ranks_by_urgency_and_keeps_input_order_on_ties() {
        let host = host();
        let low = request("a", 50.0, 3, (-1.2864, 36.8172));
        let tie_first = request("b", 50.0, 9, (-1.2866, 36.8170));
        let tie_second = request("c", 50.0, 9, (-1.2864, 36.8172));

        let ranked = rank_candidates(
            &host,
            &[],
            &[low.clone(), tie_first.clone(), tie_second.clone()],
            1_000.0,
            TOLERANCE,
        );

        let order: Vec<_> = ranked.iter().map(|c| c.request_id).collect();
        assert_eq!(order, vec![tie_first.id, tie_second.id, low.id]);
    }

    #[test]
    fn filters_far_destinations_and_oversized_loads() {
        let host = host();
        let far = request("far", 50.0, 9, (-1.2900, 36.8172));
        let heavy = request("heavy", 800.0, 9, (-1.2864, 36.8172));
        let fits = request("fits", 200.0, 5, (-1.2864, 36.8172));

        let ranked = rank_candidates(&host, &[], &[far, heavy, fits.clone()], 1_000.0, TOLERANCE);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].request_id, fits.id);
    }

    #[test]
    fn skips_batches_already_on_board() {
        let host = host();
        let batches = vec![pooled(&host, "dup", 100.0)];
        let duplicate = request("dup", 50.0, 9, (-1.2864, 36.8172));
        let same_as_host = request("host-lot", 50.0, 9, (-1.2864, 36.8172));

        let ranked = rank_candidates(&host, &batches, &[duplicate, same_as_host], 1_000.0, TOLERANCE);
        assert!(ranked.is_empty());
    }

    #[test]
    fn exhausted_capacity_yields_no_candidates() {
        let host = host();
        let batches = vec![pooled(&host, "x", 200.0)];
        let small = request("small", 1.0, 9, (-1.2864, 36.8172));

        let ranked = rank_candidates(&host, &batches, &[small], 500.0, TOLERANCE);
        assert!(ranked.is_empty());
    }

    #[test]
    fn capacity_info_reports_usage() {
        let host = host();
        let batches = vec![pooled(&host, "x", 200.0)];

        let info = capacity_info(&host, &batches, 1_000.0);
        assert_eq!(info.used_kg, 500.0);
        assert_eq!(info.available_kg, 500.0);
        assert_eq!(info.utilization_percentage, 50.0);

        let overloaded = capacity_info(&host, &batches, 400.0);
        assert_eq!(overloaded.available_kg, 0.0);
        assert!(overloaded.utilization_percentage > 100.0);
    }
}
