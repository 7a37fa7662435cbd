use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::fees::round_to_cents;
use crate::engine::lifecycle::{ensure_not_absorbed, ensure_status, DeliveryService};
use crate::engine::pooling::contains_batch;
use crate::error::AppError;
use crate::geo::within_tolerance;
use crate::models::batch::DeliveryBatch;
use crate::models::delivery::{DeliveryRequest, DeliveryStatus, PaymentStatus};
use crate::models::notification::NotificationKind;

#[derive(Debug, Clone, Serialize)]
pub struct PooledDelivery {
    pub delivery: DeliveryRequest,
    pub batch: DeliveryBatch,
}

/// Full recompute of every member's weight share. Returns the host's share.
pub fn recompute_contributions(host_quantity_kg: f64, batches: &mut [DeliveryBatch]) -> f64 {
    let total_kg = host_quantity_kg + batches.iter().map(|batch| batch.quantity_kg).sum::<f64>();
    if total_kg <= 0.0 {
        for batch in batches.iter_mut() {
            batch.owner_contribution_percentage = 0.0;
        }
        return 100.0;
    }

    for batch in batches.iter_mut() {
        batch.owner_contribution_percentage = batch.quantity_kg * 100.0 / total_kg;
    }
    host_quantity_kg * 100.0 / total_kg
}

impl DeliveryService {
    pub async fn add_batch_to_delivery(
        &self,
        host_id: Uuid,
        candidate_id: Uuid,
        driver_id: Uuid,
    ) -> Result<PooledDelivery, AppError> {
        let result = self.add_batch(host_id, candidate_id, driver_id).await;
        self.observe("add_batch", &result);
        result
    }

    async fn add_batch(
        &self,
        host_id: Uuid,
        candidate_id: Uuid,
        driver_id: Uuid,
    ) -> Result<PooledDelivery, AppError> {
        let lock = self.host_lock(host_id);
        let _guard = lock.lock().await;

        let host = self
            .require_request(host_id)
            .inspect_err(|_| self.retire_host_lock(host_id, None))?;
        self.retire_host_lock(host_id, Some(&host));
        if host.assigned_driver_id != Some(driver_id) {
            return Err(AppError::Forbidden(format!(
                "driver {driver_id} is not assigned to delivery {host_id}"
            )));
        }
        ensure_not_absorbed(&host)?;
        ensure_status(&host, DeliveryStatus::Accepted)?;

        let candidate = self.require_request(candidate_id)?;
        if candidate.status != DeliveryStatus::Pending {
            return Err(AppError::Conflict(format!(
                "delivery request {candidate_id} is {}, no longer pending",
                candidate.status
            )));
        }

        if !within_tolerance(
            &host.destination.point(),
            &candidate.destination.point(),
            self.config.pooling_tolerance_deg,
        ) {
            return Err(AppError::IncompatibleRoute(format!(
                "delivery request {candidate_id} drops at {}, not {}",
                candidate.destination.address, host.destination.address
            )));
        }

        let mut batches = self.repository.batches_for(host_id)?;
        if contains_batch(&host, &batches, &candidate.batch_id) {
            return Err(AppError::Duplicate(format!(
                "batch {} is already on delivery {host_id}",
                candidate.batch_id
            )));
        }

        let now = self.clock.now();
        let absorbed = self.repository.update_request_if(
            candidate_id,
            DeliveryStatus::Pending,
            &mut |request: &mut DeliveryRequest| {
                request.status = DeliveryStatus::Accepted;
                request.assigned_driver_id = Some(driver_id);
                request.accepted_at = Some(now);
                request.pooled_into = Some(host_id);
                request.payment_status = PaymentStatus::SplitPending;
                request.updated_at = now;
            },
        )?;

        let previous_batches = batches.clone();
        batches.push(DeliveryBatch {
            id: Uuid::new_v4(),
            delivery_request_id: host_id,
            source_request_id: absorbed.id,
            batch_id: absorbed.batch_id.clone(),
            owner_id: absorbed.owner_id().to_string(),
            quantity_kg: absorbed.quantity_kg,
            owner_contribution_percentage: 0.0,
            created_at: now,
        });

        let host_share = recompute_contributions(host.base_quantity_kg, &mut batches);
        let pooled_kg: f64 = batches.iter().map(|batch| batch.quantity_kg).sum();
        if let Err(err) = self.repository.replace_batches(host_id, batches.clone()) {
            self.release_candidate(host_id, candidate_id, now);
            return Err(err.into());
        }

        let updated = self.repository.update_request_if(
            host_id,
            DeliveryStatus::Accepted,
            &mut |request: &mut DeliveryRequest| {
                request.quantity_kg = request.base_quantity_kg + pooled_kg;
                request.delivery_fee = round_to_cents(request.delivery_fee + absorbed.delivery_fee);
                request.owner_contribution_percentage = host_share;
                request.payment_status = PaymentStatus::SplitPending;
                request.updated_at = now;
            },
        );
        let delivery = match updated {
            Ok(delivery) => delivery,
            Err(err) => {
                if let Err(restore) = self.repository.replace_batches(host_id, previous_batches) {
                    warn!(delivery_id = %host_id, error = %restore, "failed to restore pooled batches");
                }
                self.release_candidate(host_id, candidate_id, now);
                return Err(err.into());
            }
        };

        let batch = batches
            .pop()
            .ok_or_else(|| AppError::Internal("pooled batch vanished".to_string()))?;

        self.metrics.batches_pooled_total.inc();
        info!(
            delivery_id = %host_id,
            member_id = %candidate_id,
            batch_id = %batch.batch_id,
            quantity_kg = delivery.quantity_kg,
            delivery_fee = delivery.delivery_fee,
            "batch pooled into delivery"
        );

        let message = format!(
            "Lot {} ({:.0} kg) added to your load; now {:.0} kg",
            batch.batch_id, batch.quantity_kg, delivery.quantity_kg
        );
        self.notifier
            .notify_driver(driver_id, &delivery, NotificationKind::BatchPooled, message, now)
            .await;

        Ok(PooledDelivery { delivery, batch })
    }

    /// Returns a claimed candidate to the pending pool after a failed pooling write.
    fn release_candidate(&self, host_id: Uuid, candidate_id: Uuid, now: DateTime<Utc>) {
        let released = self.repository.update_request_if(
            candidate_id,
            DeliveryStatus::Accepted,
            &mut |request: &mut DeliveryRequest| {
                if request.pooled_into != Some(host_id) {
                    return;
                }
                request.status = DeliveryStatus::Pending;
                request.assigned_driver_id = None;
                request.accepted_at = None;
                request.pooled_into = None;
                request.payment_status = PaymentStatus::Pending;
                request.updated_at = now;
            },
        );

        match released {
            Ok(_) => warn!(delivery_id = %host_id, member_id = %candidate_id, "pooling rolled back, candidate pending again"),
            Err(err) => warn!(delivery_id = %host_id, member_id = %candidate_id, error = %err, "failed to release pooling candidate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{NaiveDate, Utc};
    use tokio::sync::broadcast;
    use uuid::Uuid;

    use super::recompute_contributions;
    use crate::config::Config;
    use crate::engine::lifecycle::{DeliveryService, NewDeliveryRequest, SystemClock};
    use crate::engine::notifier::{DriverNotifier, InboxSink};
    use crate::error::AppError;
    use crate::models::batch::DeliveryBatch;
    use crate::models::delivery::{DeliveryRequest, DeliveryStatus, PaymentStatus};
    use crate::models::driver::DriverProfile;
    use crate::models::location::Location;
    use crate::models::payment::DeliveryPayment;
    use crate::observability::metrics::Metrics;
    use crate::store::{
        DeliveryRepository, DriverUpdate, MemoryRepository, PairedUpdate, StoreError,
    };

    /// Fails every conditional update of one row, delegating everything else.
    struct FrozenHost {
        inner: MemoryRepository,
        frozen: std::sync::Mutex<Option<Uuid>>,
    }

    impl DeliveryRepository for FrozenHost {
        fn insert_request(&self, request: DeliveryRequest) -> Result<DeliveryRequest, StoreError> {
            self.inner.insert_request(request)
        }
        fn fetch_request(&self, id: Uuid) -> Result<Option<DeliveryRequest>, StoreError> {
            self.inner.fetch_request(id)
        }
        fn requests_with_status(
            &self,
            status: DeliveryStatus,
        ) -> Result<Vec<DeliveryRequest>, StoreError> {
            self.inner.requests_with_status(status)
        }
        fn all_requests(&self) -> Result<Vec<DeliveryRequest>, StoreError> {
            self.inner.all_requests()
        }
        fn update_request_if(
            &self,
            id: Uuid,
            expected: DeliveryStatus,
            apply: &mut dyn FnMut(&mut DeliveryRequest),
        ) -> Result<DeliveryRequest, StoreError> {
            if *self.frozen.lock().unwrap() == Some(id) {
                return Err(StoreError::Unavailable("host row is read-only".to_string()));
            }
            self.inner.update_request_if(id, expected, apply)
        }
        fn transition_with_driver(
            &self,
            request_id: Uuid,
            expected: DeliveryStatus,
            driver_id: Uuid,
            apply: PairedUpdate<'_>,
        ) -> Result<(DeliveryRequest, DriverProfile), StoreError> {
            self.inner
                .transition_with_driver(request_id, expected, driver_id, apply)
        }
        fn batches_for(&self, host_id: Uuid) -> Result<Vec<DeliveryBatch>, StoreError> {
            self.inner.batches_for(host_id)
        }
        fn replace_batches(
            &self,
            host_id: Uuid,
            batches: Vec<DeliveryBatch>,
        ) -> Result<(), StoreError> {
            self.inner.replace_batches(host_id, batches)
        }
        fn insert_payments(&self, payments: Vec<DeliveryPayment>) -> Result<(), StoreError> {
            self.inner.insert_payments(payments)
        }
        fn payments_for(&self, request_id: Uuid) -> Result<Vec<DeliveryPayment>, StoreError> {
            self.inner.payments_for(request_id)
        }
        fn upsert_driver(&self, driver: DriverProfile) -> Result<DriverProfile, StoreError> {
            self.inner.upsert_driver(driver)
        }
        fn update_driver(
            &self,
            id: Uuid,
            apply: DriverUpdate<'_>,
        ) -> Result<DriverProfile, StoreError> {
            self.inner.update_driver(id, apply)
        }
        fn fetch_driver(&self, id: Uuid) -> Result<Option<DriverProfile>, StoreError> {
            self.inner.fetch_driver(id)
        }
        fn list_drivers(&self) -> Result<Vec<DriverProfile>, StoreError> {
            self.inner.list_drivers()
        }
    }

    fn purchase(batch_id: &str, owner: &str, quantity_kg: f64) -> NewDeliveryRequest {
        let at = |lat: f64, lng: f64, owner: &str| Location {
            lat,
            lng,
            address: "Wakulima Market".to_string(),
            owner_id: owner.to_string(),
        };
        NewDeliveryRequest {
            batch_id: batch_id.to_string(),
            source: at(-0.3031, 36.08, owner),
            destination: at(-1.2864, 36.8172, "buyer"),
            quantity_kg,
            harvest_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
            freshness_duration_days: 10,
            transaction_id: None,
        }
    }

    fn batch(quantity_kg: f64) -> DeliveryBatch {
        DeliveryBatch {
            id: Uuid::new_v4(),
            delivery_request_id: Uuid::nil(),
            source_request_id: Uuid::new_v4(),
            batch_id: format!("lot-{quantity_kg}"),
            owner_id: "owner".to_string(),
            quantity_kg,
            owner_contribution_percentage: 0.0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failed_host_write_returns_candidate_to_pending() {
        let repository = Arc::new(FrozenHost {
            inner: MemoryRepository::new(),
            frozen: std::sync::Mutex::new(None),
        });
        let (tx, _rx) = broadcast::channel(8);
        let metrics = Metrics::new();
        let notifier = DriverNotifier::new(
            Arc::new(InboxSink::new(tx, 10)),
            Duration::from_millis(100),
            metrics.clone(),
        );
        let service = DeliveryService::new(
            repository.clone(),
            notifier,
            Config::default(),
            metrics,
            Arc::new(SystemClock),
        );

        let truck = service.register_driver("Truck".to_string(), 2_000.0).await.unwrap();
        let host = service
            .create_delivery_request(purchase("lot-host", "farmer-a", 300.0))
            .await
            .unwrap();
        service.accept_delivery_request(host.id, truck.id).await.unwrap();
        let candidate = service
            .create_delivery_request(purchase("lot-b", "farmer-b", 200.0))
            .await
            .unwrap();

        *repository.frozen.lock().unwrap() = Some(host.id);
        let result = service
            .add_batch_to_delivery(host.id, candidate.id, truck.id)
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));

        let released = service.get_delivery_request(candidate.id).await.unwrap();
        assert_eq!(released.status, DeliveryStatus::Pending);
        assert_eq!(released.pooled_into, None);
        assert_eq!(released.assigned_driver_id, None);
        assert_eq!(released.payment_status, PaymentStatus::Pending);
        assert!(service.delivery_batches(host.id).await.unwrap().is_empty());

        *repository.frozen.lock().unwrap() = None;
        let pooled = service
            .add_batch_to_delivery(host.id, candidate.id, truck.id)
            .await
            .unwrap();
        assert_eq!(pooled.delivery.quantity_kg, 500.0);
    }

    #[test]
    fn shares_follow_weight() {
        let mut batches = vec![batch(200.0)];
        let host_share = recompute_contributions(300.0, &mut batches);

        assert_eq!(host_share, 60.0);
        assert_eq!(batches[0].owner_contribution_percentage, 40.0);
    }

    #[test]
    fn repeated_additions_stay_at_one_hundred() {
        let mut batches = Vec::new();
        for quantity in [17.0, 133.3, 0.7, 49.0, 250.25, 3.0] {
            batches.push(batch(quantity));
            let host_share = recompute_contributions(71.1, &mut batches);
            let total: f64 = host_share
                + batches
                    .iter()
                    .map(|b| b.owner_contribution_percentage)
                    .sum::<f64>();
            assert!((total - 100.0).abs() < 0.01, "sum drifted to {total}");
        }
    }
}
