use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::notifier::DriverNotifier;
use crate::engine::settlement::split_payments;
use crate::engine::urgency::{delivery_deadline, urgency_score};
use crate::error::AppError;
use crate::geo::{estimated_duration_minutes, haversine_km, GeoPoint};
use crate::models::batch::DeliveryBatch;
use crate::models::delivery::{DeliveryRequest, DeliveryStatus, PaymentStatus, ProofOfDelivery};
use crate::models::driver::DriverProfile;
use crate::models::location::Location;
use crate::models::notification::NotificationKind;
use crate::models::payment::DeliveryPayment;
use crate::observability::metrics::Metrics;
use crate::store::{DeliveryRepository, StoreError};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Purchase/transfer event turned into a transport job.
#[derive(Debug, Clone)]
pub struct NewDeliveryRequest {
    pub batch_id: String,
    pub source: Location,
    pub destination: Location,
    pub quantity_kg: f64,
    pub harvest_date: NaiveDate,
    pub freshness_duration_days: u32,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProofOfDeliveryInput {
    pub signature: String,
    #[serde(default)]
    pub photo_urls: Vec<String>,
    pub location: GeoPoint,
}

pub struct DeliveryService {
    pub(crate) repository: Arc<dyn DeliveryRepository>,
    pub(crate) notifier: DriverNotifier,
    pub(crate) config: Config,
    pub(crate) metrics: Metrics,
    pub(crate) clock: Arc<dyn Clock>,
    host_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl DeliveryService {
    pub fn new(
        repository: Arc<dyn DeliveryRepository>,
        notifier: DriverNotifier,
        config: Config,
        metrics: Metrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            notifier,
            config,
            metrics,
            clock,
            host_locks: DashMap::new(),
        }
    }

    /// Serializes every mutation of one accepted delivery (pooling, start).
    pub(crate) fn host_lock(&self, host_id: Uuid) -> Arc<Mutex<()>> {
        self.host_locks
            .entry(host_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Drops the lock entry of a host that can no longer be pooled into or started.
    /// Call while holding that host's guard.
    pub(crate) fn retire_host_lock(&self, host_id: Uuid, host: Option<&DeliveryRequest>) {
        let settled = match host {
            Some(host) => {
                host.pooled_into.is_some()
                    || !matches!(host.status, DeliveryStatus::Pending | DeliveryStatus::Accepted)
            }
            None => true,
        };
        if settled {
            self.host_locks.remove(&host_id);
        }
    }

    pub(crate) fn require_request(&self, id: Uuid) -> Result<DeliveryRequest, AppError> {
        self.repository
            .fetch_request(id)?
            .ok_or_else(|| AppError::NotFound(format!("delivery request {id} not found")))
    }

    pub(crate) fn observe<T>(&self, transition: &str, result: &Result<T, AppError>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(err) => err.label(),
        };
        self.metrics.record_transition(transition, outcome);
    }

    pub async fn create_delivery_request(
        &self,
        new: NewDeliveryRequest,
    ) -> Result<DeliveryRequest, AppError> {
        let result = self.create(new).await;
        self.observe("create", &result);
        result
    }

    async fn create(&self, new: NewDeliveryRequest) -> Result<DeliveryRequest, AppError> {
        validate_new_request(&new)?;

        let now = self.clock.now();
        let deadline = delivery_deadline(
            new.harvest_date,
            new.freshness_duration_days,
            self.config.deadline_buffer_days,
        )
        .ok_or_else(|| {
            AppError::Validation(format!(
                "harvest_date {} plus {} freshness days is outside the supported calendar",
                new.harvest_date, new.freshness_duration_days
            ))
        })?;
        let urgency = urgency_score(deadline, now);
        let distance_km = haversine_km(&new.source.point(), &new.destination.point());
        let delivery_fee = self
            .config
            .fees
            .delivery_fee(distance_km, new.quantity_kg, urgency);

        let request = DeliveryRequest {
            id: Uuid::new_v4(),
            batch_id: new.batch_id,
            transaction_id: new.transaction_id,
            source: new.source,
            destination: new.destination,
            quantity_kg: new.quantity_kg,
            base_quantity_kg: new.quantity_kg,
            status: DeliveryStatus::Pending,
            assigned_driver_id: None,
            accepted_at: None,
            started_at: None,
            delivered_at: None,
            delivery_deadline: deadline,
            urgency_score: urgency,
            distance_km,
            estimated_duration_minutes: estimated_duration_minutes(
                distance_km,
                self.config.average_speed_kmh,
            ),
            delivery_fee,
            owner_contribution_percentage: 100.0,
            payment_status: PaymentStatus::Pending,
            delivered_on_time: None,
            proof_of_delivery: None,
            pooled_into: None,
            created_at: now,
            updated_at: now,
        };

        let request = self.repository.insert_request(request)?;
        self.metrics.deliveries_created_total.inc();

        info!(
            delivery_id = %request.id,
            batch_id = %request.batch_id,
            quantity_kg = request.quantity_kg,
            urgency_score = request.urgency_score,
            delivery_fee = request.delivery_fee,
            "delivery request created"
        );

        let eligible: Vec<DriverProfile> = match self.repository.list_drivers() {
            Ok(drivers) => drivers
                .into_iter()
                .filter(|driver| driver.is_available && driver.can_carry(request.quantity_kg))
                .collect(),
            Err(err) => {
                warn!(delivery_id = %request.id, error = %err, "could not load drivers for notification");
                Vec::new()
            }
        };
        self.notifier.notify_new_job(&request, &eligible, now).await;

        Ok(request)
    }

    pub async fn accept_delivery_request(
        &self,
        request_id: Uuid,
        driver_id: Uuid,
    ) -> Result<DeliveryRequest, AppError> {
        let result = self.accept(request_id, driver_id).await;
        self.observe("accept", &result);
        result
    }

    async fn accept(&self, request_id: Uuid, driver_id: Uuid) -> Result<DeliveryRequest, AppError> {
        let request = self.require_request(request_id)?;
        if request.status != DeliveryStatus::Pending {
            return Err(AppError::Conflict(format!(
                "delivery request {request_id} is {}, no longer pending",
                request.status
            )));
        }

        let driver = self
            .repository
            .fetch_driver(driver_id)?
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        if !driver.can_carry(request.quantity_kg) {
            return Err(AppError::Validation(format!(
                "vehicle capacity {} kg is below the {} kg load",
                driver.vehicle_capacity_kg, request.quantity_kg
            )));
        }

        let now = self.clock.now();
        let (accepted, _driver) = self.repository.transition_with_driver(
            request_id,
            DeliveryStatus::Pending,
            driver_id,
            &mut |request: &mut DeliveryRequest, driver: &mut DriverProfile| {
                if !driver.is_available {
                    return Err(StoreError::Rejected(format!(
                        "driver {} already has an active delivery",
                        driver.id
                    )));
                }

                request.status = DeliveryStatus::Accepted;
                request.assigned_driver_id = Some(driver.id);
                request.accepted_at = Some(now);
                request.updated_at = now;

                driver.is_available = false;
                driver.active_delivery_id = Some(request.id);
                driver.last_accepted_at = Some(now);
                driver.updated_at = now;
                Ok(())
            },
        )?;

        info!(delivery_id = %request_id, %driver_id, "delivery request accepted");

        let message = format!(
            "You accepted lot {} ({:.0} kg) for {}",
            accepted.batch_id, accepted.quantity_kg, accepted.destination.address
        );
        self.notifier
            .notify_driver(driver_id, &accepted, NotificationKind::JobAccepted, message, now)
            .await;

        Ok(accepted)
    }

    pub async fn start_delivery(&self, request_id: Uuid) -> Result<DeliveryRequest, AppError> {
        let result = self.start(request_id).await;
        self.observe("start", &result);
        result
    }

    async fn start(&self, request_id: Uuid) -> Result<DeliveryRequest, AppError> {
        let lock = self.host_lock(request_id);
        let _guard = lock.lock().await;

        let request = self
            .require_request(request_id)
            .inspect_err(|_| self.retire_host_lock(request_id, None))?;
        self.retire_host_lock(request_id, Some(&request));
        ensure_not_absorbed(&request)?;
        ensure_status(&request, DeliveryStatus::Accepted)?;

        let now = self.clock.now();
        let started = self
            .repository
            .update_request_if(request_id, DeliveryStatus::Accepted, &mut |request: &mut DeliveryRequest| {
                request.status = DeliveryStatus::InTransit;
                request.started_at = Some(now);
                request.updated_at = now;
            })
            .map_err(invalid_state)?;
        self.retire_host_lock(request_id, Some(&started));

        for batch in self.repository.batches_for(request_id)? {
            let moved = self.repository.update_request_if(
                batch.source_request_id,
                DeliveryStatus::Accepted,
                &mut |member: &mut DeliveryRequest| {
                    member.status = DeliveryStatus::InTransit;
                    member.started_at = Some(now);
                    member.updated_at = now;
                },
            );
            if let Err(err) = moved {
                warn!(delivery_id = %request_id, member_id = %batch.source_request_id, error = %err, "pooled member did not follow host into transit");
            }
        }

        info!(delivery_id = %request_id, "delivery in transit");
        Ok(started)
    }

    pub async fn complete_delivery(
        &self,
        request_id: Uuid,
        pod: ProofOfDeliveryInput,
    ) -> Result<DeliveryRequest, AppError> {
        let result = self.complete(request_id, pod).await;
        self.observe("complete", &result);
        result
    }

    async fn complete(
        &self,
        request_id: Uuid,
        pod: ProofOfDeliveryInput,
    ) -> Result<DeliveryRequest, AppError> {
        if pod.signature.trim().is_empty() {
            return Err(AppError::Validation(
                "proof of delivery requires a signature".to_string(),
            ));
        }
        if !pod.location.is_valid() {
            return Err(AppError::Validation(
                "proof of delivery geostamp is out of range".to_string(),
            ));
        }

        let request = self.require_request(request_id)?;
        ensure_not_absorbed(&request)?;
        ensure_status(&request, DeliveryStatus::InTransit)?;
        let driver_id = request.assigned_driver_id.ok_or_else(|| {
            AppError::Internal(format!("delivery {request_id} in transit without a driver"))
        })?;

        let now = self.clock.now();
        let proof = ProofOfDelivery {
            signature: pod.signature,
            photo_urls: pod.photo_urls,
            location: pod.location,
            captured_at: now,
        };

        let (delivered, _driver) = self
            .repository
            .transition_with_driver(
                request_id,
                DeliveryStatus::InTransit,
                driver_id,
                &mut |request: &mut DeliveryRequest, driver: &mut DriverProfile| {
                    request.status = DeliveryStatus::Delivered;
                    request.delivered_at = Some(now);
                    request.delivered_on_time = Some(now <= request.delivery_deadline);
                    request.proof_of_delivery = Some(proof.clone());
                    request.updated_at = now;

                    driver.is_available = true;
                    if driver.active_delivery_id == Some(request.id) {
                        driver.active_delivery_id = None;
                    }
                    driver.updated_at = now;
                    Ok(())
                },
            )
            .map_err(invalid_state)?;

        let batches = self.repository.batches_for(request_id)?;
        for batch in &batches {
            let moved = self.repository.update_request_if(
                batch.source_request_id,
                DeliveryStatus::InTransit,
                &mut |member: &mut DeliveryRequest| {
                    member.status = DeliveryStatus::Delivered;
                    member.delivered_at = Some(now);
                    member.delivered_on_time = delivered.delivered_on_time;
                    member.updated_at = now;
                },
            );
            if let Err(err) = moved {
                warn!(delivery_id = %request_id, member_id = %batch.source_request_id, error = %err, "pooled member did not follow host to delivered");
            }
        }

        info!(
            delivery_id = %request_id,
            %driver_id,
            on_time = delivered.delivered_on_time.unwrap_or(false),
            pooled_batches = batches.len(),
            "delivery completed"
        );

        self.record_payments(&delivered, &batches, now);
        Ok(delivered)
    }

    /// Payment rows are a side effect; the delivered state stands even if they fail.
    fn record_payments(&self, delivered: &DeliveryRequest, batches: &[DeliveryBatch], now: DateTime<Utc>) {
        let payments = split_payments(delivered, batches, now);
        let owners = payments.len();

        match self.repository.insert_payments(payments) {
            Ok(()) => {
                self.metrics
                    .payment_records_total
                    .with_label_values(&["written"])
                    .inc();
                info!(delivery_id = %delivered.id, owners, "payment records created");
            }
            Err(err) => {
                self.metrics
                    .payment_records_total
                    .with_label_values(&["failed"])
                    .inc();
                warn!(delivery_id = %delivered.id, error = %err, "failed to write payment records");
            }
        }
    }

    pub async fn cancel_delivery_request(
        &self,
        request_id: Uuid,
    ) -> Result<DeliveryRequest, AppError> {
        let now = self.clock.now();
        let result = self
            .repository
            .update_request_if(request_id, DeliveryStatus::Pending, &mut |request: &mut DeliveryRequest| {
                request.status = DeliveryStatus::Cancelled;
                request.updated_at = now;
            })
            .map_err(invalid_state);

        if result.is_ok() {
            info!(delivery_id = %request_id, "delivery request cancelled");
        }
        self.observe("cancel", &result);
        result
    }

    pub async fn get_delivery_request(&self, id: Uuid) -> Result<DeliveryRequest, AppError> {
        self.require_request(id)
    }

    pub async fn list_delivery_requests(
        &self,
        status: Option<DeliveryStatus>,
    ) -> Result<Vec<DeliveryRequest>, AppError> {
        let mut requests = match status {
            Some(status) => self.repository.requests_with_status(status)?,
            None => self.repository.all_requests()?,
        };
        requests.sort_by_key(|request| request.created_at);
        Ok(requests)
    }

    pub async fn delivery_batches(&self, host_id: Uuid) -> Result<Vec<DeliveryBatch>, AppError> {
        self.require_request(host_id)?;
        Ok(self.repository.batches_for(host_id)?)
    }

    pub async fn delivery_payments(&self, host_id: Uuid) -> Result<Vec<DeliveryPayment>, AppError> {
        self.require_request(host_id)?;
        Ok(self.repository.payments_for(host_id)?)
    }

    pub async fn register_driver(
        &self,
        name: String,
        vehicle_capacity_kg: f64,
    ) -> Result<DriverProfile, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("name cannot be empty".to_string()));
        }
        if !(vehicle_capacity_kg > 0.0 && vehicle_capacity_kg.is_finite()) {
            return Err(AppError::Validation(
                "vehicle_capacity_kg must be > 0".to_string(),
            ));
        }

        let driver = DriverProfile {
            id: Uuid::new_v4(),
            name,
            vehicle_capacity_kg,
            is_available: true,
            active_delivery_id: None,
            last_accepted_at: None,
            updated_at: self.clock.now(),
        };
        Ok(self.repository.upsert_driver(driver)?)
    }

    /// Drivers holding an accepted or in-transit job cannot be put back on duty.
    pub async fn set_driver_availability(
        &self,
        driver_id: Uuid,
        is_available: bool,
    ) -> Result<DriverProfile, AppError> {
        let now = self.clock.now();
        let driver = self.repository.update_driver(
            driver_id,
            &mut |driver: &mut DriverProfile| {
                if is_available {
                    if let Some(active) = driver.active_delivery_id {
                        return Err(StoreError::Rejected(format!(
                            "driver {} still owns active delivery {active}",
                            driver.id
                        )));
                    }
                }
                driver.is_available = is_available;
                driver.updated_at = now;
                Ok(())
            },
        )?;

        info!(%driver_id, is_available, "driver availability updated");
        Ok(driver)
    }

    pub async fn list_drivers(&self) -> Result<Vec<DriverProfile>, AppError> {
        Ok(self.repository.list_drivers()?)
    }
}

fn validate_new_request(new: &NewDeliveryRequest) -> Result<(), AppError> {
    if new.batch_id.trim().is_empty() {
        return Err(AppError::Validation("batch_id cannot be empty".to_string()));
    }
    if !(new.quantity_kg > 0.0 && new.quantity_kg.is_finite()) {
        return Err(AppError::Validation("quantity_kg must be > 0".to_string()));
    }
    if new.freshness_duration_days == 0 {
        return Err(AppError::Validation(
            "freshness_duration_days must be > 0".to_string(),
        ));
    }
    for (end, location) in [("source", &new.source), ("destination", &new.destination)] {
        if !location.point().is_valid() {
            return Err(AppError::Validation(format!(
                "{end} coordinates are out of range"
            )));
        }
        if location.owner_id.trim().is_empty() {
            return Err(AppError::Validation(format!("{end} owner_id cannot be empty")));
        }
    }
    Ok(())
}

pub(crate) fn ensure_status(request: &DeliveryRequest, expected: DeliveryStatus) -> Result<(), AppError> {
    if request.status != expected {
        return Err(AppError::InvalidState(format!(
            "delivery request {} is {}, expected {}",
            request.id, request.status, expected
        )));
    }
    Ok(())
}

pub(crate) fn ensure_not_absorbed(request: &DeliveryRequest) -> Result<(), AppError> {
    match request.pooled_into {
        Some(host_id) => Err(AppError::InvalidState(format!(
            "delivery request {} rides in delivery {host_id}",
            request.id
        ))),
        None => Ok(()),
    }
}

fn invalid_state(err: StoreError) -> AppError {
    match err {
        StoreError::StatusMismatch {
            id,
            expected,
            actual,
        } => AppError::InvalidState(format!(
            "delivery request {id} is {actual}, expected {expected}"
        )),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::NewDeliveryRequest;
    use crate::config::Config;
    use crate::models::location::Location;
    use crate::state::AppState;

    fn purchase(batch_id: &str) -> NewDeliveryRequest {
        let at = |lat: f64, lng: f64| Location {
            lat,
            lng,
            address: "Wakulima Market".to_string(),
            owner_id: "farmer-a".to_string(),
        };
        NewDeliveryRequest {
            batch_id: batch_id.to_string(),
            source: at(-0.3031, 36.08),
            destination: at(-1.2864, 36.8172),
            quantity_kg: 300.0,
            harvest_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
            freshness_duration_days: 10,
            transaction_id: None,
        }
    }

    #[tokio::test]
    async fn host_locks_are_dropped_once_pooling_is_over() {
        let state = AppState::new(Config::default());
        let service = &state.deliveries;
        let truck = service.register_driver("Truck".to_string(), 2_000.0).await.unwrap();
        let host = service.create_delivery_request(purchase("lot-1")).await.unwrap();
        service.accept_delivery_request(host.id, truck.id).await.unwrap();
        let candidate = service.create_delivery_request(purchase("lot-2")).await.unwrap();

        service
            .add_batch_to_delivery(host.id, candidate.id, truck.id)
            .await
            .unwrap();
        assert_eq!(service.host_locks.len(), 1);

        service.start_delivery(host.id).await.unwrap();
        assert!(service.host_locks.is_empty());

        let late = service
            .add_batch_to_delivery(host.id, Uuid::new_v4(), truck.id)
            .await;
        assert!(late.is_err());
        assert!(service.host_locks.is_empty());

        let unknown = service.start_delivery(Uuid::new_v4()).await;
        assert!(unknown.is_err());
        assert!(service.host_locks.is_empty());
    }
}
