use dashmap::DashMap;
use uuid::Uuid;

use crate::models::batch::DeliveryBatch;
use crate::models::delivery::{DeliveryRequest, DeliveryStatus};
use crate::models::driver::DriverProfile;
use crate::models::payment::DeliveryPayment;
use crate::store::{DeliveryRepository, DriverUpdate, PairedUpdate, StoreError};

/// In-process repository. Row locks are the dashmap shard guards; when a request and a
/// driver are written together the request is always locked first.
#[derive(Default)]
pub struct MemoryRepository {
    requests: DashMap<Uuid, DeliveryRequest>,
    batches: DashMap<Uuid, Vec<DeliveryBatch>>,
    payments: DashMap<Uuid, Vec<DeliveryPayment>>,
    drivers: DashMap<Uuid, DriverProfile>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }
}

impl DeliveryRepository for MemoryRepository {
    fn insert_request(&self, request: DeliveryRequest) -> Result<DeliveryRequest, StoreError> {
        if self.requests.contains_key(&request.id) {
            return Err(StoreError::Rejected(format!(
                "delivery request {} already exists",
                request.id
            )));
        }
        self.requests.insert(request.id, request.clone());
        Ok(request)
    }

    fn fetch_request(&self, id: Uuid) -> Result<Option<DeliveryRequest>, StoreError> {
        Ok(self.requests.get(&id).map(|entry| entry.value().clone()))
    }

    fn requests_with_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<DeliveryRequest>, StoreError> {
        Ok(self
            .requests
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn all_requests(&self) -> Result<Vec<DeliveryRequest>, StoreError> {
        Ok(self
            .requests
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn update_request_if(
        &self,
        id: Uuid,
        expected: DeliveryStatus,
        apply: &mut dyn FnMut(&mut DeliveryRequest),
    ) -> Result<DeliveryRequest, StoreError> {
        let mut request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("delivery request {id}")))?;

        if request.status != expected {
            return Err(StoreError::StatusMismatch {
                id,
                expected,
                actual: request.status,
            });
        }

        apply(&mut *request);
        Ok(request.clone())
    }

    fn transition_with_driver(
        &self,
        request_id: Uuid,
        expected: DeliveryStatus,
        driver_id: Uuid,
        apply: PairedUpdate<'_>,
    ) -> Result<(DeliveryRequest, DriverProfile), StoreError> {
        let mut request = self
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| StoreError::NotFound(format!("delivery request {request_id}")))?;

        if request.status != expected {
            return Err(StoreError::StatusMismatch {
                id: request_id,
                expected,
                actual: request.status,
            });
        }

        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| StoreError::NotFound(format!("driver {driver_id}")))?;

        let mut next_request = request.clone();
        let mut next_driver = driver.clone();
        apply(&mut next_request, &mut next_driver)?;

        *request = next_request;
        *driver = next_driver;
        Ok((request.clone(), driver.clone()))
    }

    fn batches_for(&self, host_id: Uuid) -> Result<Vec<DeliveryBatch>, StoreError> {
        Ok(self
            .batches
            .get(&host_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn replace_batches(&self, host_id: Uuid, batches: Vec<DeliveryBatch>) -> Result<(), StoreError> {
        self.batches.insert(host_id, batches);
        Ok(())
    }

    fn insert_payments(&self, payments: Vec<DeliveryPayment>) -> Result<(), StoreError> {
        for payment in payments {
            self.payments
                .entry(payment.delivery_request_id)
                .or_default()
                .push(payment);
        }
        Ok(())
    }

    fn payments_for(&self, request_id: Uuid) -> Result<Vec<DeliveryPayment>, StoreError> {
        Ok(self
            .payments
            .get(&request_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn upsert_driver(&self, driver: DriverProfile) -> Result<DriverProfile, StoreError> {
        self.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    fn update_driver(&self, id: Uuid, apply: DriverUpdate<'_>) -> Result<DriverProfile, StoreError> {
        let mut driver = self
            .drivers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("driver {id}")))?;

        let mut next = driver.clone();
        apply(&mut next)?;
        *driver = next;
        Ok(driver.clone())
    }

    fn fetch_driver(&self, id: Uuid) -> Result<Option<DriverProfile>, StoreError> {
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    fn list_drivers(&self) -> Result<Vec<DriverProfile>, StoreError> {
        Ok(self
            .drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::MemoryRepository;
    use crate::models::delivery::{DeliveryRequest, DeliveryStatus};
    use crate::models::driver::DriverProfile;
    use crate::store::{DeliveryRepository, StoreError};

    fn driver(available: bool) -> DriverProfile {
        DriverProfile {
            id: Uuid::new_v4(),
            name: "Kofi".to_string(),
            vehicle_capacity_kg: 2_000.0,
            is_available: available,
            active_delivery_id: None,
            last_accepted_at: None,
            updated_at: Utc::now(),
        }
    }

    fn pending_request() -> DeliveryRequest {
        serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "batch_id": "lot-1",
            "transaction_id": "tx-1",
            "source": { "lat": 5.6, "lng": -0.19, "address": "farm", "owner_id": "farmer" },
            "destination": { "lat": 5.55, "lng": -0.2, "address": "Makola", "owner_id": "buyer" },
            "quantity_kg": 250.0,
            "base_quantity_kg": 250.0,
            "status": "pending",
            "assigned_driver_id": null,
            "accepted_at": null,
            "started_at": null,
            "delivered_at": null,
            "delivery_deadline": "2024-05-03T00:00:00Z",
            "urgency_score": 5,
            "distance_km": 5.6,
            "estimated_duration_minutes": 9,
            "delivery_fee": 628.0,
            "owner_contribution_percentage": 100.0,
            "payment_status": "pending",
            "delivered_on_time": null,
            "proof_of_delivery": null,
            "pooled_into": null,
            "created_at": "2024-05-01T00:00:00Z",
            "updated_at": "2024-05-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn conditional_update_rejects_stale_status() {
        let repo = MemoryRepository::new();
        let request = repo.insert_request(pending_request()).unwrap();

        repo.update_request_if(request.id, DeliveryStatus::Pending, &mut |r: &mut DeliveryRequest| {
            r.status = DeliveryStatus::Cancelled
        })
        .unwrap();

        let second = repo.update_request_if(request.id, DeliveryStatus::Pending, &mut |r: &mut DeliveryRequest| {
            r.status = DeliveryStatus::Accepted
        });
        assert!(matches!(
            second,
            Err(StoreError::StatusMismatch {
                actual: DeliveryStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn paired_update_commits_nothing_when_vetoed() {
        let repo = MemoryRepository::new();
        let request = repo.insert_request(pending_request()).unwrap();
        let busy = repo.upsert_driver(driver(false)).unwrap();

        let result = repo.transition_with_driver(
            request.id,
            DeliveryStatus::Pending,
            busy.id,
            &mut |request: &mut DeliveryRequest, driver: &mut DriverProfile| {
                request.status = DeliveryStatus::Accepted;
                if !driver.is_available {
                    return Err(StoreError::Rejected("driver busy".to_string()));
                }
                Ok(())
            },
        );

        assert!(matches!(result, Err(StoreError::Rejected(_))));
        let stored = repo.fetch_request(request.id).unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
    }

    #[test]
    fn paired_update_writes_both_rows() {
        let repo = MemoryRepository::new();
        let request = repo.insert_request(pending_request()).unwrap();
        let free = repo.upsert_driver(driver(true)).unwrap();

        let (updated, driver) = repo
            .transition_with_driver(
                request.id,
                DeliveryStatus::Pending,
                free.id,
                &mut |request: &mut DeliveryRequest, driver: &mut DriverProfile| {
                    request.status = DeliveryStatus::Accepted;
                    request.assigned_driver_id = Some(driver.id);
                    driver.is_available = false;
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(updated.assigned_driver_id, Some(free.id));
        assert!(!driver.is_available);
        assert!(!repo.fetch_driver(free.id).unwrap().unwrap().is_available);
    }

    #[test]
    fn driver_update_is_discarded_when_vetoed() {
        let repo = MemoryRepository::new();
        let busy = repo.upsert_driver(driver(false)).unwrap();

        let vetoed = repo.update_driver(busy.id, &mut |driver: &mut DriverProfile| {
            driver.is_available = true;
            Err(StoreError::Rejected("still on a job".to_string()))
        });
        assert!(matches!(vetoed, Err(StoreError::Rejected(_))));
        assert!(!repo.fetch_driver(busy.id).unwrap().unwrap().is_available);

        let updated = repo
            .update_driver(busy.id, &mut |driver: &mut DriverProfile| {
                driver.is_available = true;
                Ok(())
            })
            .unwrap();
        assert!(updated.is_available);

        let missing = repo.update_driver(Uuid::new_v4(), &mut |_: &mut DriverProfile| Ok(()));
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn duplicate_request_id_is_rejected() {
        let repo = MemoryRepository::new();
        let request = pending_request();
        repo.insert_request(request.clone()).unwrap();

        assert!(matches!(repo.insert_request(request), Err(StoreError::Rejected(_))));
    }
}
