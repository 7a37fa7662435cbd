pub mod memory;

use thiserror::Error;
use uuid::Uuid;

use crate::models::batch::DeliveryBatch;
use crate::models::delivery::{DeliveryRequest, DeliveryStatus};
use crate::models::driver::DriverProfile;
use crate::models::payment::DeliveryPayment;

pub use memory::MemoryRepository;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("delivery request {id} is {actual}, expected {expected}")]
    StatusMismatch {
        id: Uuid,
        expected: DeliveryStatus,
        actual: DeliveryStatus,
    },

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Mutation applied to a request and its driver inside one commit. Returning an error
/// discards both changes.
pub type PairedUpdate<'a> =
    &'a mut dyn FnMut(&mut DeliveryRequest, &mut DriverProfile) -> Result<(), StoreError>;

/// Mutation of a driver row under its lock. Returning an error discards the change.
pub type DriverUpdate<'a> = &'a mut dyn FnMut(&mut DriverProfile) -> Result<(), StoreError>;

/// Persistence boundary for delivery rows and the driver profiles they touch.
///
/// Every `expected` status is checked and applied under the same row lock, so two
/// callers racing on one row see exactly one success and one `StatusMismatch`.
pub trait DeliveryRepository: Send + Sync {
    fn insert_request(&self, request: DeliveryRequest) -> Result<DeliveryRequest, StoreError>;
    fn fetch_request(&self, id: Uuid) -> Result<Option<DeliveryRequest>, StoreError>;
    fn requests_with_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<DeliveryRequest>, StoreError>;
    fn all_requests(&self) -> Result<Vec<DeliveryRequest>, StoreError>;

    /// Conditional update: applies `apply` only while the row is still in `expected`.
    fn update_request_if(
        &self,
        id: Uuid,
        expected: DeliveryStatus,
        apply: &mut dyn FnMut(&mut DeliveryRequest),
    ) -> Result<DeliveryRequest, StoreError>;

    /// Conditional update of a request together with a driver profile.
    fn transition_with_driver(
        &self,
        request_id: Uuid,
        expected: DeliveryStatus,
        driver_id: Uuid,
        apply: PairedUpdate<'_>,
    ) -> Result<(DeliveryRequest, DriverProfile), StoreError>;

    /// Pooled batches of a host in boarding order.
    fn batches_for(&self, host_id: Uuid) -> Result<Vec<DeliveryBatch>, StoreError>;
    /// Overwrites a host's whole batch set; shares are recomputed together.
    fn replace_batches(&self, host_id: Uuid, batches: Vec<DeliveryBatch>) -> Result<(), StoreError>;

    fn insert_payments(&self, payments: Vec<DeliveryPayment>) -> Result<(), StoreError>;
    fn payments_for(&self, request_id: Uuid) -> Result<Vec<DeliveryPayment>, StoreError>;

    fn upsert_driver(&self, driver: DriverProfile) -> Result<DriverProfile, StoreError>;
    fn update_driver(&self, id: Uuid, apply: DriverUpdate<'_>) -> Result<DriverProfile, StoreError>;
    fn fetch_driver(&self, id: Uuid) -> Result<Option<DriverProfile>, StoreError>;
    fn list_drivers(&self) -> Result<Vec<DriverProfile>, StoreError>;
}
