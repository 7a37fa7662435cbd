pub mod batch;
pub mod delivery;
pub mod driver;
pub mod location;
pub mod notification;
pub mod payment;
