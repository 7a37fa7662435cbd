pub mod allocator;
pub mod fees;
pub mod lifecycle;
pub mod notifier;
pub mod pooling;
pub mod settlement;
pub mod urgency;
