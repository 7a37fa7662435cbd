use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::engine::lifecycle::{Clock, DeliveryService, SystemClock};
use crate::engine::notifier::{DriverNotifier, InboxSink};
use crate::models::notification::Notification;
use crate::observability::metrics::Metrics;
use crate::store::MemoryRepository;

pub struct AppState {
    pub deliveries: DeliveryService,
    pub repository: Arc<MemoryRepository>,
    pub inbox: Arc<InboxSink>,
    pub notification_events_tx: broadcast::Sender<Notification>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let (notification_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);
        let metrics = Metrics::new();
        let repository = Arc::new(MemoryRepository::new());
        let inbox = Arc::new(InboxSink::new(
            notification_events_tx.clone(),
            config.inbox_capacity,
        ));

        let notifier = DriverNotifier::new(
            inbox.clone(),
            config.notification_timeout(),
            metrics.clone(),
        );
        let deliveries = DeliveryService::new(
            repository.clone(),
            notifier,
            config,
            metrics.clone(),
            clock,
        );

        Self {
            deliveries,
            repository,
            inbox,
            notification_events_tx,
            metrics,
        }
    }
}
