use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::delivery::DeliveryRequest;
use crate::models::driver::DriverProfile;
use crate::models::notification::{Notification, NotificationKind};
use crate::observability::metrics::Metrics;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Outbound channel to drivers (push service, SMS gateway, in-app inbox).
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Keeps the latest notifications in a per-driver inbox and republishes each one to
/// live subscribers.
pub struct InboxSink {
    inboxes: DashMap<Uuid, VecDeque<Notification>>,
    capacity: usize,
    events_tx: broadcast::Sender<Notification>,
}

impl InboxSink {
    pub fn new(events_tx: broadcast::Sender<Notification>, capacity: usize) -> Self {
        Self {
            inboxes: DashMap::new(),
            capacity: capacity.max(1),
            events_tx,
        }
    }

    pub fn inbox(&self, driver_id: Uuid) -> Vec<Notification> {
        self.inboxes
            .get(&driver_id)
            .map(|entry| entry.value().iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl NotificationSink for InboxSink {
    fn deliver(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
        {
            let mut inbox = self.inboxes.entry(notification.driver_id).or_default();
            if inbox.len() == self.capacity {
                inbox.pop_front();
            }
            inbox.push_back(notification.clone());
        }
        let _ = self.events_tx.send(notification);

        future::ready(Ok(())).boxed()
    }
}

pub struct DriverNotifier {
    sink: Arc<dyn NotificationSink>,
    timeout: Duration,
    metrics: Metrics,
}

impl DriverNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>, timeout: Duration, metrics: Metrics) -> Self {
        Self {
            sink,
            timeout,
            metrics,
        }
    }

    pub async fn notify_new_job(
        &self,
        request: &DeliveryRequest,
        drivers: &[DriverProfile],
        now: DateTime<Utc>,
    ) {
        let message = format!(
            "New delivery: {:.0} kg of lot {} to {}, urgency {}/10, fee {:.2}",
            request.quantity_kg,
            request.batch_id,
            request.destination.address,
            request.urgency_score,
            request.delivery_fee
        );

        let sends = drivers.iter().map(|driver| {
            self.send(
                driver.id,
                request.id,
                NotificationKind::NewJob,
                message.clone(),
                now,
            )
        });
        future::join_all(sends).await;
    }

    pub async fn notify_driver(
        &self,
        driver_id: Uuid,
        request: &DeliveryRequest,
        kind: NotificationKind,
        message: String,
        now: DateTime<Utc>,
    ) {
        self.send(driver_id, request.id, kind, message, now).await;
    }

    /// Never fails: transport errors and timeouts are logged and counted only.
    async fn send(
        &self,
        driver_id: Uuid,
        delivery_request_id: Uuid,
        kind: NotificationKind,
        message: String,
        now: DateTime<Utc>,
    ) {
        let notification = Notification {
            id: Uuid::new_v4(),
            driver_id,
            delivery_request_id,
            kind,
            message,
            created_at: now,
        };

        let outcome = match tokio::time::timeout(self.timeout, self.sink.deliver(notification)).await
        {
            Ok(Ok(())) => {
                debug!(%driver_id, delivery_id = %delivery_request_id, kind = kind.label(), "driver notified");
                "sent"
            }
            Ok(Err(err)) => {
                warn!(%driver_id, delivery_id = %delivery_request_id, error = %err, "driver notification failed");
                "failed"
            }
            Err(_) => {
                warn!(%driver_id, delivery_id = %delivery_request_id, timeout_ms = self.timeout.as_millis() as u64, "driver notification timed out");
                "timeout"
            }
        };

        self.metrics
            .notifications_total
            .with_label_values(&[kind.label(), outcome])
            .inc();
    }
}
