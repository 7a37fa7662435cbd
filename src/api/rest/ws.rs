use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::notification::Notification;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub driver_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.driver_id))
}

/// No driver filter means the client sees every driver's notifications.
fn addressed_to(notification: &Notification, driver_id: Option<Uuid>) -> bool {
    driver_id.is_none_or(|id| notification.driver_id == id)
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, driver_id: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();
    let mut notifications = BroadcastStream::new(state.notification_events_tx.subscribe());

    info!(driver_id = ?driver_id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(next) = notifications.next().await {
            let notification = match next {
                Ok(notification) => notification,
                Err(err) => {
                    warn!(error = %err, "websocket client lagged behind notifications");
                    continue;
                }
            };
            if !addressed_to(&notification, driver_id) {
                continue;
            }

            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::addressed_to;
    use crate::models::notification::{Notification, NotificationKind};

    #[test]
    fn driver_filter_selects_own_notifications() {
        let driver_id = Uuid::new_v4();
        let notification = Notification {
            id: Uuid::new_v4(),
            driver_id,
            delivery_request_id: Uuid::new_v4(),
            kind: NotificationKind::NewJob,
            message: "New delivery".to_string(),
            created_at: Utc::now(),
        };

        assert!(addressed_to(&notification, None));
        assert!(addressed_to(&notification, Some(driver_id)));
        assert!(!addressed_to(&notification, Some(Uuid::new_v4())));
    }
}
