//! Notification Dispatcher: persists notifications, pushes them to live
//! sessions, and retracts them when their cause goes away.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use guildhall_db::{Database, StoreError};
use guildhall_gateway::PushDelivery;
use guildhall_types::api::{Claims, MarkReadRequest, MarkReadResponse};
use guildhall_types::events::GatewayEvent;
use guildhall_types::models::{CauseRef, Notification, NotificationType};

use crate::error::ApiError;
use crate::state::{AppState, blocking};

/// Upper bound on ids per `mark_read` call; each one is a bound parameter.
pub const MAX_MARK_READ: usize = 500;

#[derive(Clone)]
pub struct NotificationDispatcher {
    db: Arc<Database>,
    push: Arc<dyn PushDelivery>,
    /// Held across write + push, so a cancel is never pushed ahead of the
    /// create it retracts.
    push_order: Arc<Mutex<()>>,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<Database>, push: Arc<dyn PushDelivery>) -> Self {
        Self {
            db,
            push,
            push_order: Arc::new(Mutex::new(())),
        }
    }

    /// Persist one notification per recipient, then push each to its
    /// recipient's live sessions. Pushes are best-effort and never fail the
    /// call; a persistence failure does.
    pub async fn create_notification(
        &self,
        recipients: Vec<Uuid>,
        kind: NotificationType,
        message: String,
        cause: Option<CauseRef>,
    ) -> Result<Vec<Notification>, ApiError> {
        if recipients.is_empty() {
            return Ok(Vec::new());
        }

        let _order = self.push_order.lock().await;
        let rows = blocking(&self.db, move |db| {
            db.insert_notifications(&recipients, kind, &message, cause)
        })
        .await?;

        let notifications: Vec<Notification> = rows.into_iter().map(Notification::from).collect();
        for notification in &notifications {
            self.push
                .deliver(
                    notification.recipient_id,
                    GatewayEvent::NotificationCreate {
                        notification: notification.clone(),
                    },
                )
                .await;
        }
        debug!("Created {} {} notification(s)", notifications.len(), kind);
        Ok(notifications)
    }

    /// `create_notification` for callers whose primary action already
    /// committed: a failure is logged, not returned.
    pub async fn notify(
        &self,
        recipients: Vec<Uuid>,
        kind: NotificationType,
        message: String,
        cause: Option<CauseRef>,
    ) {
        if let Err(e) = self.create_notification(recipients, kind, message, cause).await {
            warn!("Dropping {} notification: {}", kind, e);
        }
    }

    /// Delete every notification caused by `cause` and push a cancellation
    /// to each recipient. Returns how many were removed; zero is not an error.
    pub async fn cancel_notification_by_cause(&self, cause: CauseRef) -> Result<usize, ApiError> {
        let _order = self.push_order.lock().await;
        let removed = blocking(&self.db, move |db| db.delete_notifications_by_cause(cause)).await?;

        for row in &removed {
            self.push.deliver_cancellation(row.recipient_id, row.id).await;
        }
        if !removed.is_empty() {
            debug!("Cancelled {} notification(s) for {:?}", removed.len(), cause);
        }
        Ok(removed.len())
    }

    /// Cancel each cause in turn, stopping at the first store failure.
    pub async fn cancel_all(&self, causes: impl IntoIterator<Item = CauseRef>) -> Result<usize, ApiError> {
        let mut total = 0;
        for cause in causes {
            total += self.cancel_notification_by_cause(cause).await?;
        }
        Ok(total)
    }

    /// Flag the given notifications read. NotFound when none matched.
    pub async fn mark_read(&self, ids: Vec<Uuid>) -> Result<usize, ApiError> {
        if ids.is_empty() {
            return Err(ApiError::BadRequest("no notification ids given".into()));
        }
        if ids.len() > MAX_MARK_READ {
            return Err(ApiError::BadRequest(format!(
                "at most {} notification ids per call",
                MAX_MARK_READ
            )));
        }
        let updated = blocking(&self.db, move |db| db.mark_notifications_read(&ids)).await?;
        if updated == 0 {
            return Err(StoreError::NotFound("no matching notifications".into()).into());
        }
        Ok(updated)
    }

    pub async fn list(&self, user_id: Uuid, unread_only: bool, limit: u32) -> Result<Vec<Notification>, ApiError> {
        let rows = blocking(&self.db, move |db| db.list_notifications(user_id, unread_only, limit)).await?;
        Ok(rows.into_iter().map(Notification::from).collect())
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let limit = query.limit.clamp(1, 200);
    let notifications = state.notifications.list(claims.sub, query.unread_only, limit).await?;
    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated = state.notifications.mark_read(req.notification_ids).await?;
    Ok(Json(MarkReadResponse { updated }))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Records every push instead of sending it.
    #[derive(Default)]
    pub struct RecordingPush {
        pub events: Mutex<Vec<(Uuid, GatewayEvent)>>,
    }

    impl RecordingPush {
        pub fn take(&self) -> Vec<(Uuid, GatewayEvent)> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    #[async_trait]
    impl PushDelivery for RecordingPush {
        async fn deliver(&self, user_id: Uuid, event: GatewayEvent) {
            self.events.lock().unwrap().push((user_id, event));
        }
    }
}
