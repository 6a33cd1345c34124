use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Notification;

/// Events pushed to connected sessions over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the session is live
    Ready { user_id: Uuid, username: String },

    /// A notification was recorded for this user
    NotificationCreate { notification: Notification },

    /// A notification was retracted because its cause was removed
    NotificationCancel { notification_id: Uuid },
}

impl GatewayEvent {
    /// The notification this event concerns, if any.
    pub fn notification_id(&self) -> Option<Uuid> {
        match self {
            Self::NotificationCreate { notification } => Some(notification.id),
            Self::NotificationCancel { notification_id } => Some(*notification_id),
            Self::Ready { .. } => None,
        }
    }
}
