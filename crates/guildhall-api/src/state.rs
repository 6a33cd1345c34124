use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use guildhall_db::models::UserRow;
use guildhall_db::{Database, StoreError};
use guildhall_gateway::PushDelivery;
use guildhall_types::models::Role;

use crate::alliances::AllianceManager;
use crate::content::ContentService;
use crate::error::ApiError;
use crate::feed::FeedAggregator;
use crate::membership::MembershipService;
use crate::notifications::NotificationDispatcher;

pub type AppState = Arc<AppStateInner>;

/// Tunable product rules.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Ally cap per guild, enforced on request and accept. None = no cap.
    pub max_allies: Option<usize>,
    /// Upper bound on the feed page size.
    pub feed_max_limit: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_allies: None,
            feed_max_limit: 100,
        }
    }
}

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub notifications: NotificationDispatcher,
    pub alliances: AllianceManager,
    pub feed: FeedAggregator,
    pub content: ContentService,
    pub membership: MembershipService,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, push: Arc<dyn PushDelivery>, jwt_secret: String, policy: Policy) -> Self {
        let notifications = NotificationDispatcher::new(db.clone(), push);
        Self {
            alliances: AllianceManager::new(db.clone(), notifications.clone(), policy.max_allies),
            feed: FeedAggregator::new(db.clone(), policy.feed_max_limit),
            content: ContentService::new(db.clone(), notifications.clone()),
            membership: MembershipService::new(db.clone(), notifications.clone()),
            notifications,
            db,
            jwt_secret,
        }
    }
}

/// Run a blocking store call off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(format!("blocking task failed: {}", e))
        })?
        .map_err(ApiError::from)
}

/// Like `blocking`, but a transient failure is retried once. Reads only.
pub(crate) async fn read_with_retry<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: Fn(&Database) -> Result<T, StoreError> + Clone + Send + 'static,
    T: Send + 'static,
{
    match blocking(db, f.clone()).await {
        Err(e) if e.is_transient() => {
            warn!("Transient store error on read, retrying once: {}", e);
            blocking(db, f).await
        }
        other => other,
    }
}

/// Load `user_id` and check they hold at least `min` in `guild_id`.
pub(crate) async fn require_role(
    db: &Arc<Database>,
    user_id: Uuid,
    guild_id: Uuid,
    min: Role,
) -> Result<UserRow, ApiError> {
    let user = blocking(db, move |db| db.get_user(user_id))
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;

    if user.guild_id != Some(guild_id) || user.role < min {
        return Err(ApiError::Forbidden(format!(
            "requires {} of guild {}",
            min, guild_id
        )));
    }
    Ok(user)
}

/// Load a user or fail with NotFound.
pub(crate) async fn require_user(db: &Arc<Database>, user_id: Uuid) -> Result<UserRow, ApiError> {
    Ok(blocking(db, move |db| db.get_user(user_id))
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?)
}
