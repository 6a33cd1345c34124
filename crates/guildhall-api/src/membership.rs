//! Membership requests: request, withdraw, accept.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use guildhall_db::models::MembershipRequestRow;
use guildhall_db::{Database, StoreError};
use guildhall_types::api::{Claims, MembershipRequestView};
use guildhall_types::models::{CauseRef, NotificationType, Role};

use crate::error::ApiError;
use crate::notifications::NotificationDispatcher;
use crate::state::{AppState, blocking, require_role, require_user};

#[derive(Clone)]
pub struct MembershipService {
    db: Arc<Database>,
    notifier: NotificationDispatcher,
}

impl MembershipService {
    pub fn new(db: Arc<Database>, notifier: NotificationDispatcher) -> Self {
        Self { db, notifier }
    }

    pub async fn request_membership(&self, user_id: Uuid, guild_id: Uuid) -> Result<MembershipRequestView, ApiError> {
        let user = require_user(&self.db, user_id).await?;
        let request = blocking(&self.db, move |db| db.request_membership(user_id, guild_id)).await?;

        match blocking(&self.db, move |db| db.find_guild_leader(guild_id)).await {
            Ok(Some(leader)) => {
                self.notifier
                    .notify(
                        vec![leader.id],
                        NotificationType::MembershipRequest,
                        format!("{} asks to join your guild", user.username),
                        Some(CauseRef::MembershipRequest(request.id)),
                    )
                    .await
            }
            Ok(None) => warn!("Guild {} has no leader to review request {}", guild_id, request.id),
            Err(e) => warn!("Leader lookup for guild {} failed: {}", guild_id, e),
        }
        Ok(request.into())
    }

    /// Requester only. Cancels the leader's notification.
    pub async fn withdraw(&self, user_id: Uuid, request_id: Uuid) -> Result<(), ApiError> {
        let request = self.require_request(request_id).await?;
        if request.user_id != user_id {
            return Err(ApiError::Forbidden("not your membership request".into()));
        }

        if blocking(&self.db, move |db| db.delete_membership_request(request_id)).await? {
            self.notifier
                .cancel_notification_by_cause(CauseRef::MembershipRequest(request_id))
                .await?;
        }
        Ok(())
    }

    /// Leader of the requested guild only.
    pub async fn accept(&self, actor_id: Uuid, request_id: Uuid) -> Result<MembershipRequestView, ApiError> {
        let request = self.require_request(request_id).await?;
        require_role(&self.db, actor_id, request.guild_id, Role::Leader).await?;

        let accepted = blocking(&self.db, move |db| db.accept_membership_request(request_id)).await?;
        let guild_id = accepted.guild_id;
        let guild_name = match blocking(&self.db, move |db| db.get_guild(guild_id)).await {
            Ok(Some(guild)) => guild.name,
            _ => guild_id.to_string(),
        };
        self.notifier
            .notify(
                vec![accepted.user_id],
                NotificationType::MembershipAccepted,
                format!("Welcome to {}", guild_name),
                Some(CauseRef::MembershipRequest(accepted.id)),
            )
            .await;

        info!("User {} joined guild {}", accepted.user_id, accepted.guild_id);
        Ok(accepted.into())
    }

    async fn require_request(&self, request_id: Uuid) -> Result<MembershipRequestRow, ApiError> {
        Ok(blocking(&self.db, move |db| db.get_membership_request(request_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("membership request {}", request_id)))?)
    }
}

// -- Handlers --

pub async fn request_membership(
    State(state): State<AppState>,
    Path(guild_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.membership.request_membership(claims.sub, guild_id).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn withdraw_membership_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    state.membership.withdraw(claims.sub, request_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn accept_membership_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MembershipRequestView>, ApiError> {
    Ok(Json(state.membership.accept(claims.sub, request_id).await?))
}
