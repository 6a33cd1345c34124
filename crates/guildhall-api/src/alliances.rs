//! Alliance Lifecycle Manager: request, accept, reject and dissolve, each
//! followed by a notification to the other guild's leader.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use guildhall_db::{Database, StoreError};
use guildhall_types::api::{AllianceRequestBody, AllianceRequestView, AllianceRequestsResponse, Claims};
use guildhall_types::models::{Alliance, CauseRef, NotificationType, Role};

use crate::error::ApiError;
use crate::notifications::NotificationDispatcher;
use crate::state::{AppState, blocking, require_role};

#[derive(Clone)]
pub struct AllianceManager {
    db: Arc<Database>,
    notifier: NotificationDispatcher,
    max_allies: Option<usize>,
}

impl AllianceManager {
    pub fn new(db: Arc<Database>, notifier: NotificationDispatcher, max_allies: Option<usize>) -> Self {
        Self {
            db,
            notifier,
            max_allies,
        }
    }

    pub async fn request_alliance(&self, requester_id: Uuid, target_id: Uuid) -> Result<Alliance, ApiError> {
        let cap = self.max_allies;
        let row = blocking(&self.db, move |db| db.request_alliance(requester_id, target_id, cap)).await?;

        let name = self.guild_name(requester_id).await;
        self.notify_leader(
            target_id,
            NotificationType::AllianceRequest,
            format!("{} proposes an alliance", name),
            row.id,
        )
        .await;
        Ok(row.into())
    }

    pub async fn accept(&self, alliance_id: Uuid) -> Result<Alliance, ApiError> {
        let cap = self.max_allies;
        let row = blocking(&self.db, move |db| db.accept_alliance(alliance_id, cap)).await?;

        let name = self.guild_name(row.target_id).await;
        self.notify_leader(
            row.requester_id,
            NotificationType::AllianceAccepted,
            format!("{} accepted your alliance", name),
            row.id,
        )
        .await;
        Ok(row.into())
    }

    pub async fn reject(&self, alliance_id: Uuid) -> Result<Alliance, ApiError> {
        let row = blocking(&self.db, move |db| db.reject_alliance(alliance_id)).await?;

        let name = self.guild_name(row.target_id).await;
        self.notify_leader(
            row.requester_id,
            NotificationType::AllianceRejected,
            format!("{} declined your alliance", name),
            row.id,
        )
        .await;
        Ok(row.into())
    }

    /// Dissolve the accepted alliance between `guild_id` and `ally_id`,
    /// whichever side requested it.
    pub async fn dissolve(&self, guild_id: Uuid, ally_id: Uuid) -> Result<Alliance, ApiError> {
        let row = blocking(&self.db, move |db| db.dissolve_alliance(guild_id, ally_id)).await?;

        let name = self.guild_name(guild_id).await;
        self.notify_leader(
            ally_id,
            NotificationType::AllianceDissolved,
            format!("{} dissolved your alliance", name),
            row.id,
        )
        .await;
        Ok(row.into())
    }

    pub async fn list_requests_for_guild(&self, guild_id: Uuid) -> Result<AllianceRequestsResponse, ApiError> {
        let (sent, received) = blocking(&self.db, move |db| db.list_alliance_requests(guild_id)).await?;

        let view = |listing: guildhall_db::models::AllianceListing| AllianceRequestView {
            alliance: listing.alliance.into(),
            counterpart: listing.counterpart,
        };
        Ok(AllianceRequestsResponse {
            sent: sent.into_iter().map(view).collect(),
            received: received.into_iter().map(view).collect(),
        })
    }

    async fn notify_leader(&self, guild_id: Uuid, kind: NotificationType, message: String, alliance_id: Uuid) {
        match blocking(&self.db, move |db| db.find_guild_leader(guild_id)).await {
            Ok(Some(leader)) => {
                self.notifier
                    .notify(vec![leader.id], kind, message, Some(CauseRef::Alliance(alliance_id)))
                    .await
            }
            Ok(None) => warn!("Guild {} has no leader, dropping {} notification", guild_id, kind),
            Err(e) => warn!("Leader lookup for guild {} failed: {}", guild_id, e),
        }
    }

    async fn guild_name(&self, guild_id: Uuid) -> String {
        match blocking(&self.db, move |db| db.get_guild(guild_id)).await {
            Ok(Some(guild)) => guild.name,
            _ => guild_id.to_string(),
        }
    }
}

// -- Handlers --

pub async fn request_alliance(
    State(state): State<AppState>,
    Path(guild_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AllianceRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&state.db, claims.sub, guild_id, Role::Leader).await?;
    let alliance = state.alliances.request_alliance(guild_id, req.target_guild_id).await?;
    Ok((StatusCode::CREATED, Json(alliance)))
}

pub async fn list_alliance_requests(
    State(state): State<AppState>,
    Path(guild_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<AllianceRequestsResponse>, ApiError> {
    Ok(Json(state.alliances.list_requests_for_guild(guild_id).await?))
}

pub async fn accept_alliance(
    State(state): State<AppState>,
    Path(alliance_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Alliance>, ApiError> {
    let target_id = alliance_target(&state, alliance_id).await?;
    require_role(&state.db, claims.sub, target_id, Role::Leader).await?;
    Ok(Json(state.alliances.accept(alliance_id).await?))
}

pub async fn reject_alliance(
    State(state): State<AppState>,
    Path(alliance_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Alliance>, ApiError> {
    let target_id = alliance_target(&state, alliance_id).await?;
    require_role(&state.db, claims.sub, target_id, Role::Leader).await?;
    Ok(Json(state.alliances.reject(alliance_id).await?))
}

pub async fn dissolve_alliance(
    State(state): State<AppState>,
    Path((guild_id, ally_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Alliance>, ApiError> {
    require_role(&state.db, claims.sub, guild_id, Role::Leader).await?;
    Ok(Json(state.alliances.dissolve(guild_id, ally_id).await?))
}

async fn alliance_target(state: &AppState, alliance_id: Uuid) -> Result<Uuid, ApiError> {
    blocking(&state.db, move |db| db.get_alliance(alliance_id))
        .await?
        .map(|a| a.target_id)
        .ok_or_else(|| StoreError::NotFound(format!("alliance {}", alliance_id)).into())
}
