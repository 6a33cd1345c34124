use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use guildhall_db::StoreError;
use guildhall_types::api::{Claims, RegisterGuildRequest, SetFeedPrivacyRequest};
use guildhall_types::models::{Guild, User};

use crate::error::ApiError;
use crate::state::{AppState, blocking, require_user};

/// A guild with its member list and current allies.
pub async fn load_guild(state: &AppState, guild_id: Uuid) -> Result<Guild, ApiError> {
    let (guild, members, allies) = blocking(&state.db, move |db| {
        let guild = db
            .get_guild(guild_id)?
            .ok_or_else(|| StoreError::NotFound(format!("guild {}", guild_id)))?;
        Ok((guild, db.guild_members(guild_id)?, db.ally_guilds(guild_id)?))
    })
    .await?;

    Ok(Guild {
        id: guild.id,
        name: guild.name,
        description: guild.description,
        capacity: guild.capacity,
        recruiting: guild.recruiting,
        members: members.iter().map(|m| m.summary()).collect(),
        allies: allies.iter().map(|a| a.summary()).collect(),
        created_at: guild.created_at,
    })
}

pub async fn register_guild(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterGuildRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > 64 {
        return Err(ApiError::BadRequest("guild name must be 1-64 characters".into()));
    }

    let leader_id = claims.sub;
    let description = req.description;
    let capacity = req.capacity;
    let guild = blocking(&state.db, move |db| db.register_guild(leader_id, &name, &description, capacity)).await?;
    info!("Guild {} ({}) registered by {}", guild.name, guild.id, claims.username);

    Ok((StatusCode::CREATED, Json(load_guild(&state, guild.id).await?)))
}

pub async fn get_guild(
    State(state): State<AppState>,
    Path(guild_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Guild>, ApiError> {
    Ok(Json(load_guild(&state, guild_id).await?))
}

pub async fn set_feed_privacy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetFeedPrivacyRequest>,
) -> Result<Json<User>, ApiError> {
    let user_id = claims.sub;
    let closed = req.feed_closing_to_guild_and_allies;
    blocking(&state.db, move |db| db.set_feed_privacy(user_id, closed)).await?;
    Ok(Json(require_user(&state.db, user_id).await?.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::*;

    #[tokio::test]
    async fn test_load_guild_lists_members_and_allies() {
        let (state, _push, _dir) = test_state();
        let (a, leader) = guild_with_leader(&state, "alpha");
        let (b, _) = guild_with_leader(&state, "beta");
        member_of(&state, a.id, "grunt");

        let alliance = state.alliances.request_alliance(a.id, b.id).await.unwrap();
        state.alliances.accept(alliance.id).await.unwrap();

        let guild = load_guild(&state, a.id).await.unwrap();
        assert_eq!(guild.name, "alpha");
        assert_eq!(guild.members.len(), 2);
        assert!(guild.members.iter().any(|m| m.id == leader.id));
        assert_eq!(guild.allies.len(), 1);
        assert_eq!(guild.allies[0].id, b.id);

        let missing = load_guild(&state, Uuid::new_v4()).await;
        assert!(matches!(missing, Err(ApiError::Store(StoreError::NotFound(_)))));
    }
}
