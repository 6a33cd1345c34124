//! Posts, likes, comments and events. Every action that creates a
//! notification cause has a matching removal that cancels it.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use guildhall_db::models::{EventRow, PostRow};
use guildhall_db::queries::content::NewEvent;
use guildhall_db::{Database, StoreError};
use guildhall_types::api::{
    Claims, CommentView, CreateCommentRequest, CreateEventRequest, CreatePostRequest, EventView, LikeView, PostView,
};
use guildhall_types::models::{CauseRef, NotificationType, UserSummary};

use crate::error::ApiError;
use crate::feed::event_view;
use crate::notifications::NotificationDispatcher;
use crate::state::{AppState, blocking, require_user};

const MAX_BODY_LEN: usize = 4000;
const MAX_TITLE_LEN: usize = 200;

fn validate_text(field: &str, value: String, max: usize) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    if trimmed.chars().count() > max {
        return Err(ApiError::BadRequest(format!("{} exceeds {} characters", field, max)));
    }
    Ok(trimmed.to_string())
}

#[derive(Clone)]
pub struct ContentService {
    db: Arc<Database>,
    notifier: NotificationDispatcher,
}

impl ContentService {
    pub fn new(db: Arc<Database>, notifier: NotificationDispatcher) -> Self {
        Self { db, notifier }
    }

    // -- Posts --

    pub async fn create_post(&self, author_id: Uuid, body: String) -> Result<PostView, ApiError> {
        let body = validate_text("body", body, MAX_BODY_LEN)?;
        let row = blocking(&self.db, move |db| db.create_post(author_id, &body, Utc::now())).await?;
        Ok(PostView {
            id: row.id,
            author: UserSummary {
                id: row.author_id,
                username: row.author_username,
            },
            guild_id: row.author_guild_id,
            body: row.body,
            created_at: row.created_at,
            comment_count: 0,
            likes: Vec::new(),
        })
    }

    /// Author only. Cancels the notifications of every like and comment
    /// that went with the post.
    pub async fn delete_post(&self, actor_id: Uuid, post_id: Uuid) -> Result<(), ApiError> {
        let post = self.require_post(post_id).await?;
        if post.author_id != actor_id {
            return Err(ApiError::Forbidden("only the author can delete a post".into()));
        }

        let removal = blocking(&self.db, move |db| db.delete_post(post_id)).await?;
        let causes = removal
            .like_ids
            .iter()
            .copied()
            .map(CauseRef::Like)
            .chain(removal.comment_ids.iter().copied().map(CauseRef::Comment));
        self.notifier.cancel_all(causes).await?;

        info!(
            "Post {} deleted with {} like(s) and {} comment(s)",
            post_id,
            removal.like_ids.len(),
            removal.comment_ids.len()
        );
        Ok(())
    }

    // -- Likes --

    pub async fn like_post(&self, user_id: Uuid, post_id: Uuid) -> Result<LikeView, ApiError> {
        let post = self.require_post(post_id).await?;
        let like = blocking(&self.db, move |db| db.insert_like(post_id, user_id)).await?;

        if post.author_id != user_id {
            self.notifier
                .notify(
                    vec![post.author_id],
                    NotificationType::PostLike,
                    format!("{} liked your post", like.username),
                    Some(CauseRef::Like(like.id)),
                )
                .await;
        }
        Ok(like.into())
    }

    /// Returns whether a like was removed. Unliking twice is a no-op.
    pub async fn unlike_post(&self, user_id: Uuid, post_id: Uuid) -> Result<bool, ApiError> {
        let removed = blocking(&self.db, move |db| db.delete_like(post_id, user_id)).await?;
        if let Some(like_id) = removed {
            self.notifier.cancel_notification_by_cause(CauseRef::Like(like_id)).await?;
        }
        Ok(removed.is_some())
    }

    // -- Comments --

    pub async fn comment_post(&self, user_id: Uuid, post_id: Uuid, body: String) -> Result<CommentView, ApiError> {
        let body = validate_text("body", body, MAX_BODY_LEN)?;
        let post = self.require_post(post_id).await?;
        let comment = blocking(&self.db, move |db| db.insert_comment(post_id, user_id, &body)).await?;

        if post.author_id != user_id {
            self.notifier
                .notify(
                    vec![post.author_id],
                    NotificationType::PostComment,
                    format!("{} commented on your post", comment.author_username),
                    Some(CauseRef::Comment(comment.id)),
                )
                .await;
        }
        Ok(comment.into())
    }

    /// Author only.
    pub async fn delete_comment(&self, actor_id: Uuid, comment_id: Uuid) -> Result<(), ApiError> {
        let comment = blocking(&self.db, move |db| db.get_comment(comment_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("comment {}", comment_id)))?;
        if comment.author_id != actor_id {
            return Err(ApiError::Forbidden("only the author can delete a comment".into()));
        }

        if blocking(&self.db, move |db| db.delete_comment(comment_id)).await? {
            self.notifier
                .cancel_notification_by_cause(CauseRef::Comment(comment_id))
                .await?;
        }
        Ok(())
    }

    pub async fn list_comments(&self, post_id: Uuid) -> Result<Vec<CommentView>, ApiError> {
        self.require_post(post_id).await?;
        let rows = blocking(&self.db, move |db| db.get_comments_for_post(post_id)).await?;
        Ok(rows.into_iter().map(CommentView::from).collect())
    }

    // -- Events --

    /// Creator must belong to a guild. Guild mates are told about it.
    pub async fn create_event(&self, creator_id: Uuid, req: CreateEventRequest) -> Result<EventView, ApiError> {
        let title = validate_text("title", req.title, MAX_TITLE_LEN)?;
        let creator = require_user(&self.db, creator_id).await?;
        let guild_id = creator
            .guild_id
            .ok_or_else(|| ApiError::BadRequest("events need a guild; join one first".into()))?;

        let description = req.description;
        let (starts_at, capacity, accessible_to_allies) = (req.starts_at, req.capacity, req.accessible_to_allies);
        let title_for_insert = title.clone();
        let (event, _) = blocking(&self.db, move |db| {
            db.create_event(
                creator_id,
                &NewEvent {
                    title: &title_for_insert,
                    description: &description,
                    starts_at,
                    capacity,
                    accessible_to_allies,
                },
                Utc::now(),
            )
        })
        .await?;

        let members = blocking(&self.db, move |db| db.guild_members(guild_id)).await?;
        let recipients: Vec<Uuid> = members.iter().map(|m| m.id).filter(|id| *id != creator_id).collect();
        self.notifier
            .notify(
                recipients,
                NotificationType::EventCreated,
                format!("{} scheduled {}", creator.username, title),
                Some(CauseRef::Event(event.id)),
            )
            .await;

        info!("Event {} created in guild {}", event.id, guild_id);
        Ok(event_view(event, vec![creator.summary()]))
    }

    /// NotFound when the event is not visible to the user's guild, Conflict
    /// when full or already joined.
    pub async fn join_event(&self, user_id: Uuid, event_id: Uuid) -> Result<EventView, ApiError> {
        let user = require_user(&self.db, user_id).await?;
        let event = self.require_event(event_id).await?;
        if !self.event_visible_to(&event, user.guild_id).await? {
            return Err(StoreError::NotFound(format!("event {}", event_id)).into());
        }

        let participation = blocking(&self.db, move |db| db.join_event(event_id, user_id)).await?;
        if event.creator_id != user_id {
            self.notifier
                .notify(
                    vec![event.creator_id],
                    NotificationType::EventJoin,
                    format!("{} joined {}", user.username, event.title),
                    Some(CauseRef::EventJoin(participation.id)),
                )
                .await;
        }

        self.event_with_participants(event).await
    }

    /// The creator cannot leave their own event. Leaving twice is a no-op.
    pub async fn leave_event(&self, user_id: Uuid, event_id: Uuid) -> Result<bool, ApiError> {
        let event = self.require_event(event_id).await?;
        if event.creator_id == user_id {
            return Err(StoreError::Conflict("the creator cannot leave their event".into()).into());
        }

        let removed = blocking(&self.db, move |db| db.leave_event(event_id, user_id)).await?;
        if let Some(participation_id) = removed {
            self.notifier
                .cancel_notification_by_cause(CauseRef::EventJoin(participation_id))
                .await?;
        }
        Ok(removed.is_some())
    }

    /// Creator only. Cancels the creation notice and every join notice.
    pub async fn delete_event(&self, actor_id: Uuid, event_id: Uuid) -> Result<(), ApiError> {
        let event = self.require_event(event_id).await?;
        if event.creator_id != actor_id {
            return Err(ApiError::Forbidden("only the creator can delete an event".into()));
        }

        let participations = blocking(&self.db, move |db| db.delete_event(event_id)).await?;
        let causes = std::iter::once(CauseRef::Event(event_id))
            .chain(participations.iter().copied().map(CauseRef::EventJoin));
        self.notifier.cancel_all(causes).await?;

        info!("Event {} deleted with {} participation(s)", event_id, participations.len());
        Ok(())
    }

    async fn event_visible_to(&self, event: &EventRow, guild_id: Option<Uuid>) -> Result<bool, ApiError> {
        let (Some(guild_id), Some(creator_guild)) = (guild_id, event.creator_guild_id) else {
            return Ok(false);
        };
        if guild_id == creator_guild {
            return Ok(true);
        }
        if !event.accessible_to_allies {
            return Ok(false);
        }
        let allies = blocking(&self.db, move |db| db.allies_of(creator_guild)).await?;
        Ok(allies.contains(&guild_id))
    }

    async fn event_with_participants(&self, event: EventRow) -> Result<EventView, ApiError> {
        let event_id = event.id;
        let rows = blocking(&self.db, move |db| db.get_participants_for_events(&[event_id])).await?;
        let participants = rows
            .into_iter()
            .map(|p| UserSummary {
                id: p.user_id,
                username: p.username,
            })
            .collect();
        Ok(event_view(event, participants))
    }

    async fn require_post(&self, post_id: Uuid) -> Result<PostRow, ApiError> {
        Ok(blocking(&self.db, move |db| db.get_post(post_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("post {}", post_id)))?)
    }

    async fn require_event(&self, event_id: Uuid) -> Result<EventRow, ApiError> {
        Ok(blocking(&self.db, move |db| db.get_event(event_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("event {}", event_id)))?)
    }
}

// -- Handlers --

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state.content.create_post(claims.sub, req.body).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    state.content.delete_post(claims.sub, post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn like_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let like = state.content.like_post(claims.sub, post_id).await?;
    Ok((StatusCode::CREATED, Json(like)))
}

pub async fn unlike_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    state.content.unlike_post(claims.sub, post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Vec<CommentView>>, ApiError> {
    Ok(Json(state.content.list_comments(post_id).await?))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state.content.comment_post(claims.sub, post_id, req.body).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    state.content.delete_comment(claims.sub, comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event = state.content.create_event(claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    state.content.delete_event(claims.sub, event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<EventView>, ApiError> {
    Ok(Json(state.content.join_event(claims.sub, event_id).await?))
}

pub async fn leave_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    state.content.leave_event(claims.sub, event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use guildhall_types::events::GatewayEvent;

    use super::*;
    use crate::state::test_support::*;

    fn event_request(title: &str, accessible_to_allies: bool) -> CreateEventRequest {
        CreateEventRequest {
            title: title.into(),
            description: String::new(),
            starts_at: None,
            capacity: 3,
            accessible_to_allies,
        }
    }

    fn created(events: &[(Uuid, GatewayEvent)]) -> Vec<(Uuid, NotificationType)> {
        events
            .iter()
            .filter_map(|(user, e)| match e {
                GatewayEvent::NotificationCreate { notification } => Some((*user, notification.kind)),
                _ => None,
            })
            .collect()
    }

    fn cancelled(events: &[(Uuid, GatewayEvent)]) -> usize {
        events
            .iter()
            .filter(|(_, e)| matches!(e, GatewayEvent::NotificationCancel { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_like_then_unlike_retracts_notification() {
        let (state, push, _dir) = test_state();
        let (g, author) = guild_with_leader(&state, "home");
        let fan = member_of(&state, g.id, "fan");
        let post = state.content.create_post(author.id, "hello".into()).await.unwrap();

        state.content.like_post(fan.id, post.id).await.unwrap();
        assert_eq!(created(&push.take()), vec![(author.id, NotificationType::PostLike)]);
        assert_eq!(state.notifications.list(author.id, false, 10).await.unwrap().len(), 1);

        assert!(state.content.unlike_post(fan.id, post.id).await.unwrap());
        assert_eq!(cancelled(&push.take()), 1);
        assert!(state.notifications.list(author.id, false, 10).await.unwrap().is_empty());

        // Not liked any more: silent no-op
        assert!(!state.content.unlike_post(fan.id, post.id).await.unwrap());
        assert!(push.take().is_empty());
    }

    #[tokio::test]
    async fn test_double_like_conflicts_and_self_like_is_silent() {
        let (state, push, _dir) = test_state();
        let (_g, author) = guild_with_leader(&state, "home");
        let post = state.content.create_post(author.id, "hello".into()).await.unwrap();

        state.content.like_post(author.id, post.id).await.unwrap();
        assert!(push.take().is_empty());

        let again = state.content.like_post(author.id, post.id).await;
        assert!(matches!(again, Err(ApiError::Store(StoreError::Conflict(_)))));
    }

    #[tokio::test]
    async fn test_delete_post_cancels_like_and_comment_notifications() {
        let (state, push, _dir) = test_state();
        let (g, author) = guild_with_leader(&state, "home");
        let fan = member_of(&state, g.id, "fan");
        let post = state.content.create_post(author.id, "hello".into()).await.unwrap();

        state.content.like_post(fan.id, post.id).await.unwrap();
        state.content.comment_post(fan.id, post.id, "nice".into()).await.unwrap();
        push.take();

        let denied = state.content.delete_post(fan.id, post.id).await;
        assert!(matches!(denied, Err(ApiError::Forbidden(_))));

        state.content.delete_post(author.id, post.id).await.unwrap();
        assert_eq!(cancelled(&push.take()), 2);
        assert!(state.notifications.list(author.id, false, 10).await.unwrap().is_empty());
        assert!(state.db.get_post(post.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_comment_cancels_its_notification() {
        let (state, push, _dir) = test_state();
        let (g, author) = guild_with_leader(&state, "home");
        let fan = member_of(&state, g.id, "fan");
        let post = state.content.create_post(author.id, "hello".into()).await.unwrap();

        let comment = state.content.comment_post(fan.id, post.id, "nice".into()).await.unwrap();
        assert_eq!(created(&push.take()), vec![(author.id, NotificationType::PostComment)]);
        assert_eq!(state.content.list_comments(post.id).await.unwrap().len(), 1);

        state.content.delete_comment(fan.id, comment.id).await.unwrap();
        assert_eq!(cancelled(&push.take()), 1);
        assert!(state.content.list_comments(post.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_actor_gets_not_found() {
        let (state, push, _dir) = test_state();
        let (_g, author) = guild_with_leader(&state, "home");
        let post = state.content.create_post(author.id, "hello".into()).await.unwrap();
        let ghost = Uuid::new_v4();

        let like = state.content.like_post(ghost, post.id).await;
        assert!(matches!(&like, Err(ApiError::Store(StoreError::NotFound(_)))));
        assert_eq!(like.unwrap_err().status(), StatusCode::NOT_FOUND);

        let comment = state.content.comment_post(ghost, post.id, "boo".into()).await;
        assert!(matches!(&comment, Err(ApiError::Store(StoreError::NotFound(_)))));
        assert_eq!(comment.unwrap_err().status(), StatusCode::NOT_FOUND);

        assert!(push.take().is_empty());
    }

    #[tokio::test]
    async fn test_blank_post_rejected() {
        let (state, _push, _dir) = test_state();
        let (_g, author) = guild_with_leader(&state, "home");
        let result = state.content.create_post(author.id, "   ".into()).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_event_lifecycle_notifications() {
        let (state, push, _dir) = test_state();
        let (g, creator) = guild_with_leader(&state, "home");
        let mate = member_of(&state, g.id, "mate");

        let event = state.content.create_event(creator.id, event_request("raid", false)).await.unwrap();
        assert_eq!(event.participants.len(), 1);
        assert_eq!(created(&push.take()), vec![(mate.id, NotificationType::EventCreated)]);

        let joined = state.content.join_event(mate.id, event.id).await.unwrap();
        assert_eq!(joined.participants.len(), 2);
        assert_eq!(created(&push.take()), vec![(creator.id, NotificationType::EventJoin)]);

        let twice = state.content.join_event(mate.id, event.id).await;
        assert!(matches!(twice, Err(ApiError::Store(StoreError::Conflict(_)))));

        assert!(state.content.leave_event(mate.id, event.id).await.unwrap());
        assert_eq!(cancelled(&push.take()), 1);

        let creator_leave = state.content.leave_event(creator.id, event.id).await;
        assert!(matches!(creator_leave, Err(ApiError::Store(StoreError::Conflict(_)))));

        state.content.join_event(mate.id, event.id).await.unwrap();
        push.take();
        state.content.delete_event(creator.id, event.id).await.unwrap();
        // Creation notice to the mate plus the mate's join notice to the creator
        assert_eq!(cancelled(&push.take()), 2);
        assert!(state.notifications.list(mate.id, false, 10).await.unwrap().is_empty());
        assert!(state.notifications.list(creator.id, false, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_requires_visibility() {
        let (state, _push, _dir) = test_state();
        let (home, creator) = guild_with_leader(&state, "home");
        let (ally, _) = guild_with_leader(&state, "ally");
        let (_stranger, stranger_leader) = guild_with_leader(&state, "stranger");
        let ally_member = member_of(&state, ally.id, "friend");

        let alliance = state.db.request_alliance(home.id, ally.id, None).unwrap();
        state.db.accept_alliance(alliance.id, None).unwrap();

        let private = state.content.create_event(creator.id, event_request("private", false)).await.unwrap();
        let shared = state.content.create_event(creator.id, event_request("shared", true)).await.unwrap();

        let hidden = state.content.join_event(ally_member.id, private.id).await;
        assert!(matches!(hidden, Err(ApiError::Store(StoreError::NotFound(_)))));
        state.content.join_event(ally_member.id, shared.id).await.unwrap();

        let outsider = state.content.join_event(stranger_leader.id, shared.id).await;
        assert!(matches!(outsider, Err(ApiError::Store(StoreError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_event_needs_guild() {
        let (state, _push, _dir) = test_state();
        let loner = state.db.create_user("loner").unwrap();
        let result = state.content.create_event(loner.id, event_request("solo", false)).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
