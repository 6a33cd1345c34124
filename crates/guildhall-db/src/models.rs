//! Database row types. Conversions into the shared API models live here so
//! callers never see raw column layouts.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use guildhall_types::api::{CommentView, LikeView, MembershipRequestView};
use guildhall_types::models::{
    Alliance, AllianceStatus, CauseRef, GuildSummary, MembershipRequestStatus, Notification,
    NotificationType, Role, User, UserSummary,
};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub guild_id: Option<Uuid>,
    pub role: Role,
    pub feed_closed: bool,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            guild_id: row.guild_id,
            role: row.role,
            feed_closing_to_guild_and_allies: row.feed_closed,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuildRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub capacity: u32,
    pub recruiting: bool,
    pub created_at: DateTime<Utc>,
}

impl GuildRow {
    pub fn summary(&self) -> GuildSummary {
        GuildSummary {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AllianceRow {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub target_id: Uuid,
    pub status: AllianceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AllianceRow> for Alliance {
    fn from(row: AllianceRow) -> Self {
        Alliance {
            id: row.id,
            requester_id: row.requester_id,
            target_id: row.target_id,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// An alliance record joined with the summary of the guild on the other end.
#[derive(Debug, Clone)]
pub struct AllianceListing {
    pub alliance: AllianceRow,
    pub counterpart: GuildSummary,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub author_guild_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub creator_username: String,
    pub creator_guild_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub capacity: u32,
    pub accessible_to_allies: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LikeRow {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<LikeRow> for LikeView {
    fn from(row: LikeRow) -> Self {
        LikeView {
            id: row.id,
            user: UserSummary {
                id: row.user_id,
                username: row.username,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<CommentRow> for CommentView {
    fn from(row: CommentRow) -> Self {
        CommentView {
            id: row.id,
            post_id: row.post_id,
            author: UserSummary {
                id: row.author_id,
                username: row.author_username,
            },
            body: row.body,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub joined_at: DateTime<Utc>,
}

/// What a feed entry points at, with just the columns visibility needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    Post {
        post_id: Uuid,
        author_guild_id: Option<Uuid>,
        author_closed: bool,
    },
    Event {
        event_id: Uuid,
        creator_guild_id: Option<Uuid>,
        accessible_to_allies: bool,
    },
}

#[derive(Debug, Clone)]
pub struct FeedCandidate {
    pub entry_id: Uuid,
    /// Insertion order, used to break created_at ties.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub source: CandidateSource,
}

/// Everything the feed pipeline reads under one snapshot.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub guild_id: Uuid,
    pub allies: Vec<Uuid>,
    pub candidates: Vec<FeedCandidate>,
}

/// Ids of dependent rows removed together with a post.
#[derive(Debug, Clone, Default)]
pub struct PostRemoval {
    pub like_ids: Vec<Uuid>,
    pub comment_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationType,
    pub message: String,
    pub cause: Option<CauseRef>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            recipient_id: row.recipient_id,
            kind: row.kind,
            message: row.message,
            cause: row.cause,
            read: row.read,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MembershipRequestRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub guild_id: Uuid,
    pub status: MembershipRequestStatus,
    pub created_at: DateTime<Utc>,
}

impl From<MembershipRequestRow> for MembershipRequestView {
    fn from(row: MembershipRequestRow) -> Self {
        MembershipRequestView {
            id: row.id,
            user_id: row.user_id,
            guild_id: row.guild_id,
            status: row.status,
            created_at: row.created_at,
        }
    }
}
