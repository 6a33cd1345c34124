use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Alliance, GuildSummary, MembershipRequestStatus, UserSummary};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway upgrade path.
/// Tokens are issued by the external auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Guilds --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterGuildRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capacity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetFeedPrivacyRequest {
    pub feed_closing_to_guild_and_allies: bool,
}

// -- Alliances --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllianceRequestBody {
    pub target_guild_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllianceRequestView {
    #[serde(flatten)]
    pub alliance: Alliance,
    pub counterpart: GuildSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllianceRequestsResponse {
    pub sent: Vec<AllianceRequestView>,
    pub received: Vec<AllianceRequestView>,
}

// -- Feed --

#[derive(Debug, Serialize)]
pub struct FeedPage {
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedItem {
    pub entry_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub content: FeedContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeedContent {
    Post(PostView),
    Event(EventView),
}

#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: Uuid,
    pub author: UserSummary,
    pub guild_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub comment_count: u64,
    pub likes: Vec<LikeView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LikeView {
    pub id: Uuid,
    pub user: UserSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub id: Uuid,
    pub creator: UserSummary,
    pub guild_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub capacity: u32,
    pub accessible_to_allies: bool,
    pub participants: Vec<UserSummary>,
    pub created_at: DateTime<Utc>,
}

// -- Content --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author: UserSummary,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEventRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub capacity: u32,
    #[serde(default)]
    pub accessible_to_allies: bool,
}

// -- Membership --

#[derive(Debug, Clone, Serialize)]
pub struct MembershipRequestView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub guild_id: Uuid,
    pub status: MembershipRequestStatus,
    pub created_at: DateTime<Utc>,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub notification_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}
