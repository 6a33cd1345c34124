use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Stored-as-text enums. Each variant maps to the snake_case string used in
/// both the database and JSON.
macro_rules! text_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $label, value: other.to_string() }),
                }
            }
        }
    };
}

/// Guild role hierarchy. Variant order is rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Candidate,
    Member,
    Officer,
    Leader,
}

text_enum!(Role, "role", {
    Candidate => "candidate",
    Member => "member",
    Officer => "officer",
    Leader => "leader",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllianceStatus {
    Pending,
    Accepted,
    Rejected,
    Dissolved,
}

text_enum!(AllianceStatus, "alliance status", {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Dissolved => "dissolved",
});

impl AllianceStatus {
    /// PENDING -> {ACCEPTED, REJECTED}, ACCEPTED -> DISSOLVED. Nothing else.
    pub fn can_transition_to(self, next: AllianceStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted)
                | (Self::Pending, Self::Rejected)
                | (Self::Accepted, Self::Dissolved)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRequestStatus {
    Pending,
    Accepted,
}

text_enum!(MembershipRequestStatus, "membership request status", {
    Pending => "pending",
    Accepted => "accepted",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    AllianceRequest,
    AllianceAccepted,
    AllianceRejected,
    AllianceDissolved,
    PostLike,
    PostComment,
    EventCreated,
    EventJoin,
    MembershipRequest,
    MembershipAccepted,
    AccountLinkRequest,
}

text_enum!(NotificationType, "notification type", {
    AllianceRequest => "alliance_request",
    AllianceAccepted => "alliance_accepted",
    AllianceRejected => "alliance_rejected",
    AllianceDissolved => "alliance_dissolved",
    PostLike => "post_like",
    PostComment => "post_comment",
    EventCreated => "event_created",
    EventJoin => "event_join",
    MembershipRequest => "membership_request",
    MembershipAccepted => "membership_accepted",
    AccountLinkRequest => "account_link_request",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseKind {
    Like,
    Comment,
    Event,
    EventJoin,
    Alliance,
    MembershipRequest,
    AccountLinkRequest,
}

text_enum!(CauseKind, "cause kind", {
    Like => "like",
    Comment => "comment",
    Event => "event",
    EventJoin => "event_join",
    Alliance => "alliance",
    MembershipRequest => "membership_request",
    AccountLinkRequest => "account_link_request",
});

/// The entity that caused a notification. Non-owning: removing the
/// notification never touches the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CauseRef {
    Like(Uuid),
    Comment(Uuid),
    Event(Uuid),
    EventJoin(Uuid),
    Alliance(Uuid),
    MembershipRequest(Uuid),
    AccountLinkRequest(Uuid),
}

impl CauseRef {
    pub fn new(kind: CauseKind, id: Uuid) -> Self {
        match kind {
            CauseKind::Like => Self::Like(id),
            CauseKind::Comment => Self::Comment(id),
            CauseKind::Event => Self::Event(id),
            CauseKind::EventJoin => Self::EventJoin(id),
            CauseKind::Alliance => Self::Alliance(id),
            CauseKind::MembershipRequest => Self::MembershipRequest(id),
            CauseKind::AccountLinkRequest => Self::AccountLinkRequest(id),
        }
    }

    pub fn kind(&self) -> CauseKind {
        match self {
            Self::Like(_) => CauseKind::Like,
            Self::Comment(_) => CauseKind::Comment,
            Self::Event(_) => CauseKind::Event,
            Self::EventJoin(_) => CauseKind::EventJoin,
            Self::Alliance(_) => CauseKind::Alliance,
            Self::MembershipRequest(_) => CauseKind::MembershipRequest,
            Self::AccountLinkRequest(_) => CauseKind::AccountLinkRequest,
        }
    }

    pub fn id(&self) -> Uuid {
        match *self {
            Self::Like(id)
            | Self::Comment(id)
            | Self::Event(id)
            | Self::EventJoin(id)
            | Self::Alliance(id)
            | Self::MembershipRequest(id)
            | Self::AccountLinkRequest(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub guild_id: Option<Uuid>,
    pub role: Role,
    pub feed_closing_to_guild_and_allies: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guild {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub capacity: u32,
    pub recruiting: bool,
    pub members: Vec<UserSummary>,
    pub allies: Vec<GuildSummary>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alliance {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub target_id: Uuid,
    pub status: AllianceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    pub cause: Option<CauseRef>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
