//! Feed Aggregator: merges posts and events into one ranked, paginated feed
//! filtered by the reader's guild, its allies and each author's privacy flag.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use guildhall_db::Database;
use guildhall_db::models::{CandidateSource, EventRow, FeedCandidate, PostRow};
use guildhall_types::api::{Claims, EventView, FeedContent, FeedItem, FeedPage, LikeView, PostView};
use guildhall_types::models::UserSummary;

use crate::error::ApiError;
use crate::state::{AppState, read_with_retry};

/// The guilds a reader can see into: their own plus its accepted allies.
#[derive(Debug, Clone)]
pub struct Visibility {
    own: Uuid,
    allies: HashSet<Uuid>,
}

impl Visibility {
    pub fn new(own: Uuid, allies: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            own,
            allies: allies.into_iter().collect(),
        }
    }

    fn contains(&self, guild_id: Uuid) -> bool {
        guild_id == self.own || self.allies.contains(&guild_id)
    }

    pub fn admits(&self, source: &CandidateSource) -> bool {
        match *source {
            // Open authors are visible network-wide; closed ones only inside
            // their own guild and its allies.
            CandidateSource::Post {
                author_guild_id,
                author_closed,
                ..
            } => match author_guild_id {
                Some(guild_id) if self.contains(guild_id) => true,
                _ => !author_closed,
            },
            CandidateSource::Event {
                creator_guild_id: Some(guild_id),
                accessible_to_allies,
                ..
            } => guild_id == self.own || (accessible_to_allies && self.allies.contains(&guild_id)),
            CandidateSource::Event {
                creator_guild_id: None,
                ..
            } => false,
        }
    }
}

/// Filter, order newest first (ties broken by insertion order) and slice one
/// page. Returns the visible total alongside the page.
pub fn rank_and_page(
    candidates: Vec<FeedCandidate>,
    visibility: &Visibility,
    page: u32,
    limit: u32,
) -> (usize, Vec<FeedCandidate>) {
    let mut visible: Vec<FeedCandidate> = candidates
        .into_iter()
        .filter(|c| visibility.admits(&c.source))
        .collect();
    visible.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq)));

    let total = visible.len();
    let offset = (page.max(1) as usize - 1).saturating_mul(limit as usize);
    let items = visible.into_iter().skip(offset).take(limit as usize).collect();
    (total, items)
}

#[derive(Clone)]
pub struct FeedAggregator {
    db: Arc<Database>,
    max_limit: u32,
}

impl FeedAggregator {
    pub fn new(db: Arc<Database>, max_limit: u32) -> Self {
        Self {
            db,
            max_limit: max_limit.max(1),
        }
    }

    /// `page` is 1-based; `limit` is clamped to `1..=max_limit`.
    pub async fn get_feed(&self, user_id: Uuid, page: u32, limit: u32) -> Result<FeedPage, ApiError> {
        let page = page.max(1);
        let limit = limit.clamp(1, self.max_limit);

        let snapshot = read_with_retry(&self.db, move |db| db.feed_snapshot(user_id)).await?;
        let visibility = Visibility::new(snapshot.guild_id, snapshot.allies);
        let candidate_count = snapshot.candidates.len();
        let (total, entries) = rank_and_page(snapshot.candidates, &visibility, page, limit);
        debug!(
            "Feed for {}: {} candidates, {} visible, page {} holds {}",
            user_id,
            candidate_count,
            total,
            page,
            entries.len()
        );

        let items = self.hydrate(entries).await?;
        Ok(FeedPage {
            total,
            page,
            limit,
            items,
        })
    }

    /// Attach full content and derived fields to a page of entries. An entry
    /// whose content was deleted after the snapshot is dropped from the page.
    async fn hydrate(&self, entries: Vec<FeedCandidate>) -> Result<Vec<FeedItem>, ApiError> {
        let mut post_ids = Vec::new();
        let mut event_ids = Vec::new();
        for entry in &entries {
            match entry.source {
                CandidateSource::Post { post_id, .. } => post_ids.push(post_id),
                CandidateSource::Event { event_id, .. } => event_ids.push(event_id),
            }
        }
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let content = read_with_retry(&self.db, move |db| {
            Ok(Hydration {
                posts: db.get_posts(&post_ids)?,
                likes: db.get_likes_for_posts(&post_ids)?,
                comment_counts: db.count_comments_by_post(&post_ids)?,
                events: db.get_events(&event_ids)?,
                participants: db.get_participants_for_events(&event_ids)?,
            })
        })
        .await?;
        let mut views = content.into_views();

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let content = match entry.source {
                    CandidateSource::Post { post_id, .. } => views.posts.remove(&post_id).map(FeedContent::Post),
                    CandidateSource::Event { event_id, .. } => {
                        views.events.remove(&event_id).map(FeedContent::Event)
                    }
                }?;
                Some(FeedItem {
                    entry_id: entry.entry_id,
                    created_at: entry.created_at,
                    content,
                })
            })
            .collect())
    }
}

struct Hydration {
    posts: Vec<PostRow>,
    likes: Vec<guildhall_db::models::LikeRow>,
    comment_counts: HashMap<Uuid, u64>,
    events: Vec<EventRow>,
    participants: Vec<guildhall_db::models::ParticipantRow>,
}

struct Views {
    posts: HashMap<Uuid, PostView>,
    events: HashMap<Uuid, EventView>,
}

impl Hydration {
    fn into_views(self) -> Views {
        let mut likes: HashMap<Uuid, Vec<LikeView>> = HashMap::new();
        for like in self.likes {
            likes.entry(like.post_id).or_default().push(like.into());
        }
        let mut participants: HashMap<Uuid, Vec<UserSummary>> = HashMap::new();
        for p in self.participants {
            participants.entry(p.event_id).or_default().push(UserSummary {
                id: p.user_id,
                username: p.username,
            });
        }

        let posts = self
            .posts
            .into_iter()
            .map(|post| {
                let view = PostView {
                    id: post.id,
                    author: UserSummary {
                        id: post.author_id,
                        username: post.author_username,
                    },
                    guild_id: post.author_guild_id,
                    body: post.body,
                    created_at: post.created_at,
                    comment_count: self.comment_counts.get(&post.id).copied().unwrap_or(0),
                    likes: likes.remove(&post.id).unwrap_or_default(),
                };
                (view.id, view)
            })
            .collect();

        let events = self
            .events
            .into_iter()
            .map(|event| {
                let id = event.id;
                (id, event_view(event, participants.remove(&id).unwrap_or_default()))
            })
            .collect();

        Views { posts, events }
    }
}

pub(crate) fn event_view(event: EventRow, participants: Vec<UserSummary>) -> EventView {
    EventView {
        id: event.id,
        creator: UserSummary {
            id: event.creator_id,
            username: event.creator_username,
        },
        guild_id: event.creator_guild_id,
        title: event.title,
        description: event.description,
        starts_at: event.starts_at,
        capacity: event.capacity,
        accessible_to_allies: event.accessible_to_allies,
        participants,
        created_at: event.created_at,
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

pub async fn get_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<FeedPage>, ApiError> {
    Ok(Json(state.feed.get_feed(claims.sub, query.page, query.limit).await?))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use guildhall_db::StoreError;
    use guildhall_db::queries::content::NewEvent;

    use super::*;
    use crate::state::test_support::*;

    fn post(guild: Option<Uuid>, closed: bool) -> CandidateSource {
        CandidateSource::Post {
            post_id: Uuid::new_v4(),
            author_guild_id: guild,
            author_closed: closed,
        }
    }

    fn event(guild: Option<Uuid>, to_allies: bool) -> CandidateSource {
        CandidateSource::Event {
            event_id: Uuid::new_v4(),
            creator_guild_id: guild,
            accessible_to_allies: to_allies,
        }
    }

    #[test]
    fn test_post_visibility() {
        let (own, ally, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let vis = Visibility::new(own, [ally]);

        assert!(vis.admits(&post(Some(own), true)));
        assert!(vis.admits(&post(Some(ally), true)));
        assert!(vis.admits(&post(Some(stranger), false)));
        assert!(!vis.admits(&post(Some(stranger), true)));
        assert!(vis.admits(&post(None, false)));
        assert!(!vis.admits(&post(None, true)));
    }

    #[test]
    fn test_event_visibility() {
        let (own, ally, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let vis = Visibility::new(own, [ally]);

        assert!(vis.admits(&event(Some(own), false)));
        assert!(vis.admits(&event(Some(ally), true)));
        assert!(!vis.admits(&event(Some(ally), false)));
        assert!(!vis.admits(&event(Some(stranger), true)));
        assert!(!vis.admits(&event(None, true)));
    }

    #[test]
    fn test_rank_and_page_orders_and_counts_before_slicing() {
        let own = Uuid::new_v4();
        let vis = Visibility::new(own, []);
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut candidates: Vec<FeedCandidate> = (0..5)
            .map(|i| FeedCandidate {
                entry_id: Uuid::new_v4(),
                seq: i,
                created_at: base + Duration::minutes(i),
                source: post(Some(own), false),
            })
            .collect();
        // Same timestamp as seq 4: later insert wins the tie
        candidates.push(FeedCandidate {
            entry_id: Uuid::new_v4(),
            seq: 5,
            created_at: base + Duration::minutes(4),
            source: post(Some(own), false),
        });
        // Hidden
        candidates.push(FeedCandidate {
            entry_id: Uuid::new_v4(),
            seq: 6,
            created_at: base + Duration::minutes(10),
            source: post(Some(Uuid::new_v4()), true),
        });

        let (total, first) = rank_and_page(candidates.clone(), &vis, 1, 2);
        assert_eq!(total, 6);
        assert_eq!(first.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![5, 4]);

        let (_, third) = rank_and_page(candidates.clone(), &vis, 3, 2);
        assert_eq!(third.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![1, 0]);

        let (total, past_end) = rank_and_page(candidates, &vis, 9, 2);
        assert_eq!(total, 6);
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_feed_respects_alliances_and_privacy() {
        let (state, _push, _dir) = test_state();
        let (g, _) = guild_with_leader(&state, "home");
        let (x, _) = guild_with_leader(&state, "ally");
        let (z, _) = guild_with_leader(&state, "outsider");
        let reader = member_of(&state, g.id, "reader");
        let ally_author = member_of(&state, x.id, "ally-author");
        let outsider = member_of(&state, z.id, "outsider-author");

        let alliance = state.db.request_alliance(g.id, x.id, None).unwrap();
        state.db.accept_alliance(alliance.id, None).unwrap();

        state.db.set_feed_privacy(ally_author.id, true).unwrap();
        let ally_post = state.db.create_post(ally_author.id, "from ally", Utc::now()).unwrap();
        let open_post = state.db.create_post(outsider.id, "open", Utc::now()).unwrap();

        let feed = state.feed.get_feed(reader.id, 1, 20).await.unwrap();
        let ids: Vec<Uuid> = feed
            .items
            .iter()
            .map(|item| match &item.content {
                FeedContent::Post(p) => p.id,
                FeedContent::Event(e) => e.id,
            })
            .collect();
        assert_eq!(feed.total, 2);
        assert!(ids.contains(&ally_post.id));
        assert!(ids.contains(&open_post.id));

        state.db.set_feed_privacy(outsider.id, true).unwrap();
        let feed = state.feed.get_feed(reader.id, 1, 20).await.unwrap();
        assert_eq!(feed.total, 1);
    }

    #[tokio::test]
    async fn test_feed_hydrates_counts_likes_and_participants() {
        let (state, _push, _dir) = test_state();
        let (g, leader) = guild_with_leader(&state, "home");
        let reader = member_of(&state, g.id, "reader");

        let p = state.db.create_post(leader.id, "hello", Utc::now()).unwrap();
        state.db.insert_comment(p.id, reader.id, "one").unwrap();
        state.db.insert_comment(p.id, reader.id, "two").unwrap();
        state.db.insert_like(p.id, reader.id).unwrap();
        let (ev, _) = state
            .db
            .create_event(
                leader.id,
                &NewEvent {
                    title: "raid",
                    description: "",
                    starts_at: None,
                    capacity: 5,
                    accessible_to_allies: false,
                },
                Utc::now() + Duration::seconds(1),
            )
            .unwrap();
        state.db.join_event(ev.id, reader.id).unwrap();

        let feed = state.feed.get_feed(reader.id, 1, 20).await.unwrap();
        assert_eq!(feed.items.len(), 2);
        match &feed.items[0].content {
            FeedContent::Event(e) => {
                assert_eq!(e.id, ev.id);
                assert_eq!(e.participants.len(), 2);
            }
            other => panic!("expected event first, got {:?}", other),
        }
        match &feed.items[1].content {
            FeedContent::Post(post) => {
                assert_eq!(post.comment_count, 2);
                assert_eq!(post.likes.len(), 1);
                assert_eq!(post.likes[0].user.id, reader.id);
            }
            other => panic!("expected post second, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_feed_limit_is_clamped() {
        let (state, _push, _dir) = test_state_with(crate::state::Policy {
            feed_max_limit: 3,
            ..Default::default()
        });
        let (g, leader) = guild_with_leader(&state, "home");
        for i in 0..5 {
            state.db.create_post(leader.id, &format!("post {}", i), Utc::now()).unwrap();
        }
        let reader = member_of(&state, g.id, "reader");

        let feed = state.feed.get_feed(reader.id, 0, 1000).await.unwrap();
        assert_eq!(feed.page, 1);
        assert_eq!(feed.limit, 3);
        assert_eq!(feed.total, 5);
        assert_eq!(feed.items.len(), 3);
    }

    #[tokio::test]
    async fn test_unguilded_reader_fails() {
        let (state, _push, _dir) = test_state();
        let loner = state.db.create_user("loner").unwrap();

        let result = state.feed.get_feed(loner.id, 1, 20).await;
        assert!(matches!(result, Err(ApiError::Store(StoreError::NotFound(_)))));
    }
}
