use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use guildhall_api::state::{AppState, AppStateInner, Policy};
use guildhall_db::Database;
use guildhall_db::models::UserRow;
use guildhall_gateway::SessionRegistry;
use guildhall_types::api::{FeedContent, FeedPage};
use guildhall_types::events::GatewayEvent;
use guildhall_types::models::{AllianceStatus, NotificationType};

fn setup() -> (AppState, SessionRegistry, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("guildhall.db")).unwrap());
    let registry = SessionRegistry::new();
    let state = Arc::new(AppStateInner::new(
        db,
        Arc::new(registry.clone()),
        "integration-secret".into(),
        Policy::default(),
    ));
    (state, registry, dir)
}

fn user(state: &AppState, name: &str) -> UserRow {
    state.db.create_user(name).unwrap()
}

fn post_ids(page: &FeedPage) -> Vec<Uuid> {
    page.items
        .iter()
        .filter_map(|item| match &item.content {
            FeedContent::Post(p) => Some(p.id),
            FeedContent::Event(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn alliance_opens_and_closes_the_feed() {
    let (state, registry, _dir) = setup();

    let a_leader = user(&state, "alpha-leader");
    let b_leader = user(&state, "beta-leader");
    let a = state.db.register_guild(a_leader.id, "alpha", "", 10).unwrap();
    let b = state.db.register_guild(b_leader.id, "beta", "", 10).unwrap();
    let a_member = state.db.add_member(a.id, user(&state, "alpha-member").id).unwrap();
    let b_member = state.db.add_member(b.id, user(&state, "beta-member").id).unwrap();

    // A closed author is only visible to allies
    state.db.set_feed_privacy(a_member.id, true).unwrap();

    let (_conn, mut b_leader_rx) = registry.register(b_leader.id).await;

    let alliance = state.alliances.request_alliance(a.id, b.id).await.unwrap();
    assert_eq!(alliance.status, AllianceStatus::Pending);
    match b_leader_rx.try_recv().unwrap() {
        GatewayEvent::NotificationCreate { notification } => {
            assert_eq!(notification.kind, NotificationType::AllianceRequest);
            assert_eq!(notification.recipient_id, b_leader.id);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let accepted = state.alliances.accept(alliance.id).await.unwrap();
    assert_eq!(accepted.status, AllianceStatus::Accepted);
    assert_eq!(state.db.allies_of(a.id).unwrap(), vec![b.id]);
    assert_eq!(state.db.allies_of(b.id).unwrap(), vec![a.id]);

    let before = state.content.create_post(a_member.id, "for our allies".into()).await.unwrap();
    let feed = state.feed.get_feed(b_member.id, 1, 20).await.unwrap();
    assert_eq!(post_ids(&feed), vec![before.id]);

    let dissolved = state.alliances.dissolve(a.id, b.id).await.unwrap();
    assert_eq!(dissolved.status, AllianceStatus::Dissolved);
    assert!(state.db.allies_of(a.id).unwrap().is_empty());
    assert!(state.db.allies_of(b.id).unwrap().is_empty());
    match b_leader_rx.try_recv().unwrap() {
        GatewayEvent::NotificationCreate { notification } => {
            assert_eq!(notification.kind, NotificationType::AllianceDissolved)
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Visibility is evaluated at read time
    state.content.create_post(a_member.id, "after the split".into()).await.unwrap();
    let feed = state.feed.get_feed(b_member.id, 1, 20).await.unwrap();
    assert_eq!(feed.total, 0);
    assert!(feed.items.is_empty());

    // Alpha still sees its own posts
    let own = state.feed.get_feed(a_leader.id, 1, 20).await.unwrap();
    assert_eq!(own.total, 2);
}

#[tokio::test]
async fn open_authors_are_visible_network_wide() {
    let (state, _registry, _dir) = setup();

    let g_leader = user(&state, "g-leader");
    let z_leader = user(&state, "z-leader");
    state.db.register_guild(g_leader.id, "g", "", 10).unwrap();
    state.db.register_guild(z_leader.id, "z", "", 10).unwrap();

    let post = state.content.create_post(z_leader.id, "hello world".into()).await.unwrap();
    let feed = state.feed.get_feed(g_leader.id, 1, 20).await.unwrap();
    assert_eq!(post_ids(&feed), vec![post.id]);

    state.db.set_feed_privacy(z_leader.id, true).unwrap();
    let feed = state.feed.get_feed(g_leader.id, 1, 20).await.unwrap();
    assert!(post_ids(&feed).is_empty());
}

#[tokio::test]
async fn feed_pages_are_stable_and_disjoint() {
    let (state, _registry, _dir) = setup();
    let leader = user(&state, "leader");
    state.db.register_guild(leader.id, "home", "", 10).unwrap();

    let base = Utc::now();
    let mut expected = Vec::new();
    for i in 0..7 {
        let row = state
            .db
            .create_post(leader.id, &format!("post {}", i), base + chrono::Duration::seconds(i))
            .unwrap();
        expected.push(row.id);
    }
    expected.reverse();

    let mut seen = Vec::new();
    for page in 1..=3 {
        let feed = state.feed.get_feed(leader.id, page, 3).await.unwrap();
        assert_eq!(feed.total, 7);
        seen.extend(post_ids(&feed));
    }
    assert_eq!(seen, expected);
}
