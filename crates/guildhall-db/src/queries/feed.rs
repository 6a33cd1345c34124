use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::models::{CandidateSource, FeedCandidate, FeedSnapshot};
use crate::queries::guilds::query_allies;
use crate::queries::users::require_user;
use crate::queries::{opt_uuid_col, ts_col, uuid_col};
use crate::{Database, StoreError};

impl Database {
    /// Read the requester's guild, its allies and every feed candidate under
    /// a single snapshot, so the ally set cannot shift mid-query.
    ///
    /// Fails with NotFound if the user is missing or has no guild.
    pub fn feed_snapshot(&self, user_id: Uuid) -> Result<FeedSnapshot, StoreError> {
        self.with_snapshot(|conn| {
            let user = require_user(conn, user_id)?;
            let guild_id = user.guild_id.ok_or_else(|| {
                StoreError::NotFound(format!("user {} has no guild", user_id))
            })?;
            let allies = query_allies(conn, guild_id)?;
            let candidates = query_candidates(conn)?;
            Ok(FeedSnapshot {
                guild_id,
                allies,
                candidates,
            })
        })
    }
}

/// Every feed entry with the columns visibility depends on. Filtering is
/// done by the caller: guild/ally/privacy rules do not map onto an index.
fn query_candidates(conn: &Connection) -> Result<Vec<FeedCandidate>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.rowid, f.created_at,
                f.post_id, pu.guild_id, pu.feed_closed,
                f.event_id, eu.guild_id, e.accessible_to_allies
         FROM feed_entries f
         LEFT JOIN posts p ON p.id = f.post_id
         LEFT JOIN users pu ON pu.id = p.author_id
         LEFT JOIN events e ON e.id = f.event_id
         LEFT JOIN users eu ON eu.id = e.creator_id",
    )?;

    let rows = stmt
        .query_map([], map_candidate)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_candidate(row: &Row<'_>) -> rusqlite::Result<FeedCandidate> {
    let source = match opt_uuid_col(row, 3)? {
        Some(post_id) => CandidateSource::Post {
            post_id,
            author_guild_id: opt_uuid_col(row, 4)?,
            author_closed: row.get::<_, Option<bool>>(5)?.unwrap_or(false),
        },
        None => CandidateSource::Event {
            event_id: uuid_col(row, 6)?,
            creator_guild_id: opt_uuid_col(row, 7)?,
            accessible_to_allies: row.get::<_, Option<bool>>(8)?.unwrap_or(false),
        },
    };

    Ok(FeedCandidate {
        entry_id: uuid_col(row, 0)?,
        seq: row.get(1)?,
        created_at: ts_col(row, 2)?,
        source,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::queries::content::NewEvent;
    use crate::queries::test_support::*;

    #[test]
    fn test_unguilded_user_has_no_feed() {
        let (db, _dir) = test_db();
        let loner = db.create_user("loner").unwrap();
        assert!(matches!(db.feed_snapshot(loner.id), Err(StoreError::NotFound(_))));
        assert!(matches!(db.feed_snapshot(Uuid::new_v4()), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_snapshot_carries_visibility_columns() {
        let (db, _dir) = test_db();
        let (guild, leader) = guild_with_leader(&db, "oak");
        db.set_feed_privacy(leader.id, true).unwrap();

        let post = db.create_post(leader.id, "closed post", Utc::now()).unwrap();
        let event = NewEvent {
            title: "Muster",
            description: "",
            starts_at: None,
            capacity: 5,
            accessible_to_allies: true,
        };
        let (event, _) = db.create_event(leader.id, &event, Utc::now()).unwrap();

        let snapshot = db.feed_snapshot(leader.id).unwrap();
        assert_eq!(snapshot.guild_id, guild.id);
        assert!(snapshot.allies.is_empty());
        assert_eq!(snapshot.candidates.len(), 2);

        assert!(snapshot.candidates.iter().any(|c| c.source
            == CandidateSource::Post {
                post_id: post.id,
                author_guild_id: Some(guild.id),
                author_closed: true,
            }));
        assert!(snapshot.candidates.iter().any(|c| c.source
            == CandidateSource::Event {
                event_id: event.id,
                creator_guild_id: Some(guild.id),
                accessible_to_allies: true,
            }));
    }
}
