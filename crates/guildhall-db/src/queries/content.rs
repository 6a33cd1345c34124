//! Content index: posts, comments, likes, events and participants, plus the
//! feed entries that point at them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params_from_iter};
use uuid::Uuid;

use crate::error::conflict_on_constraint;
use crate::models::{CommentRow, EventRow, LikeRow, ParticipantRow, PostRemoval, PostRow};
use crate::queries::users::require_user;
use crate::queries::{
    OptionalExt, id_params, now, opt_ts_col, opt_uuid_col, placeholders, ts, ts_col, uuid_col,
};
use crate::{Database, StoreError};

const POST_SELECT: &str = "SELECT p.id, p.author_id, u.username, u.guild_id, p.body, p.created_at
     FROM posts p
     JOIN users u ON u.id = p.author_id";

const EVENT_SELECT: &str = "SELECT e.id, e.creator_id, u.username, u.guild_id, e.title, e.description,
            e.starts_at, e.capacity, e.accessible_to_allies, e.created_at
     FROM events e
     JOIN users u ON u.id = e.creator_id";

const COMMENT_SELECT: &str = "SELECT c.id, c.post_id, c.author_id, u.username, c.body, c.created_at
     FROM comments c
     JOIN users u ON u.id = c.author_id";

/// Fields for a new event.
#[derive(Debug, Clone)]
pub struct NewEvent<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub starts_at: Option<DateTime<Utc>>,
    pub capacity: u32,
    pub accessible_to_allies: bool,
}

impl Database {
    // -- Posts --

    /// Insert a post and its feed entry in one transaction.
    pub fn create_post(
        &self,
        author_id: Uuid,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PostRow, StoreError> {
        let id = Uuid::new_v4();
        self.with_tx(|tx| {
            require_user(tx, author_id)?;
            tx.execute(
                "INSERT INTO posts (id, author_id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), author_id.to_string(), body, ts(created_at)),
            )?;
            insert_feed_entry(tx, "post_id", id, created_at)?;
            require_post(tx, id)
        })
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<PostRow>, StoreError> {
        self.with_conn(|conn| query_post(conn, id))
    }

    /// Delete a post together with its likes, comments and feed entry.
    /// Returns the removed like and comment ids so their notifications can
    /// be cancelled.
    pub fn delete_post(&self, id: Uuid) -> Result<PostRemoval, StoreError> {
        self.with_tx(|tx| {
            require_post(tx, id)?;
            let removal = PostRemoval {
                like_ids: child_ids(tx, "likes", "post_id", id)?,
                comment_ids: child_ids(tx, "comments", "post_id", id)?,
            };
            tx.execute("DELETE FROM likes WHERE post_id = ?1", [id.to_string()])?;
            tx.execute("DELETE FROM comments WHERE post_id = ?1", [id.to_string()])?;
            tx.execute("DELETE FROM feed_entries WHERE post_id = ?1", [id.to_string()])?;
            tx.execute("DELETE FROM posts WHERE id = ?1", [id.to_string()])?;
            Ok(removal)
        })
    }

    pub fn get_posts(&self, ids: &[Uuid]) -> Result<Vec<PostRow>, StoreError> {
        self.with_conn(|conn| select_by_ids(conn, POST_SELECT, "p.id", ids, map_post))
    }

    // -- Likes --

    pub fn insert_like(&self, post_id: Uuid, user_id: Uuid) -> Result<LikeRow, StoreError> {
        let id = Uuid::new_v4();
        self.with_tx(|tx| {
            require_post(tx, post_id)?;
            require_user(tx, user_id)?;
            tx.execute(
                "INSERT INTO likes (id, post_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), post_id.to_string(), user_id.to_string(), now()),
            )
            .map_err(|e| conflict_on_constraint(e, "post already liked"))?;

            let mut stmt = tx.prepare(
                "SELECT l.id, l.post_id, l.user_id, u.username, l.created_at
                 FROM likes l JOIN users u ON u.id = l.user_id
                 WHERE l.id = ?1",
            )?;
            Ok(stmt.query_row([id.to_string()], map_like)?)
        })
    }

    /// Returns the removed like's id, or None if there was nothing to remove.
    pub fn delete_like(&self, post_id: Uuid, user_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        self.with_tx(|tx| {
            let id = tx
                .query_row(
                    "SELECT id FROM likes WHERE post_id = ?1 AND user_id = ?2",
                    (post_id.to_string(), user_id.to_string()),
                    |row| uuid_col(row, 0),
                )
                .optional()?;
            if let Some(id) = id {
                tx.execute("DELETE FROM likes WHERE id = ?1", [id.to_string()])?;
            }
            Ok(id)
        })
    }

    /// Batch-fetch likes (with liker names) for a set of posts.
    pub fn get_likes_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<LikeRow>, StoreError> {
        self.with_conn(|conn| {
            select_by_ids(
                conn,
                "SELECT l.id, l.post_id, l.user_id, u.username, l.created_at
                 FROM likes l JOIN users u ON u.id = l.user_id",
                "l.post_id",
                post_ids,
                map_like,
            )
        })
    }

    // -- Comments --

    pub fn insert_comment(&self, post_id: Uuid, author_id: Uuid, body: &str) -> Result<CommentRow, StoreError> {
        let id = Uuid::new_v4();
        self.with_tx(|tx| {
            require_post(tx, post_id)?;
            require_user(tx, author_id)?;
            tx.execute(
                "INSERT INTO comments (id, post_id, author_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id.to_string(), post_id.to_string(), author_id.to_string(), body, now()),
            )?;
            query_comment(tx, id)?.ok_or_else(|| StoreError::Internal("comment vanished after insert".into()))
        })
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Option<CommentRow>, StoreError> {
        self.with_conn(|conn| query_comment(conn, id))
    }

    /// Returns false if the comment did not exist.
    pub fn delete_comment(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute("DELETE FROM comments WHERE id = ?1", [id.to_string()])?;
            Ok(removed > 0)
        })
    }

    pub fn get_comments_for_post(&self, post_id: Uuid) -> Result<Vec<CommentRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE c.post_id = ?1 ORDER BY c.created_at",
                COMMENT_SELECT
            ))?;
            let rows = stmt
                .query_map([post_id.to_string()], map_comment)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Live comment counts; posts without comments are absent from the map.
    pub fn count_comments_by_post(&self, post_ids: &[Uuid]) -> Result<HashMap<Uuid, u64>, StoreError> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT post_id, COUNT(*) FROM comments WHERE post_id IN ({}) GROUP BY post_id",
                placeholders(post_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(id_params(post_ids)), |row| {
                    Ok((uuid_col(row, 0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;
            Ok(rows)
        })
    }

    // -- Events --

    /// Insert an event, its creator as first participant, and its feed entry.
    /// Returns the event and the creator's participation.
    pub fn create_event(
        &self,
        creator_id: Uuid,
        event: &NewEvent<'_>,
        created_at: DateTime<Utc>,
    ) -> Result<(EventRow, ParticipantRow), StoreError> {
        if event.capacity == 0 {
            return Err(StoreError::BadRequest("event capacity must be at least 1".into()));
        }

        let id = Uuid::new_v4();
        self.with_tx(|tx| {
            require_user(tx, creator_id)?;
            tx.execute(
                "INSERT INTO events (id, creator_id, title, description, starts_at, capacity, accessible_to_allies, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                (
                    id.to_string(),
                    creator_id.to_string(),
                    event.title,
                    event.description,
                    event.starts_at.map(ts),
                    event.capacity,
                    event.accessible_to_allies,
                    ts(created_at),
                ),
            )?;
            let participation = insert_participant(tx, id, creator_id)?;
            insert_feed_entry(tx, "event_id", id, created_at)?;
            Ok((require_event(tx, id)?, participation))
        })
    }

    pub fn get_event(&self, id: Uuid) -> Result<Option<EventRow>, StoreError> {
        self.with_conn(|conn| query_event(conn, id))
    }

    pub fn get_events(&self, ids: &[Uuid]) -> Result<Vec<EventRow>, StoreError> {
        self.with_conn(|conn| select_by_ids(conn, EVENT_SELECT, "e.id", ids, map_event))
    }

    /// Add `user_id` to the event. Conflict when full or already joined.
    pub fn join_event(&self, event_id: Uuid, user_id: Uuid) -> Result<ParticipantRow, StoreError> {
        self.with_tx(|tx| {
            let event = require_event(tx, event_id)?;
            let count: u32 = tx.query_row(
                "SELECT COUNT(*) FROM event_participants WHERE event_id = ?1",
                [event_id.to_string()],
                |r| r.get(0),
            )?;
            let already: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM event_participants WHERE event_id = ?1 AND user_id = ?2)",
                (event_id.to_string(), user_id.to_string()),
                |r| r.get(0),
            )?;
            if already {
                return Err(StoreError::Conflict("already participating".into()));
            }
            if count >= event.capacity {
                return Err(StoreError::Conflict(format!("event {} is full", event_id)));
            }
            insert_participant(tx, event_id, user_id)
        })
    }

    /// Returns the removed participation id, or None if not participating.
    pub fn leave_event(&self, event_id: Uuid, user_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        self.with_tx(|tx| {
            let id = tx
                .query_row(
                    "SELECT id FROM event_participants WHERE event_id = ?1 AND user_id = ?2",
                    (event_id.to_string(), user_id.to_string()),
                    |row| uuid_col(row, 0),
                )
                .optional()?;
            if let Some(id) = id {
                tx.execute("DELETE FROM event_participants WHERE id = ?1", [id.to_string()])?;
            }
            Ok(id)
        })
    }

    /// Delete an event, its participants and its feed entry. Returns the
    /// removed participation ids.
    pub fn delete_event(&self, id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        self.with_tx(|tx| {
            require_event(tx, id)?;
            let participations = child_ids(tx, "event_participants", "event_id", id)?;
            tx.execute("DELETE FROM event_participants WHERE event_id = ?1", [id.to_string()])?;
            tx.execute("DELETE FROM feed_entries WHERE event_id = ?1", [id.to_string()])?;
            tx.execute("DELETE FROM events WHERE id = ?1", [id.to_string()])?;
            Ok(participations)
        })
    }

    pub fn get_participants_for_events(&self, event_ids: &[Uuid]) -> Result<Vec<ParticipantRow>, StoreError> {
        self.with_conn(|conn| {
            select_by_ids(
                conn,
                "SELECT p.id, p.event_id, p.user_id, u.username, p.joined_at
                 FROM event_participants p JOIN users u ON u.id = p.user_id",
                "p.event_id",
                event_ids,
                map_participant,
            )
        })
    }
}

fn insert_feed_entry(
    conn: &Connection,
    column: &str,
    content_id: Uuid,
    created_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO feed_entries (id, {}, created_at) VALUES (?1, ?2, ?3)",
            column
        ),
        (Uuid::new_v4().to_string(), content_id.to_string(), ts(created_at)),
    )?;
    Ok(())
}

fn insert_participant(conn: &Connection, event_id: Uuid, user_id: Uuid) -> Result<ParticipantRow, StoreError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO event_participants (id, event_id, user_id, joined_at) VALUES (?1, ?2, ?3, ?4)",
        (id.to_string(), event_id.to_string(), user_id.to_string(), now()),
    )
    .map_err(|e| conflict_on_constraint(e, "already participating"))?;

    let mut stmt = conn.prepare(
        "SELECT p.id, p.event_id, p.user_id, u.username, p.joined_at
         FROM event_participants p JOIN users u ON u.id = p.user_id
         WHERE p.id = ?1",
    )?;
    Ok(stmt.query_row([id.to_string()], map_participant)?)
}

fn child_ids(conn: &Connection, table: &str, parent_column: &str, parent: Uuid) -> Result<Vec<Uuid>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT id FROM {} WHERE {} = ?1", table, parent_column))?;
    let ids = stmt
        .query_map([parent.to_string()], |row| uuid_col(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Run `select` filtered by `column IN (ids)`.
fn select_by_ids<T, F>(
    conn: &Connection,
    select: &str,
    column: &str,
    ids: &[Uuid],
    map: F,
) -> Result<Vec<T>, StoreError>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!("{} WHERE {} IN ({})", select, column, placeholders(ids.len()));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(id_params(ids)), map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: uuid_col(row, 0)?,
        author_id: uuid_col(row, 1)?,
        author_username: row.get(2)?,
        author_guild_id: opt_uuid_col(row, 3)?,
        body: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: uuid_col(row, 0)?,
        creator_id: uuid_col(row, 1)?,
        creator_username: row.get(2)?,
        creator_guild_id: opt_uuid_col(row, 3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        starts_at: opt_ts_col(row, 6)?,
        capacity: row.get(7)?,
        accessible_to_allies: row.get(8)?,
        created_at: ts_col(row, 9)?,
    })
}

fn map_like(row: &Row<'_>) -> rusqlite::Result<LikeRow> {
    Ok(LikeRow {
        id: uuid_col(row, 0)?,
        post_id: uuid_col(row, 1)?,
        user_id: uuid_col(row, 2)?,
        username: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: uuid_col(row, 0)?,
        post_id: uuid_col(row, 1)?,
        author_id: uuid_col(row, 2)?,
        author_username: row.get(3)?,
        body: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn map_participant(row: &Row<'_>) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        id: uuid_col(row, 0)?,
        event_id: uuid_col(row, 1)?,
        user_id: uuid_col(row, 2)?,
        username: row.get(3)?,
        joined_at: ts_col(row, 4)?,
    })
}

fn query_post(conn: &Connection, id: Uuid) -> Result<Option<PostRow>, StoreError> {
    conn.query_row(&format!("{} WHERE p.id = ?1", POST_SELECT), [id.to_string()], map_post)
        .optional()
}

fn require_post(conn: &Connection, id: Uuid) -> Result<PostRow, StoreError> {
    query_post(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("post {}", id)))
}

fn query_event(conn: &Connection, id: Uuid) -> Result<Option<EventRow>, StoreError> {
    conn.query_row(&format!("{} WHERE e.id = ?1", EVENT_SELECT), [id.to_string()], map_event)
        .optional()
}

fn require_event(conn: &Connection, id: Uuid) -> Result<EventRow, StoreError> {
    query_event(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("event {}", id)))
}

fn query_comment(conn: &Connection, id: Uuid) -> Result<Option<CommentRow>, StoreError> {
    conn.query_row(&format!("{} WHERE c.id = ?1", COMMENT_SELECT), [id.to_string()], map_comment)
        .optional()
}
