use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::error::conflict_on_constraint;
use crate::models::UserRow;
use crate::queries::{OptionalExt, now, text_col, ts_col, uuid_col, opt_uuid_col};
use crate::{Database, StoreError};
use guildhall_types::models::Role;

const USER_COLUMNS: &str = "id, username, guild_id, role, feed_closed, created_at";

impl Database {
    /// Minimal user record. Credentials and profile fields belong to the
    /// auth service; this row only carries what the social core reads.
    pub fn create_user(&self, username: &str) -> Result<UserRow, StoreError> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), username, Role::Candidate.as_str(), now()),
            )
            .map_err(|e| conflict_on_constraint(e, "username is taken"))?;
            query_user(conn, id)?.ok_or_else(|| StoreError::Internal("user vanished after insert".into()))
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Case-insensitive lookup.
    #[cfg(test)]
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                [username],
                map_user,
            )
            .optional()
        })
    }

    pub fn find_guild_leader(&self, guild_id: Uuid) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_guild_leader(conn, guild_id))
    }

    pub fn guild_members(&self, guild_id: Uuid) -> Result<Vec<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE guild_id = ?1 ORDER BY created_at",
                USER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([guild_id.to_string()], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_feed_privacy(&self, user_id: Uuid, closed: bool) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE users SET feed_closed = ?1 WHERE id = ?2",
                (closed, user_id.to_string()),
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("user {}", user_id)));
            }
            Ok(())
        })
    }
}

pub(crate) fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_col(row, 0)?,
        username: row.get(1)?,
        guild_id: opt_uuid_col(row, 2)?,
        role: text_col(row, 3)?,
        feed_closed: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

pub(crate) fn query_user(conn: &Connection, id: Uuid) -> Result<Option<UserRow>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [id.to_string()],
        map_user,
    )
    .optional()
}

pub(crate) fn require_user(conn: &Connection, id: Uuid) -> Result<UserRow, StoreError> {
    query_user(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
}

pub(crate) fn query_guild_leader(conn: &Connection, guild_id: Uuid) -> Result<Option<UserRow>, StoreError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM users WHERE guild_id = ?1 AND role = ?2 LIMIT 1",
            USER_COLUMNS
        ),
        (guild_id.to_string(), Role::Leader.as_str()),
        map_user,
    )
    .optional()
}
