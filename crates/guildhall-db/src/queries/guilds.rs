//! Guild records and the materialized ally set.
//!
//! The ally set is written only from inside alliance transitions (see
//! `alliances.rs`), so `add_ally`/`remove_ally` are crate-private and take the
//! caller's transaction.

use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::error::conflict_on_constraint;
use crate::models::GuildRow;
use crate::queries::users::require_user;
use crate::queries::{OptionalExt, now, ts_col, uuid_col};
use crate::{Database, StoreError};
use guildhall_types::models::Role;

const GUILD_COLUMNS: &str = "id, name, description, capacity, recruiting, created_at";

impl Database {
    /// Create a guild led by `leader_id`, who must not already belong to one.
    pub fn register_guild(
        &self,
        leader_id: Uuid,
        name: &str,
        description: &str,
        capacity: u32,
    ) -> Result<GuildRow, StoreError> {
        if capacity == 0 {
            return Err(StoreError::BadRequest("capacity must be at least 1".into()));
        }

        let id = Uuid::new_v4();
        self.with_tx(|tx| {
            let leader = require_user(tx, leader_id)?;
            if leader.guild_id.is_some() {
                return Err(StoreError::Conflict(format!(
                    "user {} already belongs to a guild",
                    leader_id
                )));
            }

            tx.execute(
                "INSERT INTO guilds (id, name, description, capacity, recruiting, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                (id.to_string(), name, description, capacity, now()),
            )
            .map_err(|e| conflict_on_constraint(e, "guild name is taken"))?;

            tx.execute(
                "UPDATE users SET guild_id = ?1, role = ?2 WHERE id = ?3",
                (id.to_string(), Role::Leader.as_str(), leader_id.to_string()),
            )?;

            require_guild(tx, id)
        })
    }

    pub fn get_guild(&self, id: Uuid) -> Result<Option<GuildRow>, StoreError> {
        self.with_conn(|conn| query_guild(conn, id))
    }

    /// Current ally ids of `guild_id`.
    pub fn allies_of(&self, guild_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        self.with_conn(|conn| query_allies(conn, guild_id))
    }

    /// Ally guild records, for display.
    pub fn ally_guilds(&self, guild_id: Uuid) -> Result<Vec<GuildRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.description, g.capacity, g.recruiting, g.created_at
                 FROM guild_allies a
                 JOIN guilds g ON g.id = a.ally_id
                 WHERE a.guild_id = ?1
                 ORDER BY g.name",
            )?;
            let rows = stmt
                .query_map([guild_id.to_string()], map_guild)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn map_guild(row: &Row<'_>) -> rusqlite::Result<GuildRow> {
    Ok(GuildRow {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        capacity: row.get(3)?,
        recruiting: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

pub(crate) fn query_guild(conn: &Connection, id: Uuid) -> Result<Option<GuildRow>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM guilds WHERE id = ?1", GUILD_COLUMNS),
        [id.to_string()],
        map_guild,
    )
    .optional()
}

pub(crate) fn require_guild(conn: &Connection, id: Uuid) -> Result<GuildRow, StoreError> {
    query_guild(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("guild {}", id)))
}

pub(crate) fn member_count(conn: &Connection, guild_id: Uuid) -> Result<u32, StoreError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE guild_id = ?1",
        [guild_id.to_string()],
        |r| r.get(0),
    )?;
    Ok(count)
}

pub(crate) fn query_allies(conn: &Connection, guild_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
    let mut stmt = conn.prepare("SELECT ally_id FROM guild_allies WHERE guild_id = ?1")?;
    let ids = stmt
        .query_map([guild_id.to_string()], |row| uuid_col(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub(crate) fn ally_count(conn: &Connection, guild_id: Uuid) -> Result<usize, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM guild_allies WHERE guild_id = ?1",
        [guild_id.to_string()],
        |r| r.get(0),
    )?;
    Ok(count as usize)
}

pub(crate) fn are_allied(conn: &Connection, a: Uuid, b: Uuid) -> Result<bool, StoreError> {
    let allied: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM guild_allies WHERE guild_id = ?1 AND ally_id = ?2)",
        (a.to_string(), b.to_string()),
        |r| r.get(0),
    )?;
    Ok(allied)
}

/// Idempotent: returns false when `ally_id` was already present.
pub(crate) fn add_ally(conn: &Connection, guild_id: Uuid, ally_id: Uuid) -> Result<bool, StoreError> {
    // OR IGNORE would also swallow the CHECK, so reject self-edges here.
    if guild_id == ally_id {
        return Err(StoreError::Conflict("a guild cannot ally with itself".into()));
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO guild_allies (guild_id, ally_id, created_at) VALUES (?1, ?2, ?3)",
        (guild_id.to_string(), ally_id.to_string(), now()),
    )?;
    Ok(inserted > 0)
}

/// Idempotent: returns false when `ally_id` was not present.
pub(crate) fn remove_ally(conn: &Connection, guild_id: Uuid, ally_id: Uuid) -> Result<bool, StoreError> {
    let removed = conn.execute(
        "DELETE FROM guild_allies WHERE guild_id = ?1 AND ally_id = ?2",
        (guild_id.to_string(), ally_id.to_string()),
    )?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::*;

    #[test]
    fn test_add_ally_is_idempotent() {
        let (db, _dir) = test_db();
        let (g, _) = guild_with_leader(&db, "oak");
        let (h, _) = guild_with_leader(&db, "ash");

        let first = db.with_tx(|tx| add_ally(tx, g.id, h.id)).unwrap();
        let second = db.with_tx(|tx| add_ally(tx, g.id, h.id)).unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(db.allies_of(g.id).unwrap(), vec![h.id]);
    }

    #[test]
    fn test_remove_ally_is_idempotent() {
        let (db, _dir) = test_db();
        let (g, _) = guild_with_leader(&db, "oak");
        let (h, _) = guild_with_leader(&db, "ash");

        db.with_tx(|tx| add_ally(tx, g.id, h.id)).unwrap();
        assert!(db.with_tx(|tx| remove_ally(tx, g.id, h.id)).unwrap());
        assert!(!db.with_tx(|tx| remove_ally(tx, g.id, h.id)).unwrap());
        assert!(db.allies_of(g.id).unwrap().is_empty());
    }

    #[test]
    fn test_self_ally_rejected() {
        let (db, _dir) = test_db();
        let (g, _) = guild_with_leader(&db, "oak");
        let err = db.with_tx(|tx| add_ally(tx, g.id, g.id)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_register_guild_promotes_leader() {
        let (db, _dir) = test_db();
        let (guild, leader) = guild_with_leader(&db, "oak");
        assert_eq!(leader.guild_id, Some(guild.id));
        assert_eq!(leader.role, Role::Leader);

        // Already guilded
        let err = db.register_guild(leader.id, "birch", "", 10).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Name collides ignoring case
        let other = db.create_user("newcomer").unwrap();
        let err = db.register_guild(other.id, "OAK", "", 10).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
