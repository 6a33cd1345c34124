//! Guild membership: the join-request workflow and its one effect, setting
//! a user's guild and role.

use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::error::conflict_on_constraint;
use crate::models::{MembershipRequestRow, UserRow};
use crate::queries::guilds::{member_count, require_guild};
use crate::queries::users::require_user;
use crate::queries::{OptionalExt, now, text_col, ts_col, uuid_col};
use crate::{Database, StoreError};
use guildhall_types::models::{MembershipRequestStatus, Role};

impl Database {
    pub fn request_membership(&self, user_id: Uuid, guild_id: Uuid) -> Result<MembershipRequestRow, StoreError> {
        let id = Uuid::new_v4();
        self.with_tx(|tx| {
            ensure_can_join(tx, user_id, guild_id)?;

            let guild = require_guild(tx, guild_id)?;
            if !guild.recruiting {
                return Err(StoreError::Conflict(format!("guild {} is not recruiting", guild_id)));
            }

            tx.execute(
                "INSERT INTO membership_requests (id, user_id, guild_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    id.to_string(),
                    user_id.to_string(),
                    guild_id.to_string(),
                    MembershipRequestStatus::Pending.as_str(),
                    now(),
                ),
            )
            .map_err(|e| conflict_on_constraint(e, "a membership request is already pending"))?;

            require_request(tx, id)
        })
    }

    pub fn get_membership_request(&self, id: Uuid) -> Result<Option<MembershipRequestRow>, StoreError> {
        self.with_conn(|conn| query_request(conn, id))
    }

    /// Withdraw a PENDING request. Returns false if the request did not
    /// exist; an already accepted request is InvalidState and stays put.
    pub fn delete_membership_request(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_tx(|tx| {
            let Some(request) = query_request(tx, id)? else {
                return Ok(false);
            };
            if request.status != MembershipRequestStatus::Pending {
                return Err(StoreError::InvalidState(format!(
                    "membership request {} is {}",
                    id, request.status
                )));
            }
            tx.execute("DELETE FROM membership_requests WHERE id = ?1", [id.to_string()])?;
            Ok(true)
        })
    }

    /// Mark the request accepted and make its user a MEMBER of the guild.
    pub fn accept_membership_request(&self, id: Uuid) -> Result<MembershipRequestRow, StoreError> {
        self.with_tx(|tx| {
            let request = require_request(tx, id)?;
            if request.status != MembershipRequestStatus::Pending {
                return Err(StoreError::InvalidState(format!(
                    "membership request {} is {}",
                    id, request.status
                )));
            }

            join_guild(tx, request.user_id, request.guild_id)?;
            tx.execute(
                "UPDATE membership_requests SET status = ?1 WHERE id = ?2",
                (MembershipRequestStatus::Accepted.as_str(), id.to_string()),
            )?;
            require_request(tx, id)
        })
    }

    /// Put an unguilded user straight into a guild as MEMBER.
    pub fn add_member(&self, guild_id: Uuid, user_id: Uuid) -> Result<UserRow, StoreError> {
        self.with_tx(|tx| {
            join_guild(tx, user_id, guild_id)?;
            require_user(tx, user_id)
        })
    }
}

fn ensure_can_join(conn: &Connection, user_id: Uuid, guild_id: Uuid) -> Result<(), StoreError> {
    let user = require_user(conn, user_id)?;
    if user.guild_id.is_some() {
        return Err(StoreError::Conflict(format!(
            "user {} already belongs to a guild",
            user_id
        )));
    }

    let guild = require_guild(conn, guild_id)?;
    if member_count(conn, guild_id)? >= guild.capacity {
        return Err(StoreError::Conflict(format!("guild {} is full", guild_id)));
    }
    Ok(())
}

fn join_guild(conn: &Connection, user_id: Uuid, guild_id: Uuid) -> Result<(), StoreError> {
    ensure_can_join(conn, user_id, guild_id)?;
    conn.execute(
        "UPDATE users SET guild_id = ?1, role = ?2 WHERE id = ?3",
        (guild_id.to_string(), Role::Member.as_str(), user_id.to_string()),
    )?;
    Ok(())
}

fn map_request(row: &Row<'_>) -> rusqlite::Result<MembershipRequestRow> {
    Ok(MembershipRequestRow {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        guild_id: uuid_col(row, 2)?,
        status: text_col(row, 3)?,
        created_at: ts_col(row, 4)?,
    })
}

fn query_request(conn: &Connection, id: Uuid) -> Result<Option<MembershipRequestRow>, StoreError> {
    conn.query_row(
        "SELECT id, user_id, guild_id, status, created_at FROM membership_requests WHERE id = ?1",
        [id.to_string()],
        map_request,
    )
    .optional()
}

fn require_request(conn: &Connection, id: Uuid) -> Result<MembershipRequestRow, StoreError> {
    query_request(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("membership request {}", id)))
}
