//! Alliance records and their state machine.
//!
//! Every transition runs in one IMMEDIATE transaction together with the
//! matching ally-set edits, so the status change and both edge writes commit
//! or roll back as a unit, and transitions on the same pair serialize.

use chrono::Utc;
use rusqlite::{Connection, Row};
use uuid::Uuid;
use tracing::info;

use crate::error::conflict_on_constraint;
use crate::models::{AllianceListing, AllianceRow};
use crate::queries::guilds::{add_ally, ally_count, are_allied, remove_ally, require_guild};
use crate::queries::{OptionalExt, text_col, ts, ts_col, uuid_col};
use crate::{Database, StoreError};
use guildhall_types::models::{AllianceStatus, GuildSummary};

const ALLIANCE_COLUMNS: &str = "id, requester_id, target_id, status, created_at, updated_at";

/// Canonical (lo, hi) ordering of an unordered guild pair.
fn ordered_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

impl Database {
    /// Open a PENDING request from `requester_id` to `target_id`.
    ///
    /// `max_allies` caps either side's ally count when set.
    pub fn request_alliance(
        &self,
        requester_id: Uuid,
        target_id: Uuid,
        max_allies: Option<usize>,
    ) -> Result<AllianceRow, StoreError> {
        if requester_id == target_id {
            return Err(StoreError::Conflict("a guild cannot ally with itself".into()));
        }

        let (lo, hi) = ordered_pair(requester_id, target_id);
        self.with_tx(|tx| {
            require_guild(tx, requester_id)?;
            require_guild(tx, target_id)?;

            if are_allied(tx, requester_id, target_id)? {
                return Err(StoreError::Conflict(format!(
                    "guilds {} and {} are already allied",
                    requester_id, target_id
                )));
            }

            if let Some(open) = query_open_for_pair(tx, lo, hi)? {
                return Err(StoreError::Conflict(format!(
                    "alliance {} between these guilds is already {}",
                    open.id, open.status
                )));
            }

            if let Some(cap) = max_allies {
                check_ally_cap(tx, requester_id, cap)?;
                check_ally_cap(tx, target_id, cap)?;
            }

            let id = Uuid::new_v4();
            let now = Utc::now();
            tx.execute(
                "INSERT INTO alliances (id, requester_id, target_id, pair_lo, pair_hi, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                (
                    id.to_string(),
                    requester_id.to_string(),
                    target_id.to_string(),
                    lo.to_string(),
                    hi.to_string(),
                    AllianceStatus::Pending.as_str(),
                    ts(now),
                ),
            )
            .map_err(|e| conflict_on_constraint(e, "an open alliance already exists for this pair"))?;

            info!("Alliance {} requested: {} -> {}", id, requester_id, target_id);
            require_alliance(tx, id)
        })
    }

    /// PENDING -> ACCEPTED, inserting both directions of the ally edge.
    pub fn accept_alliance(
        &self,
        alliance_id: Uuid,
        max_allies: Option<usize>,
    ) -> Result<AllianceRow, StoreError> {
        self.with_tx(|tx| {
            let alliance = require_alliance(tx, alliance_id)?;
            ensure_transition(&alliance, AllianceStatus::Accepted)?;

            if let Some(cap) = max_allies {
                check_ally_cap(tx, alliance.requester_id, cap)?;
                check_ally_cap(tx, alliance.target_id, cap)?;
            }

            set_status(tx, alliance_id, AllianceStatus::Pending, AllianceStatus::Accepted)?;
            add_ally(tx, alliance.requester_id, alliance.target_id)?;
            add_ally(tx, alliance.target_id, alliance.requester_id)?;

            info!(
                "Alliance {} accepted: {} <-> {}",
                alliance_id, alliance.requester_id, alliance.target_id
            );
            require_alliance(tx, alliance_id)
        })
    }

    /// PENDING -> REJECTED. The ally set is untouched.
    pub fn reject_alliance(&self, alliance_id: Uuid) -> Result<AllianceRow, StoreError> {
        self.with_tx(|tx| {
            let alliance = require_alliance(tx, alliance_id)?;
            ensure_transition(&alliance, AllianceStatus::Rejected)?;
            set_status(tx, alliance_id, AllianceStatus::Pending, AllianceStatus::Rejected)?;

            info!("Alliance {} rejected", alliance_id);
            require_alliance(tx, alliance_id)
        })
    }

    /// ACCEPTED -> DISSOLVED for the record between `a` and `b` in either
    /// direction, removing both ally edges.
    pub fn dissolve_alliance(&self, a: Uuid, b: Uuid) -> Result<AllianceRow, StoreError> {
        let (lo, hi) = ordered_pair(a, b);
        self.with_tx(|tx| {
            let alliance = query_open_for_pair(tx, lo, hi)?
                .filter(|al| al.status == AllianceStatus::Accepted)
                .ok_or_else(|| {
                    StoreError::NotFound(format!("no accepted alliance between {} and {}", a, b))
                })?;

            set_status(tx, alliance.id, AllianceStatus::Accepted, AllianceStatus::Dissolved)?;
            remove_ally(tx, alliance.requester_id, alliance.target_id)?;
            remove_ally(tx, alliance.target_id, alliance.requester_id)?;

            info!("Alliance {} dissolved: {} -/- {}", alliance.id, a, b);
            require_alliance(tx, alliance.id)
        })
    }

    pub fn get_alliance(&self, id: Uuid) -> Result<Option<AllianceRow>, StoreError> {
        self.with_conn(|conn| query_alliance(conn, id))
    }

    /// Requests `guild_id` sent and received, newest first, each joined with
    /// the counterpart guild.
    pub fn list_alliance_requests(
        &self,
        guild_id: Uuid,
    ) -> Result<(Vec<AllianceListing>, Vec<AllianceListing>), StoreError> {
        self.with_snapshot(|conn| {
            require_guild(conn, guild_id)?;
            let sent = query_listings(conn, guild_id, "requester_id", "target_id")?;
            let received = query_listings(conn, guild_id, "target_id", "requester_id")?;
            Ok((sent, received))
        })
    }
}

fn map_alliance(row: &Row<'_>) -> rusqlite::Result<AllianceRow> {
    Ok(AllianceRow {
        id: uuid_col(row, 0)?,
        requester_id: uuid_col(row, 1)?,
        target_id: uuid_col(row, 2)?,
        status: text_col(row, 3)?,
        created_at: ts_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
    })
}

pub(crate) fn query_alliance(conn: &Connection, id: Uuid) -> Result<Option<AllianceRow>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM alliances WHERE id = ?1", ALLIANCE_COLUMNS),
        [id.to_string()],
        map_alliance,
    )
    .optional()
}

fn require_alliance(conn: &Connection, id: Uuid) -> Result<AllianceRow, StoreError> {
    query_alliance(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("alliance {}", id)))
}

/// The PENDING or ACCEPTED record for a pair; the partial unique index
/// guarantees there is at most one.
fn query_open_for_pair(conn: &Connection, lo: Uuid, hi: Uuid) -> Result<Option<AllianceRow>, StoreError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM alliances
             WHERE pair_lo = ?1 AND pair_hi = ?2 AND status IN ('pending', 'accepted')",
            ALLIANCE_COLUMNS
        ),
        (lo.to_string(), hi.to_string()),
        map_alliance,
    )
    .optional()
}

fn ensure_transition(alliance: &AllianceRow, next: AllianceStatus) -> Result<(), StoreError> {
    if alliance.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::InvalidState(format!(
            "alliance {} is {}, cannot become {}",
            alliance.id, alliance.status, next
        )))
    }
}

/// Compare-and-set on status.
fn set_status(
    conn: &Connection,
    id: Uuid,
    expected: AllianceStatus,
    next: AllianceStatus,
) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE alliances SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        (next.as_str(), ts(Utc::now()), id.to_string(), expected.as_str()),
    )?;
    if updated == 0 {
        return Err(StoreError::InvalidState(format!(
            "alliance {} is no longer {}",
            id, expected
        )));
    }
    Ok(())
}

fn check_ally_cap(conn: &Connection, guild_id: Uuid, cap: usize) -> Result<(), StoreError> {
    if ally_count(conn, guild_id)? >= cap {
        return Err(StoreError::Conflict(format!(
            "guild {} already has the maximum of {} allies",
            guild_id, cap
        )));
    }
    Ok(())
}

fn query_listings(
    conn: &Connection,
    guild_id: Uuid,
    own_column: &str,
    other_column: &str,
) -> Result<Vec<AllianceListing>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT a.id, a.requester_id, a.target_id, a.status, a.created_at, a.updated_at, g.id, g.name
         FROM alliances a
         JOIN guilds g ON g.id = a.{other}
         WHERE a.{own} = ?1
         ORDER BY a.created_at DESC",
        own = own_column,
        other = other_column,
    ))?;

    let rows = stmt
        .query_map([guild_id.to_string()], |row| {
            Ok(AllianceListing {
                alliance: map_alliance(row)?,
                counterpart: GuildSummary {
                    id: uuid_col(row, 6)?,
                    name: row.get(7)?,
                },
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::queries::test_support::*;

    #[test]
    fn test_accept_makes_allies_symmetric() {
        let (db, _dir) = test_db();
        let (a, _) = guild_with_leader(&db, "alpha");
        let (b, _) = guild_with_leader(&db, "beta");

        let pending = db.request_alliance(a.id, b.id, None).unwrap();
        assert_eq!(pending.status, AllianceStatus::Pending);
        assert!(db.allies_of(a.id).unwrap().is_empty());

        let accepted = db.accept_alliance(pending.id, None).unwrap();
        assert_eq!(accepted.status, AllianceStatus::Accepted);
        assert_eq!(db.allies_of(a.id).unwrap(), vec![b.id]);
        assert_eq!(db.allies_of(b.id).unwrap(), vec![a.id]);

        let dissolved = db.dissolve_alliance(b.id, a.id).unwrap();
        assert_eq!(dissolved.id, pending.id);
        assert_eq!(dissolved.status, AllianceStatus::Dissolved);
        assert!(db.allies_of(a.id).unwrap().is_empty());
        assert!(db.allies_of(b.id).unwrap().is_empty());
    }

    #[test]
    fn test_self_alliance_conflicts_even_for_unknown_guild() {
        let (db, _dir) = test_db();
        let ghost = Uuid::new_v4();
        let err = db.request_alliance(ghost, ghost, None).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_missing_guild_is_not_found() {
        let (db, _dir) = test_db();
        let (a, _) = guild_with_leader(&db, "alpha");
        let err = db.request_alliance(a.id, Uuid::new_v4(), None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_duplicate_request_conflicts_in_either_direction() {
        let (db, _dir) = test_db();
        let (a, _) = guild_with_leader(&db, "alpha");
        let (b, _) = guild_with_leader(&db, "beta");

        let first = db.request_alliance(a.id, b.id, None).unwrap();
        assert!(matches!(db.request_alliance(a.id, b.id, None), Err(StoreError::Conflict(_))));
        assert!(matches!(db.request_alliance(b.id, a.id, None), Err(StoreError::Conflict(_))));

        db.accept_alliance(first.id, None).unwrap();
        assert!(matches!(db.request_alliance(b.id, a.id, None), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_rejected_or_dissolved_pair_may_request_again() {
        let (db, _dir) = test_db();
        let (a, _) = guild_with_leader(&db, "alpha");
        let (b, _) = guild_with_leader(&db, "beta");

        let first = db.request_alliance(a.id, b.id, None).unwrap();
        db.reject_alliance(first.id).unwrap();
        assert!(db.allies_of(a.id).unwrap().is_empty());

        let second = db.request_alliance(b.id, a.id, None).unwrap();
        db.accept_alliance(second.id, None).unwrap();
        db.dissolve_alliance(a.id, b.id).unwrap();

        db.request_alliance(a.id, b.id, None).unwrap();
    }

    #[test]
    fn test_invalid_transitions() {
        let (db, _dir) = test_db();
        let (a, _) = guild_with_leader(&db, "alpha");
        let (b, _) = guild_with_leader(&db, "beta");

        let alliance = db.request_alliance(a.id, b.id, None).unwrap();
        db.reject_alliance(alliance.id).unwrap();

        assert!(matches!(db.accept_alliance(alliance.id, None), Err(StoreError::InvalidState(_))));
        assert!(matches!(db.reject_alliance(alliance.id), Err(StoreError::InvalidState(_))));
        assert!(matches!(db.accept_alliance(Uuid::new_v4(), None), Err(StoreError::NotFound(_))));

        // Nothing accepted between the pair
        assert!(matches!(db.dissolve_alliance(a.id, b.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_pending_cannot_be_dissolved() {
        let (db, _dir) = test_db();
        let (a, _) = guild_with_leader(&db, "alpha");
        let (b, _) = guild_with_leader(&db, "beta");

        db.request_alliance(a.id, b.id, None).unwrap();
        assert!(matches!(db.dissolve_alliance(a.id, b.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_ally_cap_policy() {
        let (db, _dir) = test_db();
        let (hub, _) = guild_with_leader(&db, "hub");
        let (x, _) = guild_with_leader(&db, "x");
        let (y, _) = guild_with_leader(&db, "y");

        let first = db.request_alliance(hub.id, x.id, Some(1)).unwrap();
        let second = db.request_alliance(hub.id, y.id, Some(1)).unwrap();
        db.accept_alliance(first.id, Some(1)).unwrap();

        // Cap reached between request and accept
        assert!(matches!(db.accept_alliance(second.id, Some(1)), Err(StoreError::Conflict(_))));
        assert_eq!(db.get_alliance(second.id).unwrap().unwrap().status, AllianceStatus::Pending);

        // Uncapped, the same accept succeeds
        db.accept_alliance(second.id, None).unwrap();
        assert_eq!(db.allies_of(hub.id).unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_requests_leave_one_pending() {
        let (db, _dir) = test_db();
        let db = Arc::new(db);
        let (a, _) = guild_with_leader(&db, "alpha");
        let (b, _) = guild_with_leader(&db, "beta");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
                std::thread::spawn(move || db.request_alliance(from, to, None))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, StoreError::Conflict(_))));

        let (sent, received) = db.list_alliance_requests(a.id).unwrap();
        assert_eq!(sent.len() + received.len(), 1);
    }

    #[test]
    fn test_list_requests_splits_sent_and_received() {
        let (db, _dir) = test_db();
        let (a, _) = guild_with_leader(&db, "alpha");
        let (b, _) = guild_with_leader(&db, "beta");
        let (c, _) = guild_with_leader(&db, "gamma");

        db.request_alliance(a.id, b.id, None).unwrap();
        db.request_alliance(c.id, a.id, None).unwrap();

        let (sent, received) = db.list_alliance_requests(a.id).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].counterpart.name, "beta");
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].counterpart.id, c.id);
        assert_eq!(received[0].alliance.requester_id, c.id);

        assert!(matches!(db.list_alliance_requests(Uuid::new_v4()), Err(StoreError::NotFound(_))));
    }
}
