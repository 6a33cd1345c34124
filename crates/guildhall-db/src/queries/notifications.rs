//! Notification rows keyed to their cause.
//!
//! Insert and cancel both take the write lock in one transaction, so a create
//! racing a cancel for the same cause either lands before it (and is deleted
//! by it) or sees the cause already gone (and inserts nothing).

use rusqlite::{Connection, Row, params_from_iter};
use uuid::Uuid;

use crate::models::NotificationRow;
use crate::queries::{id_params, now, opt_uuid_col, placeholders, text_col, ts_col, uuid_col};
use crate::{Database, StoreError};
use guildhall_types::models::{CauseKind, CauseRef, NotificationType};

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, kind, message, cause_kind, cause_id, is_read, created_at";

impl Database {
    /// Insert one row per recipient. When a cause is given it must still
    /// exist, otherwise nothing is written and NotFound is returned.
    pub fn insert_notifications(
        &self,
        recipients: &[Uuid],
        kind: NotificationType,
        message: &str,
        cause: Option<CauseRef>,
    ) -> Result<Vec<NotificationRow>, StoreError> {
        self.with_tx(|tx| {
            if let Some(cause) = &cause {
                if !cause_exists(tx, cause)? {
                    return Err(StoreError::NotFound(format!(
                        "{} {} no longer exists",
                        cause.kind(),
                        cause.id()
                    )));
                }
            }

            let created_at = now();
            let mut ids = Vec::with_capacity(recipients.len());
            for recipient in recipients {
                let id = Uuid::new_v4();
                tx.execute(
                    "INSERT INTO notifications (id, recipient_id, kind, message, cause_kind, cause_id, is_read, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                    (
                        id.to_string(),
                        recipient.to_string(),
                        kind.as_str(),
                        message,
                        cause.map(|c| c.kind().as_str()),
                        cause.map(|c| c.id().to_string()),
                        &created_at,
                    ),
                )?;
                ids.push(id);
            }

            select_by_ids(tx, &ids)
        })
    }

    /// Delete every notification referencing `cause` and return the removed
    /// rows. Deleting nothing is not an error.
    pub fn delete_notifications_by_cause(&self, cause: CauseRef) -> Result<Vec<NotificationRow>, StoreError> {
        self.with_tx(|tx| {
            let rows = query_by_cause(tx, cause)?;
            tx.execute(
                "DELETE FROM notifications WHERE cause_kind = ?1 AND cause_id = ?2",
                (cause.kind().as_str(), cause.id().to_string()),
            )?;
            Ok(rows)
        })
    }

    pub fn get_notifications_by_cause(&self, cause: CauseRef) -> Result<Vec<NotificationRow>, StoreError> {
        self.with_conn(|conn| query_by_cause(conn, cause))
    }

    /// Set the read flag on every matching row; returns how many matched.
    pub fn mark_notifications_read(&self, ids: &[Uuid]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn_mut(|conn| {
            let sql = format!(
                "UPDATE notifications SET is_read = 1 WHERE id IN ({})",
                placeholders(ids.len())
            );
            Ok(conn.execute(&sql, params_from_iter(id_params(ids)))?)
        })
    }

    /// Newest first.
    pub fn list_notifications(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notifications
                 WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)
                 ORDER BY created_at DESC
                 LIMIT ?3",
                NOTIFICATION_COLUMNS
            ))?;
            let rows = stmt
                .query_map((recipient_id.to_string(), unread_only, limit), map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Account-link requests live with the external auth service, so there is
/// no local row to check.
fn cause_exists(conn: &Connection, cause: &CauseRef) -> Result<bool, StoreError> {
    let table = match cause.kind() {
        CauseKind::Like => "likes",
        CauseKind::Comment => "comments",
        CauseKind::Event => "events",
        CauseKind::EventJoin => "event_participants",
        CauseKind::Alliance => "alliances",
        CauseKind::MembershipRequest => "membership_requests",
        CauseKind::AccountLinkRequest => return Ok(true),
    };

    let exists: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", table),
        [cause.id().to_string()],
        |r| r.get(0),
    )?;
    Ok(exists)
}

fn map_notification(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    let cause_kind: Option<CauseKind> = match row.get::<_, Option<String>>(4)? {
        Some(_) => Some(text_col(row, 4)?),
        None => None,
    };
    let cause = match (cause_kind, opt_uuid_col(row, 5)?) {
        (Some(kind), Some(id)) => Some(CauseRef::new(kind, id)),
        _ => None,
    };

    Ok(NotificationRow {
        id: uuid_col(row, 0)?,
        recipient_id: uuid_col(row, 1)?,
        kind: text_col(row, 2)?,
        message: row.get(3)?,
        cause,
        read: row.get(6)?,
        created_at: ts_col(row, 7)?,
    })
}

fn query_by_cause(conn: &Connection, cause: CauseRef) -> Result<Vec<NotificationRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE cause_kind = ?1 AND cause_id = ?2",
        NOTIFICATION_COLUMNS
    ))?;
    let rows = stmt
        .query_map((cause.kind().as_str(), cause.id().to_string()), map_notification)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn select_by_ids(conn: &Connection, ids: &[Uuid]) -> Result<Vec<NotificationRow>, StoreError> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {} FROM notifications WHERE id IN ({})",
        NOTIFICATION_COLUMNS,
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(id_params(ids)), map_notification)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
