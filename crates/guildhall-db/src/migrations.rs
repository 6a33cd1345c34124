use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (guilds, alliances, content, notifications)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE guilds (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL UNIQUE COLLATE NOCASE,
                description TEXT NOT NULL DEFAULT '',
                capacity    INTEGER NOT NULL,
                recruiting  INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE COLLATE NOCASE,
                guild_id    TEXT REFERENCES guilds(id),
                role        TEXT NOT NULL DEFAULT 'candidate',
                feed_closed INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_users_guild ON users(guild_id);

            -- Materialized symmetric ally set, maintained alongside alliances.
            CREATE TABLE guild_allies (
                guild_id    TEXT NOT NULL REFERENCES guilds(id),
                ally_id     TEXT NOT NULL REFERENCES guilds(id),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (guild_id, ally_id),
                CHECK (guild_id <> ally_id)
            );

            CREATE TABLE alliances (
                id           TEXT PRIMARY KEY,
                requester_id TEXT NOT NULL REFERENCES guilds(id),
                target_id    TEXT NOT NULL REFERENCES guilds(id),
                pair_lo      TEXT NOT NULL,
                pair_hi      TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'pending',
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                CHECK (requester_id <> target_id)
            );

            -- At most one open (pending or accepted) record per unordered pair.
            CREATE UNIQUE INDEX idx_alliances_open_pair
                ON alliances(pair_lo, pair_hi)
                WHERE status IN ('pending', 'accepted');

            CREATE INDEX idx_alliances_requester ON alliances(requester_id);
            CREATE INDEX idx_alliances_target ON alliances(target_id);

            CREATE TABLE posts (
                id          TEXT PRIMARY KEY,
                author_id   TEXT NOT NULL REFERENCES users(id),
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE comments (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                author_id   TEXT NOT NULL REFERENCES users(id),
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_comments_post ON comments(post_id, created_at);

            CREATE TABLE likes (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL,
                UNIQUE(post_id, user_id)
            );

            CREATE TABLE events (
                id                   TEXT PRIMARY KEY,
                creator_id           TEXT NOT NULL REFERENCES users(id),
                title                TEXT NOT NULL,
                description          TEXT NOT NULL DEFAULT '',
                starts_at            TEXT,
                capacity             INTEGER NOT NULL,
                accessible_to_allies INTEGER NOT NULL DEFAULT 0,
                created_at           TEXT NOT NULL
            );

            CREATE TABLE event_participants (
                id          TEXT PRIMARY KEY,
                event_id    TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                joined_at   TEXT NOT NULL,
                UNIQUE(event_id, user_id)
            );

            CREATE TABLE feed_entries (
                id          TEXT PRIMARY KEY,
                post_id     TEXT UNIQUE REFERENCES posts(id) ON DELETE CASCADE,
                event_id    TEXT UNIQUE REFERENCES events(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                CHECK ((post_id IS NULL) <> (event_id IS NULL))
            );

            CREATE INDEX idx_feed_entries_created ON feed_entries(created_at);

            CREATE TABLE membership_requests (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                guild_id    TEXT NOT NULL REFERENCES guilds(id),
                status      TEXT NOT NULL DEFAULT 'pending',
                created_at  TEXT NOT NULL
            );

            CREATE UNIQUE INDEX idx_membership_requests_pending
                ON membership_requests(user_id, guild_id)
                WHERE status = 'pending';

            -- cause_kind/cause_id is a non-owning back-reference; deleting the
            -- cause never cascades here.
            CREATE TABLE notifications (
                id           TEXT PRIMARY KEY,
                recipient_id TEXT NOT NULL REFERENCES users(id),
                kind         TEXT NOT NULL,
                message      TEXT NOT NULL,
                cause_kind   TEXT,
                cause_id     TEXT,
                is_read      INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL,
                CHECK ((cause_kind IS NULL) = (cause_id IS NULL))
            );

            CREATE INDEX idx_notifications_cause ON notifications(cause_kind, cause_id);
            CREATE INDEX idx_notifications_recipient ON notifications(recipient_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
