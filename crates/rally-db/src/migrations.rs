use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE gatherings (
                id          TEXT PRIMARY KEY,
                code        TEXT NOT NULL UNIQUE,
                name        TEXT NOT NULL,
                target_time TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'waiting',
                creator_id  TEXT NOT NULL,
                version     INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_gatherings_status ON gatherings(status);

            CREATE TABLE participants (
                id                  TEXT PRIMARY KEY,
                gathering_id        TEXT NOT NULL REFERENCES gatherings(id),
                user_id             TEXT NOT NULL,
                nickname            TEXT NOT NULL,
                lng                 REAL,
                lat                 REAL,
                location_name       TEXT,
                tastes              TEXT NOT NULL DEFAULT '[]',
                status              TEXT NOT NULL DEFAULT 'joined',
                is_creator          INTEGER NOT NULL DEFAULT 0,
                suggested_depart_at TEXT,
                estimated_duration  INTEGER,
                estimated_distance  INTEGER,
                departed_at         TEXT,
                arrived_at          TEXT,
                reminded_thirty     INTEGER NOT NULL DEFAULT 0,
                reminded_ten        INTEGER NOT NULL DEFAULT 0,
                reminded_due        INTEGER NOT NULL DEFAULT 0,
                joined_at           TEXT NOT NULL,
                UNIQUE(gathering_id, user_id)
            );

            CREATE UNIQUE INDEX idx_participants_one_creator
                ON participants(gathering_id) WHERE is_creator = 1;
            CREATE INDEX idx_participants_user ON participants(user_id);

            CREATE TABLE nominations (
                id           TEXT PRIMARY KEY,
                gathering_id TEXT NOT NULL REFERENCES gatherings(id),
                nominated_by TEXT NOT NULL REFERENCES participants(id),
                place_id     TEXT NOT NULL,
                name         TEXT NOT NULL,
                address      TEXT,
                lng          REAL NOT NULL,
                lat          REAL NOT NULL,
                rating       REAL,
                cost         REAL,
                source       TEXT NOT NULL DEFAULT 'manual',
                reason       TEXT,
                score        INTEGER NOT NULL DEFAULT 0,
                travel_infos TEXT NOT NULL DEFAULT '[]',
                is_confirmed INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL,
                UNIQUE(gathering_id, nominated_by, place_id)
            );

            CREATE UNIQUE INDEX idx_nominations_one_confirmed
                ON nominations(gathering_id) WHERE is_confirmed = 1;

            CREATE TABLE votes (
                id                   TEXT PRIMARY KEY,
                gathering_id         TEXT NOT NULL REFERENCES gatherings(id),
                status               TEXT NOT NULL DEFAULT 'active',
                quorum               INTEGER NOT NULL,
                timeout_at           TEXT NOT NULL,
                winner_nomination_id TEXT REFERENCES nominations(id),
                created_at           TEXT NOT NULL,
                resolved_at          TEXT
            );

            CREATE UNIQUE INDEX idx_votes_one_active
                ON votes(gathering_id) WHERE status = 'active';

            CREATE TABLE vote_records (
                id            TEXT PRIMARY KEY,
                vote_id       TEXT NOT NULL REFERENCES votes(id),
                user_id       TEXT NOT NULL,
                nomination_id TEXT NOT NULL REFERENCES nominations(id),
                created_at    TEXT NOT NULL,
                UNIQUE(vote_id, user_id)
            );

            CREATE TABLE messages (
                id           TEXT PRIMARY KEY,
                gathering_id TEXT NOT NULL REFERENCES gatherings(id),
                sender_id    TEXT,
                kind         TEXT NOT NULL,
                text         TEXT NOT NULL,
                metadata     TEXT NOT NULL,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX idx_messages_gathering ON messages(gathering_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
