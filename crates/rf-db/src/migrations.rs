//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use rf_core::{Error, Result};

/// V1: initial schema -- tenants, users, sessions and video records.
const V1_INITIAL: &str = r#"
-- Tenants
CREATE TABLE organizations (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    domain     TEXT UNIQUE,
    is_active  INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

-- Users and auth
CREATE TABLE users (
    id            TEXT PRIMARY KEY,
    tenant_id     TEXT NOT NULL REFERENCES organizations(id),
    name          TEXT NOT NULL,
    email         TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'viewer',
    created_at    TEXT NOT NULL
);

CREATE TABLE auth_tokens (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token      TEXT UNIQUE NOT NULL,
    expires_at TEXT NOT NULL
);

-- Video records
CREATE TABLE videos (
    id                  TEXT PRIMARY KEY,
    tenant_id           TEXT NOT NULL REFERENCES organizations(id),
    uploader_id         TEXT NOT NULL REFERENCES users(id),
    original_name       TEXT NOT NULL,
    filename            TEXT NOT NULL,
    mime_type           TEXT NOT NULL,
    size_bytes          INTEGER NOT NULL,
    original_path       TEXT NOT NULL,
    processed_path      TEXT,
    status              TEXT NOT NULL DEFAULT 'uploaded',
    processing_progress INTEGER NOT NULL DEFAULT 0
        CHECK (processing_progress BETWEEN 0 AND 100),
    sensitivity         TEXT NOT NULL DEFAULT 'unknown',
    error_message       TEXT,
    duration_secs       REAL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
"#;

/// V2: lookup indexes for tenant listings and token expiry sweeps.
const V2_INDEXES: &str = r#"
CREATE INDEX idx_users_tenant ON users(tenant_id);
CREATE INDEX idx_videos_tenant_created ON videos(tenant_id, created_at DESC);
CREATE INDEX idx_videos_status ON videos(status);
CREATE INDEX idx_videos_sensitivity ON videos(sensitivity);
CREATE INDEX idx_auth_tokens_expires ON auth_tokens(expires_at);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL), (2, V2_INDEXES)];

/// Apply every migration not yet recorded in `schema_migrations`.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit()
            .map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}
