//! Row models returned by the query modules, each with a `from_row`
//! constructor over a `rusqlite::Row`.

use std::str::FromStr;

use rf_core::{Role, Sensitivity, SessionId, TenantId, UserId, VideoId, VideoStatus};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(T::from(uuid))
}

/// Parse a lowercase enum (status, role, sensitivity) from a text column.
fn parse_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = rf_core::Error>,
{
    let s: String = row.get(idx)?;
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ---------------------------------------------------------------------------
// Organization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Organization {
    pub id: TenantId,
    pub name: String,
    pub domain: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

impl Organization {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            name: row.get(1)?,
            domain: row.get(2)?,
            is_active: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: String,
}

impl User {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            tenant_id: parse_id(row, 1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            password_hash: row.get(4)?,
            role: parse_enum(row, 5)?,
            created_at: row.get(6)?,
        })
    }
}

// ---------------------------------------------------------------------------
// AuthToken
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthToken {
    pub id: SessionId,
    pub user_id: UserId,
    pub token: String,
    pub expires_at: String,
}

impl AuthToken {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            user_id: parse_id(row, 1)?,
            token: row.get(2)?,
            expires_at: row.get(3)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// The durable record of one upload and its transcode lifecycle.
#[derive(Debug, Clone)]
pub struct Video {
    pub id: VideoId,
    pub tenant_id: TenantId,
    pub uploader_id: UserId,
    /// Filename as supplied by the client.
    pub original_name: String,
    /// Unique on-disk filename the upload was stored under.
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub original_path: String,
    /// Set only once the transcode has completed.
    pub processed_path: Option<String>,
    pub status: VideoStatus,
    pub processing_progress: u8,
    pub sensitivity: Sensitivity,
    /// Set only when `status` is `failed`.
    pub error_message: Option<String>,
    pub duration_secs: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Video {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            tenant_id: parse_id(row, 1)?,
            uploader_id: parse_id(row, 2)?,
            original_name: row.get(3)?,
            filename: row.get(4)?,
            mime_type: row.get(5)?,
            size_bytes: row.get(6)?,
            original_path: row.get(7)?,
            processed_path: row.get(8)?,
            status: parse_enum(row, 9)?,
            processing_progress: row.get(10)?,
            sensitivity: parse_enum(row, 11)?,
            error_message: row.get(12)?,
            duration_secs: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}
