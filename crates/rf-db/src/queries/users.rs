//! User operations.

use chrono::Utc;
use rf_core::{Error, Result, Role, TenantId, UserId};
use rusqlite::Connection;

use crate::models::User;

const COLS: &str = "id, tenant_id, name, email, password_hash, role, created_at";

/// Create a new user inside `tenant_id` and return it.
///
/// Emails are stored lowercased; a second account with the same email is a
/// [`Error::Conflict`].
pub fn create_user(
    conn: &Connection,
    tenant_id: TenantId,
    name: &str,
    email: &str,
    password_hash: &str,
    role: Role,
) -> Result<User> {
    let id = UserId::new();
    let email = email.trim().to_lowercase();
    let created_at = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO users (id, tenant_id, name, email, password_hash, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            id.to_string(),
            tenant_id.to_string(),
            name,
            &email,
            password_hash,
            role.as_str(),
            &created_at
        ],
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            Error::Conflict(format!("User with email '{email}' already exists"))
        } else {
            Error::database(e.to_string())
        }
    })?;

    Ok(User {
        id,
        tenant_id,
        name: name.to_string(),
        email,
        password_hash: password_hash.to_string(),
        role,
        created_at,
    })
}

/// Get a user by primary key.
pub fn get_user(conn: &Connection, id: UserId) -> Result<Option<User>> {
    let q = format!("SELECT {COLS} FROM users WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], User::from_row);
    match result {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get a user by email (case-insensitive).
pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let q = format!("SELECT {COLS} FROM users WHERE email = ?1");
    let result = conn.query_row(&q, [email.trim().to_lowercase()], User::from_row);
    match result {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}
