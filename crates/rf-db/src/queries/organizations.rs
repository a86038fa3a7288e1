//! Organization (tenant) operations.

use chrono::Utc;
use rf_core::{Error, Result, TenantId};
use rusqlite::Connection;

use crate::models::Organization;

const COLS: &str = "id, name, domain, is_active, created_at";

/// Create a new organization.
pub fn create_organization(
    conn: &Connection,
    name: &str,
    domain: Option<&str>,
) -> Result<Organization> {
    let id = TenantId::new();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO organizations (id, name, domain, is_active, created_at)
         VALUES (?1, ?2, ?3, 1, ?4)",
        rusqlite::params![id.to_string(), name, domain, &now],
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            Error::Conflict(format!("Domain '{}' already in use", domain.unwrap_or_default()))
        } else {
            Error::database(e.to_string())
        }
    })?;

    Ok(Organization {
        id,
        name: name.to_string(),
        domain: domain.map(String::from),
        is_active: true,
        created_at: now,
    })
}

/// Get an organization by ID.
pub fn get_organization(conn: &Connection, id: TenantId) -> Result<Option<Organization>> {
    let q = format!("SELECT {COLS} FROM organizations WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], Organization::from_row);
    match result {
        Ok(o) => Ok(Some(o)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}
