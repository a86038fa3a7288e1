//! Video record operations.
//!
//! Lifecycle transitions are single conditional `UPDATE` statements, so a
//! record can only move `uploaded -> processing -> completed | failed` and
//! its progress only ever increases while it is `processing`.

use chrono::Utc;
use rf_core::{Error, Result, Sensitivity, TenantId, UserId, VideoId, VideoStatus};
use rusqlite::Connection;

use crate::models::Video;

const COLS: &str = "id, tenant_id, uploader_id, original_name, filename, mime_type,
    size_bytes, original_path, processed_path, status, processing_progress,
    sensitivity, error_message, duration_secs, created_at, updated_at";

/// Fields supplied when an upload is accepted.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub id: VideoId,
    pub tenant_id: TenantId,
    pub uploader_id: UserId,
    pub original_name: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub original_path: String,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct VideoUpdate {
    pub status: Option<VideoStatus>,
    pub processing_progress: Option<u8>,
    pub processed_path: Option<String>,
    pub sensitivity: Option<Sensitivity>,
    pub error_message: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Listing filter. Always scoped to one tenant.
#[derive(Debug, Clone)]
pub struct VideoFilter {
    pub tenant_id: TenantId,
    pub status: Option<VideoStatus>,
    pub sensitivity: Option<Sensitivity>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl VideoFilter {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            status: None,
            sensitivity: None,
            limit: None,
            offset: None,
        }
    }
}

fn query_one(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Option<Video>> {
    match conn.query_row(sql, params, Video::from_row) {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Insert a freshly uploaded video (`uploaded`, progress 0, sensitivity
/// `unknown`).
pub fn create_video(conn: &Connection, new: &NewVideo) -> Result<Video> {
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO videos (id, tenant_id, uploader_id, original_name, filename, mime_type,
             size_bytes, original_path, status, processing_progress, sensitivity,
             created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'uploaded', 0, 'unknown', ?9, ?9)",
        rusqlite::params![
            new.id.to_string(),
            new.tenant_id.to_string(),
            new.uploader_id.to_string(),
            new.original_name,
            new.filename,
            new.mime_type,
            new.size_bytes,
            new.original_path,
            &now,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(Video {
        id: new.id,
        tenant_id: new.tenant_id,
        uploader_id: new.uploader_id,
        original_name: new.original_name.clone(),
        filename: new.filename.clone(),
        mime_type: new.mime_type.clone(),
        size_bytes: new.size_bytes,
        original_path: new.original_path.clone(),
        processed_path: None,
        status: VideoStatus::Uploaded,
        processing_progress: 0,
        sensitivity: Sensitivity::Unknown,
        error_message: None,
        duration_secs: None,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Get a video by ID.
pub fn get_video(conn: &Connection, id: VideoId) -> Result<Option<Video>> {
    let q = format!("SELECT {COLS} FROM videos WHERE id = ?1");
    query_one(conn, &q, &[&id.to_string()])
}

/// Apply a partial update. Returns `false` if the record does not exist.
pub fn update_video_fields(conn: &Connection, id: VideoId, update: &VideoUpdate) -> Result<bool> {
    let mut sets: Vec<&str> = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(status) = update.status {
        sets.push("status = ?");
        params_vec.push(Box::new(status.as_str()));
    }
    if let Some(progress) = update.processing_progress {
        sets.push("processing_progress = ?");
        params_vec.push(Box::new(progress.min(100)));
    }
    if let Some(ref path) = update.processed_path {
        sets.push("processed_path = ?");
        params_vec.push(Box::new(path.clone()));
    }
    if let Some(sensitivity) = update.sensitivity {
        sets.push("sensitivity = ?");
        params_vec.push(Box::new(sensitivity.as_str()));
    }
    if let Some(ref msg) = update.error_message {
        sets.push("error_message = ?");
        params_vec.push(Box::new(msg.clone()));
    }
    if let Some(duration) = update.duration_secs {
        sets.push("duration_secs = ?");
        params_vec.push(Box::new(duration));
    }

    sets.push("updated_at = ?");
    params_vec.push(Box::new(Utc::now().to_rfc3339()));
    params_vec.push(Box::new(id.to_string()));

    let q = format!("UPDATE videos SET {} WHERE id = ?", sets.join(", "));
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|b| b.as_ref()).collect();
    let n = conn
        .execute(&q, params_refs.as_slice())
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// List a tenant's videos, newest first.
pub fn list_videos(conn: &Connection, filter: &VideoFilter) -> Result<Vec<Video>> {
    let mut q = format!("SELECT {COLS} FROM videos WHERE tenant_id = ?");
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(filter.tenant_id.to_string())];

    if let Some(status) = filter.status {
        q.push_str(" AND status = ?");
        params_vec.push(Box::new(status.as_str()));
    }
    if let Some(sensitivity) = filter.sensitivity {
        q.push_str(" AND sensitivity = ?");
        params_vec.push(Box::new(sensitivity.as_str()));
    }

    // rowid breaks ties between records created within the same instant.
    q.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?");
    params_vec.push(Box::new(filter.limit.unwrap_or(-1)));
    params_vec.push(Box::new(filter.offset.unwrap_or(0).max(0)));

    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_refs.as_slice(), Video::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// `uploaded -> processing`. Returns the updated record, or `None` if the
/// video is missing or not in `uploaded`.
pub fn start_processing(conn: &Connection, id: VideoId) -> Result<Option<Video>> {
    let now = Utc::now().to_rfc3339();
    let q = format!(
        "UPDATE videos SET status = 'processing', processing_progress = 0, updated_at = ?1
         WHERE id = ?2 AND status = 'uploaded'
         RETURNING {COLS}"
    );
    query_one(conn, &q, &[&now, &id.to_string()])
}

/// Store a progress milestone. Applies only while `processing` and only if
/// `percent` is strictly greater than the stored value.
pub fn record_progress(conn: &Connection, id: VideoId, percent: u8) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE videos SET processing_progress = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'processing' AND processing_progress < ?1",
            rusqlite::params![percent.min(100), &now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// `processing -> completed` with progress 100, the artifact path, the
/// sensitivity label and the probed duration.
pub fn complete_video(
    conn: &Connection,
    id: VideoId,
    processed_path: &str,
    sensitivity: Sensitivity,
    duration_secs: Option<f64>,
) -> Result<Option<Video>> {
    let now = Utc::now().to_rfc3339();
    let q = format!(
        "UPDATE videos SET status = 'completed', processing_progress = 100,
             processed_path = ?1, sensitivity = ?2, duration_secs = ?3,
             error_message = NULL, updated_at = ?4
         WHERE id = ?5 AND status = 'processing'
         RETURNING {COLS}"
    );
    query_one(
        conn,
        &q,
        &[
            &processed_path,
            &sensitivity.as_str(),
            &duration_secs,
            &now,
            &id.to_string(),
        ],
    )
}

/// `processing -> failed` with an error message. Progress is left as is.
pub fn fail_video(conn: &Connection, id: VideoId, error_message: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE videos SET status = 'failed', error_message = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'processing'",
            rusqlite::params![error_message, &now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Fail every record left in `processing` by a previous process.
pub fn fail_orphaned_processing(conn: &Connection, error_message: &str) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE videos SET status = 'failed', error_message = ?1, updated_at = ?2
             WHERE status = 'processing'",
            rusqlite::params![error_message, &now],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n)
}

/// Records still waiting for a worker, oldest first.
pub fn list_pending_uploads(conn: &Connection) -> Result<Vec<Video>> {
    let q = format!("SELECT {COLS} FROM videos WHERE status = 'uploaded' ORDER BY created_at ASC");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], Video::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::pool::{init_memory_pool, DbPool};
    use crate::queries::{organizations, users};
    use rf_core::Role;

    fn setup() -> (DbPool, User) {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let org = organizations::create_organization(&conn, "Acme", None).unwrap();
        let user = users::create_user(&conn, org.id, "Ed", "ed@acme.test", "h", Role::Editor).unwrap();
        drop(conn);
        (pool, user)
    }

    fn new_video(user: &User, name: &str, size: i64) -> NewVideo {
        let id = VideoId::new();
        NewVideo {
            id,
            tenant_id: user.tenant_id,
            uploader_id: user.id,
            original_name: name.to_string(),
            filename: format!("{id}.mp4"),
            mime_type: "video/mp4".to_string(),
            size_bytes: size,
            original_path: format!("/uploads/{id}.mp4"),
        }
    }

    #[test]
    fn create_and_get() {
        let (pool, user) = setup();
        let conn = pool.get().unwrap();

        let v = create_video(&conn, &new_video(&user, "clip.mp4", 1024)).unwrap();
        assert_eq!(v.status, VideoStatus::Uploaded);
        assert_eq!(v.processing_progress, 0);
        assert_eq!(v.sensitivity, Sensitivity::Unknown);

        let found = get_video(&conn, v.id).unwrap().unwrap();
        assert_eq!(found.original_name, "clip.mp4");
        assert_eq!(found.size_bytes, 1024);
        assert!(found.processed_path.is_none());

        assert!(get_video(&conn, VideoId::new()).unwrap().is_none());
    }

    #[test]
    fn update_fields() {
        let (pool, user) = setup();
        let conn = pool.get().unwrap();
        let v = create_video(&conn, &new_video(&user, "a.mp4", 1)).unwrap();

        let applied = update_video_fields(
            &conn,
            v.id,
            &VideoUpdate {
                sensitivity: Some(Sensitivity::Safe),
                duration_secs: Some(12.5),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(applied);

        let found = get_video(&conn, v.id).unwrap().unwrap();
        assert_eq!(found.sensitivity, Sensitivity::Safe);
        assert_eq!(found.duration_secs, Some(12.5));
        assert_eq!(found.status, VideoStatus::Uploaded);

        assert!(!update_video_fields(&conn, VideoId::new(), &VideoUpdate::default()).unwrap());
    }

    #[test]
    fn list_is_tenant_scoped_and_newest_first() {
        let (pool, user) = setup();
        let conn = pool.get().unwrap();

        let first = create_video(&conn, &new_video(&user, "1.mp4", 1)).unwrap();
        let second = create_video(&conn, &new_video(&user, "2.mp4", 1)).unwrap();

        let other_org = organizations::create_organization(&conn, "Other", None).unwrap();
        let other =
            users::create_user(&conn, other_org.id, "O", "o@other.test", "h", Role::Editor).unwrap();
        create_video(&conn, &new_video(&other, "x.mp4", 1)).unwrap();

        let listed = list_videos(&conn, &VideoFilter::for_tenant(user.tenant_id)).unwrap();
        let ids: Vec<_> = listed.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let page = list_videos(
            &conn,
            &VideoFilter {
                limit: Some(1),
                offset: Some(1),
                ..VideoFilter::for_tenant(user.tenant_id)
            },
        )
        .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, first.id);
    }

    #[test]
    fn list_filters_by_status_and_sensitivity() {
        let (pool, user) = setup();
        let conn = pool.get().unwrap();

        let a = create_video(&conn, &new_video(&user, "a.mp4", 1)).unwrap();
        create_video(&conn, &new_video(&user, "b.mp4", 1)).unwrap();
        start_processing(&conn, a.id).unwrap().unwrap();
        complete_video(&conn, a.id, "/p/a.mp4", Sensitivity::Flagged, None)
            .unwrap()
            .unwrap();

        let completed = list_videos(
            &conn,
            &VideoFilter {
                status: Some(VideoStatus::Completed),
                ..VideoFilter::for_tenant(user.tenant_id)
            },
        )
        .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, a.id);

        let flagged = list_videos(
            &conn,
            &VideoFilter {
                sensitivity: Some(Sensitivity::Flagged),
                ..VideoFilter::for_tenant(user.tenant_id)
            },
        )
        .unwrap();
        assert_eq!(flagged.len(), 1);

        let safe = list_videos(
            &conn,
            &VideoFilter {
                sensitivity: Some(Sensitivity::Safe),
                ..VideoFilter::for_tenant(user.tenant_id)
            },
        )
        .unwrap();
        assert!(safe.is_empty());
    }

    #[test]
    fn lifecycle_success() {
        let (pool, user) = setup();
        let conn = pool.get().unwrap();
        let v = create_video(&conn, &new_video(&user, "a.mp4", 1)).unwrap();

        // progress is ignored before processing starts
        assert!(!record_progress(&conn, v.id, 10).unwrap());

        let started = start_processing(&conn, v.id).unwrap().unwrap();
        assert_eq!(started.status, VideoStatus::Processing);

        // a second start is refused
        assert!(start_processing(&conn, v.id).unwrap().is_none());

        assert!(record_progress(&conn, v.id, 10).unwrap());
        assert!(record_progress(&conn, v.id, 20).unwrap());
        // monotonic: equal or smaller values do not apply
        assert!(!record_progress(&conn, v.id, 20).unwrap());
        assert!(!record_progress(&conn, v.id, 15).unwrap());
        assert_eq!(get_video(&conn, v.id).unwrap().unwrap().processing_progress, 20);

        let done = complete_video(&conn, v.id, "/p/a.mp4", Sensitivity::Safe, Some(3.0))
            .unwrap()
            .unwrap();
        assert_eq!(done.status, VideoStatus::Completed);
        assert_eq!(done.processing_progress, 100);
        assert_eq!(done.processed_path.as_deref(), Some("/p/a.mp4"));
        assert_eq!(done.duration_secs, Some(3.0));

        // terminal: nothing applies any more
        assert!(!record_progress(&conn, v.id, 50).unwrap());
        assert!(!fail_video(&conn, v.id, "late").unwrap());
        assert!(complete_video(&conn, v.id, "/p/b.mp4", Sensitivity::Flagged, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn lifecycle_failure() {
        let (pool, user) = setup();
        let conn = pool.get().unwrap();
        let v = create_video(&conn, &new_video(&user, "a.mp4", 1)).unwrap();

        // cannot fail a record that never started
        assert!(!fail_video(&conn, v.id, "boom").unwrap());

        start_processing(&conn, v.id).unwrap().unwrap();
        record_progress(&conn, v.id, 35).unwrap();
        assert!(fail_video(&conn, v.id, "boom").unwrap());

        let found = get_video(&conn, v.id).unwrap().unwrap();
        assert_eq!(found.status, VideoStatus::Failed);
        assert_eq!(found.error_message.as_deref(), Some("boom"));
        assert_eq!(found.processing_progress, 35);
        assert!(found.processed_path.is_none());

        assert!(complete_video(&conn, v.id, "/p/a.mp4", Sensitivity::Safe, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn recovery_helpers() {
        let (pool, user) = setup();
        let conn = pool.get().unwrap();

        let orphan = create_video(&conn, &new_video(&user, "o.mp4", 1)).unwrap();
        start_processing(&conn, orphan.id).unwrap().unwrap();
        let pending = create_video(&conn, &new_video(&user, "p.mp4", 1)).unwrap();

        assert_eq!(fail_orphaned_processing(&conn, "interrupted by server restart").unwrap(), 1);
        let o = get_video(&conn, orphan.id).unwrap().unwrap();
        assert_eq!(o.status, VideoStatus::Failed);
        assert_eq!(o.error_message.as_deref(), Some("interrupted by server restart"));

        let waiting = list_pending_uploads(&conn).unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id, pending.id);
    }
}
