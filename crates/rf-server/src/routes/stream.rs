//! Byte-range delivery of a video's bytes.

use std::path::PathBuf;

use axum::extract::{Path as PathParam, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::Extension;

use rf_core::{Error, VideoStatus};
use rf_db::models::Video;

use crate::authz::{load_authorized_video, Action, Principal};
use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::streaming_helpers::{parse_range_header, serve_range};
use crate::routes::videos::parse_video_id;

/// Which file to serve for `video`, and its content type.
///
/// The processed artifact is used only once the record is `completed`; until
/// then the original upload is served.
pub fn select_source(video: &Video) -> (PathBuf, String) {
    if video.status == VideoStatus::Completed {
        if let Some(processed) = video.processed_path.as_deref() {
            let path = PathBuf::from(processed);
            if path.is_file() {
                return (path, "video/mp4".to_string());
            }
            tracing::warn!(
                video_id = %video.id,
                path = %path.display(),
                "Processed artifact missing, serving original"
            );
        }
    }
    (PathBuf::from(&video.original_path), video.mime_type.clone())
}

/// GET /api/videos/{id}/stream
#[utoipa::path(
    get,
    path = "/api/videos/{id}/stream",
    params(
        ("id" = String, Path, description = "Video ID"),
        ("Range" = String, Header, description = "bytes=START- or bytes=START-END")
    ),
    responses(
        (status = 206, description = "Partial content"),
        (status = 404, description = "Not found or owned by another organization"),
        (status = 416, description = "Range header missing or past end of file"),
        (status = 500, description = "File could not be read")
    )
)]
pub async fn stream_video(
    State(ctx): State<AppContext>,
    Extension(principal): Extension<Principal>,
    PathParam(id): PathParam<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let video_id = parse_video_id(&id)?;
    let video = {
        let conn = rf_db::pool::get_conn(&ctx.db)?;
        load_authorized_video(&conn, &principal, Action::StreamVideo, video_id)?
    };

    let start = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header)
        .map(|(start, _)| start)
        .ok_or_else(|| Error::RangeNotSatisfiable("Range header required".into()))?;

    let (path, content_type) = select_source(&video);
    let chunk_size = ctx.config.delivery.effective_chunk_size();

    serve_range(&path, &content_type, start, chunk_size)
        .await
        .map_err(|e| {
            tracing::error!(video_id = %video.id, path = %path.display(), error = %e, "Stream read failed");
            AppError::from(e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::{Sensitivity, TenantId, UserId, VideoId};

    fn video(status: VideoStatus, original: &str, processed: Option<&str>) -> Video {
        Video {
            id: VideoId::new(),
            tenant_id: TenantId::new(),
            uploader_id: UserId::new(),
            original_name: "clip.webm".into(),
            filename: "x.webm".into(),
            mime_type: "video/webm".into(),
            size_bytes: 10,
            original_path: original.into(),
            processed_path: processed.map(String::from),
            status,
            processing_progress: 0,
            sensitivity: Sensitivity::Unknown,
            error_message: None,
            duration_secs: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn completed_with_artifact_serves_processed() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("x.mp4");
        std::fs::write(&processed, b"mp4").unwrap();

        let v = video(VideoStatus::Completed, "/orig.webm", processed.to_str());
        let (path, ct) = select_source(&v);
        assert_eq!(path, processed);
        assert_eq!(ct, "video/mp4");
    }

    #[test]
    fn processing_serves_original_even_if_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("x.mp4");
        std::fs::write(&processed, b"partial").unwrap();

        let v = video(VideoStatus::Processing, "/orig.webm", processed.to_str());
        let (path, ct) = select_source(&v);
        assert_eq!(path, PathBuf::from("/orig.webm"));
        assert_eq!(ct, "video/webm");
    }

    #[test]
    fn missing_artifact_falls_back_to_original() {
        let v = video(VideoStatus::Completed, "/orig.webm", Some("/gone/x.mp4"));
        let (path, _) = select_source(&v);
        assert_eq!(path, PathBuf::from("/orig.webm"));
    }
}
