//! Video ingestion, listing, and lookup.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Path as PathParam, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use rf_core::events::VideoEventPayload;
use rf_core::{Error, Sensitivity, TenantId, VideoId, VideoStatus};
use rf_db::models::Video;
use rf_db::queries::videos::{self, NewVideo, VideoFilter};

use crate::authz::{authorize, load_authorized_video, Action, Principal};
use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::streaming_helpers::guess_content_type;
use crate::transcode_worker::dispatch_transcode;

/// Multipart form field carrying the file.
pub const UPLOAD_FIELD: &str = "video";

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VideoResponse {
    pub id: String,
    pub organization_id: String,
    pub uploader_id: String,
    pub original_name: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub status: VideoStatus,
    pub processing_progress: u8,
    pub sensitivity: Sensitivity,
    pub error_message: Option<String>,
    pub duration_secs: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Video> for VideoResponse {
    fn from(v: Video) -> Self {
        Self {
            id: v.id.to_string(),
            organization_id: v.tenant_id.to_string(),
            uploader_id: v.uploader_id.to_string(),
            original_name: v.original_name,
            filename: v.filename,
            mime_type: v.mime_type,
            size_bytes: v.size_bytes,
            status: v.status,
            processing_progress: v.processing_progress,
            sensitivity: v.sensitivity,
            error_message: v.error_message,
            duration_secs: v.duration_secs,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VideoListResponse {
    pub count: usize,
    pub videos: Vec<VideoResponse>,
}

/// Documentation-only shape of the upload form.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    video: Vec<u8>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListVideosQuery {
    /// uploaded, processing, completed or failed
    pub status: Option<String>,
    /// safe, flagged or unknown
    pub sensitivity: Option<String>,
    /// Must be the caller's own organization when given.
    pub organization: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Body limit for the upload route, sized from the configured ceiling.
pub fn upload_body_limit(max_upload_bytes: u64) -> DefaultBodyLimit {
    let limit = max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX))
}

// ---------------------------------------------------------------------------
// Upload helpers
// ---------------------------------------------------------------------------

/// Reduce a client-supplied filename to a safe display name.
fn sanitize_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Lowercase alphanumeric extension of `name`, or one implied by the MIME type.
fn storage_extension(name: &str, mime: &str) -> String {
    let from_name = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()));

    from_name.unwrap_or_else(|| {
        match mime {
            "video/webm" => "webm",
            "video/quicktime" | "video/mov" => "mov",
            "video/x-matroska" | "video/mkv" => "mkv",
            "video/x-msvideo" | "video/avi" => "avi",
            _ => "mp4",
        }
        .to_string()
    })
}

fn map_multipart_error(e: axum::extract::multipart::MultipartError, max: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(format!("file exceeds maximum size of {max} bytes"))
    } else {
        Error::Validation(format!("upload read error: {}", e.body_text()))
    }
}

/// Stream one multipart field to `dest` through a temporary sibling, enforcing
/// `max_size`. Nothing is left on disk unless the whole field was accepted.
async fn stream_field_to_file(
    mut field: Field<'_>,
    dest: &Path,
    max_size: u64,
) -> Result<u64, Error> {
    let mut temp_name = dest.as_os_str().to_owned();
    temp_name.push(".upload");
    let temp_path = PathBuf::from(temp_name);

    let result: Result<u64, Error> = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut total: u64 = 0;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| map_multipart_error(e, max_size))?
        {
            total += chunk.len() as u64;
            if total > max_size {
                return Err(Error::PayloadTooLarge(format!(
                    "file exceeds maximum size of {max_size} bytes"
                )));
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        drop(file);

        if total == 0 {
            return Err(Error::Validation("uploaded file is empty".into()));
        }

        tokio::fs::rename(&temp_path, dest).await?;
        Ok(total)
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    result
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/videos
#[utoipa::path(
    post,
    path = "/api/videos",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Upload accepted; transcode started", body = VideoResponse),
        (status = 400, description = "Missing file or disallowed type"),
        (status = 403, description = "Editor or admin role required"),
        (status = 413, description = "File too large")
    )
)]
pub async fn upload_video(
    State(ctx): State<AppContext>,
    Extension(principal): Extension<Principal>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    authorize(&principal, Action::UploadVideo, principal.tenant_id)?;

    let storage = &ctx.config.storage;
    let max_size = storage.max_upload_bytes;
    tokio::fs::create_dir_all(&storage.upload_dir)
        .await
        .map_err(Error::from)?;

    let video_id = VideoId::new();
    let mut accepted: Option<(String, String, String, PathBuf, u64)> = None;

    // Later parts can still fail after the file is on disk.
    let scanned: Result<(), Error> = async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| map_multipart_error(e, max_size))?
        {
            if field.name() != Some(UPLOAD_FIELD) || accepted.is_some() {
                continue;
            }

            let original_name = sanitize_name(field.file_name().unwrap_or("upload"));
            let mime = field
                .content_type()
                .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty() && m != "application/octet-stream")
                .unwrap_or_else(|| guess_content_type(&original_name).to_string());

            if !storage.is_allowed_mime(&mime) {
                return Err(Error::Validation(format!(
                    "file type '{mime}' is not allowed; upload a video file"
                )));
            }

            let filename = format!("{video_id}.{}", storage_extension(&original_name, &mime));
            let dest = storage.upload_dir.join(&filename);
            let size = stream_field_to_file(field, &dest, max_size).await?;

            accepted = Some((original_name, filename, mime, dest, size));
        }
        Ok(())
    }
    .await;

    if let Err(e) = scanned {
        if let Some((_, _, _, dest, _)) = &accepted {
            let _ = tokio::fs::remove_file(dest).await;
        }
        return Err(e.into());
    }

    let Some((original_name, filename, mime_type, dest, size)) = accepted else {
        return Err(Error::Validation(format!("missing '{UPLOAD_FIELD}' file field")).into());
    };

    let new = NewVideo {
        id: video_id,
        tenant_id: principal.tenant_id,
        uploader_id: principal.user_id,
        original_name,
        filename,
        mime_type,
        size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
        original_path: dest.to_string_lossy().into_owned(),
    };

    let created = rf_db::pool::get_conn(&ctx.db).and_then(|conn| videos::create_video(&conn, &new));
    let video = match created {
        Ok(v) => v,
        Err(e) => {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(e.into());
        }
    };

    tracing::info!(
        video_id = %video.id,
        tenant_id = %video.tenant_id,
        size_bytes = video.size_bytes,
        mime_type = %video.mime_type,
        "Upload accepted"
    );

    ctx.hub.publish(video.id, VideoEventPayload::Uploaded);
    dispatch_transcode(&ctx, video.id);

    Ok((StatusCode::CREATED, Json(VideoResponse::from(video))))
}

/// GET /api/videos
#[utoipa::path(
    get,
    path = "/api/videos",
    params(ListVideosQuery),
    responses(
        (status = 200, description = "Videos in the caller's organization, newest first", body = VideoListResponse),
        (status = 400, description = "Unknown status or sensitivity filter"),
        (status = 403, description = "Foreign organization")
    )
)]
pub async fn list_videos(
    State(ctx): State<AppContext>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<ListVideosQuery>,
) -> Result<Json<VideoListResponse>, AppError> {
    let tenant_id = match params.organization.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<TenantId>()
            .map_err(|_| Error::Validation("organization is not a valid id".into()))?,
        _ => principal.tenant_id,
    };
    authorize(&principal, Action::ListVideos, tenant_id)?;

    let mut filter = VideoFilter::for_tenant(tenant_id);
    filter.status = params.status.as_deref().map(str::parse).transpose()?;
    filter.sensitivity = params.sensitivity.as_deref().map(str::parse).transpose()?;
    filter.limit = params.limit.filter(|l| *l >= 0);
    filter.offset = params.offset.filter(|o| *o >= 0);

    let conn = rf_db::pool::get_conn(&ctx.db)?;
    let videos: Vec<VideoResponse> = videos::list_videos(&conn, &filter)?
        .into_iter()
        .map(VideoResponse::from)
        .collect();

    Ok(Json(VideoListResponse {
        count: videos.len(),
        videos,
    }))
}

/// GET /api/videos/{id}
#[utoipa::path(
    get,
    path = "/api/videos/{id}",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Video record", body = VideoResponse),
        (status = 404, description = "Not found or owned by another organization")
    )
)]
pub async fn get_video(
    State(ctx): State<AppContext>,
    Extension(principal): Extension<Principal>,
    PathParam(id): PathParam<String>,
) -> Result<Json<VideoResponse>, AppError> {
    let video_id = parse_video_id(&id)?;
    let conn = rf_db::pool::get_conn(&ctx.db)?;
    let video = load_authorized_video(&conn, &principal, Action::ViewVideo, video_id)?;
    Ok(Json(VideoResponse::from(video)))
}

/// An unparseable id cannot name any record, so it is reported as not found.
pub(crate) fn parse_video_id(raw: &str) -> Result<VideoId, Error> {
    raw.parse().map_err(|_| Error::not_found("video", raw))
}
