//! Range parsing, content-type guessing, and bounded-window file serving
//! via `ReaderStream`.

use std::path::Path;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Parse a `Range: bytes=START-END` header value.
///
/// Returns `(start, Option<end>)` where `end` is `None` for open-ended ranges
/// like `bytes=500-`. Suffix ranges (`bytes=-500`) and multi-range requests
/// are not supported.
pub fn parse_range_header(value: &str) -> Option<(u64, Option<u64>)> {
    let bytes_prefix = value.trim().strip_prefix("bytes=")?;
    if bytes_prefix.contains(',') {
        return None;
    }
    let mut parts = bytes_prefix.splitn(2, '-');
    let start_str = parts.next()?.trim();
    let end_str = parts.next()?.trim();

    let start: u64 = start_str.parse().ok()?;
    let end: Option<u64> = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse().ok()?)
    };

    Some((start, end))
}

/// Guess the MIME type from a file extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// The byte window the server will return for a request starting at
/// `start` on a file of `total` bytes, or `None` if `start` is past the end.
pub fn window(start: u64, total: u64, chunk_size: u64) -> Option<(u64, u64)> {
    if start >= total {
        return None;
    }
    let end = start.saturating_add(chunk_size.max(1)).min(total) - 1;
    Some((start, end))
}

/// Serve at most `chunk_size` bytes of `file_path` starting at `start`.
///
/// The client's requested end is ignored; the server picks the window. The
/// body is streamed in 64 KiB reads and never buffered whole.
pub async fn serve_range(
    file_path: &Path,
    content_type: &str,
    start: u64,
    chunk_size: u64,
) -> Result<Response, rf_core::Error> {
    let mut file = tokio::fs::File::open(file_path).await?;
    let total = file.metadata().await?.len();

    let Some((start, end)) = window(start, total, chunk_size) else {
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE.as_str(), format!("bytes */{total}"))],
            Body::empty(),
        )
            .into_response());
    };
    let length = end - start + 1;

    file.seek(std::io::SeekFrom::Start(start)).await?;

    // Take limits reads to exactly `length` bytes.
    let limited = file.take(length);
    let stream = ReaderStream::with_capacity(limited, 64 * 1024);
    let body = Body::from_stream(stream);

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE.as_str(), content_type.to_string()),
            (
                header::CONTENT_RANGE.as_str(),
                format!("bytes {start}-{end}/{total}"),
            ),
            (header::CONTENT_LENGTH.as_str(), length.to_string()),
            (header::ACCEPT_RANGES.as_str(), "bytes".to_string()),
        ],
        body,
    )
        .into_response())
}
