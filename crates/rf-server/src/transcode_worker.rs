//! Background transcode worker.
//!
//! One task per uploaded video drives the record from `uploaded` through
//! `processing` to `completed` or `failed`. Engine progress is coalesced into
//! fixed milestones; each milestone is written to the store first and only
//! published once the guarded write applied.

use std::path::{Path, PathBuf};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use tracing::Instrument;

use rf_av::TranscodeReport;
use rf_core::events::VideoEventPayload;
use rf_core::{Error, Sensitivity, VideoId, VideoStatus};
use rf_db::models::Video;
use rf_db::pool::{get_conn, DbPool};
use rf_db::queries::videos;

use crate::context::AppContext;

/// Error recorded on records a previous process left in `processing`.
pub const ORPHANED_MESSAGE: &str = "interrupted by server restart";

/// Error recorded when shutdown aborts a running transcode.
pub const ABORTED_MESSAGE: &str = "interrupted by server shutdown";

// ---------------------------------------------------------------------------
// ProgressCoalescer
// ---------------------------------------------------------------------------

/// Turns a noisy stream of engine percentages into monotonic milestones.
///
/// Values are snapped down to a multiple of `step` and emitted only when
/// they exceed the last emitted milestone. 100 is never emitted; only the
/// completion transition writes it.
#[derive(Debug, Clone)]
pub struct ProgressCoalescer {
    step: u8,
    ceiling: u8,
    last: u8,
}

impl ProgressCoalescer {
    pub fn new(step: u8) -> Self {
        let step = step.clamp(1, 99);
        Self {
            step,
            ceiling: (99 / step) * step,
            last: 0,
        }
    }

    /// Offer a raw percentage; returns the milestone to persist, if any.
    pub fn offer(&mut self, percent: f64) -> Option<u8> {
        if !percent.is_finite() {
            return None;
        }
        let whole = percent.clamp(0.0, 100.0).floor() as u8;
        let milestone = ((whole / self.step) * self.step).min(self.ceiling);
        if milestone > self.last {
            self.last = milestone;
            Some(milestone)
        } else {
            None
        }
    }

    /// Last milestone emitted (0 before the first).
    pub fn last(&self) -> u8 {
        self.last
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Removes a video from `active_transcodes` when its task ends, even if the
/// task panicked.
struct ActiveGuard {
    ctx: AppContext,
    video_id: VideoId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.ctx.active_transcodes.remove(&self.video_id);
    }
}

/// Start a transcode task for `video_id` without waiting for it.
///
/// Returns `false` if a worker for this video is already running.
pub fn dispatch_transcode(ctx: &AppContext, video_id: VideoId) -> bool {
    match ctx.active_transcodes.entry(video_id) {
        Entry::Occupied(_) => {
            tracing::debug!(video_id = %video_id, "Transcode already running, not dispatching");
            return false;
        }
        Entry::Vacant(slot) => {
            slot.insert(Utc::now());
        }
    }

    let guard = ActiveGuard {
        ctx: ctx.clone(),
        video_id,
    };
    let span = tracing::info_span!("transcode", video_id = %video_id);
    ctx.tasks.spawn(
        async move {
            run_transcode(&guard.ctx, video_id).await;
            drop(guard);
        }
        .instrument(span),
    );
    true
}

/// Fail records orphaned in `processing` and re-dispatch pending uploads.
///
/// Returns `(failed, dispatched)`.
pub fn recover_interrupted(ctx: &AppContext) -> rf_core::Result<(usize, usize)> {
    let conn = get_conn(&ctx.db)?;
    let failed = videos::fail_orphaned_processing(&conn, ORPHANED_MESSAGE)?;
    let pending = videos::list_pending_uploads(&conn)?;
    drop(conn);

    let dispatched = pending
        .iter()
        .filter(|v| dispatch_transcode(ctx, v.id))
        .count();
    Ok((failed, dispatched))
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Drive one video to a terminal state.
///
/// Never returns an error: failures are recorded on the video and
/// published, not propagated to whoever dispatched the task.
pub async fn run_transcode(ctx: &AppContext, video_id: VideoId) {
    let video = match begin(&ctx.db, video_id) {
        Ok(Some(v)) => v,
        Ok(None) => return,
        Err(e) => {
            tracing::error!(error = %e, "Could not start transcode");
            return;
        }
    };

    let input = PathBuf::from(&video.original_path);
    let (final_path, part_path) = output_paths(&ctx.config.storage.processed_dir, &video);

    tracing::info!(
        input = %input.display(),
        output = %final_path.display(),
        "Transcode started"
    );

    let outcome = convert(ctx, &video, &input, &part_path, &final_path).await;

    match outcome {
        Ok(report) => finish_success(ctx, &video, report).await,
        Err(e) => {
            remove_quietly(&part_path).await;
            finish_failure(ctx, video_id, &e.to_string());
        }
    }
}

/// `uploaded -> processing`. `Ok(None)` means there is nothing to do.
fn begin(db: &DbPool, video_id: VideoId) -> rf_core::Result<Option<Video>> {
    let conn = get_conn(db)?;
    if let Some(video) = videos::start_processing(&conn, video_id)? {
        return Ok(Some(video));
    }

    match videos::get_video(&conn, video_id)? {
        None => tracing::debug!("Video no longer exists, dropping transcode"),
        Some(v) => tracing::warn!(status = %v.status, "Video is not awaiting transcode, skipping"),
    }
    Ok(None)
}

/// `<processed_dir>/<stem>.mp4` and its in-progress sibling.
fn output_paths(processed_dir: &Path, video: &Video) -> (PathBuf, PathBuf) {
    let id = video.id.to_string();
    let stem = Path::new(&video.filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(&id);
    (
        processed_dir.join(format!("{stem}.mp4")),
        processed_dir.join(format!("{stem}.mp4.part")),
    )
}

/// Run the engine into `part_path` and move the result into place.
async fn convert(
    ctx: &AppContext,
    video: &Video,
    input: &Path,
    part_path: &Path,
    final_path: &Path,
) -> rf_core::Result<TranscodeReport> {
    if let Some(dir) = final_path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let video_id = video.id;
    let db = ctx.db.clone();
    let hub = ctx.hub.clone();
    let mut coalescer = ProgressCoalescer::new(ctx.config.transcode.effective_progress_step());

    // Runs inline on the worker task. The coalescer caps this at one short
    // SQLite write per milestone, so no block_in_place: that would panic on
    // a current-thread runtime.
    let mut on_progress = move |percent: f64| {
        let Some(milestone) = coalescer.offer(percent) else {
            return;
        };
        let applied = get_conn(&db).and_then(|conn| videos::record_progress(&conn, video_id, milestone));
        match applied {
            Ok(true) => {
                tracing::debug!(percent = milestone, "Progress recorded");
                hub.publish(video_id, VideoEventPayload::Progress { percent: milestone });
            }
            Ok(false) => tracing::debug!(percent = milestone, "Progress write did not apply"),
            Err(e) => tracing::warn!(error = %e, "Failed to record progress"),
        }
    };

    let mut report = tokio::select! {
        result = ctx.transcoder.transcode(input, part_path, &mut on_progress) => result?,
        _ = ctx.abort_transcodes.cancelled() => {
            return Err(Error::Internal(ABORTED_MESSAGE.into()));
        }
    };

    tokio::fs::rename(part_path, final_path).await?;
    report.output = final_path.to_path_buf();
    Ok(report)
}

async fn finish_success(ctx: &AppContext, video: &Video, report: TranscodeReport) {
    let mut sensitivity = ctx.classifier.classify(video, &report);
    if sensitivity == Sensitivity::Unknown {
        tracing::warn!("Classifier returned no decision, flagging for review");
        sensitivity = Sensitivity::Flagged;
    }

    let output = report.output.to_string_lossy().into_owned();
    let completed = get_conn(&ctx.db).and_then(|conn| {
        videos::complete_video(&conn, video.id, &output, sensitivity, report.duration_secs)
    });

    match completed {
        Ok(Some(_)) => {
            tracing::info!(
                sensitivity = %sensitivity,
                output_bytes = report.output_bytes,
                "Transcode completed"
            );
            ctx.hub.publish(
                video.id,
                VideoEventPayload::Complete {
                    status: VideoStatus::Completed,
                    sensitivity,
                },
            );
        }
        Ok(None) => {
            tracing::warn!("Video left processing before completion was recorded");
            remove_quietly(&report.output).await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to record completion");
            remove_quietly(&report.output).await;
            finish_failure(ctx, video.id, &format!("failed to record completion: {e}"));
        }
    }
}

fn finish_failure(ctx: &AppContext, video_id: VideoId, message: &str) {
    tracing::error!(error = %message, "Transcode failed");

    let failed = get_conn(&ctx.db).and_then(|conn| videos::fail_video(&conn, video_id, message));
    match failed {
        Ok(true) => {
            ctx.hub.publish(
                video_id,
                VideoEventPayload::Failed {
                    error: message.to_string(),
                },
            );
        }
        Ok(false) => tracing::warn!("Video left processing before failure was recorded"),
        Err(e) => tracing::error!(error = %e, "Failed to record transcode failure"),
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sweep_yields_nineteen_milestones() {
        let mut c = ProgressCoalescer::new(5);
        let emitted: Vec<u8> = (0..=100).filter_map(|p| c.offer(p as f64)).collect();
        let expected: Vec<u8> = (1..=19).map(|i| i * 5).collect();
        assert_eq!(emitted, expected);
        assert_eq!(c.last(), 95);
    }

    #[test]
    fn irregular_reports_cross_each_milestone_once() {
        let mut c = ProgressCoalescer::new(5);
        let emitted: Vec<u8> = [3.0, 7.0, 12.0, 19.0]
            .into_iter()
            .filter_map(|p| c.offer(p))
            .collect();
        assert_eq!(emitted, vec![5, 10, 15]);
    }

    #[test]
    fn never_goes_backwards() {
        let mut c = ProgressCoalescer::new(5);
        assert_eq!(c.offer(42.0), Some(40));
        assert_eq!(c.offer(12.0), None);
        assert_eq!(c.offer(44.9), None);
        assert_eq!(c.offer(45.0), Some(45));
    }

    #[test]
    fn hundred_is_left_to_completion() {
        let mut c = ProgressCoalescer::new(5);
        assert_eq!(c.offer(100.0), Some(95));
        assert_eq!(c.offer(100.0), None);

        let mut odd = ProgressCoalescer::new(7);
        assert_eq!(odd.offer(100.0), Some(98));
    }

    #[test]
    fn junk_values_are_ignored() {
        let mut c = ProgressCoalescer::new(5);
        assert_eq!(c.offer(f64::NAN), None);
        assert_eq!(c.offer(-10.0), None);
        assert_eq!(c.offer(f64::INFINITY), None);
        assert_eq!(c.offer(250.0), Some(95));
    }

    #[test]
    fn output_paths_use_stored_filename() {
        let video = Video {
            id: VideoId::new(),
            tenant_id: rf_core::TenantId::new(),
            uploader_id: rf_core::UserId::new(),
            original_name: "Holiday Clip.MOV".into(),
            filename: "abc.mov".into(),
            mime_type: "video/quicktime".into(),
            size_bytes: 1,
            original_path: "/u/abc.mov".into(),
            processed_path: None,
            status: VideoStatus::Processing,
            processing_progress: 0,
            sensitivity: Sensitivity::Unknown,
            error_message: None,
            duration_secs: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let (fin, part) = output_paths(Path::new("/p"), &video);
        assert_eq!(fin, PathBuf::from("/p/abc.mp4"));
        assert_eq!(part, PathBuf::from("/p/abc.mp4.part"));
    }
}
