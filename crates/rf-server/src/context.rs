//! Application context shared by every handler and background task.
//!
//! [`AppContext`] is the axum state. It is cheaply cloneable because it only
//! holds `Arc`s and handle types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use rf_av::{FfmpegTranscoder, ToolRegistry, Transcoder};
use rf_core::config::Config;
use rf_core::events::ProgressHub;
use rf_core::VideoId;
use rf_db::pool::DbPool;

use crate::classifier::{SensitivityClassifier, SizeThresholdClassifier};

#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool.
    pub db: DbPool,
    /// Immutable configuration snapshot.
    pub config: Arc<Config>,
    /// Per-video progress topics.
    pub hub: Arc<ProgressHub>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Conversion engine used by the transcode worker.
    pub transcoder: Arc<dyn Transcoder>,
    /// Sensitivity decision applied on completion.
    pub classifier: Arc<dyn SensitivityClassifier>,
    /// Videos with a running worker, and when it started.
    pub active_transcodes: Arc<DashMap<VideoId, DateTime<Utc>>>,
    /// Tracks spawned transcode tasks so shutdown can wait for them.
    pub tasks: TaskTracker,
    /// Cancelled when the server begins shutting down; ends SSE streams.
    pub shutdown: CancellationToken,
    /// Cancelled once the shutdown grace period has elapsed; aborts workers.
    pub abort_transcodes: CancellationToken,
}

impl AppContext {
    /// Build a context with the ffmpeg transcoder and the size-threshold
    /// classifier.
    pub fn new(db: DbPool, config: Config, tools: Arc<ToolRegistry>) -> Self {
        let transcoder: Arc<dyn Transcoder> =
            Arc::new(FfmpegTranscoder::new(tools.clone(), config.transcode.clone()));
        let classifier: Arc<dyn SensitivityClassifier> = Arc::new(SizeThresholdClassifier::new(
            config.classifier.flag_threshold_bytes,
        ));
        let hub = Arc::new(ProgressHub::new(config.events.topic_capacity));

        Self {
            db,
            config: Arc::new(config),
            hub,
            tools,
            transcoder,
            classifier,
            active_transcodes: Arc::new(DashMap::new()),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            abort_transcodes: CancellationToken::new(),
        }
    }

    /// Replace the conversion engine.
    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    /// Replace the sensitivity classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn SensitivityClassifier>) -> Self {
        self.classifier = classifier;
        self
    }
}
