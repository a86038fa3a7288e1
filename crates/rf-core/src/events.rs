//! Per-video progress channel.
//!
//! [`ProgressHub`] keeps one `tokio::sync::broadcast` topic per video id.
//! Subscribers only see events published after they joined; there is no
//! replay buffer. A topic is dropped right after its terminal event, when the
//! last [`Subscription`] goes away, or on a publish that reaches nobody.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::ids::VideoId;
use crate::media::{Sensitivity, VideoStatus};

// ---------------------------------------------------------------------------
// VideoEventPayload
// ---------------------------------------------------------------------------

/// What happened to a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VideoEventPayload {
    /// The upload was accepted and the record created.
    Uploaded,
    /// A coalesced progress milestone was persisted.
    Progress { percent: u8 },
    /// The transcode finished and the record is `completed`.
    Complete {
        status: VideoStatus,
        sensitivity: Sensitivity,
    },
    /// The transcode failed and the record is `failed`.
    Failed { error: String },
}

impl VideoEventPayload {
    /// `complete` and `failed` are the last events a video ever publishes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failed { .. })
    }

    /// The wire `type` tag, also used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Progress { .. } => "progress",
            Self::Complete { .. } => "complete",
            Self::Failed { .. } => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// VideoEvent
// ---------------------------------------------------------------------------

/// A timestamped event addressed to one video's topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    pub video_id: VideoId,
    #[serde(flatten)]
    pub payload: VideoEventPayload,
}

impl VideoEvent {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(video_id: VideoId, payload: VideoEventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            video_id,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressHub
// ---------------------------------------------------------------------------

/// Topic-based publish/subscribe keyed by video id.
///
/// Owned by the application context: created at startup and [`close`]d at
/// shutdown, which drops every sender so subscriber streams terminate.
///
/// [`close`]: ProgressHub::close
pub struct ProgressHub {
    topics: RwLock<HashMap<VideoId, broadcast::Sender<VideoEvent>>>,
    capacity: usize,
}

impl ProgressHub {
    /// Create a hub whose topics buffer up to `capacity` undelivered events
    /// per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Join the topic for `video_id`, creating it if needed.
    pub fn subscribe(&self, video_id: VideoId) -> broadcast::Receiver<VideoEvent> {
        if let Some(tx) = self.topics.read().get(&video_id) {
            return tx.subscribe();
        }

        let mut topics = self.topics.write();
        topics
            .entry(video_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Join the topic for `video_id` with a handle that releases the topic
    /// once it is dropped and nobody else listens.
    pub fn join(self: &Arc<Self>, video_id: VideoId) -> Subscription {
        Subscription {
            rx: Some(self.subscribe(video_id)),
            hub: Arc::clone(self),
            video_id,
        }
    }

    /// Deliver an event to every current subscriber of `video_id`.
    ///
    /// Returns how many subscribers received it. Publishing to a topic nobody
    /// listens to is not an error; the event is dropped. A terminal event
    /// closes the topic: receivers drain it and then see `Closed`.
    pub fn publish(&self, video_id: VideoId, payload: VideoEventPayload) -> usize {
        let terminal = payload.is_terminal();
        let event = VideoEvent::new(video_id, payload);

        let delivered = {
            let topics = self.topics.read();
            match topics.get(&video_id) {
                Some(tx) => tx.send(event).unwrap_or(0),
                None => {
                    tracing::trace!(video_id = %video_id, "No subscribers for video topic");
                    return 0;
                }
            }
        };

        if terminal {
            self.topics.write().remove(&video_id);
        } else if delivered == 0 {
            self.prune(video_id);
        }

        delivered
    }

    /// Drop the topic for `video_id` if it has no live receivers.
    fn prune(&self, video_id: VideoId) {
        let mut topics = self.topics.write();
        if topics
            .get(&video_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            topics.remove(&video_id);
        }
    }

    /// Number of live subscribers for `video_id`.
    pub fn subscriber_count(&self, video_id: VideoId) -> usize {
        self.topics
            .read()
            .get(&video_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of topics currently held.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Tear down every topic. Receivers observe `RecvError::Closed`.
    pub fn close(&self) {
        let mut topics = self.topics.write();
        let n = topics.len();
        topics.clear();
        tracing::debug!("Progress hub closed ({n} topics dropped)");
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(64)
    }
}

/// A receiver on one video topic, obtained from [`ProgressHub::join`].
pub struct Subscription {
    rx: Option<broadcast::Receiver<VideoEvent>>,
    hub: Arc<ProgressHub>,
    video_id: VideoId,
}

impl Subscription {
    pub fn video_id(&self) -> VideoId {
        self.video_id
    }

    pub async fn recv(&mut self) -> Result<VideoEvent, RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver must be gone before the count is checked.
        drop(self.rx.take());
        self.hub.prune(self.video_id);
    }
}
