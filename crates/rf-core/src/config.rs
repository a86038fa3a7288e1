//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for server, auth, storage, tools, transcoding, delivery and
//! events. Every section defaults sensibly so a completely empty `{}` file is
//! valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

/// One mebibyte.
const MIB: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub delivery: DeliveryConfig,
    pub classifier: ClassifierConfig,
    pub events: EventsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.storage.upload_dir == self.storage.processed_dir {
            warnings.push(
                "storage.upload_dir and storage.processed_dir are the same directory".into(),
            );
        }

        if self.storage.allowed_mime_types.is_empty() {
            warnings.push("storage.allowed_mime_types is empty; every upload will be rejected".into());
        }

        if self.storage.max_upload_bytes == 0 {
            warnings.push("storage.max_upload_bytes is 0; every upload will be rejected".into());
        }

        if self.transcode.progress_step == 0 || self.transcode.progress_step >= 100 {
            warnings.push(format!(
                "transcode.progress_step {} is outside 1..=99; using {}",
                self.transcode.progress_step,
                default_progress_step()
            ));
        }

        if self.delivery.chunk_size == 0 {
            warnings.push(format!(
                "delivery.chunk_size is 0; using {}",
                default_chunk_size()
            ));
        }

        if self.auth.bcrypt_cost < 4 || self.auth.bcrypt_cost > 31 {
            warnings.push(format!(
                "auth.bcrypt_cost {} is outside 4..=31",
                self.auth.bcrypt_cost
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: PathBuf::from("./data/reelforged.db"),
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(default = "default_session_timeout")]
    pub session_timeout_hours: u64,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    #[serde(default = "default_true")]
    pub allow_registration: bool,
}

fn default_session_timeout() -> u64 {
    24
}
fn default_bcrypt_cost() -> u32 {
    12
}
fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout_hours: default_session_timeout(),
            bcrypt_cost: default_bcrypt_cost(),
            allow_registration: true,
        }
    }
}

/// Where uploads and processed artifacts live, and what may be uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub processed_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

fn default_max_upload_bytes() -> u64 {
    500 * MIB
}
fn default_allowed_mime_types() -> Vec<String> {
    [
        "video/mp4",
        "video/mkv",
        "video/x-matroska",
        "video/avi",
        "video/x-msvideo",
        "video/mov",
        "video/quicktime",
        "video/webm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./data/uploads/videos"),
            processed_dir: PathBuf::from("./data/uploads/processed"),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

impl StorageConfig {
    /// Whether `content_type` (parameters ignored, case-insensitive) is on
    /// the allow-list.
    pub fn is_allowed_mime(&self, content_type: &str) -> bool {
        let normalized = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        self.allowed_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&normalized))
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Transcode worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    #[serde(default = "default_video_preset")]
    pub video_preset: String,
    #[serde(default = "default_video_crf")]
    pub video_crf: u32,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Minimum advance, in percentage points, between persisted progress values.
    #[serde(default = "default_progress_step")]
    pub progress_step: u8,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long shutdown waits for running transcodes before giving up.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_video_preset() -> String {
    "veryfast".into()
}
fn default_video_crf() -> u32 {
    23
}
fn default_audio_bitrate() -> String {
    "128k".into()
}
fn default_progress_step() -> u8 {
    5
}
fn default_timeout_secs() -> u64 {
    86_400
}
fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            video_preset: default_video_preset(),
            video_crf: default_video_crf(),
            audio_bitrate: default_audio_bitrate(),
            progress_step: default_progress_step(),
            timeout_secs: default_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl TranscodeConfig {
    /// `progress_step` clamped into `1..=99`.
    pub fn effective_progress_step(&self) -> u8 {
        if self.progress_step == 0 || self.progress_step >= 100 {
            default_progress_step()
        } else {
            self.progress_step
        }
    }
}

/// Range delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Upper bound on the bytes returned by one range response.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
}

fn default_chunk_size() -> u64 {
    1_000_000
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

impl DeliveryConfig {
    pub fn effective_chunk_size(&self) -> u64 {
        if self.chunk_size == 0 {
            default_chunk_size()
        } else {
            self.chunk_size
        }
    }
}

/// Placeholder sensitivity classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Uploads strictly larger than this are labelled `flagged`.
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold_bytes: u64,
}

fn default_flag_threshold() -> u64 {
    50 * MIB
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            flag_threshold_bytes: default_flag_threshold(),
        }
    }
}

/// Progress channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-video broadcast buffer.
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_topic_capacity() -> usize {
    64
}
fn default_heartbeat_secs() -> u64 {
    15
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            topic_capacity: default_topic_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}
