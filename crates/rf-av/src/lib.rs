//! # rf-av
//!
//! Video conversion and external tool management for the reelforged
//! ingestion pipeline.
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support, either capturing output or streaming stdout line by line.
//! - **Probing** ([`probe_duration`]) -- source duration via ffprobe.
//! - **Transcoding** ([`Transcoder`], [`FfmpegTranscoder`]) -- conversion to
//!   H.264/AAC MP4 with progress callbacks.

pub mod command;
pub mod probe;
pub mod tools;
pub mod transcode;

pub use command::{ToolCommand, ToolOutput};
pub use probe::probe_duration;
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcode::{FfmpegTranscoder, ProgressParser, TranscodeReport, Transcoder};
