//! Conversion of an uploaded file into the normalized playable format.
//!
//! [`Transcoder`] is the seam the worker depends on; [`FfmpegTranscoder`] is
//! the production implementation, which runs `ffmpeg -progress pipe:1` and
//! turns its key/value progress blocks into percentages.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rf_core::config::TranscodeConfig;
use serde::Serialize;

use crate::command::ToolCommand;
use crate::probe::probe_duration;
use crate::tools::ToolRegistry;

/// Result of a successful conversion.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeReport {
    /// Where the artifact was written.
    pub output: PathBuf,
    /// Source duration, when it could be probed.
    pub duration_secs: Option<f64>,
    /// Size of the written artifact.
    pub output_bytes: u64,
}

/// Converts one input file into one output file.
///
/// Implementations call `on_progress` zero or more times with a percentage in
/// `0.0..=100.0` and then return exactly one outcome.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> rf_core::Result<TranscodeReport>;
}

/// H.264/AAC MP4 conversion via the `ffmpeg` CLI.
pub struct FfmpegTranscoder {
    tools: Arc<ToolRegistry>,
    config: TranscodeConfig,
}

impl FfmpegTranscoder {
    pub fn new(tools: Arc<ToolRegistry>, config: TranscodeConfig) -> Self {
        Self { tools, config }
    }
}

/// Build the ffmpeg argument list for a conversion.
pub fn build_ffmpeg_args(input: &Path, output: &Path, config: &TranscodeConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-nostdin", "-progress", "pipe:1", "-nostats", "-i"]
        .into_iter()
        .map(String::from)
        .collect();
    args.push(input.to_string_lossy().into_owned());
    args.extend(
        [
            "-c:v",
            "libx264",
            "-preset",
            config.video_preset.as_str(),
            "-crf",
            &config.video_crf.to_string(),
            "-c:a",
            "aac",
            "-b:a",
            config.audio_bitrate.as_str(),
            "-movflags",
            "+faststart",
            // Explicit container: the output path carries a temporary suffix.
            "-f",
            "mp4",
        ]
        .into_iter()
        .map(String::from),
    );
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Incremental parser for ffmpeg `-progress` output.
///
/// ffmpeg prints `key=value` lines and closes every block with
/// `progress=continue` or `progress=end`. A percentage is produced at each
/// block boundary from the last `out_time_us` over the source duration.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    last_out_time_us: Option<i64>,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| *d > 0.0),
            last_out_time_us: None,
        }
    }

    /// Feed one line; returns a percentage when the line closes a block.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        if let Some(val) = line.strip_prefix("out_time_us=") {
            // "N/A" before the first frame is encoded
            if let Ok(us) = val.trim().parse::<i64>() {
                self.last_out_time_us = Some(us);
            }
            None
        } else if let Some(state) = line.strip_prefix("progress=") {
            if state.trim() == "end" {
                return Some(100.0);
            }
            let dur = self.duration_secs?;
            let out_us = self.last_out_time_us?;
            let elapsed = out_us.max(0) as f64 / 1_000_000.0;
            Some((elapsed / dur * 100.0).clamp(0.0, 100.0))
        } else {
            None
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> rf_core::Result<TranscodeReport> {
        let ffmpeg = self.tools.require("ffmpeg")?;
        let duration_secs = probe_duration(&self.tools, input).await;

        tracing::info!(
            "Transcoding {:?} -> {:?} (preset={}, crf={}, duration={:?})",
            input,
            output,
            self.config.video_preset,
            self.config.video_crf,
            duration_secs,
        );

        let mut cmd = ToolCommand::new(ffmpeg.path.clone());
        cmd.timeout(Duration::from_secs(self.config.timeout_secs.max(1)));
        cmd.args(build_ffmpeg_args(input, output, &self.config));

        let mut parser = ProgressParser::new(duration_secs);
        cmd.execute_streaming(|line| {
            if let Some(pct) = parser.feed(line) {
                on_progress(pct);
            }
        })
        .await?;

        let output_bytes = tokio::fs::metadata(output).await?.len();

        Ok(TranscodeReport {
            output: output.to_path_buf(),
            duration_secs,
            output_bytes,
        })
    }
}
