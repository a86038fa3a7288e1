//! Duration probing via `ffprobe`.

use std::path::Path;
use std::time::Duration;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Container duration of `path` in seconds.
///
/// Returns `None` when ffprobe is unavailable, fails, or reports no usable
/// duration; the transcode still runs, it just cannot report percentages.
pub async fn probe_duration(tools: &ToolRegistry, path: &Path) -> Option<f64> {
    let ffprobe = match tools.require("ffprobe") {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Skipping duration probe: {e}");
            return None;
        }
    };

    let mut cmd = ToolCommand::new(ffprobe.path.clone());
    cmd.timeout(Duration::from_secs(60));
    cmd.args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ]);
    cmd.arg(path.to_string_lossy().as_ref());

    match cmd.execute().await {
        Ok(output) => parse_duration(&output.stdout),
        Err(e) => {
            tracing::warn!("ffprobe failed for {path:?}: {e}");
            None
        }
    }
}

/// Parse ffprobe's bare `format=duration` output.
pub fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}
