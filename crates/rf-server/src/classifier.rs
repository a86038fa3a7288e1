//! Sensitivity classification of completed videos.
//!
//! The worker asks a [`SensitivityClassifier`] for a label once a transcode
//! succeeds. The shipped implementation only looks at the upload size.

use rf_av::TranscodeReport;
use rf_core::Sensitivity;
use rf_db::models::Video;

/// Decides the sensitivity label of a successfully transcoded video.
///
/// Must never return [`Sensitivity::Unknown`]; completed records always
/// carry a decided label.
pub trait SensitivityClassifier: Send + Sync {
    fn classify(&self, video: &Video, report: &TranscodeReport) -> Sensitivity;
}

/// Flags uploads strictly larger than a byte threshold.
#[derive(Debug, Clone, Copy)]
pub struct SizeThresholdClassifier {
    threshold_bytes: u64,
}

impl SizeThresholdClassifier {
    pub fn new(threshold_bytes: u64) -> Self {
        Self { threshold_bytes }
    }
}

impl SensitivityClassifier for SizeThresholdClassifier {
    fn classify(&self, video: &Video, _report: &TranscodeReport) -> Sensitivity {
        if video.size_bytes.max(0) as u64 > self.threshold_bytes {
            Sensitivity::Flagged
        } else {
            Sensitivity::Safe
        }
    }
}
