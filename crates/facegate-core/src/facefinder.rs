//! Detection chain: SCRFD first, cascade second.
//!
//! `FaceFinder::detect` never fails. A primary inference error or an
//! empty primary result hands the frame to the cascade; if both
//! strategies come up empty the result is an empty vec and the caller
//! decides what that means.

use crate::detector::ScrfdDetector;
use crate::fallback::FallbackDetector;
use crate::types::FaceDetection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceFinderError {
    #[error("no detector available: {0}")]
    NoDetector(String),
}

/// Filesystem locations of the detection models.
#[derive(Debug, Clone)]
pub struct DetectorModelPaths {
    /// SCRFD ONNX model. Primary strategy.
    pub scrfd: String,
    /// SeetaFace cascade model. Fallback strategy.
    pub cascade: String,
    /// Optional landmark regressor used by the fallback.
    pub landmarks: Option<String>,
}

pub struct FaceFinder {
    primary: Option<ScrfdDetector>,
    fallback: Option<FallbackDetector>,
    primary_threshold: f32,
    fallback_threshold: f32,
}

impl FaceFinder {
    /// Load whichever detectors are available. Each strategy failing to
    /// load is logged and skipped; only both missing is fatal.
    pub fn load(
        paths: &DetectorModelPaths,
        primary_threshold: f32,
        fallback_threshold: f32,
    ) -> Result<Self, FaceFinderError> {
        let primary = match ScrfdDetector::load(&paths.scrfd) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "SCRFD unavailable, relying on cascade");
                None
            }
        };

        let fallback = match FallbackDetector::load(&paths.cascade, paths.landmarks.as_deref()) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "cascade fallback unavailable");
                None
            }
        };

        if primary.is_none() && fallback.is_none() {
            return Err(FaceFinderError::NoDetector(format!(
                "neither {} nor {} could be loaded",
                paths.scrfd, paths.cascade
            )));
        }

        Ok(Self::from_parts(
            primary,
            fallback,
            primary_threshold,
            fallback_threshold,
        ))
    }

    /// Assemble a finder from already-loaded strategies. A finder with
    /// no strategies is valid and reports no faces.
    pub fn from_parts(
        primary: Option<ScrfdDetector>,
        fallback: Option<FallbackDetector>,
        primary_threshold: f32,
        fallback_threshold: f32,
    ) -> Self {
        Self {
            primary,
            fallback,
            primary_threshold,
            fallback_threshold,
        }
    }

    /// True when the SCRFD strategy is active.
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Detect faces in an RGB frame. Infallible: strategy errors are
    /// logged and treated as "found nothing".
    pub fn detect(&mut self, rgb: &[u8], width: u32, height: u32) -> Vec<FaceDetection> {
        if let Some(primary) = &mut self.primary {
            match primary.detect(rgb, width, height, self.primary_threshold) {
                Ok(faces) if !faces.is_empty() => return faces,
                Ok(_) => {
                    tracing::trace!("SCRFD found no faces, trying cascade");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SCRFD inference failed, trying cascade");
                }
            }
        }

        if let Some(fallback) = &mut self.fallback {
            let faces = fallback.detect(rgb, width, height, self.fallback_threshold);
            if !faces.is_empty() {
                return faces;
            }
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finder_without_strategies_reports_nothing() {
        let mut finder = FaceFinder::from_parts(None, None, 0.8, 0.7);
        assert!(!finder.has_primary());
        assert!(finder.detect(&[0u8; 4 * 3 * 3], 4, 3).is_empty());
    }
}
