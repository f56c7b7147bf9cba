//! Classical fallback detector: SeetaFace cascade via `rustface`.
//!
//! Used when the SCRFD model is unavailable or finds nothing. The
//! cascade has no landmark head, so landmarks come from an optional
//! lightweight ONNX regressor or a geometric estimate over the box.

use crate::raster;
use crate::types::FaceDetection;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// The cascade reports an unbounded score, not a probability. Faces it
/// accepts are reported with this fixed confidence.
const CASCADE_CONFIDENCE: f32 = 0.9;

const LANDMARK_NET_INPUT: usize = 96;

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("cascade model not found: {0}")]
    ModelNotFound(String),
    #[error("cascade model unreadable: {0}")]
    ModelUnreadable(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// SeetaFace cascade detector with optional landmark refinement.
pub struct FallbackDetector {
    model: rustface::Model,
    landmark_net: Option<Session>,
}

impl FallbackDetector {
    /// Load the cascade model, plus a landmark regressor when one sits
    /// next to it. A missing landmark model is not an error.
    pub fn load(cascade_path: &str, landmark_path: Option<&str>) -> Result<Self, FallbackError> {
        if !Path::new(cascade_path).exists() {
            return Err(FallbackError::ModelNotFound(cascade_path.to_string()));
        }
        let bytes = std::fs::read(cascade_path)
            .map_err(|e| FallbackError::ModelUnreadable(format!("{cascade_path}: {e}")))?;
        let model = rustface::read_model(std::io::Cursor::new(bytes))
            .map_err(|e| FallbackError::ModelUnreadable(format!("{cascade_path}: {e}")))?;

        let landmark_net = match landmark_path {
            Some(path) if Path::new(path).exists() => {
                let session = Session::builder()?
                    .with_intra_threads(2)?
                    .commit_from_file(path)?;
                tracing::info!(path, "loaded landmark regressor");
                Some(session)
            }
            _ => {
                tracing::debug!("no landmark regressor, using geometric estimates");
                None
            }
        };

        tracing::info!(path = cascade_path, "loaded cascade fallback detector");
        Ok(Self { model, landmark_net })
    }

    /// Detect faces in an RGB frame. Detections below
    /// `confidence_threshold` are dropped, matching the primary
    /// detector's contract.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Vec<FaceDetection> {
        if CASCADE_CONFIDENCE < confidence_threshold {
            return Vec::new();
        }

        let gray = raster::rgb_to_gray(rgb, width, height);

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(20);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(&gray, width, height));

        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            let bbox = face.bbox();
            let mut det = FaceDetection {
                x: bbox.x() as f32,
                y: bbox.y() as f32,
                width: bbox.width() as f32,
                height: bbox.height() as f32,
                confidence: CASCADE_CONFIDENCE,
                landmarks: None,
            };
            det.landmarks = Some(self.landmarks_for(rgb, width, height, &det));
            detections.push(det);
        }

        detections
    }

    /// Landmarks for one detection: regressor output when the net is
    /// loaded and the ROI is usable, geometric estimate otherwise.
    fn landmarks_for(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        det: &FaceDetection,
    ) -> [(f32, f32); 5] {
        if self.landmark_net.is_some() {
            if let Some(lms) = self.regress_landmarks(rgb, width, height, det) {
                return lms;
            }
        }
        estimate_landmarks(det)
    }

    /// Run the landmark regressor on the face ROI. Returns `None` when
    /// the ROI is degenerate or inference fails, so the caller can fall
    /// back to the geometric estimate.
    fn regress_landmarks(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        det: &FaceDetection,
    ) -> Option<[(f32, f32); 5]> {
        let session = self.landmark_net.as_mut()?;

        let rx = det.x.max(0.0) as usize;
        let ry = det.y.max(0.0) as usize;
        let rw = (det.width as usize).min(width as usize - rx.min(width as usize));
        let rh = (det.height as usize).min(height as usize - ry.min(height as usize));
        if rw < 8 || rh < 8 {
            return None;
        }

        // Crop the ROI out of the frame, then resize to the net input.
        let mut roi = vec![0u8; rw * rh * 3];
        for y in 0..rh {
            let src = ((ry + y) * width as usize + rx) * 3;
            let dst = y * rw * 3;
            roi[dst..dst + rw * 3].copy_from_slice(&rgb[src..src + rw * 3]);
        }
        let resized = raster::resize_rgb(&roi, rw, rh, LANDMARK_NET_INPUT, LANDMARK_NET_INPUT);

        let mut input = Array4::<f32>::zeros((1, 3, LANDMARK_NET_INPUT, LANDMARK_NET_INPUT));
        for y in 0..LANDMARK_NET_INPUT {
            for x in 0..LANDMARK_NET_INPUT {
                for c in 0..3 {
                    input[[0, c, y, x]] =
                        resized[(y * LANDMARK_NET_INPUT + x) * 3 + c] as f32 / 255.0;
                }
            }
        }

        let mut run = || -> Result<Vec<f32>, ort::Error> {
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, coords) = outputs[0].try_extract_tensor::<f32>()?;
            Ok(coords.to_vec())
        };

        match run() {
            Ok(coords) if coords.len() >= 10 => {
                // Outputs are normalized [0, 1] in ROI space.
                Some(std::array::from_fn(|i| {
                    (
                        rx as f32 + coords[i * 2].clamp(0.0, 1.0) * rw as f32,
                        ry as f32 + coords[i * 2 + 1].clamp(0.0, 1.0) * rh as f32,
                    )
                }))
            }
            Ok(coords) => {
                tracing::warn!(outputs = coords.len(), "landmark net returned too few values");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "landmark regression failed");
                None
            }
        }
    }
}

/// Geometric five-point estimate from the bounding box alone. Assumes a
/// roughly frontal pose, which is what the cascade detects anyway.
pub fn estimate_landmarks(det: &FaceDetection) -> [(f32, f32); 5] {
    let (x, y, w, h) = (det.x, det.y, det.width, det.height);
    [
        (x + 0.30 * w, y + 0.40 * h), // left eye
        (x + 0.70 * w, y + 0.40 * h), // right eye
        (x + 0.50 * w, y + 0.60 * h), // nose tip
        (x + 0.35 * w, y + 0.80 * h), // left mouth corner
        (x + 0.65 * w, y + 0.80 * h), // right mouth corner
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_landmarks_inside_box() {
        let det = FaceDetection {
            x: 100.0,
            y: 200.0,
            width: 80.0,
            height: 100.0,
            confidence: 0.9,
            landmarks: None,
        };
        for (lx, ly) in estimate_landmarks(&det) {
            assert!(lx >= det.x && lx <= det.x + det.width);
            assert!(ly >= det.y && ly <= det.y + det.height);
        }
    }

    #[test]
    fn test_estimate_landmarks_eyes_symmetric() {
        let det = FaceDetection {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            confidence: 0.9,
            landmarks: None,
        };
        let lms = estimate_landmarks(&det);
        let center_x = det.x + det.width / 2.0;
        assert!((lms[0].0 - det.x - (det.x + det.width - lms[1].0)).abs() < 1e-4);
        assert!((lms[2].0 - center_x).abs() < 1e-4);
        // Eyes above nose, nose above mouth.
        assert!(lms[0].1 < lms[2].1);
        assert!(lms[2].1 < lms[3].1);
    }

    #[test]
    fn test_load_missing_cascade() {
        let err = FallbackDetector::load("/nonexistent/cascade.bin", None);
        assert!(matches!(err, Err(FallbackError::ModelNotFound(_))));
    }
}
