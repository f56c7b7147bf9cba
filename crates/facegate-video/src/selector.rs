//! Representative-frame selection.
//!
//! A capture clip yields a handful of embedding-worthy frames: the clip
//! is split into equal spans, a bounded number of frames per span is
//! sampled, and the best single-face frame of each span wins. Quality
//! combines sharpness with how large and how centered the face is.
//!
//! Detection is injected as a closure so selection logic stays testable
//! without ONNX models.

use crate::frame::VideoFrame;
use facegate_core::types::FaceDetection;
use thiserror::Error;

/// Frames inspected by clip validation.
const VALIDATION_WINDOW: usize = 30;
/// Most multi-face frames tolerated inside the validation window.
const MAX_MULTI_FACE_FRAMES: usize = 5;
/// Fewest single-face frames required inside the validation window.
const MIN_VALID_FRAMES: usize = 5;
/// Most frames sampled per selection span.
const SAMPLES_PER_SPAN: usize = 15;

#[derive(Error, Debug)]
pub enum SelectError {
    #[error("clip shows multiple people ({multi_frames} multi-face frames in the first {window})")]
    MultipleFaces { multi_frames: usize, window: usize },
    #[error("no usable face in clip ({valid_frames} single-face frames in the first {window}, need {MIN_VALID_FRAMES})")]
    TooFewFaces { valid_frames: usize, window: usize },
    #[error("no span produced a usable frame")]
    NoUsableFrames,
}

/// A frame chosen for embedding, with the face that won it its place.
pub struct SelectedFrame {
    pub frame: VideoFrame,
    pub detection: FaceDetection,
    pub quality: f32,
}

/// Weighted quality of a face in a frame.
///
/// Sharpness (Laplacian variance) at weight 0.5, face-to-frame area
/// ratio at 0.3 and centrality at 0.2, with the latter two rescaled so
/// the terms land in comparable ranges.
pub fn quality_score(frame: &VideoFrame, face: &FaceDetection) -> f32 {
    let frame_area = (frame.width() * frame.height()) as f32;
    let area_ratio = if frame_area > 0.0 {
        face.area() / frame_area
    } else {
        0.0
    };

    let (cx, cy) = face.center();
    let fx = frame.width() as f32 / 2.0;
    let fy = frame.height() as f32 / 2.0;
    let max_dist = (fx * fx + fy * fy).sqrt();
    let dist = ((cx - fx).powi(2) + (cy - fy).powi(2)).sqrt();
    let centrality = if max_dist > 0.0 {
        (1.0 - dist / max_dist).max(0.0)
    } else {
        0.0
    };

    0.5 * frame.sharpness() + 0.3 * (area_ratio * 1000.0) + 0.2 * (centrality * 100.0)
}

/// Validate a clip before any selection work.
///
/// Scans the first [`VALIDATION_WINDOW`] frames. Rejects clips that
/// repeatedly show more than one person, or that barely show a face.
pub fn validate_clip(
    frames: &[VideoFrame],
    detect: &mut dyn FnMut(&VideoFrame) -> Vec<FaceDetection>,
) -> Result<(), SelectError> {
    let window = frames.len().min(VALIDATION_WINDOW);
    let mut multi_frames = 0usize;
    let mut valid_frames = 0usize;

    for frame in &frames[..window] {
        match detect(frame).len() {
            0 => {}
            1 => valid_frames += 1,
            _ => multi_frames += 1,
        }
    }

    tracing::debug!(window, valid_frames, multi_frames, "clip validation");

    if multi_frames > MAX_MULTI_FACE_FRAMES {
        return Err(SelectError::MultipleFaces { multi_frames, window });
    }
    if valid_frames < MIN_VALID_FRAMES {
        return Err(SelectError::TooFewFaces { valid_frames, window });
    }
    Ok(())
}

/// Select up to `count` representative frames.
///
/// The clip is cut into `count` equal spans. Within each span up to
/// [`SAMPLES_PER_SPAN`] evenly-stepped frames are detected on, and the
/// highest-quality frame containing exactly one face represents the
/// span. Spans without a usable frame are skipped, so the result may
/// hold fewer than `count` entries.
pub fn select_frames(
    frames: &[VideoFrame],
    count: usize,
    detect: &mut dyn FnMut(&VideoFrame) -> Vec<FaceDetection>,
) -> Result<Vec<SelectedFrame>, SelectError> {
    if frames.is_empty() || count == 0 {
        return Err(SelectError::NoUsableFrames);
    }

    let mut selected = Vec::with_capacity(count);

    for span in 0..count {
        let start = span * frames.len() / count;
        let end = ((span + 1) * frames.len() / count).max(start + 1);
        let step = ((end - start) / SAMPLES_PER_SPAN).max(1);

        let mut best: Option<SelectedFrame> = None;

        for idx in (start..end.min(frames.len()))
            .step_by(step)
            .take(SAMPLES_PER_SPAN)
        {
            let frame = &frames[idx];
            let mut faces = detect(frame);
            if faces.len() != 1 {
                continue;
            }
            let face = faces.remove(0);
            let quality = quality_score(frame, &face);

            if best.as_ref().map_or(true, |b| quality > b.quality) {
                best = Some(SelectedFrame {
                    frame: frame.clone(),
                    detection: face,
                    quality,
                });
            }
        }

        if let Some(chosen) = best {
            tracing::trace!(
                span,
                frame = chosen.frame.index(),
                quality = chosen.quality,
                "span representative"
            );
            selected.push(chosen);
        }
    }

    if selected.is_empty() {
        return Err(SelectError::NoUsableFrames);
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(value: u8, index: usize) -> VideoFrame {
        VideoFrame::new(vec![value; 64 * 64 * 3], 64, 64, index)
    }

    fn textured_frame(index: usize) -> VideoFrame {
        let mut data = vec![0u8; 64 * 64 * 3];
        for y in 0..64 {
            for x in 0..64 {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                for c in 0..3 {
                    data[(y * 64 + x) * 3 + c] = v;
                }
            }
        }
        VideoFrame::new(data, 64, 64, index)
    }

    fn face_at(x: f32, y: f32, w: f32, h: f32) -> FaceDetection {
        FaceDetection {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    fn centered_face() -> FaceDetection {
        face_at(16.0, 16.0, 32.0, 32.0)
    }

    #[test]
    fn test_quality_prefers_larger_face() {
        let frame = flat_frame(128, 0);
        let big = quality_score(&frame, &face_at(16.0, 16.0, 32.0, 32.0));
        let small = quality_score(&frame, &face_at(24.0, 24.0, 16.0, 16.0));
        assert!(big > small);
    }

    #[test]
    fn test_quality_prefers_centered_face() {
        let frame = flat_frame(128, 0);
        let centered = quality_score(&frame, &face_at(24.0, 24.0, 16.0, 16.0));
        let corner = quality_score(&frame, &face_at(0.0, 0.0, 16.0, 16.0));
        assert!(centered > corner);
    }

    #[test]
    fn test_quality_prefers_sharp_frame() {
        let face = centered_face();
        let sharp = quality_score(&textured_frame(0), &face);
        let soft = quality_score(&flat_frame(128, 0), &face);
        assert!(sharp > soft);
    }

    #[test]
    fn test_validate_accepts_single_face_clip() {
        let frames: Vec<VideoFrame> = (0..30).map(|i| flat_frame(100, i)).collect();
        let mut detect = |_: &VideoFrame| vec![centered_face()];
        assert!(validate_clip(&frames, &mut detect).is_ok());
    }

    #[test]
    fn test_validate_rejects_crowd() {
        let frames: Vec<VideoFrame> = (0..30).map(|i| flat_frame(100, i)).collect();
        let mut detect = |_: &VideoFrame| vec![centered_face(), face_at(0.0, 0.0, 10.0, 10.0)];
        assert!(matches!(
            validate_clip(&frames, &mut detect),
            Err(SelectError::MultipleFaces { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_faceless_clip() {
        let frames: Vec<VideoFrame> = (0..30).map(|i| flat_frame(100, i)).collect();
        let mut detect = |_: &VideoFrame| Vec::new();
        assert!(matches!(
            validate_clip(&frames, &mut detect),
            Err(SelectError::TooFewFaces { .. })
        ));
    }

    #[test]
    fn test_validate_tolerates_occasional_second_face() {
        // 5 multi-face frames is within tolerance, and 25 valid frames remain.
        let frames: Vec<VideoFrame> = (0..30).map(|i| flat_frame(100, i)).collect();
        let mut detect = |f: &VideoFrame| {
            if f.index() < 5 {
                vec![centered_face(), face_at(0.0, 0.0, 10.0, 10.0)]
            } else {
                vec![centered_face()]
            }
        };
        assert!(validate_clip(&frames, &mut detect).is_ok());
    }

    #[test]
    fn test_select_one_frame_per_span() {
        let frames: Vec<VideoFrame> = (0..60).map(|i| flat_frame(100, i)).collect();
        let mut detect = |_: &VideoFrame| vec![centered_face()];
        let selected = select_frames(&frames, 3, &mut detect).unwrap();
        assert_eq!(selected.len(), 3);
        // Representatives come from successive thirds of the clip.
        assert!(selected[0].frame.index() < 20);
        assert!((20..40).contains(&selected[1].frame.index()));
        assert!(selected[2].frame.index() >= 40);
    }

    #[test]
    fn test_select_prefers_sharp_frames() {
        // One textured frame in each half; everything else flat.
        let mut frames: Vec<VideoFrame> = (0..20).map(|i| flat_frame(100, i)).collect();
        frames[7] = textured_frame(7);
        frames[13] = textured_frame(13);
        let mut detect = |_: &VideoFrame| vec![centered_face()];
        let selected = select_frames(&frames, 2, &mut detect).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].frame.index(), 7);
        assert_eq!(selected[1].frame.index(), 13);
    }

    #[test]
    fn test_select_skips_multi_face_frames() {
        let frames: Vec<VideoFrame> = (0..10).map(|i| flat_frame(100, i)).collect();
        // Two faces everywhere except frame 4.
        let mut detect = |f: &VideoFrame| {
            if f.index() == 4 {
                vec![centered_face()]
            } else {
                vec![centered_face(), face_at(0.0, 0.0, 10.0, 10.0)]
            }
        };
        let selected = select_frames(&frames, 1, &mut detect).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].frame.index(), 4);
    }

    #[test]
    fn test_select_no_usable_frames() {
        let frames: Vec<VideoFrame> = (0..10).map(|i| flat_frame(100, i)).collect();
        let mut detect = |_: &VideoFrame| Vec::new();
        assert!(matches!(
            select_frames(&frames, 3, &mut detect),
            Err(SelectError::NoUsableFrames)
        ));
    }

    #[test]
    fn test_select_more_spans_than_frames() {
        let frames: Vec<VideoFrame> = (0..3).map(|i| flat_frame(100, i)).collect();
        let mut detect = |_: &VideoFrame| vec![centered_face()];
        let selected = select_frames(&frames, 10, &mut detect).unwrap();
        assert!(!selected.is_empty());
        assert!(selected.len() <= 10);
    }

    #[test]
    fn test_select_empty_clip() {
        let mut detect = |_: &VideoFrame| vec![centered_face()];
        assert!(select_frames(&[], 3, &mut detect).is_err());
    }
}
