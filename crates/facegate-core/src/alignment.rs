//! Face alignment via 4-DOF similarity transform.
//!
//! Warps detected faces into the canonical ArcFace pose using the five
//! InsightFace reference landmarks and least-squares estimation. When
//! the similarity fit is poor (an outlier landmark, usually a mouth
//! corner under occlusion) the eyes-and-nose affine fallback takes
//! over.

use crate::types::AlignedFace;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("degenerate landmark geometry, no usable transform")]
    DegenerateLandmarks,
}

/// ArcFace reference landmarks for a 112×112 output. Scaled linearly
/// for other output sizes.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Mean per-landmark residual (in output pixels) above which the
/// similarity fit is considered contaminated by an outlier.
const RESIDUAL_LIMIT: f32 = 10.0;

/// A 2×3 affine matrix [a, b, tx, c, d, ty]:
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// ```
type Affine = [f32; 6];

/// Estimate a 4-DOF similarity transform (scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks via least-squares.
///
/// `None` when the normal equations are singular (coincident landmarks).
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Affine> {
    // Overdetermined system A * [a, b, tx, ty]^T = B.
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb)?;
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    Some([a, -b, tx, b, a, ty])
}

/// Solve a 4×4 linear system via Gaussian elimination with partial
/// pivoting. `None` on a singular system.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    Some(x)
}

/// Exact 6-DOF affine from three correspondences (eyes and nose).
///
/// Returns `None` when the three points are (near-)collinear.
fn affine_from_three(src: &[(f32, f32); 3], dst: &[(f32, f32); 3]) -> Option<Affine> {
    let (x0, y0) = src[0];
    let (x1, y1) = src[1];
    let (x2, y2) = src[2];

    let det = (x1 - x0) * (y2 - y0) - (x2 - x0) * (y1 - y0);
    if det.abs() < 1e-6 {
        return None;
    }

    // Cramer's rule per output coordinate.
    let solve_row = |d0: f32, d1: f32, d2: f32| -> (f32, f32, f32) {
        let p = ((d1 - d0) * (y2 - y0) - (d2 - d0) * (y1 - y0)) / det;
        let q = ((x1 - x0) * (d2 - d0) - (x2 - x0) * (d1 - d0)) / det;
        let t = d0 - p * x0 - q * y0;
        (p, q, t)
    };

    let (a, b, tx) = solve_row(dst[0].0, dst[1].0, dst[2].0);
    let (c, d, ty) = solve_row(dst[0].1, dst[1].1, dst[2].1);

    Some([a, b, tx, c, d, ty])
}

fn apply(m: &Affine, p: (f32, f32)) -> (f32, f32) {
    (
        m[0] * p.0 + m[1] * p.1 + m[2],
        m[3] * p.0 + m[4] * p.1 + m[5],
    )
}

/// Mean Euclidean distance between transformed src and dst landmarks.
fn mean_residual(m: &Affine, src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> f32 {
    let mut sum = 0.0f32;
    for i in 0..5 {
        let (px, py) = apply(m, src[i]);
        sum += ((px - dst[i].0).powi(2) + (py - dst[i].1).powi(2)).sqrt();
    }
    sum / 5.0
}

/// Apply a 2×3 affine warp to an RGB frame.
///
/// Bilinear interpolation; out-of-bounds pixels fill with black.
fn warp_affine_rgb(
    frame: &[u8],
    src_width: usize,
    src_height: usize,
    matrix: &Affine,
    out_size: usize,
) -> Vec<u8> {
    let [a, b, tx, c, d, ty] = *matrix;

    let det = a * d - b * c;
    if det.abs() < 1e-12 {
        return vec![0u8; out_size * out_size * 3];
    }
    let inv_det = 1.0 / det;

    // Inverse of the 2x2 part.
    let ia = d * inv_det;
    let ib = -b * inv_det;
    let ic = -c * inv_det;
    let id = a * inv_det;

    let mut output = vec![0u8; out_size * out_size * 3];

    for oy in 0..out_size {
        for ox in 0..out_size {
            // Map output pixel back to source: src = M_inv * (dst - t)
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = ic * dx + id * dy;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let x1 = x0 + 1;
            let y1 = y0 + 1;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            for ch in 0..3 {
                let sample = |x: i32, y: i32| -> f32 {
                    if x >= 0 && x < src_width as i32 && y >= 0 && y < src_height as i32 {
                        frame[(y as usize * src_width + x as usize) * 3 + ch] as f32
                    } else {
                        0.0
                    }
                };

                let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + sample(x1, y0) * fx * (1.0 - fy)
                    + sample(x0, y1) * (1.0 - fx) * fy
                    + sample(x1, y1) * fx * fy;

                output[(oy * out_size + ox) * 3 + ch] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    output
}

/// Reference landmarks scaled to an arbitrary square output.
fn reference_landmarks(out_size: u32) -> [(f32, f32); 5] {
    let s = out_size as f32 / 112.0;
    std::array::from_fn(|i| {
        let (x, y) = REFERENCE_LANDMARKS_112[i];
        (x * s, y * s)
    })
}

/// Align a detected face to a canonical square crop.
///
/// Takes an RGB frame and five detected landmarks, fits the similarity
/// transform to the reference positions and warps the face region. A
/// poor similarity fit retries with an exact affine over eyes and nose;
/// when that also fails (coincident or collinear landmarks, e.g. from a
/// zero-size detection box) the landmarks carry no usable geometry and
/// alignment errors rather than producing a garbage crop.
pub fn align_face(
    frame: &[u8],
    width: u32,
    height: u32,
    landmarks: &[(f32, f32); 5],
    out_size: u32,
) -> Result<AlignedFace, AlignmentError> {
    let reference = reference_landmarks(out_size);
    let limit = RESIDUAL_LIMIT * (out_size as f32 / 112.0);

    let similarity = estimate_similarity_transform(landmarks, &reference)
        .filter(|m| mean_residual(m, landmarks, &reference) <= limit);

    let matrix = match similarity {
        Some(m) => m,
        None => {
            let src3 = [landmarks[0], landmarks[1], landmarks[2]];
            let dst3 = [reference[0], reference[1], reference[2]];
            let affine = affine_from_three(&src3, &dst3)
                .ok_or(AlignmentError::DegenerateLandmarks)?;
            tracing::debug!("similarity fit poor, using eyes-nose affine");
            affine
        }
    };

    let data = warp_affine_rgb(
        frame,
        width as usize,
        height as usize,
        &matrix,
        out_size as usize,
    );
    Ok(AlignedFace::new(data, out_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        // When src == dst, transform should be identity-like (a≈1, b≈0)
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts).unwrap();

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → transform should have a ≈ 0.5
        let src: [(f32, f32); 5] = [
            (76.5892, 103.3926),
            (147.0636, 103.0028),
            (112.0504, 143.4732),
            (83.0986, 184.7310),
            (141.4598, 184.4082),
        ];
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112).unwrap();

        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_estimate_similarity_coincident_points() {
        let pts = [(50.0, 50.0); 5];
        assert!(estimate_similarity_transform(&pts, &REFERENCE_LANDMARKS_112).is_none());
    }

    #[test]
    fn test_affine_from_three_identity() {
        let pts = [(10.0, 10.0), (50.0, 12.0), (30.0, 40.0)];
        let m = affine_from_three(&pts, &pts).unwrap();
        for p in pts {
            let (x, y) = apply(&m, p);
            assert!((x - p.0).abs() < 1e-3);
            assert!((y - p.1).abs() < 1e-3);
        }
    }

    #[test]
    fn test_affine_from_three_collinear() {
        let src = [(0.0, 0.0), (10.0, 10.0), (20.0, 20.0)];
        let dst = [(0.0, 0.0), (10.0, 0.0), (20.0, 0.0)];
        assert!(affine_from_three(&src, &dst).is_none());
    }

    #[test]
    fn test_mean_residual_exact_fit() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts).unwrap();
        assert!(mean_residual(&m, &pts, &pts) < 0.01);
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = vec![128u8; 640 * 480 * 3];
        let aligned = align_face(&frame, 640, 480, &REFERENCE_LANDMARKS_112, ALIGNED_SIZE).unwrap();
        assert_eq!(aligned.size(), 112);
        assert_eq!(aligned.data().len(), 112 * 112 * 3);
    }

    #[test]
    fn test_align_face_custom_size() {
        let frame = vec![128u8; 320 * 240 * 3];
        let aligned = align_face(&frame, 320, 240, &REFERENCE_LANDMARKS_112, 96).unwrap();
        assert_eq!(aligned.size(), 96);
        assert_eq!(aligned.data().len(), 96 * 96 * 3);
    }

    #[test]
    fn test_align_face_coincident_landmarks_rejected() {
        // A zero-size detection box collapses every estimated landmark
        // onto one point; no transform can be fit from that.
        let frame = vec![128u8; 100 * 100 * 3];
        let pts = [(50.0, 50.0); 5];
        let err = align_face(&frame, 100, 100, &pts, ALIGNED_SIZE);
        assert!(matches!(err, Err(AlignmentError::DegenerateLandmarks)));
    }

    #[test]
    fn test_reference_landmarks_scaling() {
        let half = reference_landmarks(56);
        for (i, (x, y)) in half.iter().enumerate() {
            assert!((x - REFERENCE_LANDMARKS_112[i].0 / 2.0).abs() < 1e-4);
            assert!((y - REFERENCE_LANDMARKS_112[i].1 / 2.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_landmark_roundtrip() {
        // Place a bright patch at a landmark position, verify it lands near the
        // reference position after alignment.
        let w = 200usize;
        let h = 200usize;
        let mut frame = vec![0u8; w * h * 3];

        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // Paint a 5x5 bright patch at the left eye (survives bilinear interpolation)
        let lx = src_landmarks[0].0 as usize;
        let ly = src_landmarks[0].1 as usize;
        for dy in 0..5 {
            for dx in 0..5 {
                let px = lx.wrapping_sub(2) + dx;
                let py = ly.wrapping_sub(2) + dy;
                if px < w && py < h {
                    for c in 0..3 {
                        frame[(py * w + px) * 3 + c] = 255;
                    }
                }
            }
        }

        let aligned = align_face(&frame, w as u32, h as u32, &src_landmarks, ALIGNED_SIZE).unwrap();

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as usize;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as usize;

        let mut max_val = 0u8;
        for dy in 0..3 {
            for dx in 0..3 {
                let x = ref_x.wrapping_sub(1) + dx;
                let y = ref_y.wrapping_sub(1) + dy;
                if x < 112 && y < 112 {
                    max_val = max_val.max(aligned.data()[(y * 112 + x) * 3]);
                }
            }
        }
        assert!(max_val > 100, "Expected bright patch near reference left eye ({ref_x}, {ref_y}), max={max_val}");
    }
}
