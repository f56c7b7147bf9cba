use serde::{Deserialize, Serialize};

/// Most embeddings a single identity's gallery may hold. Registration
/// truncates anything beyond this.
pub const MAX_EMBEDDINGS_PER_IDENTITY: usize = 10;

/// A detected face: bounding box, detector confidence and optional
/// five-point landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    /// `None` when the detection strategy could not locate landmarks.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceDetection {
    /// Bounding-box area in square pixels.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Bounding-box center.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// A face crop warped into the canonical ArcFace pose. RGB, square,
/// immutable after creation.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    data: Vec<u8>,
    size: u32,
}

impl AlignedFace {
    /// Wrap an RGB buffer of exactly `size * size * 3` bytes.
    pub fn new(data: Vec<u8>, size: u32) -> Self {
        debug_assert_eq!(data.len(), (size * size * 3) as usize);
        Self { data, size }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Side length in pixels (the crop is always square).
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Face embedding vector (512-dimensional for ArcFace, 128 for the
/// histogram backend). An empty `values` vec is the explicit
/// "extraction failed" sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// The invalid sentinel: no values at all.
    pub fn empty() -> Self {
        Self { values: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2 norm of the vector.
    pub fn l2_norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Scale to unit L2 norm. The zero vector is left untouched — it is
    /// the invalid sentinel and must stay recognizable as such.
    pub fn normalize(&mut self) {
        let norm = self.l2_norm();
        if norm > 1e-6 {
            for v in &mut self.values {
                *v /= norm;
            }
        }
    }

    /// Cosine similarity in [-1, 1]. Tolerates non-normalized inputs and
    /// clamps the result to absorb floating-point drift.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Arithmetic mean of a set of same-dimension embeddings. Returns the
    /// empty sentinel for an empty or mixed-dimension input.
    pub fn mean_of(embeddings: &[Embedding]) -> Embedding {
        let Some(first) = embeddings.first() else {
            return Embedding::empty();
        };
        let dim = first.dim();
        if embeddings.iter().any(|e| e.dim() != dim) {
            return Embedding::empty();
        }

        let mut mean = vec![0.0f32; dim];
        for e in embeddings {
            for (m, v) in mean.iter_mut().zip(e.values.iter()) {
                *m += v;
            }
        }
        let n = embeddings.len() as f32;
        for m in &mut mean {
            *m /= n;
        }
        Embedding::new(mean)
    }
}

/// A gallery embedding plus the detection metadata it was extracted from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub embedding: Embedding,
    /// Source bounding box [x, y, width, height] in the original frame.
    pub bbox: [f32; 4],
    pub confidence: f32,
}

/// All stored embeddings for one enrolled identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gallery {
    pub employee_id: String,
    pub embeddings: Vec<StoredEmbedding>,
    /// Mean of the individual embeddings, compared alongside them.
    pub mean: Option<Embedding>,
    /// When the gallery was written, RFC 3339. Empty for legacy galleries.
    pub created_at: String,
}

/// Outcome of matching query embeddings against one or more galleries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Best cosine similarity observed, in [-1, 1].
    pub similarity: f32,
    /// Identity of the best match; empty when nothing was compared.
    pub employee_id: String,
    pub message: String,
}

impl MatchResult {
    pub fn no_match(similarity: f32, message: impl Into<String>) -> Self {
        Self {
            matched: false,
            similarity,
            employee_id: String::new(),
            message: message.into(),
        }
    }
}
