//! Embedding extraction from aligned face crops.
//!
//! The primary backend is ArcFace (w600k_r50) via ONNX Runtime,
//! producing 512-dimensional L2-normalized embeddings. A grayscale
//! histogram backend stands in when the model cannot be loaded, so the
//! pipeline keeps producing comparable (if much weaker) vectors.

use crate::alignment;
use crate::raster;
use crate::types::{AlignedFace, Embedding, FaceDetection};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0 — ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;

const HISTOGRAM_BINS: usize = 128;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — alignment requires them")]
    NoLandmarks,
    #[error("alignment failed: {0}")]
    Alignment(#[from] alignment::AlignmentError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    ArcFace,
    Histogram,
}

/// A backend turns an aligned crop into an embedding vector.
pub trait EmbeddingBackend: Send {
    fn name(&self) -> &'static str;
    fn embed(&mut self, aligned: &AlignedFace) -> Result<Embedding, EmbedderError>;
}

/// ArcFace via ONNX Runtime.
pub struct ArcFaceBackend {
    session: Session,
}

impl ArcFaceBackend {
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Preprocess an aligned RGB crop into a NCHW float tensor, resizing
    /// to 112×112 when the crop was produced at another size.
    fn preprocess(aligned: &AlignedFace) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let crop;
        let rgb: &[u8] = if aligned.size() as usize == size {
            aligned.data()
        } else {
            crop = raster::resize_rgb(
                aligned.data(),
                aligned.size() as usize,
                aligned.size() as usize,
                size,
                size,
            );
            &crop
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            for x in 0..size {
                for c in 0..3 {
                    let pixel = rgb[(y * size + x) * 3 + c] as f32;
                    tensor[[0, c, y, x]] = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
                }
            }
        }

        tensor
    }
}

impl EmbeddingBackend for ArcFaceBackend {
    fn name(&self) -> &'static str {
        "arcface"
    }

    fn embed(&mut self, aligned: &AlignedFace) -> Result<Embedding, EmbedderError> {
        let input = Self::preprocess(aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw_data.len()
            )));
        }

        let mut embedding = Embedding::new(raw_data.to_vec());
        embedding.normalize();
        Ok(embedding)
    }
}

/// Grayscale intensity histogram over the aligned crop. Weak but
/// model-free; keeps the pipeline alive when no ONNX model is present.
pub struct HistogramBackend;

impl EmbeddingBackend for HistogramBackend {
    fn name(&self) -> &'static str {
        "histogram"
    }

    fn embed(&mut self, aligned: &AlignedFace) -> Result<Embedding, EmbedderError> {
        let size = aligned.size();
        let gray = raster::rgb_to_gray(aligned.data(), size, size);

        let mut bins = vec![0.0f32; HISTOGRAM_BINS];
        for &g in &gray {
            bins[g as usize * HISTOGRAM_BINS / 256] += 1.0;
        }
        let total = gray.len().max(1) as f32;
        for b in &mut bins {
            *b /= total;
        }

        let mut embedding = Embedding::new(bins);
        embedding.normalize();
        Ok(embedding)
    }
}

/// Aligns detections and delegates embedding to the active backend.
pub struct EmbeddingExtractor {
    backend: Box<dyn EmbeddingBackend>,
}

impl EmbeddingExtractor {
    /// Build an extractor for the requested backend. A failed ArcFace
    /// load degrades to the histogram backend with a warning rather
    /// than refusing to start.
    pub fn load(kind: BackendKind, model_path: &str) -> Self {
        let backend: Box<dyn EmbeddingBackend> = match kind {
            BackendKind::ArcFace => match ArcFaceBackend::load(model_path) {
                Ok(b) => Box::new(b),
                Err(e) => {
                    tracing::warn!(error = %e, "ArcFace unavailable, degrading to histogram backend");
                    Box::new(HistogramBackend)
                }
            },
            BackendKind::Histogram => Box::new(HistogramBackend),
        };
        tracing::info!(backend = backend.name(), "embedding backend ready");
        Self { backend }
    }

    pub fn with_backend(backend: Box<dyn EmbeddingBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Embed an already-aligned crop.
    pub fn embed(&mut self, aligned: &AlignedFace) -> Result<Embedding, EmbedderError> {
        self.backend.embed(aligned)
    }

    /// Align a detected face within its RGB frame, then embed it.
    /// The detection must carry landmarks.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &FaceDetection,
    ) -> Result<(Embedding, AlignedFace), EmbedderError> {
        let landmarks = face.landmarks.as_ref().ok_or(EmbedderError::NoLandmarks)?;
        let aligned =
            alignment::align_face(frame, width, height, landmarks, alignment::ALIGNED_SIZE)?;
        let embedding = self.backend.embed(&aligned)?;
        Ok((embedding, aligned))
    }
}
