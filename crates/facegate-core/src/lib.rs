//! facegate-core — Face detection, alignment and recognition engine.
//!
//! SCRFD for face detection (with a SeetaFace cascade fallback) and
//! ArcFace for face embeddings, both running via ONNX Runtime for CPU
//! inference. Matching is plain cosine similarity over per-identity
//! galleries.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod facefinder;
pub mod fallback;
pub mod matcher;
pub mod raster;
pub mod types;

pub use embedder::{BackendKind, EmbeddingExtractor};
pub use facefinder::{DetectorModelPaths, FaceFinder};
pub use types::{AlignedFace, Embedding, FaceDetection, Gallery, MatchResult, StoredEmbedding};
