//! The pipeline engine: a dedicated OS thread owning all inference
//! state, driven through an async handle.
//!
//! Model sessions are not shared across threads; the engine thread owns
//! them and serializes requests, so concurrent callers queue rather
//! than race.

use crate::config::Config;
use chrono::Utc;
use facegate_core::embedder::EmbedderError;
use facegate_core::facefinder::{DetectorModelPaths, FaceFinderError};
use facegate_core::types::{Embedding, Gallery, MatchResult, StoredEmbedding, MAX_EMBEDDINGS_PER_IDENTITY};
use facegate_core::{matcher, EmbeddingExtractor, FaceFinder};
use facegate_store::{DataLayout, GalleryStore, StoreError};
use facegate_video::selector::{SelectedFrame, SelectError};
use facegate_video::{decode_clip, selector, sniff_format, DecodeError, VideoInput};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("selection error: {0}")]
    Select(#[from] SelectError),
    #[error("detector error: {0}")]
    Detector(#[from] FaceFinderError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("no face detected in any selected frame")]
    NoFaceDetected,
    #[error("only {got} usable frames, registration needs {need}")]
    InsufficientFrames { got: usize, need: usize },
    #[error("no gallery found for {0}")]
    NoGalleryFound(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of registering an identity.
#[derive(Debug, Serialize)]
pub struct RegisterOutcome {
    pub employee_id: String,
    pub frames_processed: usize,
    pub embeddings_stored: usize,
    pub mean_similarity: f32,
    pub gallery_path: String,
}

/// Emitted when a verification or identification names someone.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEvent {
    pub employee_id: String,
    pub similarity: f32,
    pub timestamp: String,
}

/// Outcome of a verification or identification.
#[derive(Debug, Serialize)]
pub struct VerifyOutcome {
    pub result: MatchResult,
    pub event: Option<AttendanceEvent>,
}

/// Liveness and inventory snapshot.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub backend: &'static str,
    pub primary_detector: bool,
    pub enrolled_identities: usize,
}

enum EngineRequest {
    Register {
        employee_id: String,
        input: VideoInput,
        reply: oneshot::Sender<Result<RegisterOutcome, EngineError>>,
    },
    Verify {
        /// `Some` verifies a claimed identity; `None` identifies
        /// against every gallery.
        employee_id: Option<String>,
        input: VideoInput,
        reply: oneshot::Sender<Result<VerifyOutcome, EngineError>>,
    },
    Health {
        reply: oneshot::Sender<Result<HealthReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Register an identity from a capture clip.
    pub async fn register_from_video(
        &self,
        employee_id: String,
        input: VideoInput,
    ) -> Result<RegisterOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                employee_id,
                input,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Verify a clip against one claimed identity.
    pub async fn verify_from_video(
        &self,
        employee_id: String,
        input: VideoInput,
    ) -> Result<VerifyOutcome, EngineError> {
        self.verify_inner(Some(employee_id), input).await
    }

    /// Identify a clip against every enrolled identity.
    pub async fn identify_from_video(
        &self,
        input: VideoInput,
    ) -> Result<VerifyOutcome, EngineError> {
        self.verify_inner(None, input).await
    }

    async fn verify_inner(
        &self,
        employee_id: Option<String>,
        input: VideoInput,
    ) -> Result<VerifyOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                employee_id,
                input,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn health_check(&self) -> Result<HealthReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Health { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

struct Engine {
    finder: FaceFinder,
    extractor: EmbeddingExtractor,
    store: GalleryStore,
    layout: DataLayout,
    config: Config,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the detectors and the embedding backend synchronously so a
/// broken installation fails at startup, then enters the request loop.
pub fn spawn_engine(config: Config) -> Result<EngineHandle, EngineError> {
    let paths = DetectorModelPaths {
        scrfd: config.scrfd_model_path(),
        cascade: config.cascade_model_path(),
        landmarks: Some(config.landmark_model_path()),
    };
    let finder = FaceFinder::load(&paths, config.detector_threshold, config.fallback_threshold)?;
    let extractor = EmbeddingExtractor::load(config.backend, &config.arcface_model_path());

    let store = GalleryStore::new(&config.data_dir);
    let layout = DataLayout::new(&config.data_dir);

    tracing::info!(
        data_dir = %config.data_dir.display(),
        backend = extractor.backend_name(),
        primary_detector = finder.has_primary(),
        "engine resources loaded"
    );

    let mut engine = Engine {
        finder,
        extractor,
        store,
        layout,
        config,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register {
                        employee_id,
                        input,
                        reply,
                    } => {
                        let _ = reply.send(engine.run_register(&employee_id, input));
                    }
                    EngineRequest::Verify {
                        employee_id,
                        input,
                        reply,
                    } => {
                        let _ = reply.send(engine.run_verify(employee_id.as_deref(), input));
                    }
                    EngineRequest::Health { reply } => {
                        let _ = reply.send(engine.run_health());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

impl Engine {
    /// Decode, validate, select and embed; shared by both operations.
    fn selected_embeddings(
        &mut self,
        input: VideoInput,
        count: usize,
    ) -> Result<Vec<(SelectedFrame, Embedding, facegate_core::AlignedFace)>, EngineError> {
        let (meta, frames) = decode_clip(input)?;
        tracing::debug!(
            width = meta.width,
            height = meta.height,
            frames = frames.len(),
            codec = %meta.codec,
            "clip decoded"
        );

        let finder = &mut self.finder;
        let mut detect =
            |f: &facegate_video::VideoFrame| finder.detect(f.data(), f.width(), f.height());

        selector::validate_clip(&frames, &mut detect)?;
        let selected = selector::select_frames(&frames, count, &mut detect)?;

        let mut out = Vec::with_capacity(selected.len());
        for sel in selected {
            match self.extractor.extract(
                sel.frame.data(),
                sel.frame.width(),
                sel.frame.height(),
                &sel.detection,
            ) {
                Ok((embedding, aligned)) => out.push((sel, embedding, aligned)),
                Err(e) => {
                    tracing::warn!(frame = sel.frame.index(), error = %e, "embedding failed, skipping frame");
                }
            }
        }

        if out.is_empty() {
            return Err(EngineError::NoFaceDetected);
        }
        Ok(out)
    }

    fn run_register(
        &mut self,
        employee_id: &str,
        input: VideoInput,
    ) -> Result<RegisterOutcome, EngineError> {
        // Keep the raw clip for the audit trail before decode consumes it.
        let clip_copy = if self.config.keep_artifacts {
            match &input {
                VideoInput::Bytes(bytes) => {
                    sniff_format(bytes).map(|f| (bytes.clone(), f.extension()))
                }
                VideoInput::Path(_) => None,
            }
        } else {
            None
        };

        let embedded = self.selected_embeddings(input, self.config.frames_per_register)?;
        let records = embedded
            .iter()
            .map(|(sel, emb, _)| {
                let d = &sel.detection;
                (emb.clone(), [d.x, d.y, d.width, d.height], d.confidence)
            })
            .collect();
        let outcome = self.register_records(employee_id, records)?;

        if self.config.keep_artifacts {
            self.save_register_artifacts(employee_id, &embedded, clip_copy);
        }

        Ok(outcome)
    }

    /// Gallery assembly and persistence half of registration, once the
    /// clip has been reduced to embedding records.
    fn register_records(
        &self,
        employee_id: &str,
        records: Vec<(Embedding, [f32; 4], f32)>,
    ) -> Result<RegisterOutcome, EngineError> {
        let need = self.config.frames_per_register;
        if records.len() < need {
            return Err(EngineError::InsufficientFrames {
                got: records.len(),
                need,
            });
        }
        let frames_processed = records.len();

        let gallery = build_gallery(employee_id, records);
        self.store.save(&gallery)?;
        let gallery_path = self.store.gallery_path(employee_id)?;

        let mean_similarity = mean_cohesion(&gallery);
        tracing::info!(
            employee_id,
            embeddings = gallery.embeddings.len(),
            mean_similarity,
            "identity registered"
        );

        Ok(RegisterOutcome {
            employee_id: employee_id.to_string(),
            frames_processed,
            embeddings_stored: gallery.embeddings.len(),
            mean_similarity,
            gallery_path: gallery_path.to_string_lossy().into_owned(),
        })
    }

    /// Artifact persistence is best-effort: failures are logged, never
    /// propagated, since the gallery is already safely written.
    fn save_register_artifacts(
        &self,
        employee_id: &str,
        embedded: &[(SelectedFrame, Embedding, facegate_core::AlignedFace)],
        clip_copy: Option<(Vec<u8>, &str)>,
    ) {
        if let Some((bytes, ext)) = clip_copy {
            if let Err(e) = self.layout.save_video(employee_id, &bytes, ext) {
                tracing::warn!(employee_id, error = %e, "could not save clip artifact");
            }
        }
        for (i, (sel, _, aligned)) in embedded.iter().enumerate() {
            if let Err(e) = self.layout.save_frame(
                employee_id,
                i,
                sel.frame.data(),
                sel.frame.width(),
                sel.frame.height(),
            ) {
                tracing::warn!(employee_id, frame = i, error = %e, "could not save frame artifact");
            }
            if let Err(e) = self.layout.save_aligned(employee_id, i, aligned) {
                tracing::warn!(employee_id, frame = i, error = %e, "could not save aligned artifact");
            }
        }
    }

    fn run_verify(
        &mut self,
        employee_id: Option<&str>,
        input: VideoInput,
    ) -> Result<VerifyOutcome, EngineError> {
        let embedded = self.selected_embeddings(input, self.config.frames_per_verify)?;
        let queries: Vec<Embedding> = embedded.iter().map(|(_, e, _)| e.clone()).collect();
        self.verify_queries(employee_id, &queries)
    }

    /// Matching, audit trail and event emission half of verification.
    fn verify_queries(
        &self,
        employee_id: Option<&str>,
        queries: &[Embedding],
    ) -> Result<VerifyOutcome, EngineError> {
        let result = match employee_id {
            Some(id) => {
                let gallery = match self.store.load(id) {
                    Ok(g) => g,
                    Err(StoreError::NotFound(id)) => return Err(EngineError::NoGalleryFound(id)),
                    Err(e) => return Err(e.into()),
                };
                matcher::match_against(queries, &gallery, self.config.verify_threshold)
            }
            None => {
                let galleries = self.store.load_all()?;
                if galleries.is_empty() {
                    return Err(EngineError::NoGalleryFound("any identity".to_string()));
                }
                matcher::identify(queries, &galleries, self.config.identify_threshold)
            }
        };

        if self.config.keep_artifacts {
            let audit_id = employee_id.unwrap_or(if result.matched {
                result.employee_id.as_str()
            } else {
                "unknown"
            });
            if let Err(e) = self.layout.save_comparison(audit_id, &result) {
                tracing::warn!(error = %e, "could not save comparison artifact");
            }
        }

        let event = result.matched.then(|| {
            let event = AttendanceEvent {
                employee_id: result.employee_id.clone(),
                similarity: result.similarity,
                timestamp: Utc::now().to_rfc3339(),
            };
            tracing::info!(
                employee_id = %event.employee_id,
                similarity = event.similarity,
                "attendance recorded"
            );
            event
        });

        Ok(VerifyOutcome { result, event })
    }

    fn run_health(&self) -> Result<HealthReport, EngineError> {
        Ok(HealthReport {
            backend: self.extractor.backend_name(),
            primary_detector: self.finder.has_primary(),
            enrolled_identities: self.store.list_identities()?.len(),
        })
    }
}

/// Assemble a gallery from extracted embeddings: cap at
/// [`MAX_EMBEDDINGS_PER_IDENTITY`], compute the mean, stamp the time.
pub fn build_gallery(
    employee_id: &str,
    mut records: Vec<(Embedding, [f32; 4], f32)>,
) -> Gallery {
    records.truncate(MAX_EMBEDDINGS_PER_IDENTITY);

    let embeddings: Vec<StoredEmbedding> = records
        .into_iter()
        .map(|(embedding, bbox, confidence)| StoredEmbedding {
            embedding,
            bbox,
            confidence,
        })
        .collect();

    let vectors: Vec<Embedding> = embeddings.iter().map(|s| s.embedding.clone()).collect();
    let mean = Embedding::mean_of(&vectors);

    Gallery {
        employee_id: employee_id.to_string(),
        embeddings,
        mean: (!mean.is_empty()).then_some(mean),
        created_at: Utc::now().to_rfc3339(),
    }
}

/// How tightly the stored embeddings cluster around their mean. A
/// sanity signal for registration quality, not a gate.
fn mean_cohesion(gallery: &Gallery) -> f32 {
    let Some(mean) = &gallery.mean else {
        return 0.0;
    };
    if gallery.embeddings.is_empty() {
        return 0.0;
    }
    let sum: f32 = gallery
        .embeddings
        .iter()
        .map(|s| s.embedding.similarity(mean))
        .sum();
    sum / gallery.embeddings.len() as f32
}
