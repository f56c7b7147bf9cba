//! Capture artifact layout.
//!
//! Alongside the galleries, each registration or verification can leave
//! an audit trail: the raw clip, the frames that were selected, the
//! aligned crops fed to the embedder and the comparison outcomes. Each
//! artifact class lives in its own per-identity subtree:
//!
//! ```text
//! <base>/video/employee_<id>/capture_<ts>.mp4
//! <base>/frames/employee_<id>/frame_<n>.png
//! <base>/aligned/employee_<id>/aligned_<n>.png
//! <base>/comparisons/employee_<id>/comparison_<ts>.json
//! ```

use crate::gallery::{validate_identity, StoreError};
use chrono::Utc;
use facegate_core::types::{AlignedFace, MatchResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Artifact persistence rooted at a data directory.
pub struct DataLayout {
    base: PathBuf,
}

impl DataLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn class_dir(&self, class: &str, employee_id: &str) -> Result<PathBuf, StoreError> {
        validate_identity(employee_id)?;
        let dir = self.base.join(class).join(format!("employee_{employee_id}"));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn timestamp() -> String {
        Utc::now().format("%Y%m%d_%H%M%S%3f").to_string()
    }

    /// Persist the raw capture clip.
    pub fn save_video(
        &self,
        employee_id: &str,
        bytes: &[u8],
        extension: &str,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.class_dir("video", employee_id)?;
        let path = dir.join(format!("capture_{}.{extension}", Self::timestamp()));
        fs::write(&path, bytes)?;
        tracing::debug!(employee_id, path = %path.display(), bytes = bytes.len(), "saved clip");
        Ok(path)
    }

    /// Persist one selected frame as PNG.
    pub fn save_frame(
        &self,
        employee_id: &str,
        index: usize,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.class_dir("frames", employee_id)?;
        let path = dir.join(format!("frame_{index}.png"));
        write_png(&path, rgb, width, height)?;
        Ok(path)
    }

    /// Persist one aligned crop as PNG.
    pub fn save_aligned(
        &self,
        employee_id: &str,
        index: usize,
        aligned: &AlignedFace,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.class_dir("aligned", employee_id)?;
        let path = dir.join(format!("aligned_{index}.png"));
        write_png(&path, aligned.data(), aligned.size(), aligned.size())?;
        Ok(path)
    }

    /// Persist a comparison outcome as timestamped JSON.
    pub fn save_comparison(
        &self,
        employee_id: &str,
        result: &MatchResult,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.class_dir("comparisons", employee_id)?;
        let path = dir.join(format!("comparison_{}.json", Self::timestamp()));
        let json = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "matched": result.matched,
            "similarity": result.similarity,
            "employee_id": result.employee_id,
            "message": result.message,
        });
        let body = serde_json::to_vec_pretty(&json).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("json encode: {e}"),
        })?;
        fs::write(&path, body)?;
        tracing::debug!(employee_id, matched = result.matched, path = %path.display(), "saved comparison");
        Ok(path)
    }
}

fn write_png(path: &Path, rgb: &[u8], width: u32, height: u32) -> Result<(), StoreError> {
    let img = image::RgbImage::from_raw(width, height, rgb.to_vec()).ok_or_else(|| {
        StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("buffer does not match {width}x{height} rgb"),
        }
    })?;
    img.save(path).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("png encode: {e}"),
    })?;
    Ok(())
}
