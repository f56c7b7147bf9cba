//! Container sniffing and input materialization.
//!
//! Clips arrive either as a path or as an in-memory byte buffer (the
//! upload case). Byte buffers get sniffed for their container format
//! and spilled to a temp file so libavformat can probe them; the temp
//! file lives exactly as long as the handle.

use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("unrecognized container format (expected MP4, AVI or WebM)")]
    UnknownFormat,
    #[error("could not stage clip to temp file: {0}")]
    Staging(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp4,
    Avi,
    Webm,
}

impl ContainerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Avi => "avi",
            ContainerFormat::Webm => "webm",
        }
    }
}

/// Sniff the container format from magic bytes.
///
/// MP4: "ftyp" at offset 4. AVI: RIFF header with "AVI " type.
/// WebM: EBML magic 0x1A45DFA3.
pub fn sniff_format(bytes: &[u8]) -> Option<ContainerFormat> {
    if bytes.len() >= 12 {
        if &bytes[4..8] == b"ftyp" {
            return Some(ContainerFormat::Mp4);
        }
        if &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"AVI " {
            return Some(ContainerFormat::Avi);
        }
    }
    if bytes.len() >= 4 && bytes[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return Some(ContainerFormat::Webm);
    }
    None
}

/// A clip to be decoded: on disk already, or an uploaded buffer.
pub enum VideoInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A decodable path. Holds the temp file alive for the buffer case.
pub struct StagedClip {
    path: PathBuf,
    _temp: Option<tempfile::NamedTempFile>,
}

impl StagedClip {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VideoInput {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        VideoInput::Path(path.into())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        VideoInput::Bytes(bytes)
    }

    /// Produce a filesystem path for the decoder. Byte inputs are
    /// sniffed and written to a temp file with a matching extension.
    pub fn stage(self) -> Result<StagedClip, ContainerError> {
        match self {
            VideoInput::Path(path) => Ok(StagedClip { path, _temp: None }),
            VideoInput::Bytes(bytes) => {
                let format = sniff_format(&bytes).ok_or(ContainerError::UnknownFormat)?;
                let mut temp = tempfile::Builder::new()
                    .prefix("facegate-clip-")
                    .suffix(&format!(".{}", format.extension()))
                    .tempfile()?;
                temp.write_all(&bytes)?;
                temp.flush()?;

                tracing::debug!(
                    bytes = bytes.len(),
                    format = format.extension(),
                    path = %temp.path().display(),
                    "staged uploaded clip"
                );

                Ok(StagedClip {
                    path: temp.path().to_path_buf(),
                    _temp: Some(temp),
                })
            }
        }
    }
}
