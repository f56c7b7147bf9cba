//! facegate-video — clip decoding and representative-frame selection.
//!
//! Decodes capture clips with ffmpeg, validates that exactly one person
//! is on camera, and picks the sharpest well-framed frames for
//! embedding extraction.

pub mod container;
pub mod decoder;
pub mod frame;
pub mod selector;

pub use container::{sniff_format, ContainerFormat, VideoInput};
pub use decoder::{decode_clip, ClipMetadata, DecodeError};
pub use frame::VideoFrame;
pub use selector::{select_frames, validate_clip, SelectError, SelectedFrame};
