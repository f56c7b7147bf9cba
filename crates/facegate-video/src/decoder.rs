//! Clip decoding via ffmpeg-next (libavformat + libavcodec).

use crate::container::{ContainerError, VideoInput};
use crate::frame::VideoFrame;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error("no video stream in clip")]
    NoVideoStream,
    #[error("clip decoded to zero frames")]
    EmptyClip,
    #[error("ffmpeg: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

/// Properties of an opened clip. `total_frames` is taken from the
/// container index and may be 0 for streams that do not declare it;
/// the decoded frame count is authoritative.
#[derive(Debug, Clone)]
pub struct ClipMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: usize,
    pub codec: String,
}

/// Decode a clip into memory: metadata plus every frame as RGB24.
///
/// Clips here are short capture bursts (a few seconds), so full
/// in-memory decode keeps frame selection simple.
pub fn decode_clip(input: VideoInput) -> Result<(ClipMetadata, Vec<VideoFrame>), DecodeError> {
    let staged = input.stage()?;
    decode_path(staged.path())
}

fn decode_path(path: &Path) -> Result<(ClipMetadata, Vec<VideoFrame>), DecodeError> {
    ffmpeg_next::init()?;

    let mut ictx = ffmpeg_next::format::input(path)?;

    let stream = ictx
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or(DecodeError::NoVideoStream)?;
    let stream_index = stream.index();
    let declared_frames = stream.frames().max(0) as usize;

    let rate = stream.rate();
    let fps = if rate.denominator() != 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        0.0
    };

    let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
    let mut decoder = codec_ctx.decoder().video()?;

    let width = decoder.width();
    let height = decoder.height();
    let codec = decoder
        .codec()
        .map(|c| c.name().to_string())
        .unwrap_or_default();

    let mut scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        width,
        height,
        ffmpeg_next::format::Pixel::RGB24,
        width,
        height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )?;

    let mut frames = Vec::with_capacity(declared_frames);

    let mut drain =
        |decoder: &mut ffmpeg_next::decoder::Video,
         scaler: &mut ffmpeg_next::software::scaling::Context,
         frames: &mut Vec<VideoFrame>|
         -> Result<(), DecodeError> {
            let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
                scaler.run(&decoded, &mut rgb)?;
                let pixels = strip_stride(&rgb, width, height);
                frames.push(VideoFrame::new(pixels, width, height, frames.len()));
            }
            Ok(())
        };

    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_ok() {
            drain(&mut decoder, &mut scaler, &mut frames)?;
        }
    }
    let _ = decoder.send_eof();
    drain(&mut decoder, &mut scaler, &mut frames)?;

    if frames.is_empty() {
        return Err(DecodeError::EmptyClip);
    }

    let metadata = ClipMetadata {
        width,
        height,
        fps,
        total_frames: frames.len(),
        codec,
    };

    tracing::debug!(
        path = %path.display(),
        width,
        height,
        fps,
        frames = frames.len(),
        codec = %metadata.codec,
        "decoded clip"
    );

    Ok((metadata, frames))
}

/// Strip row padding from an ffmpeg RGB frame into a packed buffer.
fn strip_stride(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;

    let mut pixels = Vec::with_capacity(w * height as usize * 3);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + w * 3]);
    }
    pixels
}
