//! Pixel-format conversion and geometric downscaling to the layout a bot
//! requested.
//!
//! The converter holds at most one scaling context, keyed by the full
//! source/destination tuple. A mid-stream change in source geometry or
//! pixel format discards and rebuilds it.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::scaling;

use crate::error::MediaError;
use crate::frame::{ImageSize, PixelFormat, RawFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScalerKey {
    src_width: u32,
    src_height: u32,
    src_format: ffmpeg::format::Pixel,
    dst_width: u32,
    dst_height: u32,
    dst_format: ffmpeg::format::Pixel,
}

/// Converts decoded frames to the geometry and pixel format of a bot
/// descriptor.
pub struct FrameConverter {
    requested: ImageSize,
    format: PixelFormat,
    cached: Option<(ScalerKey, scaling::Context)>,
}

impl FrameConverter {
    pub fn new(requested: ImageSize, format: PixelFormat) -> Self {
        FrameConverter {
            requested,
            format,
            cached: None,
        }
    }

    /// Resolve the output geometry for a source frame.
    ///
    /// The `original` sentinel keeps the source size. A source already
    /// within the requested box passes through untouched; the framework
    /// downscales but never upscales a frame that fits. Anything larger is
    /// scaled to the requested size exactly, without preserving aspect
    /// ratio.
    pub fn target_size(&self, src_width: u32, src_height: u32) -> (u32, u32) {
        if self.requested.is_original() {
            return (src_width, src_height);
        }
        let req_width = self.requested.width as u32;
        let req_height = self.requested.height as u32;
        if src_width <= req_width && src_height <= req_height {
            (src_width, src_height)
        } else {
            (req_width, req_height)
        }
    }

    /// Convert one decoded frame to the bot's layout.
    pub fn convert(&mut self, src: &RawFrame) -> Result<ffmpeg::frame::Video, MediaError> {
        let (dst_width, dst_height) = self.target_size(src.width(), src.height());
        let key = ScalerKey {
            src_width: src.width(),
            src_height: src.height(),
            src_format: src.format(),
            dst_width,
            dst_height,
            dst_format: self.format.to_av(),
        };

        let mut scaler = match self.cached.take() {
            Some((cached_key, context)) if cached_key == key => context,
            Some((cached_key, _)) => {
                tracing::info!(
                    src_width = key.src_width,
                    src_height = key.src_height,
                    src_format = ?key.src_format,
                    prev_width = cached_key.src_width,
                    prev_height = cached_key.src_height,
                    "source changed mid-stream, rebuilding scaler"
                );
                build_scaler(&key)?
            }
            None => build_scaler(&key)?,
        };

        let mut output = ffmpeg::frame::Video::empty();
        let result = scaler.run(src.video(), &mut output);
        self.cached = Some((key, scaler));
        result.map_err(MediaError::ConvertTransient)?;

        Ok(output)
    }
}

fn build_scaler(key: &ScalerKey) -> Result<scaling::Context, MediaError> {
    tracing::debug!(
        src = format_args!("{}x{}:{:?}", key.src_width, key.src_height, key.src_format),
        dst = format_args!("{}x{}:{:?}", key.dst_width, key.dst_height, key.dst_format),
        "allocating scaler"
    );
    scaling::Context::get(
        key.src_format,
        key.src_width,
        key.src_height,
        key.dst_format,
        key.dst_width,
        key.dst_height,
        scaling::Flags::FAST_BILINEAR,
    )
    .map_err(MediaError::ConvertTransient)
}
