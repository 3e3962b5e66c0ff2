//! Error kinds for the media layer.

use ffmpeg_next as ffmpeg;
use thiserror::Error;

/// Errors from the codec adapter, frame converter, and packet sources.
///
/// The transient kinds apply to a single packet or frame: the pipeline logs
/// them, drops the item, and keeps going. Every other kind is fatal to the
/// stream.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Codec, decoder, demuxer, or stream missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad size string, unsupported pixel format, malformed extradata.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Context or buffer allocation failure.
    #[error("allocation failed: {0}")]
    ResourceExhausted(String),

    /// Corrupt packet; skippable.
    #[error("transient decode error: {0}")]
    DecodeTransient(#[source] ffmpeg::Error),

    /// Scaler allocation or conversion failure for one frame; skippable.
    #[error("frame conversion failed: {0}")]
    ConvertTransient(#[source] ffmpeg::Error),

    /// Reading the next input event failed.
    #[error("source read failed: {0}")]
    SourceRead(#[source] ffmpeg::Error),
}

impl MediaError {
    /// Whether this error applies to a single packet or frame rather than
    /// the whole stream.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MediaError::DecodeTransient(_) | MediaError::ConvertTransient(_)
        )
    }
}
