//! Codec adapter: wraps libavcodec decoders behind a packet-in, frames-out
//! interface.
//!
//! The adapter owns the codec context and every decoded buffer. A single
//! packet may yield zero or more frames (reordering, priming, flush); the
//! adapter hands them out in decode order with a monotone index.

use std::ptr;
use std::thread;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;

use crate::error::MediaError;
use crate::frame::RawFrame;

/// Upper bound on decoder worker threads.
const MAX_DECODE_THREADS: usize = 4;

/// Decoder seam used by the dispatcher. Implemented by the libavcodec
/// adapter and by synthetic decoders in tests.
pub trait Decode {
    /// Decode one compressed packet into zero or more frames.
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<RawFrame>, MediaError>;

    /// Drain frames still buffered inside the decoder at end of stream.
    fn flush(&mut self) -> Result<Vec<RawFrame>, MediaError>;
}

/// Map generic codec names to the concrete library decoder.
fn to_av_codec_name(codec_name: &str) -> &str {
    match codec_name {
        "vp9" => "libvpx-vp9",
        other => other,
    }
}

/// A libavcodec video decoder.
///
/// Dropping the decoder releases the codec context and any buffered frames
/// in close-before-free order.
pub struct FfmpegDecoder {
    decoder: ffmpeg::decoder::Video,
    frames_emitted: u64,
}

/// Open a decoder by codec name with codec-private initialization bytes
/// (e.g. SPS/PPS or VP9 codec private data).
///
/// The context is configured for frame- and slice-parallel decode with at
/// most [`MAX_DECODE_THREADS`] workers.
pub fn open_decoder(codec_name: &str, extra_data: &[u8]) -> Result<FfmpegDecoder, MediaError> {
    ffmpeg::init()
        .map_err(|e| MediaError::ResourceExhausted(format!("av library initialization: {e}")))?;

    let av_name = to_av_codec_name(codec_name);
    let codec = ffmpeg::decoder::find_by_name(av_name)
        .ok_or_else(|| MediaError::NotFound(format!("decoder '{av_name}'")))?;

    let mut context = ffmpeg::codec::Context::new_with_codec(codec);

    let threads = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MAX_DECODE_THREADS)
        .min(MAX_DECODE_THREADS);

    // The safe binding cannot install extradata or combine frame- and
    // slice-level threading, so both are configured on the raw context
    // before open. The extradata buffer is owned and freed by the context.
    unsafe {
        let ctx = context.as_mut_ptr();

        if !extra_data.is_empty() {
            let size = extra_data.len();
            let buf =
                ffi::av_mallocz(size + ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize) as *mut u8;
            if buf.is_null() {
                return Err(MediaError::ResourceExhausted(
                    "codec extradata buffer".to_string(),
                ));
            }
            ptr::copy_nonoverlapping(extra_data.as_ptr(), buf, size);
            (*ctx).extradata = buf;
            (*ctx).extradata_size = size as i32;
        }

        (*ctx).thread_count = threads as i32;
        (*ctx).thread_type = (ffi::FF_THREAD_FRAME | ffi::FF_THREAD_SLICE) as i32;
    }

    let decoder = context
        .decoder()
        .open()
        .map_err(|e| match e {
            ffmpeg::Error::InvalidData => {
                MediaError::InvalidArgument(format!("malformed extradata for '{av_name}': {e}"))
            }
            other => MediaError::ResourceExhausted(format!("opening decoder '{av_name}': {other}")),
        })?
        .video()
        .map_err(|e| MediaError::InvalidArgument(format!("'{av_name}' is not a video decoder: {e}")))?;

    tracing::debug!(
        codec = codec_name,
        av_codec = av_name,
        threads,
        extradata_len = extra_data.len(),
        "opened decoder"
    );

    Ok(FfmpegDecoder {
        decoder,
        frames_emitted: 0,
    })
}

impl FfmpegDecoder {
    /// Pull every frame the decoder is ready to emit.
    fn drain(&mut self) -> Vec<RawFrame> {
        let mut frames = Vec::new();
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            self.frames_emitted += 1;
            let full = std::mem::replace(&mut decoded, ffmpeg::frame::Video::empty());
            tracing::trace!(
                index = self.frames_emitted,
                width = full.width(),
                height = full.height(),
                "decoded frame"
            );
            frames.push(RawFrame::from_video(full, self.frames_emitted));
        }
        frames
    }
}

impl Decode for FfmpegDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<RawFrame>, MediaError> {
        let packet = ffmpeg::Packet::copy(packet);
        if let Err(e) = self.decoder.send_packet(&packet) {
            // Corrupt input surfaces here; the decoder itself stays usable.
            return Err(MediaError::DecodeTransient(e));
        }
        Ok(self.drain())
    }

    fn flush(&mut self) -> Result<Vec<RawFrame>, MediaError> {
        // A second EOF send reports Eof; the drain below is still valid.
        let _ = self.decoder.send_eof();
        Ok(self.drain())
    }
}
