//! Packet sources: where compressed packets and control messages come from.
//!
//! The transport is an external collaborator; the dispatcher only sees the
//! [`PacketSource`] trait. The provided [`FileSource`] demuxes a file or URL
//! through libavformat.

use std::ffi::CString;
use std::ptr;

use ciborium::value::Value;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use vidbot_media::MediaError;

/// Stream-level metadata needed to open a decoder.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Codec name as the source reports it (generic names allowed; the
    /// adapter resolves aliases).
    pub codec_name: String,
    /// Codec-private initialization bytes (SPS/PPS, codec private data).
    pub extradata: Vec<u8>,
}

/// One input event. The dispatcher processes each event to completion
/// before asking for the next.
#[derive(Debug)]
pub enum SourceEvent {
    /// A demuxed compressed packet.
    Packet(Vec<u8>),
    /// A structured control message for the bot.
    Control(Value),
    /// Input exhausted; the dispatcher moves to the flush path.
    Eos,
}

/// Blocking supplier of input events for one stream.
pub trait PacketSource {
    /// Called once at stream open, before any event is consumed.
    fn stream_info(&mut self) -> Result<StreamInfo, MediaError>;

    /// Blocking read of the next input event.
    fn next_event(&mut self) -> Result<SourceEvent, MediaError>;
}

/// Demuxes the best video stream of a file or URL via libavformat.
pub struct FileSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    info: StreamInfo,
    finished: bool,
}

impl FileSource {
    /// Open `url`, optionally forcing a specific demuxer by name.
    pub fn open(url: &str, forced_format: Option<&str>) -> Result<Self, MediaError> {
        ffmpeg::init().map_err(|e| {
            MediaError::ResourceExhausted(format!("av library initialization: {e}"))
        })?;

        let input = match forced_format {
            None => ffmpeg::format::input(&url)
                .map_err(|e| MediaError::NotFound(format!("input '{url}': {e}")))?,
            Some(format_name) => open_forced(url, format_name)?,
        };

        let (stream_index, info) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| MediaError::NotFound(format!("no video stream in '{url}'")))?;
            let parameters = stream.parameters();
            let codec = ffmpeg::decoder::find(parameters.id()).ok_or_else(|| {
                MediaError::NotFound(format!(
                    "decoder for stream codec {:?} in '{url}'",
                    parameters.id()
                ))
            })?;

            // Extradata lives behind the raw parameter struct; the safe
            // binding does not expose it.
            let extradata = unsafe {
                let par = parameters.as_ptr();
                if (*par).extradata.is_null() || (*par).extradata_size <= 0 {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts((*par).extradata, (*par).extradata_size as usize)
                        .to_vec()
                }
            };

            (
                stream.index(),
                StreamInfo {
                    codec_name: codec.name().to_string(),
                    extradata,
                },
            )
        };

        tracing::info!(
            url,
            codec = %info.codec_name,
            stream_index,
            extradata_len = info.extradata.len(),
            "opened input"
        );

        Ok(FileSource {
            input,
            stream_index,
            info,
            finished: false,
        })
    }
}

impl PacketSource for FileSource {
    fn stream_info(&mut self) -> Result<StreamInfo, MediaError> {
        Ok(self.info.clone())
    }

    fn next_event(&mut self) -> Result<SourceEvent, MediaError> {
        if self.finished {
            return Ok(SourceEvent::Eos);
        }

        let stream_index = self.stream_index;
        let mut packets = self.input.packets();
        loop {
            match packets.next() {
                Some((stream, packet)) if stream.index() == stream_index => {
                    if let Some(data) = packet.data() {
                        return Ok(SourceEvent::Packet(data.to_vec()));
                    }
                }
                Some(_) => {}
                None => {
                    self.finished = true;
                    return Ok(SourceEvent::Eos);
                }
            }
        }
    }
}

/// Open an input with a demuxer pinned by name. The safe binding has no
/// entry point for a forced input format.
fn open_forced(url: &str, format_name: &str) -> Result<ffmpeg::format::context::Input, MediaError> {
    let c_format = CString::new(format_name)
        .map_err(|_| MediaError::InvalidArgument(format!("input format '{format_name}'")))?;
    let c_url = CString::new(url)
        .map_err(|_| MediaError::InvalidArgument(format!("input url '{url}'")))?;

    unsafe {
        let format = ffi::av_find_input_format(c_format.as_ptr());
        if format.is_null() {
            return Err(MediaError::NotFound(format!("input format '{format_name}'")));
        }

        let mut context: *mut ffi::AVFormatContext = ptr::null_mut();
        let ret = ffi::avformat_open_input(&mut context, c_url.as_ptr(), format as _, ptr::null_mut());
        if ret < 0 {
            // The context is freed by avformat_open_input on failure.
            return Err(MediaError::NotFound(format!(
                "input '{url}' as '{format_name}': {}",
                ffmpeg::Error::from(ret)
            )));
        }

        let ret = ffi::avformat_find_stream_info(context, ptr::null_mut());
        if ret < 0 {
            ffi::avformat_close_input(&mut context);
            return Err(MediaError::NotFound(format!(
                "stream info for '{url}': {}",
                ffmpeg::Error::from(ret)
            )));
        }

        Ok(ffmpeg::format::context::Input::wrap(context))
    }
}
