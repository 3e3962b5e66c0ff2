//! Shared test utilities for vidbot integration tests.
//!
//! Provides a scripted packet source, a synthetic decoder that turns each
//! packet into one deterministic frame, and a sink that records decoded
//! messages, so pipeline behavior can be asserted without real encoded
//! media.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ffmpeg_next as ffmpeg;
use vidbot_media::{Decode, MediaError, RawFrame};
use vidbot_protocol::{decode_message, BotMessage};

use crate::bot::BotContext;
use crate::dispatcher::DecoderFactory;
use crate::router::MessageSink;
use crate::source::{PacketSource, SourceEvent, StreamInfo};

/// Packet payload the synthetic decoder reports as corrupt.
pub const CORRUPT_PACKET: &[u8] = &[0xFF];

/// Initialise a tracing subscriber for tests.
///
/// Respects the `RUST_LOG` environment variable, defaults to `debug`.
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A bare context for unit-testing bot callbacks outside a pipeline.
pub fn bare_context() -> BotContext {
    BotContext::new()
}

/// Drain the emissions a callback queued on a context, in emission order.
pub fn take_emissions(context: &mut BotContext) -> Vec<BotMessage> {
    context.drain_outbox()
}

/// Packet source replaying a fixed event script.
pub struct ScriptedSource {
    info: StreamInfo,
    events: VecDeque<SourceEvent>,
}

impl ScriptedSource {
    pub fn new(codec_name: &str, events: Vec<SourceEvent>) -> Self {
        ScriptedSource {
            info: StreamInfo {
                codec_name: codec_name.to_string(),
                extradata: Vec::new(),
            },
            events: events.into(),
        }
    }

    /// Convenience: a script of `count` one-byte packets with distinct
    /// seeds, followed by end of stream.
    pub fn with_packets(codec_name: &str, count: u8) -> Self {
        let events = (0..count)
            .map(|seed| SourceEvent::Packet(vec![seed]))
            .collect();
        ScriptedSource::new(codec_name, events)
    }
}

impl PacketSource for ScriptedSource {
    fn stream_info(&mut self) -> Result<StreamInfo, MediaError> {
        Ok(self.info.clone())
    }

    fn next_event(&mut self) -> Result<SourceEvent, MediaError> {
        Ok(self.events.pop_front().unwrap_or(SourceEvent::Eos))
    }
}

/// Decoder producing one RGB0 frame per packet, filled with the packet's
/// first byte. The [`CORRUPT_PACKET`] payload reports a transient decode
/// error instead.
pub struct SyntheticDecoder {
    width: u32,
    height: u32,
    frames_emitted: u64,
}

impl SyntheticDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        SyntheticDecoder {
            width,
            height,
            frames_emitted: 0,
        }
    }
}

impl Decode for SyntheticDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<RawFrame>, MediaError> {
        if packet == CORRUPT_PACKET {
            return Err(MediaError::DecodeTransient(ffmpeg::Error::InvalidData));
        }

        ffmpeg::init().expect("av library init");
        let seed = packet.first().copied().unwrap_or(0);
        let mut frame =
            ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGBZ, self.width, self.height);
        frame.data_mut(0).fill(seed);

        self.frames_emitted += 1;
        Ok(vec![RawFrame::from_video(frame, self.frames_emitted)])
    }

    fn flush(&mut self) -> Result<Vec<RawFrame>, MediaError> {
        Ok(Vec::new())
    }
}

/// Decoder factory yielding a [`SyntheticDecoder`] regardless of codec.
pub fn synthetic_decoder_factory(width: u32, height: u32) -> DecoderFactory {
    Box::new(move |_info| Ok(Box::new(SyntheticDecoder::new(width, height)) as Box<dyn Decode>))
}

/// Sink that decodes every record back into a [`BotMessage`] and records it
/// for assertions. Clone the sink before handing it to the runtime to keep
/// a reading handle.
#[derive(Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<BotMessage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink::default()
    }

    /// Snapshot of everything routed so far, in arrival order.
    pub fn messages(&self) -> Vec<BotMessage> {
        self.messages.lock().expect("sink lock").clone()
    }
}

impl MessageSink for RecordingSink {
    fn send(&mut self, record: &[u8]) -> anyhow::Result<()> {
        let message = decode_message(record)?;
        self.messages.lock().expect("sink lock").push(message);
        Ok(())
    }
}

/// Sink that rejects every write, for exercising the drop-on-rejection
/// policy.
pub struct RejectingSink;

impl MessageSink for RejectingSink {
    fn send(&mut self, _record: &[u8]) -> anyhow::Result<()> {
        anyhow::bail!("sink unavailable")
    }
}
