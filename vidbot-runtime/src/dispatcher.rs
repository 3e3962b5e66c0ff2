//! The per-stream pipeline driver.
//!
//! Drives packet decode, frame normalization, callback dispatch, and
//! message routing for one stream, processing each input event to
//! completion before accepting the next. Single-threaded with respect to
//! the bot: callbacks never overlap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ciborium::value::Value;
use vidbot_media::{
    Decode, FrameConverter, ImageFrame, ImageMetadata, MediaError, RawFrame,
};
use vidbot_protocol::{control_command, BotMessage, FrameId, MessageKind};

use crate::bot::{dispatch_control, dispatch_image, BotContext, BotDescriptor};
use crate::error::RuntimeError;
use crate::router::MessageRouter;
use crate::source::{PacketSource, SourceEvent, StreamInfo};

/// Builds a decoder for a stream once its codec name and extradata are
/// known. The default factory opens a libavcodec decoder; tests substitute
/// synthetic ones.
pub type DecoderFactory =
    Box<dyn Fn(&StreamInfo) -> Result<Box<dyn Decode>, MediaError> + Send>;

/// Lifecycle of a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Initializing,
    Decoding,
    Flushing,
    Stopped,
    Failed,
}

/// Counters exposed for observability and test assertions.
#[derive(Debug)]
pub struct DispatcherMetrics {
    pub packets_received: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub controls_dispatched: AtomicU64,
    pub messages_routed: AtomicU64,
    pub messages_failed: AtomicU64,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        DispatcherMetrics {
            packets_received: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            controls_dispatched: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
        }
    }
}

impl Default for DispatcherMetrics {
    fn default() -> Self {
        DispatcherMetrics::new()
    }
}

pub(crate) struct Dispatcher<'a> {
    descriptor: &'a BotDescriptor,
    context: &'a mut BotContext,
    router: &'a mut MessageRouter,
    decoder_factory: &'a DecoderFactory,
    converter: FrameConverter,
    metrics: Arc<DispatcherMetrics>,
    shutdown: Arc<AtomicBool>,
    state: StreamState,
    frame_counter: u64,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(
        descriptor: &'a BotDescriptor,
        context: &'a mut BotContext,
        router: &'a mut MessageRouter,
        decoder_factory: &'a DecoderFactory,
        metrics: Arc<DispatcherMetrics>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let converter = FrameConverter::new(descriptor.image_size, descriptor.pixel_format);
        Dispatcher {
            descriptor,
            context,
            router,
            decoder_factory,
            converter,
            metrics,
            shutdown,
            state: StreamState::Idle,
            frame_counter: 0,
        }
    }

    /// Drive one stream to completion.
    ///
    /// The control callback sees `init_message` before any image callback
    /// runs. Returns when the source reports end of stream, shutdown is
    /// requested, or a fatal error occurs.
    pub(crate) fn run(
        &mut self,
        source: &mut dyn PacketSource,
        init_message: Value,
    ) -> Result<(), RuntimeError> {
        self.state = StreamState::Initializing;

        let info = match source.stream_info() {
            Ok(info) => info,
            Err(e) => {
                self.state = StreamState::Failed;
                return Err(e.into());
            }
        };
        tracing::info!(codec = %info.codec_name, "initializing stream");

        let mut decoder = match (self.decoder_factory)(&info) {
            Ok(decoder) => decoder,
            Err(e) => {
                self.state = StreamState::Failed;
                return Err(e.into());
            }
        };

        self.handle_control(&init_message);

        if let Err(e) = self.event_loop(source, decoder.as_mut()) {
            self.state = StreamState::Failed;
            tracing::error!(error = %e, "stream failed");
            return Err(e);
        }

        self.state = StreamState::Flushing;
        if let Err(e) = self.flush(decoder.as_mut()) {
            self.state = StreamState::Failed;
            return Err(e);
        }

        self.router.forward(end_notice());
        self.state = StreamState::Stopped;
        tracing::info!(
            frames = self.frame_counter,
            delivered = self.metrics.frames_delivered.load(Ordering::Relaxed),
            "stream stopped"
        );
        Ok(())
    }

    fn event_loop(
        &mut self,
        source: &mut dyn PacketSource,
        decoder: &mut dyn Decode,
    ) -> Result<(), RuntimeError> {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::info!("shutdown requested, draining stream");
                return Ok(());
            }

            match source.next_event() {
                Ok(SourceEvent::Packet(data)) => {
                    if self.state == StreamState::Initializing {
                        self.state = StreamState::Decoding;
                    }
                    self.handle_packet(decoder, &data)?;
                }
                Ok(SourceEvent::Control(message)) => self.handle_control(&message),
                Ok(SourceEvent::Eos) => {
                    tracing::debug!("source end of stream");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn handle_packet(
        &mut self,
        decoder: &mut dyn Decode,
        data: &[u8],
    ) -> Result<(), RuntimeError> {
        self.metrics.packets_received.fetch_add(1, Ordering::Relaxed);

        let frames = match decoder.decode(data) {
            Ok(frames) => frames,
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, bytes = data.len(), "dropping corrupt packet");
                self.metrics.packets_dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for frame in frames {
            self.deliver(frame)?;
        }
        Ok(())
    }

    /// Normalize one decoded frame and dispatch the image callback.
    ///
    /// The frame counter advances once per decoded frame, before any
    /// conversion outcome, so frame identity is independent of delivery.
    fn deliver(&mut self, raw: RawFrame) -> Result<(), RuntimeError> {
        self.frame_counter += 1;
        self.metrics.frames_decoded.fetch_add(1, Ordering::Relaxed);
        let id = FrameId::single(self.frame_counter);

        let normalized = match self.converter.convert(&raw) {
            Ok(frame) => frame,
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, frame = %id, "dropping unconvertible frame");
                self.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = ImageMetadata {
            width: normalized.width(),
            height: normalized.height(),
            plane_strides: plane_strides(&normalized),
        };
        if self.context.frame_metadata() != Some(&metadata) {
            metadata.validate(self.descriptor.pixel_format);
            if self.context.frame_metadata().is_some() {
                tracing::info!(
                    width = metadata.width,
                    height = metadata.height,
                    "source reconfigured, updating frame metadata"
                );
            } else {
                tracing::info!(
                    width = metadata.width,
                    height = metadata.height,
                    stride = metadata.plane_strides[0],
                    "publishing frame metadata"
                );
            }
            self.context.publish_metadata(metadata);
        }

        let frame = ImageFrame::from_video(id, self.descriptor.pixel_format, &normalized);
        dispatch_image(self.descriptor, self.context, &frame);
        self.metrics.frames_delivered.fetch_add(1, Ordering::Relaxed);

        for message in self.context.drain_outbox() {
            self.router.forward(message);
        }
        Ok(())
    }

    fn handle_control(&mut self, message: &Value) {
        self.metrics
            .controls_dispatched
            .fetch_add(1, Ordering::Relaxed);

        let reply = dispatch_control(self.descriptor, self.context, message);

        for emitted in self.context.drain_outbox() {
            self.router.forward(emitted);
        }
        if let Some(payload) = reply {
            self.router.forward(BotMessage {
                kind: MessageKind::Control,
                frame_id: FrameId::UNBOUND,
                payload,
            });
        }
    }

    fn flush(&mut self, decoder: &mut dyn Decode) -> Result<(), RuntimeError> {
        match decoder.flush() {
            Ok(frames) => {
                let drained = frames.len();
                for frame in frames {
                    self.deliver(frame)?;
                }
                tracing::debug!(frames = drained, "drained decoder");
                Ok(())
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "transient error draining decoder");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn plane_strides(frame: &ffmpeg_next::frame::Video) -> [usize; vidbot_media::MAX_IMAGE_PLANES] {
    let mut strides = [0usize; vidbot_media::MAX_IMAGE_PLANES];
    for (i, stride) in strides
        .iter_mut()
        .enumerate()
        .take(frame.planes().min(vidbot_media::MAX_IMAGE_PLANES))
    {
        *stride = frame.stride(i);
    }
    strides
}

/// Synthetic notice routed after the decoder drains at end of stream.
fn end_notice() -> BotMessage {
    BotMessage {
        kind: MessageKind::Control,
        frame_id: FrameId::UNBOUND,
        payload: control_command("end", Vec::new()),
    }
}
