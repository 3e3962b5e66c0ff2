//! Bot descriptor, per-instance context, and callback dispatch.
//!
//! One bot is registered per runtime. All of its callbacks run serialized on
//! the dispatcher's thread, so per-instance state needs no synchronization.

use std::any::Any;

use ciborium::value::Value;
use vidbot_media::{ImageFrame, ImageMetadata, ImageSize, PixelFormat};
use vidbot_protocol::{BotMessage, FrameId, MessageKind};

/// Image callback: invoked once per normalized frame, with plane data valid
/// only for the duration of the call.
pub type ImageCallback = fn(&mut BotContext, &ImageFrame);

/// Control callback: invoked once per control message, synchronously. A
/// returned value is forwarded downstream as a control-kind reply.
pub type ControlCallback = fn(&mut BotContext, &Value) -> Option<Value>;

/// What a bot registers: the frame layout it wants and its callbacks.
///
/// The control callback is mandatory. The image callback may be omitted for
/// a pure-control bot.
#[derive(Clone)]
pub struct BotDescriptor {
    pub image_size: ImageSize,
    pub pixel_format: PixelFormat,
    pub on_image: Option<ImageCallback>,
    pub on_control: Option<ControlCallback>,
}

/// Per-bot-instance state shared between the framework and the bot.
///
/// The framework mutates the current-frame slot outside callback execution;
/// the bot reads the context and owns `instance_data` during callbacks.
pub struct BotContext {
    instance_data: Option<Box<dyn Any + Send>>,
    metadata: Option<ImageMetadata>,
    current_frame: FrameId,
    outbox: Vec<BotMessage>,
}

impl BotContext {
    pub(crate) fn new() -> Self {
        BotContext {
            instance_data: None,
            metadata: None,
            current_frame: FrameId::UNBOUND,
            outbox: Vec::new(),
        }
    }

    /// Store per-instance state. The framework preserves it across
    /// callbacks and never inspects it.
    pub fn set_instance<T: Any + Send>(&mut self, value: T) {
        self.instance_data = Some(Box::new(value));
    }

    /// Borrow the per-instance state, if set and of type `T`.
    pub fn instance<T: Any + Send>(&self) -> Option<&T> {
        self.instance_data.as_ref()?.downcast_ref()
    }

    /// Mutably borrow the per-instance state, if set and of type `T`.
    pub fn instance_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.instance_data.as_mut()?.downcast_mut()
    }

    /// Layout of the frames this stream delivers. `None` until the first
    /// frame has been normalized; stable afterwards within a configuration
    /// epoch.
    pub fn frame_metadata(&self) -> Option<&ImageMetadata> {
        self.metadata.as_ref()
    }

    /// The frame interval currently being processed, or the `{0,0}`
    /// sentinel outside an image callback.
    pub fn current_frame_id(&self) -> FrameId {
        self.current_frame
    }

    /// Emit a structured message toward the downstream sink.
    ///
    /// Passing [`FrameId::UNBOUND`] binds the message to the frame currently
    /// being processed; from a control callback (no current frame) it goes
    /// out non-frame-bound. Ownership of `payload` transfers to the router.
    pub fn emit(&mut self, kind: MessageKind, payload: Value, frame_id: FrameId) {
        let frame_id = if frame_id.is_unbound() {
            self.current_frame
        } else {
            frame_id
        };
        self.outbox.push(BotMessage {
            kind,
            frame_id,
            payload,
        });
    }

    pub(crate) fn publish_metadata(&mut self, metadata: ImageMetadata) {
        self.metadata = Some(metadata);
    }

    pub(crate) fn drain_outbox(&mut self) -> Vec<BotMessage> {
        std::mem::take(&mut self.outbox)
    }

    fn set_current(&mut self, id: FrameId) {
        self.current_frame = id;
    }

    fn clear_current(&mut self) {
        self.current_frame = FrameId::UNBOUND;
    }
}

/// Invoke the image callback with the current-frame slot set for the
/// duration of the call.
pub(crate) fn dispatch_image(
    descriptor: &BotDescriptor,
    context: &mut BotContext,
    frame: &ImageFrame,
) {
    context.set_current(frame.id());
    if let Some(callback) = descriptor.on_image {
        callback(context, frame);
    }
    context.clear_current();
}

/// Invoke the control callback synchronously.
pub(crate) fn dispatch_control(
    descriptor: &BotDescriptor,
    context: &mut BotContext,
    message: &Value,
) -> Option<Value> {
    descriptor
        .on_control
        .and_then(|callback| callback(context, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidbot_media::allocate_image;

    fn noop_control(_: &mut BotContext, _: &Value) -> Option<Value> {
        None
    }

    fn capture_current(ctx: &mut BotContext, _frame: &ImageFrame) {
        let seen = ctx.current_frame_id();
        ctx.set_instance(seen);
        ctx.emit(MessageKind::Analysis, Value::Null, FrameId::UNBOUND);
    }

    fn descriptor_with(image: Option<ImageCallback>) -> BotDescriptor {
        BotDescriptor {
            image_size: ImageSize::ORIGINAL,
            pixel_format: PixelFormat::Bgr,
            on_image: image,
            on_control: Some(noop_control),
        }
    }

    #[test]
    fn instance_data_roundtrip() {
        let mut ctx = BotContext::new();
        assert!(ctx.instance::<u32>().is_none());

        ctx.set_instance(41u32);
        *ctx.instance_mut::<u32>().unwrap() += 1;
        assert_eq!(ctx.instance::<u32>(), Some(&42));

        // Wrong type reads as absent, not as a panic.
        assert!(ctx.instance::<String>().is_none());
    }

    #[test]
    fn current_frame_set_during_image_dispatch_only() {
        let mut ctx = BotContext::new();
        let descriptor = descriptor_with(Some(capture_current));

        let image = allocate_image(8, 8, PixelFormat::Bgr).unwrap();
        let frame = image.as_frame(FrameId::single(5));

        dispatch_image(&descriptor, &mut ctx, &frame);

        // The callback observed frame 5; the slot is cleared afterwards.
        assert_eq!(ctx.instance::<FrameId>(), Some(&FrameId::single(5)));
        assert!(ctx.current_frame_id().is_unbound());

        // The default-sentinel emission picked up the current frame.
        let outbox = ctx.drain_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].frame_id, FrameId::single(5));
    }

    #[test]
    fn explicit_frame_id_is_preserved() {
        let mut ctx = BotContext::new();
        ctx.emit(MessageKind::Analysis, Value::Null, FrameId::span(3, 7));
        let outbox = ctx.drain_outbox();
        assert_eq!(outbox[0].frame_id, FrameId::span(3, 7));
    }

    #[test]
    fn unbound_emission_outside_image_callback() {
        let mut ctx = BotContext::new();
        ctx.emit(MessageKind::Debug, Value::Null, FrameId::UNBOUND);
        let outbox = ctx.drain_outbox();
        assert!(outbox[0].frame_id.is_unbound());
    }

    #[test]
    fn pure_control_bot_skips_image_dispatch() {
        let mut ctx = BotContext::new();
        let descriptor = descriptor_with(None);

        let image = allocate_image(8, 8, PixelFormat::Bgr).unwrap();
        let frame = image.as_frame(FrameId::single(1));
        dispatch_image(&descriptor, &mut ctx, &frame);

        assert!(ctx.current_frame_id().is_unbound());
        assert!(ctx.drain_outbox().is_empty());
    }
}
