//! End-to-end pipeline tests over a scripted source and synthetic decoder.
//!
//! The synthetic decoder emits one 320x240 RGB0 frame per packet, so every
//! test observes the real conversion, dispatch, and routing paths without
//! encoded media.

use std::sync::atomic::Ordering;

use ciborium::value::{Integer, Value};
use vidbot_media::{ImageFrame, ImageMetadata, ImageSize, PixelFormat};
use vidbot_protocol::{command_action, command_body, FrameId, MessageKind};
use vidbot_runtime::testing::{
    init_test_tracing, synthetic_decoder_factory, RecordingSink, RejectingSink, ScriptedSource,
    CORRUPT_PACKET,
};
use vidbot_runtime::{
    BotContext, BotDescriptor, BotRuntime, RuntimeError, SourceEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameRecord {
    i1: u64,
    i2: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
}

#[derive(Default)]
struct Recorder {
    frames: Vec<FrameRecord>,
    metadata: Vec<ImageMetadata>,
    controls: Vec<Value>,
    controls_at_first_image: Option<usize>,
}

fn ensure_recorder(ctx: &mut BotContext) {
    if ctx.instance::<Recorder>().is_none() {
        ctx.set_instance(Recorder::default());
    }
}

fn record_frame(ctx: &mut BotContext, frame: &ImageFrame) {
    ensure_recorder(ctx);
    let metadata = *ctx.frame_metadata().expect("metadata published before dispatch");
    let recorder = ctx.instance_mut::<Recorder>().unwrap();
    if recorder.controls_at_first_image.is_none() {
        recorder.controls_at_first_image = Some(recorder.controls.len());
    }
    recorder.frames.push(FrameRecord {
        i1: frame.id().i1,
        i2: frame.id().i2,
        width: frame.width(),
        height: frame.height(),
        format: frame.format(),
        stride: frame.stride(0),
    });
    recorder.metadata.push(metadata);
}

fn record_control(ctx: &mut BotContext, msg: &Value) -> Option<Value> {
    ensure_recorder(ctx);
    ctx.instance_mut::<Recorder>()
        .unwrap()
        .controls
        .push(msg.clone());
    None
}

fn int_value(n: u64) -> Value {
    Value::Integer(Integer::from(n))
}

fn payload_u64(payload: &Value) -> Option<u64> {
    match payload {
        Value::Integer(i) => u64::try_from(i128::from(*i)).ok(),
        _ => None,
    }
}

/// Image callback emitting two analysis messages per frame with the
/// default (current-frame) binding.
fn emit_two(ctx: &mut BotContext, frame: &ImageFrame) {
    record_frame(ctx, frame);
    let base = frame.id().i1 * 10;
    ctx.emit(MessageKind::Analysis, int_value(base), FrameId::UNBOUND);
    ctx.emit(MessageKind::Analysis, int_value(base + 1), FrameId::UNBOUND);
}

/// Image callback emitting one explicit-interval message during frame 5.
fn emit_interval_on_five(ctx: &mut BotContext, frame: &ImageFrame) {
    record_frame(ctx, frame);
    if frame.id().i1 == 5 {
        ctx.emit(MessageKind::Analysis, int_value(500), FrameId::span(3, 7));
    }
}

fn descriptor(size: ImageSize, on_image: fn(&mut BotContext, &ImageFrame)) -> BotDescriptor {
    BotDescriptor {
        image_size: size,
        pixel_format: PixelFormat::Bgr,
        on_image: Some(on_image),
        on_control: Some(record_control),
    }
}

fn packets(count: u8) -> Vec<SourceEvent> {
    (0..count).map(|seed| SourceEvent::Packet(vec![seed])).collect()
}

fn run_pipeline(
    descriptor: BotDescriptor,
    events: Vec<SourceEvent>,
) -> (BotRuntime, RecordingSink, Result<(), RuntimeError>) {
    init_test_tracing();
    let mut runtime = BotRuntime::new();
    runtime.register(descriptor).unwrap();
    runtime.set_decoder_factory(synthetic_decoder_factory(320, 240));

    let sink = RecordingSink::new();
    let mut source = ScriptedSource::new("rawvideo", events);
    let result = runtime.run_stream(&mut source, Box::new(sink.clone()));
    (runtime, sink, result)
}

fn recorder(runtime: &BotRuntime) -> &Recorder {
    runtime
        .context()
        .instance::<Recorder>()
        .expect("bot recorded state")
}

#[test]
fn passthrough_smoke_test() {
    let (runtime, sink, result) =
        run_pipeline(descriptor(ImageSize::ORIGINAL, record_frame), packets(10));
    result.unwrap();

    let rec = recorder(&runtime);
    assert_eq!(rec.frames.len(), 10);
    for (i, frame) in rec.frames.iter().enumerate() {
        assert_eq!(frame.i1, i as u64 + 1);
        assert_eq!(frame.i2, i as u64 + 1);
        assert_eq!((frame.width, frame.height), (320, 240));
        assert_eq!(frame.format, PixelFormat::Bgr);
    }

    // A synthetic End notice follows the last frame.
    let messages = sink.messages();
    let end = messages.last().expect("end notice routed");
    assert_eq!(end.kind, MessageKind::Control);
    assert!(end.frame_id.is_unbound());
    assert_eq!(command_action(&end.payload), Some("end"));

    let metrics = runtime.metrics();
    assert_eq!(metrics.frames_decoded.load(Ordering::Relaxed), 10);
    assert_eq!(metrics.frames_delivered.load(Ordering::Relaxed), 10);
    assert_eq!(metrics.packets_dropped.load(Ordering::Relaxed), 0);
}

#[test]
fn downscale_to_requested_size() {
    let size = ImageSize {
        width: 160,
        height: 120,
    };
    let (runtime, _sink, result) = run_pipeline(descriptor(size, record_frame), packets(5));
    result.unwrap();

    for frame in &recorder(&runtime).frames {
        assert_eq!((frame.width, frame.height), (160, 120));
        assert_eq!(frame.format, PixelFormat::Bgr);
        assert!(frame.stride >= 160 * 3, "stride {} too small", frame.stride);
    }
}

#[test]
fn never_upscales_a_smaller_source() {
    let size = ImageSize {
        width: 1920,
        height: 1080,
    };
    let (runtime, _sink, result) = run_pipeline(descriptor(size, record_frame), packets(5));
    result.unwrap();

    for frame in &recorder(&runtime).frames {
        assert_eq!((frame.width, frame.height), (320, 240));
    }
}

#[test]
fn default_emission_binds_to_current_frame() {
    let (_runtime, sink, result) =
        run_pipeline(descriptor(ImageSize::ORIGINAL, emit_two), packets(10));
    result.unwrap();

    let analysis: Vec<_> = sink
        .messages()
        .into_iter()
        .filter(|m| m.kind == MessageKind::Analysis)
        .collect();
    assert_eq!(analysis.len(), 20);

    for n in 1..=10u64 {
        let pair = &analysis[(n as usize - 1) * 2..(n as usize - 1) * 2 + 2];
        for message in pair {
            assert_eq!(message.frame_id, FrameId::single(n));
        }
        // Emission order within the callback is preserved.
        assert_eq!(payload_u64(&pair[0].payload), Some(n * 10));
        assert_eq!(payload_u64(&pair[1].payload), Some(n * 10 + 1));
    }
}

#[test]
fn explicit_interval_overrides_current_frame() {
    let (_runtime, sink, result) = run_pipeline(
        descriptor(ImageSize::ORIGINAL, emit_interval_on_five),
        packets(10),
    );
    result.unwrap();

    let analysis: Vec<_> = sink
        .messages()
        .into_iter()
        .filter(|m| m.kind == MessageKind::Analysis)
        .collect();
    assert_eq!(analysis.len(), 1);
    assert_eq!(analysis[0].frame_id, FrameId::span(3, 7));
    assert_ne!(analysis[0].frame_id, FrameId::single(5));
}

#[test]
fn corrupt_packet_is_dropped_without_breaking_the_sequence() {
    let mut events = packets(4);
    events.push(SourceEvent::Packet(CORRUPT_PACKET.to_vec()));
    events.extend(packets(10).into_iter().skip(4));

    let (runtime, _sink, result) =
        run_pipeline(descriptor(ImageSize::ORIGINAL, record_frame), events);
    result.unwrap();

    let rec = recorder(&runtime);
    assert_eq!(rec.frames.len(), 10);
    for (i, frame) in rec.frames.iter().enumerate() {
        assert_eq!(frame.i1, i as u64 + 1, "sequence must stay contiguous");
    }

    let metrics = runtime.metrics();
    assert_eq!(metrics.packets_dropped.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.packets_received.load(Ordering::Relaxed), 11);
}

#[test]
fn control_message_observed_before_any_image_callback() {
    let configure = vidbot_protocol::control_command(
        "configure",
        vec![(Value::Text("x".to_string()), int_value(1))],
    );
    let mut events = vec![SourceEvent::Control(configure)];
    events.extend(packets(3));

    let (runtime, _sink, result) =
        run_pipeline(descriptor(ImageSize::ORIGINAL, record_frame), events);
    result.unwrap();

    let rec = recorder(&runtime);
    // The framework's init configure plus the source's configure both
    // precede the first image callback.
    assert_eq!(rec.controls_at_first_image, Some(2));
    assert_eq!(command_action(&rec.controls[0]), Some("configure"));
    assert_eq!(command_action(&rec.controls[1]), Some("configure"));
    let body = command_body(&rec.controls[1]).expect("configure body");
    assert!(body
        .iter()
        .any(|(k, v)| matches!(k, Value::Text(s) if s == "x") && payload_u64(v) == Some(1)));
}

#[test]
fn frame_metadata_is_stable_across_a_stream() {
    let (runtime, _sink, result) =
        run_pipeline(descriptor(ImageSize::ORIGINAL, record_frame), packets(8));
    result.unwrap();

    let rec = recorder(&runtime);
    let first = rec.metadata.first().expect("metadata seen");
    assert_eq!(first.width, 320);
    assert_eq!(first.height, 240);
    assert!(first.plane_strides[0] >= 320 * 3);
    for metadata in &rec.metadata {
        assert_eq!(metadata, first);
    }
}

#[test]
fn control_reply_is_routed_as_control_kind() {
    fn acking_control(ctx: &mut BotContext, msg: &Value) -> Option<Value> {
        record_control(ctx, msg);
        Some(vidbot_protocol::control_command("configured", Vec::new()))
    }

    init_test_tracing();
    let mut runtime = BotRuntime::new();
    runtime
        .register(BotDescriptor {
            image_size: ImageSize::ORIGINAL,
            pixel_format: PixelFormat::Bgr,
            on_image: Some(record_frame),
            on_control: Some(acking_control),
        })
        .unwrap();
    runtime.set_decoder_factory(synthetic_decoder_factory(320, 240));

    let sink = RecordingSink::new();
    let mut source = ScriptedSource::new("rawvideo", packets(1));
    runtime.run_stream(&mut source, Box::new(sink.clone())).unwrap();

    let messages = sink.messages();
    let reply = &messages[0];
    assert_eq!(reply.kind, MessageKind::Control);
    assert!(reply.frame_id.is_unbound());
    assert_eq!(command_action(&reply.payload), Some("configured"));
}

#[test]
fn shutdown_request_stops_before_consuming_events() {
    init_test_tracing();
    let mut runtime = BotRuntime::new();
    runtime
        .register(descriptor(ImageSize::ORIGINAL, record_frame))
        .unwrap();
    runtime.set_decoder_factory(synthetic_decoder_factory(320, 240));
    runtime.shutdown_handle().store(true, Ordering::Relaxed);

    let sink = RecordingSink::new();
    let mut source = ScriptedSource::with_packets("rawvideo", 100);
    runtime.run_stream(&mut source, Box::new(sink.clone())).unwrap();

    assert_eq!(runtime.metrics().frames_delivered.load(Ordering::Relaxed), 0);
    // The stream still stops cleanly with an End notice.
    let messages = sink.messages();
    assert_eq!(command_action(&messages.last().unwrap().payload), Some("end"));
}

#[test]
fn sink_rejection_drops_messages_but_not_the_stream() {
    init_test_tracing();
    let mut runtime = BotRuntime::new();
    runtime
        .register(descriptor(ImageSize::ORIGINAL, emit_two))
        .unwrap();
    runtime.set_decoder_factory(synthetic_decoder_factory(320, 240));

    let mut source = ScriptedSource::new("rawvideo", packets(10));
    runtime
        .run_stream(&mut source, Box::new(RejectingSink))
        .unwrap();

    let metrics = runtime.metrics();
    assert_eq!(metrics.frames_delivered.load(Ordering::Relaxed), 10);
    assert_eq!(metrics.messages_routed.load(Ordering::Relaxed), 0);
    // 20 analysis emissions plus the End notice, all rejected.
    assert_eq!(metrics.messages_failed.load(Ordering::Relaxed), 21);
}
