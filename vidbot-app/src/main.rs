//! Example bot: reports the mean brightness of every frame, flagging frames
//! that cross a configurable threshold.
//!
//! Run against a local file:
//!
//! ```text
//! brightness-bot --input clip.mp4 --id brightness-1
//! ```
//!
//! Emits one analysis message per frame and a debug message whenever the
//! threshold is reconfigured.

use std::process;

use ciborium::value::Value;
use vidbot_media::{ImageFrame, ImageSize, PixelFormat};
use vidbot_protocol::{command_action, command_body, FrameId, MessageKind};
use vidbot_runtime::{BotContext, BotDescriptor, BotRuntime};

/// Per-instance bot state, owned by the bot and opaque to the framework.
struct Brightness {
    /// Frames at or above this mean luma are flagged.
    threshold: f64,
    frames_seen: u64,
}

impl Default for Brightness {
    fn default() -> Self {
        Brightness {
            threshold: 128.0,
            frames_seen: 0,
        }
    }
}

/// Mean of all pixel channel bytes, ignoring row padding.
fn mean_brightness(frame: &ImageFrame) -> f64 {
    let stride = frame.stride(0);
    let row_bytes = frame.width() as usize * frame.format().bytes_per_pixel();
    let plane = frame.plane(0);

    let mut sum = 0u64;
    for row in 0..frame.height() as usize {
        let start = row * stride;
        for byte in &plane[start..start + row_bytes] {
            sum += u64::from(*byte);
        }
    }
    let samples = row_bytes as u64 * frame.height() as u64;
    if samples == 0 {
        return 0.0;
    }
    sum as f64 / samples as f64
}

fn body_f64(body: &[(Value, Value)], key: &str) -> Option<f64> {
    body.iter().find_map(|(k, v)| match (k, v) {
        (Value::Text(s), Value::Float(f)) if s == key => Some(*f),
        (Value::Text(s), Value::Integer(i)) if s == key => {
            Some(i128::from(*i) as f64)
        }
        _ => None,
    })
}

fn on_control(ctx: &mut BotContext, msg: &Value) -> Option<Value> {
    if ctx.instance::<Brightness>().is_none() {
        ctx.set_instance(Brightness::default());
    }

    // Unknown actions are ignored by design; this bot only configures.
    if command_action(msg) != Some("configure") {
        return None;
    }

    if let Some(threshold) = command_body(msg).and_then(|body| body_f64(body, "threshold")) {
        let state = ctx.instance_mut::<Brightness>().unwrap();
        state.threshold = threshold;
        tracing::info!(threshold, "brightness threshold configured");
        ctx.emit(
            MessageKind::Debug,
            Value::Map(vec![(
                Value::Text("threshold".to_string()),
                Value::Float(threshold),
            )]),
            FrameId::UNBOUND,
        );
    }

    None
}

fn on_image(ctx: &mut BotContext, frame: &ImageFrame) {
    let brightness = mean_brightness(frame);
    let state = ctx
        .instance_mut::<Brightness>()
        .expect("control callback runs first");
    state.frames_seen += 1;
    let flagged = brightness >= state.threshold;

    ctx.emit(
        MessageKind::Analysis,
        Value::Map(vec![
            (
                Value::Text("brightness".to_string()),
                Value::Float(brightness),
            ),
            (Value::Text("flagged".to_string()), Value::Bool(flagged)),
        ]),
        FrameId::UNBOUND,
    );
}

fn main() {
    let mut runtime = BotRuntime::new();
    if let Err(e) = runtime.register(BotDescriptor {
        image_size: ImageSize {
            width: 320,
            height: 240,
        },
        pixel_format: PixelFormat::Bgr,
        on_image: Some(on_image),
        on_control: Some(on_control),
    }) {
        eprintln!("failed to register bot: {e}");
        process::exit(vidbot_runtime::EXIT_MISUSE);
    }

    process::exit(runtime.run(std::env::args()));
}
