//! Bot runtime: registration, the dispatch pipeline, and the `run` entry
//! point.
//!
//! A bot binary constructs a [`BotRuntime`], registers its descriptor once,
//! and hands control to [`BotRuntime::run`], which parses the CLI, opens
//! the input, and drives the stream to completion:
//!
//! ```no_run
//! use std::process;
//!
//! use vidbot_media::{ImageSize, PixelFormat};
//! use vidbot_runtime::{BotContext, BotDescriptor, BotRuntime};
//!
//! fn on_control(
//!     _ctx: &mut BotContext,
//!     _msg: &ciborium::value::Value,
//! ) -> Option<ciborium::value::Value> {
//!     None
//! }
//!
//! fn main() {
//!     let mut runtime = BotRuntime::new();
//!     runtime
//!         .register(BotDescriptor {
//!             image_size: ImageSize::ORIGINAL,
//!             pixel_format: PixelFormat::Bgr,
//!             on_image: None,
//!             on_control: Some(on_control),
//!         })
//!         .expect("descriptor is well-formed");
//!     process::exit(runtime.run(std::env::args()));
//! }
//! ```

pub mod bot;
pub mod cli;
pub mod dispatcher;
pub mod error;
pub mod router;
pub mod source;
pub mod testing;

use std::ffi::OsString;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ciborium::value::Value;
use tracing_subscriber::EnvFilter;
use vidbot_protocol::control_command;

pub use bot::{BotContext, BotDescriptor, ControlCallback, ImageCallback};
pub use dispatcher::{DecoderFactory, DispatcherMetrics, StreamState};
pub use error::{RuntimeError, EXIT_INIT_FAILURE, EXIT_MISUSE, EXIT_OK, EXIT_STREAM_FAILURE};
pub use router::{MessageRouter, MessageSink, WriterSink};
pub use source::{FileSource, PacketSource, SourceEvent, StreamInfo};
pub use vidbot_protocol::{BotMessage, FrameId, MessageKind};

use dispatcher::Dispatcher;

/// Single-owner runtime value holding the one registered bot and the
/// machinery to drive it over a stream.
pub struct BotRuntime {
    descriptor: Option<BotDescriptor>,
    context: BotContext,
    metrics: Arc<DispatcherMetrics>,
    shutdown: Arc<AtomicBool>,
    decoder_factory: DecoderFactory,
    instance_id: Option<String>,
}

impl BotRuntime {
    pub fn new() -> Self {
        BotRuntime {
            descriptor: None,
            context: BotContext::new(),
            metrics: Arc::new(DispatcherMetrics::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            decoder_factory: Box::new(|info| {
                vidbot_media::open_decoder(&info.codec_name, &info.extradata)
                    .map(|decoder| Box::new(decoder) as Box<dyn vidbot_media::Decode>)
            }),
            instance_id: None,
        }
    }

    /// Register the bot. Exactly one registration is allowed per runtime.
    ///
    /// Fails with `AlreadyRegistered` on a second call, and with
    /// `InvalidArgument` when the control callback is missing or the
    /// requested size mixes the `original` sentinel with a concrete
    /// dimension.
    pub fn register(&mut self, descriptor: BotDescriptor) -> Result<(), RuntimeError> {
        if self.descriptor.is_some() {
            return Err(RuntimeError::AlreadyRegistered);
        }
        if descriptor.on_control.is_none() {
            return Err(RuntimeError::InvalidArgument(
                "a control callback is required".to_string(),
            ));
        }
        if descriptor.image_size.is_mixed() {
            return Err(RuntimeError::InvalidArgument(
                "image size mixes 'original' with a concrete dimension".to_string(),
            ));
        }
        if !descriptor.image_size.is_original()
            && (descriptor.image_size.width <= 0 || descriptor.image_size.height <= 0)
        {
            return Err(RuntimeError::InvalidArgument(format!(
                "requested image size {}x{} must be positive",
                descriptor.image_size.width, descriptor.image_size.height
            )));
        }

        tracing::debug!(
            width = descriptor.image_size.width,
            height = descriptor.image_size.height,
            pixel_format = descriptor.pixel_format.name(),
            pure_control = descriptor.on_image.is_none(),
            "registered bot"
        );
        self.descriptor = Some(descriptor);
        Ok(())
    }

    /// Flag checked between input events; setting it drains the stream and
    /// stops cleanly.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Pipeline counters, shared with the dispatcher and router.
    pub fn metrics(&self) -> Arc<DispatcherMetrics> {
        Arc::clone(&self.metrics)
    }

    /// The bot's context, including its instance data. Useful after a run
    /// to inspect state the bot accumulated.
    pub fn context(&self) -> &BotContext {
        &self.context
    }

    /// Replace the decoder factory. Intended for tests and for embedders
    /// that bring their own decoder.
    pub fn set_decoder_factory(&mut self, factory: DecoderFactory) {
        self.decoder_factory = factory;
    }

    /// Identity reported to the bot in the initialization control message.
    pub fn set_instance_id(&mut self, id: Option<String>) {
        self.instance_id = id;
    }

    /// Drive one stream from `source` to completion, routing bot output to
    /// `sink`. This is the seam `run` uses after CLI setup.
    pub fn run_stream(
        &mut self,
        source: &mut dyn PacketSource,
        sink: Box<dyn MessageSink>,
    ) -> Result<(), RuntimeError> {
        let descriptor = self.descriptor.clone().ok_or(RuntimeError::NotRegistered)?;
        let init_message = init_command(self.instance_id.as_deref());

        let mut router = MessageRouter::new(sink, Arc::clone(&self.metrics));
        let mut dispatcher = Dispatcher::new(
            &descriptor,
            &mut self.context,
            &mut router,
            &self.decoder_factory,
            Arc::clone(&self.metrics),
            Arc::clone(&self.shutdown),
        );
        dispatcher.run(source, init_message)
    }

    /// Parse the CLI, open the input, and drive the stream. Returns the
    /// process exit code.
    pub fn run<I, T>(&mut self, args: I) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let parsed = match cli::parse_args(args) {
            Ok(parsed) => parsed,
            Err(e) => {
                use clap::error::ErrorKind;
                let code = match e.kind() {
                    ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                    _ => EXIT_MISUSE,
                };
                let _ = e.print();
                return code;
            }
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(cli::tracing_filter(parsed.loglevel))),
            )
            .try_init();
        vidbot_media::set_av_log_level(parsed.loglevel);

        if self.descriptor.is_none() {
            tracing::error!("no bot registered before run");
            return EXIT_MISUSE;
        }
        self.instance_id = parsed.id.clone();

        let mut source =
            match FileSource::open(&parsed.input, parsed.input_format.as_deref()) {
                Ok(source) => source,
                Err(e) => {
                    tracing::error!(error = %e, input = %parsed.input, "failed to open input");
                    return RuntimeError::from(e).exit_code();
                }
            };

        let sink = Box::new(WriterSink::new(io::stdout()));
        match self.run_stream(&mut source, sink) {
            Ok(()) => {
                tracing::info!("stream complete");
                EXIT_OK
            }
            Err(e) => {
                tracing::error!(error = %e, "run failed");
                e.exit_code()
            }
        }
    }
}

impl Default for BotRuntime {
    fn default() -> Self {
        BotRuntime::new()
    }
}

/// Initialization control message delivered to the bot before any frame.
fn init_command(instance_id: Option<&str>) -> Value {
    let mut body = Vec::new();
    if let Some(id) = instance_id {
        body.push((
            Value::Text("id".to_string()),
            Value::Text(id.to_string()),
        ));
    }
    control_command("configure", body)
}
