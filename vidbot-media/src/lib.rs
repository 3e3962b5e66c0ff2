//! Frame model, codec adapter, and frame normalization for vidbot.
//!
//! This crate owns everything that touches the av libraries: decoder
//! contexts, scaling contexts, and the pixel/geometry vocabulary shared with
//! bots. All av resource lifetime stays inside this crate; upstream
//! components only ever see owned [`RawFrame`]s and borrowed plane slices.

pub mod decoder;
pub mod error;
pub mod frame;
pub mod log;
pub mod scaler;

pub use decoder::{open_decoder, Decode, FfmpegDecoder};
pub use error::MediaError;
pub use frame::{
    allocate_image, parse_image_size, AllocatedImage, ImageFrame, ImageMetadata, ImageSize,
    PixelFormat, RawFrame, MAX_IMAGE_PLANES, ORIGINAL_IMAGE_HEIGHT, ORIGINAL_IMAGE_WIDTH,
};
pub use log::set_av_log_level;
pub use scaler::FrameConverter;
