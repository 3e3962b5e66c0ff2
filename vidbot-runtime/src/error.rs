//! Runtime error kinds and their mapping to process exit codes.

use thiserror::Error;
use vidbot_media::MediaError;
use vidbot_protocol::WireError;

/// Clean end of stream.
pub const EXIT_OK: i32 = 0;
/// Stream or runtime failure mid-flight.
pub const EXIT_STREAM_FAILURE: i32 = 1;
/// Misuse: bad arguments, unregistered bot, double registration.
pub const EXIT_MISUSE: i32 = 2;
/// Initialization failure: decoder not found, bad extradata, unopenable input.
pub const EXIT_INIT_FAILURE: i32 = 3;

/// Fatal errors surfaced by the runtime. Transient media errors never reach
/// this type; they are logged and dropped where they occur.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("bot already registered")]
    AlreadyRegistered,

    #[error("no bot registered")]
    NotRegistered,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl RuntimeError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::AlreadyRegistered
            | RuntimeError::NotRegistered
            | RuntimeError::InvalidArgument(_) => EXIT_MISUSE,
            RuntimeError::Media(MediaError::NotFound(_))
            | RuntimeError::Media(MediaError::InvalidArgument(_)) => EXIT_INIT_FAILURE,
            RuntimeError::Media(_) | RuntimeError::Wire(_) => EXIT_STREAM_FAILURE,
        }
    }
}
