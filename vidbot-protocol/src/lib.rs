//! Shared types and wire formats for vidbot.

pub mod message;
pub mod types;

pub use message::{
    command_action, command_body, control_command, decode_message, encode_message, read_framed,
    write_framed, BotMessage, MessageKind, WireError,
};
pub use types::FrameId;
