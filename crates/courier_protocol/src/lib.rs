#![forbid(unsafe_code)]

//! JSON wire protocol between the delivery server and its clients.
//!
//! One JSON object per websocket text frame, tagged by a `type` field.
//! Server-originated frames are [`ServerEvent`]; client commands are
//! [`ClientCommand`]. Unrecognized client command tags decode to
//! [`ClientCommand::Unknown`] so newer clients never break older servers.

pub mod wire;

pub use wire::{
	ClientCommand, DEFAULT_MAX_FRAME_SIZE, ProtocolError, ServerEvent, decode_command, decode_command_default,
	encode_event, encode_event_default,
};
