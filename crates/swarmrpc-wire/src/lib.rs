//! Wire codec and stream framing for swarmrpc.
//!
//! The wire unit is the [`Envelope`]: a protobuf-compatible message holding
//! either a request or a response. Frames are delimited on the stream with
//! an unsigned-varint length prefix ([`FrameReader`]/[`FrameWriter`]).

pub mod codec;
pub mod error;
pub mod frame;
pub mod reader;
pub mod varint;
pub mod writer;

pub use codec::{Envelope, Request, Response, RpcError};
pub use error::{Result, WireError};
pub use frame::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD};
pub use reader::FrameReader;
pub use writer::FrameWriter;
