//! Wireline protocol — envelope types and framing codec.
//!
//! Everything a peer puts on the wire is an [`Envelope`]: one flat JSON
//! object per newline-terminated line. The format is deliberately
//! line-oriented so a session can be inspected with any line-reading tool.
//!
//! - **envelope**: the tagged message kinds and their payload shape
//! - **codec**: turns a byte stream into a lazy sequence of envelopes and back

pub mod codec;
pub mod envelope;

pub use codec::{encode, CodecError, FrameReader, MAX_FRAME_SIZE};
pub use envelope::{Envelope, Kind};
