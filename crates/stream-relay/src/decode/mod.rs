//! Frame decoding for raw stream input.
//!
//! [`FrameDecoder`] turns incrementally delivered text (not aligned to line
//! boundaries) into [`Frame`](crate::frame::Frame)s. [`FrameStream`] wraps a
//! byte-chunk [`Stream`](futures_util::Stream) with a decoder.

mod constants;
pub mod decoder;
pub mod stream;

pub use decoder::FrameDecoder;
pub use stream::FrameStream;
