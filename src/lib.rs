//! VP8 video bitstream decoder.
//!
//! A bit-exact implementation of VP8 decoding as specified in RFC 6386:
//! boolean arithmetic decoding, intra and inter prediction, the inverse
//! DCT/WHT pair and the in-loop deblocking filter. The decoder maintains
//! the three reference slots (last, golden, altref) across frames and
//! produces YUV 4:2:0 output.
//!
//! ## Example
//!
//! ```ignore
//! use vp8_decode::Vp8Decoder;
//!
//! let mut decoder = Vp8Decoder::new();
//! let frame = decoder.decode_frame(&compressed_data)?;
//! println!("{}x{}", frame.width, frame.height);
//! ```
//!
//! Frames must be fed in coding order, starting with a keyframe.
//! Invisible frames (alt-ref updates) still update the reference slots
//! and are returned with `visible` unset.

#![warn(missing_docs)]

pub mod error;

mod bool_decoder;
mod decoder;
mod frame;
mod header;
mod loop_filter;
mod modes;
mod motion;
mod prediction;
mod tables;
mod tokens;
mod transform;

pub use bool_decoder::BoolDecoder;
pub use decoder::{Vp8Decoder, Vp8DecoderConfig};
pub use error::{Result, Vp8Error};
pub use frame::{Vp8ColorSpace, Vp8Frame, Vp8FrameType};
pub use header::FrameTag;
