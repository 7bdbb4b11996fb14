//! VP8 decoder error types.

use thiserror::Error;

/// VP8 decoder error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Vp8Error {
    /// Invalid frame header.
    #[error("Invalid frame header: {0}")]
    InvalidFrameHeader(String),

    /// Invalid partition layout.
    #[error("Invalid partition: {0}")]
    InvalidPartition(String),

    /// Invalid bitstream.
    #[error("Invalid VP8 bitstream: {0}")]
    InvalidBitstream(String),

    /// A boolean decoder ran past the end of its partition.
    #[error("Corrupted frame data: {0}")]
    Corrupted(String),

    /// Invalid dimensions.
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Coded frame width.
        width: u16,
        /// Coded frame height.
        height: u16,
    },

    /// Frame dimensions exceed the configured limits.
    #[error("Frame size {width}x{height} exceeds limit {max_width}x{max_height}")]
    LimitExceeded {
        /// Coded frame width.
        width: u16,
        /// Coded frame height.
        height: u16,
        /// Configured width limit.
        max_width: u16,
        /// Configured height limit.
        max_height: u16,
    },

    /// Unsupported feature.
    #[error("Unsupported VP8 feature: {0}")]
    UnsupportedFeature(String),
}

/// VP8 result type.
pub type Result<T> = std::result::Result<T, Vp8Error>;
