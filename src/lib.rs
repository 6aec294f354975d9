use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bits;
pub mod config;
pub mod fingerprint;
pub mod lsb;
pub mod raster;
pub mod service;

pub use fingerprint::{Analysis, Fingerprint};
pub use lsb::{decode_invisible_watermark, embed_invisible_watermark};

/// The address the watermark service listens on by default.
pub const ADDR: &str = "127.0.0.1:8080";

/// Everything that can go wrong inside the codec.
///
/// A payload that does not fit the image is deliberately absent: the encoder
/// degrades to returning the original bytes instead.
#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("failed to rasterize image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to read image bytes: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload character {ch:?} at position {position} does not fit in one byte")]
    UnsupportedCharacter { ch: char, position: usize },

    #[error("payload contains the terminator sequence {:?}", bits::TERMINATOR)]
    PayloadContainsTerminator,
}

// --- SERVICE MESSAGE TYPES ---

/// Header frame sent by a client ahead of the image frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum WatermarkRequest {
    Embed {
        mime_type: String,
        fingerprint: Fingerprint,
    },
    Analyze {
        mime_type: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum WatermarkResponse {
    /// Lossless image bytes; the original bytes if embedding was not possible.
    Image(Vec<u8>),
    Analysis(Analysis),
    /// The request itself was malformed or too large.
    Rejected(String),
}
