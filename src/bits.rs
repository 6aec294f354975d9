//! Bit-packing shared by the encoder and decoder.
//!
//! Wire format: every payload character is one byte (U+0000..=U+00FF), the
//! terminator is appended, and each byte is emitted most-significant bit first.

use crate::WatermarkError;

/// Marks the end of an embedded payload. Changing it breaks every image
/// watermarked before the change.
pub const TERMINATOR: &str = "||END||";

/// Usable carrier bits per RGBA pixel (alpha is never touched).
pub const BITS_PER_PIXEL: usize = 3;

/// Converts `payload` to its single-byte form and appends the terminator.
///
/// The first terminator in the framed bytes must be the appended one, so a
/// payload that contains it, or ends in a prefix of it, is rejected.
pub fn frame_payload(payload: &str) -> Result<Vec<u8>, WatermarkError> {
    let mut framed = Vec::with_capacity(payload.len() + TERMINATOR.len());
    for (position, ch) in payload.chars().enumerate() {
        let byte = u8::try_from(u32::from(ch))
            .map_err(|_| WatermarkError::UnsupportedCharacter { ch, position })?;
        framed.push(byte);
    }
    let payload_len = framed.len();
    framed.extend_from_slice(TERMINATOR.as_bytes());

    let terminator = TERMINATOR.as_bytes();
    let first = framed.windows(terminator.len()).position(|w| w == terminator);
    if first != Some(payload_len) {
        return Err(WatermarkError::PayloadContainsTerminator);
    }
    Ok(framed)
}

/// Expands bytes into bits, MSB first.
pub fn bits_msb_first(bytes: &[u8]) -> impl Iterator<Item = u8> + '_ {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |i| (byte >> (7 - i)) & 1))
}

/// Maps recovered bytes back to characters one-to-one (Latin-1).
pub fn bytes_to_string(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

/// Number of carrier bits in an RGBA buffer of `buffer_len` bytes.
pub fn carrier_capacity(buffer_len: usize) -> usize {
    buffer_len * 3 / 4
}

/// Leading rows the encoder touches for a bitstream of `bit_len` bits,
/// including one spare row, clamped to `height`.
pub fn rows_needed(bit_len: usize, width: u32, height: u32) -> u32 {
    if width == 0 {
        return 0;
    }
    let pixels = bit_len.div_ceil(BITS_PER_PIXEL);
    let rows = pixels.div_ceil(width as usize) + 1;
    rows.min(height as usize) as u32
}

/// Collects single bits and hands back a byte every eighth push.
#[derive(Debug, Default)]
pub struct BitAccumulator {
    current: u8,
    filled: u8,
}

impl BitAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bit: u8) -> Option<u8> {
        self.current = (self.current << 1) | (bit & 1);
        self.filled += 1;
        if self.filled == 8 {
            let byte = self.current;
            self.current = 0;
            self.filled = 0;
            Some(byte)
        } else {
            None
        }
    }
}
