//! Least Significant Bit (LSB) fingerprinting of generated images.
//!
//! The payload plus [`TERMINATOR`] is written MSB-first into the LSB of every
//! R, G and B sample, row-major from the top-left pixel. Alpha samples are
//! never touched. Decoding stops at the first terminator it sees.

use crate::bits::{
    bits_msb_first, bytes_to_string, carrier_capacity, frame_payload, rows_needed,
    BitAccumulator, TERMINATOR,
};
use crate::raster::Raster;
use crate::WatermarkError;
use log::debug;

/// Rows scanned before the decoder falls back to the whole image.
pub const DECODE_PREFIX_ROWS: u32 = 50;

/// Which part of the image ended up carrying the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Embedded {
    /// Only the first `n` rows were touched.
    Rows(u32),
    /// The whole image was used. Unreachable with the spare row in
    /// `rows_needed`; kept as a guard in case the row estimate falls short.
    FullImage,
    /// Even the whole image cannot hold the payload. Nothing was written.
    TooSmall,
}

#[inline]
fn is_alpha(index: usize) -> bool {
    index % 4 == 3
}

/// Writes `bits` into the LSB of every non-alpha byte of `buf`, in order.
/// Returns the number of bits written.
pub fn write_lsb(buf: &mut [u8], bits: impl IntoIterator<Item = u8>) -> usize {
    let mut bits = bits.into_iter();
    let mut written = 0;
    for (i, byte) in buf.iter_mut().enumerate() {
        if is_alpha(i) {
            continue;
        }
        let Some(bit) = bits.next() else {
            break;
        };
        if bit == 1 {
            *byte |= 1;
        } else {
            *byte &= !1;
        }
        written += 1;
    }
    written
}

/// Reads LSBs from `buf` until the terminator shows up, returning the text
/// before it.
///
/// The terminator is checked after every completed byte, so its first
/// occurrence always ends at the byte just pushed and a suffix test is enough.
pub fn scan_for_payload(buf: &[u8]) -> Option<String> {
    let terminator = TERMINATOR.as_bytes();
    let mut acc = BitAccumulator::new();
    let mut decoded = Vec::new();

    let lsbs = buf
        .iter()
        .enumerate()
        .filter(|&(i, _)| !is_alpha(i))
        .map(|(_, byte)| byte & 1);

    for bit in lsbs {
        if let Some(byte) = acc.push(bit) {
            decoded.push(byte);
            if decoded.ends_with(terminator) {
                decoded.truncate(decoded.len() - terminator.len());
                return Some(bytes_to_string(&decoded));
            }
        }
    }
    None
}

/// Embeds `payload` into `raster` in place.
pub fn embed(raster: &mut Raster, payload: &str) -> Result<Embedded, WatermarkError> {
    // 1. Frame the payload and work out how many rows it needs
    let framed = frame_payload(payload)?;
    let bit_len = framed.len() * 8;
    let rows = rows_needed(bit_len, raster.width(), raster.height());

    // 2. Try the leading rows only
    let restricted = raster.rows_mut(rows);
    if bit_len <= carrier_capacity(restricted.len()) {
        write_lsb(restricted, bits_msb_first(&framed));
        debug!("Embedded {} bits into the first {} rows", bit_len, rows);
        return Ok(Embedded::Rows(rows));
    }

    // 3. Fall back to the whole canvas
    let full = raster.rows_mut(raster.height());
    if bit_len <= carrier_capacity(full.len()) {
        write_lsb(full, bits_msb_first(&framed));
        debug!("Embedded {} bits using the full image", bit_len);
        return Ok(Embedded::FullImage);
    }

    debug!(
        "Image too small: needs {} bits, has {} bits available",
        bit_len,
        carrier_capacity(full.len())
    );
    Ok(Embedded::TooSmall)
}

/// Recovers an embedded payload, if there is one.
pub fn extract(raster: &Raster) -> Option<String> {
    // 1. Bounded prefix: payloads are short and always start at row 0
    let prefix_rows = DECODE_PREFIX_ROWS.min(raster.height());
    if let Some(payload) = scan_for_payload(raster.rows(prefix_rows)) {
        return Some(payload);
    }

    // 2. Nothing more to read if the prefix already covered every row
    if prefix_rows >= raster.height() {
        return None;
    }

    // 3. Rescan from scratch over the whole image
    debug!(
        "No terminator in the first {} rows, scanning all {} rows",
        prefix_rows,
        raster.height()
    );
    scan_for_payload(raster.all())
}

/// Embeds `payload` into an encoded image and returns PNG bytes.
///
/// `mime_type` describes the input only; the output is always PNG. If the
/// image cannot hold the payload, the original bytes come back unchanged.
pub fn embed_invisible_watermark(
    image_bytes: &[u8],
    mime_type: &str,
    payload: &str,
) -> Result<Vec<u8>, WatermarkError> {
    let mut raster = Raster::decode(image_bytes, mime_type)?;
    match embed(&mut raster, payload)? {
        Embedded::TooSmall => Ok(image_bytes.to_vec()),
        Embedded::Rows(_) | Embedded::FullImage => raster.into_png(),
    }
}

/// Reads the payload from an encoded image. `Ok(None)` means the image
/// carries no watermark.
pub fn decode_invisible_watermark(
    image_bytes: &[u8],
    mime_type: &str,
) -> Result<Option<String>, WatermarkError> {
    let raster = Raster::decode(image_bytes, mime_type)?;
    Ok(extract(&raster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn flat(width: u32, height: u32) -> Raster {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 101, 54, 255]));
        Raster::from_image(DynamicImage::ImageRgba8(img))
    }

    #[test]
    fn write_lsb_skips_alpha() {
        let mut buf = [0u8, 0, 0, 0, 0, 0, 0, 0];
        let written = write_lsb(&mut buf, [1, 1, 1, 1, 1]);
        assert_eq!(written, 5);
        assert_eq!(buf, [1, 1, 1, 0, 1, 1, 0, 0]);
    }

    #[test]
    fn write_lsb_clears_bits() {
        let mut buf = [0xFFu8; 4];
        write_lsb(&mut buf, [0, 1, 0]);
        assert_eq!(buf, [0xFE, 0xFF, 0xFE, 0xFF]);
    }

    #[test]
    fn write_lsb_stops_when_buffer_ends() {
        let mut buf = [0u8; 4];
        assert_eq!(write_lsb(&mut buf, std::iter::repeat(1)), 3);
    }

    #[test]
    fn scan_stops_at_first_terminator() {
        let mut buf = vec![0u8; 400];
        let framed = b"bob||END||trailing||END||";
        write_lsb(&mut buf, bits_msb_first(framed));
        assert_eq!(scan_for_payload(&buf).as_deref(), Some("bob"));
    }

    #[test]
    fn scan_without_terminator_is_none() {
        assert_eq!(scan_for_payload(&[0u8; 400]), None);
    }

    #[test]
    fn short_payload_only_touches_leading_rows() {
        let mut raster = flat(100, 100);
        let before = raster.all().to_vec();
        assert_eq!(embed(&mut raster, "alice").unwrap(), Embedded::Rows(2));
        // 96 bits land in the first 32 pixels
        assert_eq!(&raster.all()[128..], &before[128..]);
        assert_eq!(extract(&raster).as_deref(), Some("alice"));
    }

    #[test]
    fn too_small_image_is_left_untouched() {
        // 2x3 image: 18 carrier bits, nowhere near enough
        let mut raster = flat(2, 3);
        let before = raster.all().to_vec();
        assert_eq!(embed(&mut raster, "x").unwrap(), Embedded::TooSmall);
        assert_eq!(raster.all(), &before[..]);
    }

    #[test]
    fn payload_past_prefix_is_found_by_full_scan() {
        // 50 rows of width 1 carry 150 bits; this payload needs 8 * 43 bits
        let mut raster = flat(1, 200);
        let payload = "a-rather-long-identifier-for-testing";
        assert!(matches!(embed(&mut raster, payload).unwrap(), Embedded::Rows(_)));
        assert_eq!(extract(&raster).as_deref(), Some(payload));
    }

    #[test]
    fn payload_ending_in_partial_terminator_is_refused() {
        let mut raster = flat(64, 64);
        let before = raster.all().to_vec();
        assert!(matches!(
            embed(&mut raster, "x||END|"),
            Err(WatermarkError::PayloadContainsTerminator)
        ));
        assert_eq!(raster.all(), &before[..]);
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut raster = flat(10, 10);
        embed(&mut raster, "").unwrap();
        assert_eq!(extract(&raster).as_deref(), Some(""));
    }
}
