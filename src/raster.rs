//! RGBA pixel access over the `image` crate.
//!
//! A [`Raster`] owns one decoded bitmap for the duration of a codec call. The
//! codec only ever sees leading rows as a flat `R,G,B,A,R,G,B,A…` slice.

use crate::WatermarkError;
use image::io::Reader as ImgReader;
use image::{DynamicImage, ImageFormat, ImageOutputFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

pub struct Raster {
    pixels: RgbaImage,
}

impl Raster {
    /// Decodes compressed image bytes to 8-bit RGBA.
    ///
    /// The format is sniffed from the bytes first; `mime_type` is only used
    /// when sniffing fails.
    pub fn decode(bytes: &[u8], mime_type: &str) -> Result<Self, WatermarkError> {
        let mut reader = ImgReader::new(Cursor::new(bytes)).with_guessed_format()?;
        if reader.format().is_none() {
            if let Some(format) = format_for_mime(mime_type) {
                reader.set_format(format);
            }
        }
        let img = reader.decode()?;
        Ok(Self::from_image(img))
    }

    pub fn from_image(img: DynamicImage) -> Self {
        Self {
            pixels: img.into_rgba8(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Bytes of the first `rows` rows (clamped to the image height).
    pub fn rows(&self, rows: u32) -> &[u8] {
        let len = self.row_bytes(rows);
        &self.pixels.as_raw()[..len]
    }

    pub fn rows_mut(&mut self, rows: u32) -> &mut [u8] {
        let len = self.row_bytes(rows);
        let raw: &mut [u8] = &mut self.pixels;
        &mut raw[..len]
    }

    /// The whole canvas, all rows.
    pub fn all(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// Serializes the full canvas as PNG. The output must stay lossless or
    /// the embedded bits are destroyed.
    pub fn into_png(self) -> Result<Vec<u8>, WatermarkError> {
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(self.pixels)
            .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)?;
        Ok(out)
    }

    fn row_bytes(&self, rows: u32) -> usize {
        let rows = rows.min(self.height()) as usize;
        rows * self.width() as usize * 4
    }
}

/// Maps an input MIME type to the decoder that handles it.
pub fn format_for_mime(mime_type: &str) -> Option<ImageFormat> {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
        "image/webp" => Some(ImageFormat::WebP),
        "image/gif" => Some(ImageFormat::Gif),
        "image/bmp" | "image/x-bmp" => Some(ImageFormat::Bmp),
        "image/tiff" => Some(ImageFormat::Tiff),
        "image/x-tga" | "image/tga" => Some(ImageFormat::Tga),
        _ => None,
    }
}

/// Best-effort MIME type for a file on disk, used by the command-line tools.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("tga") => "image/x-tga",
        _ => "application/octet-stream",
    }
}
