//! Image decoding and encoding using pure Rust codecs.
//!
//! The decoder sniffs the container from magic bytes (falling back to
//! the file extension) and supports PNG (via `png`) and JPEG (via
//! `zune-jpeg`). The encoder writes PNG.

use crate::error::{Error, Result};
use crate::filter;
use crate::frame::{Frame, PixelFormat};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8];

/// Output image container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// PNG (lossless, supports alpha).
    #[default]
    Png,
}

impl OutputFormat {
    /// File extension for this container.
    pub const fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
        }
    }

    /// Parse from an extension-like name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            _ => None,
        }
    }
}

/// Decode an image file into a frame.
///
/// PNG decodes to `Gray8`, `Rgb24` or `Rgba` (palette and 16-bit
/// images are expanded/stripped to 8-bit); JPEG decodes to `Gray8` or
/// `Rgb24`.
pub fn decode_image(path: &Path) -> Result<Frame> {
    let bytes = std::fs::read(path)?;

    let frame = if bytes.starts_with(PNG_MAGIC) {
        decode_png(&bytes)
    } else if bytes.starts_with(JPEG_MAGIC) {
        decode_jpeg(&bytes)
    } else {
        // No recognizable magic; try the extension before giving up.
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => decode_png(&bytes),
            Some("jpg") | Some("jpeg") => decode_jpeg(&bytes),
            _ => Err(Error::Decode(format!(
                "unrecognized image format: {}",
                path.display()
            ))),
        }
    }?;

    debug!(
        path = %path.display(),
        width = frame.width(),
        height = frame.height(),
        pixel_format = ?frame.pixel_format(),
        "decoded image"
    );
    Ok(frame)
}

fn decode_png(bytes: &[u8]) -> Result<Frame> {
    let mut decoder = png::Decoder::new(std::io::Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| Error::Decode(format!("PNG header decode failed: {e}")))?;

    let mut pixels = vec![0u8; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut pixels)
        .map_err(|e| Error::Decode(format!("PNG decode failed: {e}")))?;
    pixels.truncate(info.buffer_size());

    let (width, height) = (info.width, info.height);
    match info.color_type {
        png::ColorType::Grayscale => Frame::from_data(width, height, PixelFormat::Gray8, pixels),
        png::ColorType::Rgb => Frame::from_data(width, height, PixelFormat::Rgb24, pixels),
        png::ColorType::Rgba => Frame::from_data(width, height, PixelFormat::Rgba, pixels),
        png::ColorType::GrayscaleAlpha => {
            // Expand gray+alpha to RGBA.
            let mut rgba = Vec::with_capacity(pixels.len() * 2);
            for pair in pixels.chunks_exact(2) {
                rgba.extend_from_slice(&[pair[0], pair[0], pair[0], pair[1]]);
            }
            Frame::from_data(width, height, PixelFormat::Rgba, rgba)
        }
        other => Err(Error::Decode(format!(
            "unsupported PNG color type {other:?}"
        ))),
    }
}

fn decode_jpeg(bytes: &[u8]) -> Result<Frame> {
    let mut decoder = zune_jpeg::JpegDecoder::new(bytes);
    decoder
        .decode_headers()
        .map_err(|e| Error::Decode(format!("JPEG header decode failed: {e:?}")))?;

    let info = decoder
        .info()
        .ok_or_else(|| Error::Decode("missing JPEG info".to_string()))?;
    let (width, height) = (info.width as u32, info.height as u32);

    let pixels = decoder
        .decode()
        .map_err(|e| Error::Decode(format!("JPEG decode failed: {e:?}")))?;

    let format = match pixels.len() {
        n if n == PixelFormat::Gray8.buffer_size(width, height) => PixelFormat::Gray8,
        n if n == PixelFormat::Rgb24.buffer_size(width, height) => PixelFormat::Rgb24,
        n if n == PixelFormat::Rgba.buffer_size(width, height) => PixelFormat::Rgba,
        n => {
            return Err(Error::Decode(format!(
                "unexpected JPEG output size {} for {}x{}",
                n, width, height
            )));
        }
    };
    Frame::from_data(width, height, format, pixels)
}

/// Encode a frame to an image file.
///
/// Formats the PNG encoder cannot take directly (`Bgr24`, `Bgra`,
/// `I420`) are converted on the way out.
pub fn encode_image(frame: &Frame, path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Png => encode_png(frame, path),
    }
}

fn encode_png(frame: &Frame, path: &Path) -> Result<()> {
    let (frame, color_type) = match frame.pixel_format() {
        PixelFormat::Gray8 => (frame.clone(), png::ColorType::Grayscale),
        PixelFormat::Rgb24 => (frame.clone(), png::ColorType::Rgb),
        PixelFormat::Rgba => (frame.clone(), png::ColorType::Rgba),
        PixelFormat::Bgr24 | PixelFormat::I420 => (
            filter::ops_convert(frame, PixelFormat::Rgb24)?,
            png::ColorType::Rgb,
        ),
        PixelFormat::Bgra => (
            filter::ops_convert(frame, PixelFormat::Rgba)?,
            png::ColorType::Rgba,
        ),
    };

    let file = File::create(path)?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, frame.width(), frame.height());
    encoder.set_color(color_type);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder
        .write_header()
        .map_err(|e| Error::Encode(format!("PNG header write failed: {e}")))?;
    writer
        .write_image_data(frame.data())
        .map_err(|e| Error::Encode(format!("PNG encode failed: {e}")))?;

    debug!(path = %path.display(), "encoded image");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut frame = Frame::new(width, height, PixelFormat::Rgb24).unwrap();
        for (i, byte) in frame.data_mut().iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        frame
    }

    #[test]
    fn test_png_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.png");

        let original = gradient_frame(31, 17);
        encode_image(&original, &path, OutputFormat::Png).unwrap();

        let decoded = decode_image(&path).unwrap();
        assert_eq!(decoded.width(), 31);
        assert_eq!(decoded.height(), 17);
        assert_eq!(decoded.pixel_format(), PixelFormat::Rgb24);
        assert_eq!(decoded.data(), original.data());
    }

    #[test]
    fn test_png_bgr_converted_on_encode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bgr.png");

        let frame =
            Frame::from_data(1, 1, PixelFormat::Bgr24, vec![10, 20, 30]).unwrap();
        encode_image(&frame, &path, OutputFormat::Png).unwrap();

        let decoded = decode_image(&path).unwrap();
        // Stored as RGB: channels come back reordered.
        assert_eq!(decoded.data(), &[30, 20, 10]);
    }

    #[test]
    fn test_decode_garbage_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.dat");
        std::fs::write(&path, b"not an image at all").unwrap();

        assert!(matches!(decode_image(&path), Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.png");
        assert!(matches!(decode_image(&path), Err(Error::Io(_))));
    }

    #[test]
    fn test_output_format_names() {
        assert_eq!(OutputFormat::Png.extension(), "png");
        assert_eq!(OutputFormat::from_name("PNG"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::from_name("webp"), None);
    }
}
