//! Canonical image encoding.
//!
//! Every image that enters the pipeline is brought into one form before it is
//! stored or compared: 8-bit RGB, JPEG-encoded at the configured quality, with
//! comment and application segments removed. Input that is already 8-bit RGB
//! JPEG keeps its scan data, which makes [`ImageCodec::normalize`] idempotent:
//! normalizing the bytes of a [`NormalizedImage`] yields the very same bytes.
//! Equality is decided on decoded pixels, so two files that differ only in
//! container metadata compare equal.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageFormat, ImageReader};

use crate::config::CodecConfig;
use crate::error::SyncError;

/// Colour layout of an image as stored by its encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    Luma,
    LumaAlpha,
    Rgb,
    Rgba,
    Cmyk,
    Other,
}

impl From<ExtendedColorType> for ColorMode {
    fn from(value: ExtendedColorType) -> Self {
        match value {
            ExtendedColorType::L8 | ExtendedColorType::L16 => ColorMode::Luma,
            ExtendedColorType::La8 | ExtendedColorType::La16 => ColorMode::LumaAlpha,
            ExtendedColorType::Rgb8 | ExtendedColorType::Rgb16 | ExtendedColorType::Rgb32F => {
                ColorMode::Rgb
            }
            ExtendedColorType::Rgba8
            | ExtendedColorType::Rgba16
            | ExtendedColorType::Rgba32F => ColorMode::Rgba,
            ExtendedColorType::Cmyk8 => ColorMode::Cmyk,
            _ => ColorMode::Other,
        }
    }
}

/// An image in canonical form. Owned by the pipeline invocation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    width: u32,
    height: u32,
    mode: ColorMode,
    bytes: Bytes,
    /// Decoded RGB8 pixels of `bytes`.
    pixels: Bytes,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    /// Canonical encoded bytes. Cheap: shares the underlying buffer.
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Content equality between two canonical images.
///
/// Dimensions and colour mode are compared first; the decoded pixels are only
/// compared when those agree. Container metadata never takes part.
pub fn images_equal(a: &NormalizedImage, b: &NormalizedImage) -> bool {
    if a.width != b.width || a.height != b.height || a.mode != b.mode {
        return false;
    }
    a.pixels == b.pixels
}

/// Decoder/encoder pair producing [`NormalizedImage`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec {
    config: CodecConfig,
}

impl ImageCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Decode `raw` and bring it into canonical form.
    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedImage, SyncError> {
        if raw.is_empty() {
            return Err(SyncError::Decode("empty image payload".into()));
        }
        if raw.len() > self.config.max_image_bytes {
            return Err(SyncError::Decode(format!(
                "image too large: {} bytes (max {})",
                raw.len(),
                self.config.max_image_bytes
            )));
        }

        let reader = ImageReader::new(Cursor::new(raw))
            .with_guessed_format()
            .map_err(|e| SyncError::Decode(format!("failed to read image: {e}")))?;
        let format = reader
            .format()
            .ok_or_else(|| SyncError::Decode("could not detect image format".into()))?;
        let decoder = reader.into_decoder().map_err(decode_error)?;
        let stored_color = decoder.original_color_type();
        let image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
        let (width, height) = (image.width(), image.height());

        if format == ImageFormat::Jpeg && stored_color == ExtendedColorType::Rgb8 {
            if let Some(stripped) = strip_metadata(raw) {
                return Ok(NormalizedImage {
                    width,
                    height,
                    mode: ColorMode::Rgb,
                    bytes: Bytes::from(stripped),
                    pixels: Bytes::from(image.into_rgb8().into_raw()),
                });
            }
        }

        tracing::debug!(
            format = ?format,
            color = ?ColorMode::from(stored_color),
            width,
            height,
            "re-encoding image to canonical JPEG"
        );

        let rgb = image.into_rgb8();
        let mut buf = Vec::with_capacity(raw.len());
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.config.jpeg_quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| SyncError::Decode(format!("failed to encode canonical JPEG: {e}")))?;
        let bytes = strip_metadata(&buf).unwrap_or(buf);

        // Compare on what the stored bytes decode to, not on the lossy input.
        let pixels = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg)
            .map_err(decode_error)?
            .into_rgb8()
            .into_raw();

        Ok(NormalizedImage {
            width,
            height,
            mode: ColorMode::Rgb,
            bytes: Bytes::from(bytes),
            pixels: Bytes::from(pixels),
        })
    }

    /// [`normalize`](Self::normalize) on the blocking pool.
    ///
    /// Decoding is CPU-bound; a decoder panic is reported as a decode error
    /// for this image only.
    pub async fn normalize_blocking(&self, raw: Bytes) -> Result<NormalizedImage, SyncError> {
        let codec = *self;
        match tokio::task::spawn_blocking(move || codec.normalize(&raw)).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(SyncError::Decode("image decoder panicked".into())),
            Err(err) => Err(SyncError::Internal(format!(
                "normalization task did not complete: {err}"
            ))),
        }
    }
}

fn decode_error(err: image::ImageError) -> SyncError {
    SyncError::Decode(err.to_string())
}

/// Rebuild a JPEG stream without its comment and application segments.
///
/// APP14 is kept: it carries the colour transform flag the decoder needs.
/// Everything from the start-of-scan marker on is copied verbatim. `None` when
/// the marker structure cannot be walked.
fn strip_metadata(raw: &[u8]) -> Option<Vec<u8>> {
    if raw.len() < 4 || raw[..2] != [0xFF, 0xD8] {
        return None;
    }
    let mut out = Vec::with_capacity(raw.len());
    out.extend_from_slice(&[0xFF, 0xD8]);
    let mut i = 2;
    loop {
        if raw.get(i) != Some(&0xFF) {
            return None;
        }
        while raw.get(i) == Some(&0xFF) {
            i += 1;
        }
        let marker = *raw.get(i)?;
        i += 1;
        match marker {
            0xD9 => {
                out.extend_from_slice(&[0xFF, 0xD9]);
                return Some(out);
            }
            0x01 | 0xD0..=0xD7 => {
                out.extend_from_slice(&[0xFF, marker]);
                continue;
            }
            _ => {}
        }

        let len_bytes = raw.get(i..i + 2)?;
        let seg_len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
        if seg_len < 2 {
            return None;
        }
        let segment = raw.get(i..i + seg_len)?;
        let metadata = matches!(marker, 0xE0..=0xED | 0xEF | 0xFE);
        if !metadata {
            out.extend_from_slice(&[0xFF, marker]);
            out.extend_from_slice(segment);
        }
        i += seg_len;

        if marker == 0xDA {
            out.extend_from_slice(&raw[i..]);
            return Some(out);
        }
    }
}
