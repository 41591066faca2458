//! Decoded image type and the pluggable codec collaborator
//!
//! The pipeline never decodes pixels itself. It hands raw bytes to an
//! [`ImageCoder`] and stores the resulting [`Image`] in the memory cache.
//! [`StandardCoder`] is the default coder, backed by the `image` crate.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::constants::{cache, decoding};

/// Container format of encoded image bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Format could not be determined
    #[default]
    Undefined,
    Jpeg,
    Png,
    Gif,
    Tiff,
    WebP,
    Heic,
    Heif,
    Pdf,
    Svg,
    Bmp,
}

impl ImageFormat {
    /// Sniff the container format from the leading bytes
    pub fn detect(data: &[u8]) -> Self {
        let Some(&first) = data.first() else {
            return ImageFormat::Undefined;
        };

        match first {
            0xFF => ImageFormat::Jpeg,
            0x89 => ImageFormat::Png,
            0x47 => ImageFormat::Gif,
            0x49 | 0x4D => ImageFormat::Tiff,
            0x42 if data.starts_with(b"BM") => ImageFormat::Bmp,
            0x52 if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" => {
                ImageFormat::WebP
            }
            0x00 if data.len() >= 12 && &data[4..8] == b"ftyp" => match &data[8..12] {
                b"heic" | b"heix" | b"hevc" | b"hevx" => ImageFormat::Heic,
                b"mif1" | b"msf1" => ImageFormat::Heif,
                _ => ImageFormat::Undefined,
            },
            0x25 if data.starts_with(b"%PDF") => ImageFormat::Pdf,
            0x3C => {
                // Only look at the head of the document for the svg tag
                let head = &data[..data.len().min(512)];
                if String::from_utf8_lossy(head).contains("<svg") {
                    ImageFormat::Svg
                } else {
                    ImageFormat::Undefined
                }
            }
            _ => ImageFormat::Undefined,
        }
    }

    /// Conventional file extension for the format
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ImageFormat::Undefined => None,
            ImageFormat::Jpeg => Some("jpg"),
            ImageFormat::Png => Some("png"),
            ImageFormat::Gif => Some("gif"),
            ImageFormat::Tiff => Some("tiff"),
            ImageFormat::WebP => Some("webp"),
            ImageFormat::Heic => Some("heic"),
            ImageFormat::Heif => Some("heif"),
            ImageFormat::Pdf => Some("pdf"),
            ImageFormat::Svg => Some("svg"),
            ImageFormat::Bmp => Some("bmp"),
        }
    }

    /// MIME type for the format
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Undefined => "application/octet-stream",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Heic => "image/heic",
            ImageFormat::Heif => "image/heif",
            ImageFormat::Pdf => "application/pdf",
            ImageFormat::Svg => "image/svg+xml",
            ImageFormat::Bmp => "image/bmp",
        }
    }

    fn to_codec_format(self) -> Option<image::ImageFormat> {
        match self {
            ImageFormat::Jpeg => Some(image::ImageFormat::Jpeg),
            ImageFormat::Png => Some(image::ImageFormat::Png),
            ImageFormat::Gif => Some(image::ImageFormat::Gif),
            ImageFormat::WebP => Some(image::ImageFormat::WebP),
            ImageFormat::Bmp => Some(image::ImageFormat::Bmp),
            _ => None,
        }
    }
}

/// A decoded image held by the memory cache
#[derive(Debug, Clone)]
pub struct Image {
    buffer: DynamicImage,
    format: ImageFormat,
    scale: f32,
    transformed: bool,
}

impl Image {
    /// Wrap a decoded pixel buffer
    pub fn new(buffer: DynamicImage, format: ImageFormat) -> Self {
        Self {
            buffer,
            format,
            scale: 1.0,
            transformed: false,
        }
    }

    /// Set the display scale (pixels per point)
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = if scale >= 1.0 { scale } else { 1.0 };
        self
    }

    /// Mark this image as the output of a transformer
    pub fn into_transformed(mut self) -> Self {
        self.transformed = true;
        self
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// Pixel dimensions as `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        (self.buffer.width(), self.buffer.height())
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_transformed(&self) -> bool {
        self.transformed
    }

    pub fn has_alpha(&self) -> bool {
        self.buffer.color().has_alpha()
    }

    /// Borrow the underlying pixel buffer
    pub fn buffer(&self) -> &DynamicImage {
        &self.buffer
    }

    /// Shrink to fit within a thumbnail size
    ///
    /// Images already inside the bounds are returned unchanged.
    pub fn fit_thumbnail(&self, size: (u32, u32), preserve_aspect_ratio: bool) -> Image {
        Image {
            buffer: fit_thumbnail(self.buffer.clone(), size, preserve_aspect_ratio),
            ..self.clone()
        }
    }

    /// Approximate decoded size in bytes, used as memory cache cost
    pub fn memory_cost(&self) -> usize {
        let bytes_per_pixel = usize::from(self.buffer.color().bytes_per_pixel()).max(1);
        self.width() as usize * self.height() as usize * bytes_per_pixel
    }
}

fn fit_thumbnail(
    buffer: DynamicImage,
    (max_width, max_height): (u32, u32),
    preserve_aspect_ratio: bool,
) -> DynamicImage {
    if max_width == 0
        || max_height == 0
        || (buffer.width() <= max_width && buffer.height() <= max_height)
    {
        return buffer;
    }
    if preserve_aspect_ratio {
        buffer.thumbnail(max_width, max_height)
    } else {
        buffer.thumbnail_exact(max_width, max_height)
    }
}

/// Decode parameters derived from load options and context
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    /// Display scale applied to the decoded image
    pub scale: f32,
    /// Maximum pixel size of a thumbnail decode
    pub thumbnail_pixel_size: Option<(u32, u32)>,
    /// Keep aspect ratio when producing a thumbnail
    pub preserve_aspect_ratio: bool,
    /// Decode only the first frame of animated content
    pub first_frame_only: bool,
    /// Downsample images whose decoded size exceeds the scale-down budget
    pub scale_down_large_images: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            thumbnail_pixel_size: None,
            preserve_aspect_ratio: true,
            first_frame_only: false,
            scale_down_large_images: false,
        }
    }
}

/// Codec collaborator used by the cache engine and request manager
///
/// Implementations are called synchronously from blocking worker threads,
/// never from the async executor directly.
pub trait ImageCoder: Send + Sync {
    /// Decode complete image bytes
    fn decode(&self, data: &[u8], options: &DecodeOptions) -> Option<Image>;

    /// Encode an image in the given format, `Undefined` lets the coder choose
    fn encode(&self, image: &Image, format: ImageFormat, quality: Option<u8>) -> Option<Vec<u8>>;

    /// Detect the container format of encoded bytes
    fn detect_format(&self, data: &[u8]) -> ImageFormat {
        ImageFormat::detect(data)
    }

    /// Decode a partially received payload for progressive delivery
    fn decode_partial(&self, _data: &[u8], _options: &DecodeOptions) -> Option<Image> {
        None
    }
}

/// Default coder backed by the `image` crate (PNG, JPEG, GIF, WebP, BMP)
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardCoder;

impl StandardCoder {
    pub fn new() -> Self {
        Self
    }

    fn apply_size_limits(buffer: DynamicImage, options: &DecodeOptions) -> DynamicImage {
        let mut buffer = buffer;

        if let Some(size) = options.thumbnail_pixel_size {
            buffer = fit_thumbnail(buffer, size, options.preserve_aspect_ratio);
        }

        if options.scale_down_large_images {
            let bytes =
                buffer.width() as usize * buffer.height() as usize * decoding::BYTES_PER_PIXEL;
            if bytes > decoding::SCALE_DOWN_LIMIT_BYTES {
                let ratio = (decoding::SCALE_DOWN_LIMIT_BYTES as f64 / bytes as f64).sqrt();
                let width = ((buffer.width() as f64) * ratio).floor().max(1.0) as u32;
                let height = ((buffer.height() as f64) * ratio).floor().max(1.0) as u32;
                debug!(
                    "Scaling down large image from {}x{} to {}x{}",
                    buffer.width(),
                    buffer.height(),
                    width,
                    height
                );
                buffer = buffer.resize_exact(width, height, FilterType::Triangle);
            }
        }

        buffer
    }
}

impl ImageCoder for StandardCoder {
    fn decode(&self, data: &[u8], options: &DecodeOptions) -> Option<Image> {
        if data.is_empty() {
            return None;
        }

        let format = ImageFormat::detect(data);
        let decoded = match format.to_codec_format() {
            Some(codec_format) => image::load_from_memory_with_format(data, codec_format),
            None => image::load_from_memory(data),
        };

        match decoded {
            Ok(buffer) => {
                let buffer = Self::apply_size_limits(buffer, options);
                Some(Image::new(buffer, format).with_scale(options.scale))
            }
            Err(e) => {
                debug!("Failed to decode {:?} image data: {}", format, e);
                None
            }
        }
    }

    fn encode(&self, image: &Image, format: ImageFormat, quality: Option<u8>) -> Option<Vec<u8>> {
        // Undefined keeps the source format, falling back to PNG/JPEG by alpha
        let format = match format {
            ImageFormat::Undefined => match image.format().to_codec_format() {
                Some(_) => image.format(),
                None if image.has_alpha() => ImageFormat::Png,
                None => ImageFormat::Jpeg,
            },
            other => other,
        };

        let mut cursor = Cursor::new(Vec::new());
        let result = match format {
            ImageFormat::Jpeg => {
                let quality = quality.unwrap_or(cache::DEFAULT_ENCODE_QUALITY).clamp(1, 100);
                let rgb = image.buffer().to_rgb8();
                JpegEncoder::new_with_quality(&mut cursor, quality).encode_image(&rgb)
            }
            ImageFormat::WebP | ImageFormat::Gif => {
                let rgba = DynamicImage::ImageRgba8(image.buffer().to_rgba8());
                let codec_format = format.to_codec_format()?;
                rgba.write_to(&mut cursor, codec_format)
            }
            other => {
                let codec_format = other.to_codec_format()?;
                image.buffer().write_to(&mut cursor, codec_format)
            }
        };

        match result {
            Ok(()) => {
                trace!("Encoded {}x{} image as {:?}", image.width(), image.height(), format);
                Some(cursor.into_inner())
            }
            Err(e) => {
                debug!("Failed to encode image as {:?}: {}", format, e);
                None
            }
        }
    }

    fn decode_partial(&self, data: &[u8], options: &DecodeOptions) -> Option<Image> {
        // Truncated payloads usually fail; a success means the tail was padding
        match ImageFormat::detect(data) {
            ImageFormat::Undefined => None,
            _ => self.decode(data, options),
        }
    }
}

/// Scale factor encoded in a key's file name (`icon@2x.png` gives 2.0)
pub fn scale_factor_for_key(key: &str) -> f32 {
    let path = key.split(['?', '#']).next().unwrap_or(key);
    let stem = Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();

    stem.rsplit_once('@')
        .and_then(|(_, suffix)| suffix.strip_suffix('x'))
        .and_then(|factor| factor.parse::<f32>().ok())
        .filter(|factor| *factor >= 1.0)
        .unwrap_or(1.0)
}
