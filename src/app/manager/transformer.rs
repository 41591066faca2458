//! Post-decode image transformers

use std::sync::Arc;

use image::imageops::FilterType;

use crate::app::image::Image;

/// Transforms a decoded image before it is cached and delivered
///
/// The transformer key becomes part of the cache key, so two transformers
/// must only share a key if they produce identical output.
pub trait ImageTransformer: Send + Sync {
    fn transformer_key(&self) -> String;

    /// Return `None` to keep the input image
    fn transform(&self, image: &Image, key: &str) -> Option<Image>;
}

/// Runs transformers in order, feeding each the previous output
#[derive(Clone, Default)]
pub struct TransformerPipeline {
    transformers: Vec<Arc<dyn ImageTransformer>>,
}

impl TransformerPipeline {
    pub fn new(transformers: Vec<Arc<dyn ImageTransformer>>) -> Self {
        Self { transformers }
    }

    pub fn push(mut self, transformer: Arc<dyn ImageTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

impl ImageTransformer for TransformerPipeline {
    fn transformer_key(&self) -> String {
        self.transformers
            .iter()
            .map(|t| t.transformer_key())
            .collect::<Vec<_>>()
            .join("-")
    }

    fn transform(&self, image: &Image, key: &str) -> Option<Image> {
        let mut current: Option<Image> = None;
        for transformer in &self.transformers {
            let input = current.as_ref().unwrap_or(image);
            if let Some(output) = transformer.transform(input, key) {
                current = Some(output);
            }
        }
        current
    }
}

/// Resizes to fit (or fill exactly) a target size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeTransformer {
    pub width: u32,
    pub height: u32,
    pub preserve_aspect_ratio: bool,
}

impl ResizeTransformer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            preserve_aspect_ratio: true,
        }
    }

    pub fn exact(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            preserve_aspect_ratio: false,
        }
    }
}

impl ImageTransformer for ResizeTransformer {
    fn transformer_key(&self) -> String {
        format!(
            "Resize({},{},{})",
            self.width,
            self.height,
            u8::from(self.preserve_aspect_ratio)
        )
    }

    fn transform(&self, image: &Image, _key: &str) -> Option<Image> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let buffer = if self.preserve_aspect_ratio {
            image.buffer().resize(self.width, self.height, FilterType::Triangle)
        } else {
            image
                .buffer()
                .resize_exact(self.width, self.height, FilterType::Triangle)
        };
        Some(
            Image::new(buffer, image.format())
                .with_scale(image.scale())
                .into_transformed(),
        )
    }
}

/// Converts to grayscale, keeping alpha
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrayscaleTransformer;

impl ImageTransformer for GrayscaleTransformer {
    fn transformer_key(&self) -> String {
        "Grayscale".to_string()
    }

    fn transform(&self, image: &Image, _key: &str) -> Option<Image> {
        let buffer = image.buffer();
        let gray = if buffer.color().has_alpha() {
            image::DynamicImage::ImageLumaA8(buffer.to_luma_alpha8())
        } else {
            image::DynamicImage::ImageLuma8(buffer.to_luma8())
        };
        Some(
            Image::new(gray, image.format())
                .with_scale(image.scale())
                .into_transformed(),
        )
    }
}
