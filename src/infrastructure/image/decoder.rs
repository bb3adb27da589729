//! `image`-crate backed decoder.

use std::io::Cursor;

use image::{ImageError, ImageReader, Limits};
use tracing::trace;

use crate::domain::entities::DecodedImage;
use crate::domain::errors::FetchError;
use crate::domain::ports::Decoder;

/// Decodes PNG, JPEG and WebP, downscaling to the requested bounds.
#[derive(Debug, Clone, Default)]
pub struct RasterDecoder {
    max_alloc: Option<u64>,
}

impl RasterDecoder {
    /// Creates a decoder with the `image` crate's default limits.
    #[must_use]
    pub const fn new() -> Self {
        Self { max_alloc: None }
    }

    /// Caps how much memory a single decode may allocate.
    #[must_use]
    pub const fn with_max_alloc(max_alloc: Option<u64>) -> Self {
        Self { max_alloc }
    }
}

impl Decoder for RasterDecoder {
    fn decode(
        &self,
        bytes: &[u8],
        max_width: u32,
        max_height: u32,
    ) -> Result<DecodedImage, FetchError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| FetchError::decode(format!("Failed to sniff format: {e}")))?;

        if let Some(max_alloc) = self.max_alloc {
            let mut limits = Limits::default();
            limits.max_alloc = Some(max_alloc);
            reader.limits(limits);
        }

        let img = reader.decode().map_err(map_image_error)?;

        let img = if img.width() > max_width || img.height() > max_height {
            trace!(
                width = img.width(),
                height = img.height(),
                max_width = max_width,
                max_height = max_height,
                "Downscaling decoded image"
            );
            img.thumbnail(max_width, max_height)
        } else {
            img
        };

        Ok(DecodedImage::new(img))
    }
}

fn map_image_error(error: ImageError) -> FetchError {
    match error {
        ImageError::Limits(e) => FetchError::resource_exhausted(e.to_string()),
        other => FetchError::decode(format!("Failed to decode image: {other}")),
    }
}
