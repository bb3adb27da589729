//! Port for turning raw bytes into pixels.

use crate::domain::entities::DecodedImage;
use crate::domain::errors::FetchError;

/// Pure decode routine, callable from any worker thread.
#[cfg_attr(test, mockall::automock)]
pub trait Decoder: Send + Sync {
    /// Decodes `bytes`, downscaling to fit within `max_width` x `max_height`.
    ///
    /// # Errors
    /// Returns `FetchError::Decode` for malformed content and
    /// `FetchError::ResourceExhausted` when the decode cannot allocate.
    fn decode(
        &self,
        bytes: &[u8],
        max_width: u32,
        max_height: u32,
    ) -> Result<DecodedImage, FetchError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Decoder that produces a small solid image for any payload except
    /// `b"corrupt"`.
    pub struct StubDecoder;

    impl Decoder for StubDecoder {
        fn decode(
            &self,
            bytes: &[u8],
            _max_width: u32,
            _max_height: u32,
        ) -> Result<DecodedImage, FetchError> {
            if bytes == b"corrupt" {
                return Err(FetchError::decode("unrecognized image header"));
            }
            Ok(DecodedImage::new(image::DynamicImage::new_rgba8(4, 4)))
        }
    }
}
