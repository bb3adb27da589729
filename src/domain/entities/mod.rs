//! Domain entity definitions.

mod display_state;
mod image;
mod level_map;

pub use display_state::{DisplaySnapshot, DisplayState};
pub use image::{DecodedImage, FetchState, ImageSource, Level, ResourceId};
pub use level_map::LevelMap;
