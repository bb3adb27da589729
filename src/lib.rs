//! imgtier - Tiered image loading with deduplicated, cancellable fetches.
//!
//! A consumer asks for several versions of an image at different levels
//! (lower is better). The loader shows the best version already in memory
//! right away, fetches the rest through memory, disk and network caches,
//! and only ever upgrades what the consumer displays.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, transport and the loader.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imgtier";
