//! Image identity registry.
//!
//! - [`ImageRegistry`] - Assigns opaque ids to paths and resolves them back
//! - [`ImageEntity`] - One registered image
//! - [`ImageFormat`] - Format detected from the file extension

mod entity;
mod store;

pub use entity::{ImageEntity, ImageFormat};
pub use store::{is_valid_id, ImageRegistry, ID_HEX_LEN, ID_PREFIX};
