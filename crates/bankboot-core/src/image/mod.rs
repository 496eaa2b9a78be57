//! Image headers and image validation
//!
//! This module decodes the header at the start of an image area and judges
//! whether the image in a slot may be executed.

mod header;
mod validate;

pub use header::*;
pub use validate::*;
