//! Board-side drawing: ROM JPEG decode and status text.

pub mod jpeg;
pub mod status;
