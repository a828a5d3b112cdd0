//! Fixed geometry of the VGA text-mode framebuffer.

/// Text-mode rows.
pub const BUFFER_HEIGHT: usize = 25;
/// Text-mode columns.
pub const BUFFER_WIDTH: usize = 80;
