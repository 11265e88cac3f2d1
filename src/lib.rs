//! Badgey: draw screens for a 128x296 e-ink badge and send them over BLE.
//!
//! Main modules:
//! - compose: lay text and image blocks out on the canvas
//! - dithering: ordered dithering down to 1 bit per pixel
//! - bmp: load/save the packed screen as a 1-bit BMP
//! - session: flow-controlled transfer state machine
//! - link: async driver running a session against a transport
//! - ble: btleplug transport

pub mod ble;
pub mod bmp;
pub mod compose;
pub mod config;
pub mod dithering;
pub mod error;
pub mod font;
pub mod link;
pub mod packed;
pub mod protocol;
pub mod session;
pub mod transport;

pub const BADGE_WIDTH: u32 = 128;
pub const BADGE_HEIGHT: u32 = 296;
/// Bytes per packed row.
pub const ROW_BYTES: usize = (BADGE_WIDTH as usize).div_ceil(8);
/// Size of one packed screen.
pub const FB_BYTES: usize = ROW_BYTES * BADGE_HEIGHT as usize;

/// BLE API: scan for badges, drive a transfer
pub use ble::{scan, BleTransport};
/// Rendering pipeline
pub use compose::{Canvas, Compositor, ContentBlock, ImageBlock, Layout, TextBlock};
pub use config::BadgeConfig;
pub use font::{Alignment, FontBook, FontFamily};
pub use link::BadgeLink;
pub use packed::PackedBitmap;
pub use session::{LinkSettings, SessionState, SessionStatus, TransferSession};
pub use transport::{DeviceInfo, Transport, TransportEvent};

/// Produces the screen for a block list.
///
/// A native bitmap carried by an image block is returned bit for bit; otherwise
/// the blocks are composed and dithered with the global `gamma`.
pub fn render(blocks: &[ContentBlock], compositor: &Compositor<'_>, gamma: f32) -> PackedBitmap {
    if let Some(native) = compose::native_screen(blocks) {
        return native.clone();
    }
    dithering::quantize(&compositor.compose(blocks), gamma)
}
