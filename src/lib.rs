pub mod bridge;
pub mod button;
mod clock;
pub mod config;
pub mod display;
pub mod framebuffer;
mod slot;
pub mod snapshot;

pub use bridge::{BridgeError, VmuBridge};
pub use button::{Button, ButtonEdges, VmuButtons};
pub use framebuffer::Framebuffer;

pub const VMU_LCD_WIDTH: usize = 48;
pub const VMU_LCD_HEIGHT: usize = 32;
pub const VMU_LCD_PIXELS: usize = VMU_LCD_WIDTH * VMU_LCD_HEIGHT;
/// Size of the raw LCD plane as the VMU itself stores it: one bit per dot.
pub const VMU_LCD_BYTES: usize = VMU_LCD_PIXELS / 8;

/// 4 controller buses with 2 expansion ports each.
pub const MAX_VMU_COUNT: usize = 8;

/// Slot index for the VMU plugged into `bus_port` of the controller on `bus_id`.
pub fn slot_index(bus_id: usize, bus_port: usize) -> Option<usize> {
    if bus_id < MAX_VMU_COUNT / 2 && bus_port < 2 {
        Some(bus_id * 2 + bus_port)
    } else {
        None
    }
}

/// What an emulation core talks to when its VMU display or input changes.
///
/// Implementations must be callable from the emulation thread while a display thread is reading
/// at the same time, hence `&self` everywhere.
pub trait VmuFrameSink {
    fn push_vmu_frame(&self, vmu_id: usize, lcd: &[u8; VMU_LCD_BYTES]);
    fn set_vmu_connected(&self, vmu_id: usize, connected: bool);
    fn vmu_buttons(&self, vmu_id: usize) -> VmuButtons;
}
