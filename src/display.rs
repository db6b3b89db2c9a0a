//! A VMU screen as seen from the display thread.
//!
//! [`VmuDisplay`] does what a second-screen view does on every refresh tick: find the VMU to
//! show, skip the copy when nothing changed, and map the LCD dots onto the configured palette.
//! It knows nothing about windows, so the same code drives the headless runner, the console
//! and the pixels window.

use log::debug;

use crate::config::DisplayConfig;
use crate::framebuffer::{is_lit, write_rgba};
use crate::{VmuBridge, VmuButtons, MAX_VMU_COUNT, VMU_LCD_PIXELS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    /// Started showing this slot.
    Connected(usize),
    /// The shown VMU went away and no other one is active.
    Disconnected,
    /// A new frame of this slot was copied.
    Updated(usize),
}

pub struct VmuDisplay {
    config: DisplayConfig,
    pixels: Box<[u32; VMU_LCD_PIXELS]>,
    colors: Box<[u32; VMU_LCD_PIXELS]>,
    active_vmu: Option<usize>,
}

impl VmuDisplay {
    pub fn new(config: DisplayConfig) -> Self {
        let off = config.pixel_off_color.argb();
        Self {
            config,
            pixels: Box::new([0; VMU_LCD_PIXELS]),
            colors: Box::new([off; VMU_LCD_PIXELS]),
            active_vmu: None,
        }
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Swap the configuration and repaint what is already on screen with the new palette.
    pub fn set_config(&mut self, config: DisplayConfig) {
        self.config = config;
        if self.active_vmu.is_some() {
            self.map_colors();
        } else {
            self.clear();
        }
    }

    pub fn active_vmu(&self) -> Option<usize> {
        self.active_vmu
    }

    /// Palette-mapped ARGB pixels, ready to draw.
    pub fn colors(&self) -> &[u32] {
        &self.colors[..]
    }

    /// Raw pixels as last copied from the bridge.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels[..]
    }

    /// One refresh tick. Returns what changed, if anything.
    pub fn poll(&mut self, bridge: &VmuBridge) -> Option<DisplayEvent> {
        if !self.config.enabled || !bridge.is_enabled() {
            return None;
        }

        let Some(vmu_id) = self.resolve_vmu(bridge) else {
            return self.active_vmu.take().map(|_| {
                self.clear();
                DisplayEvent::Disconnected
            });
        };

        if self.active_vmu != Some(vmu_id) {
            debug!("Display now showing VMU {}", vmu_id);
            self.active_vmu = Some(vmu_id);
            // Whatever is in the slot has not been shown yet.
            if bridge.copy_framebuffer(vmu_id, &mut self.pixels[..]) {
                self.map_colors();
            }
            return Some(DisplayEvent::Connected(vmu_id));
        }

        if !bridge.take_display_dirty(vmu_id) {
            return None;
        }
        if !bridge.copy_framebuffer(vmu_id, &mut self.pixels[..]) {
            return None;
        }
        self.map_colors();
        Some(DisplayEvent::Updated(vmu_id))
    }

    fn resolve_vmu(&self, bridge: &VmuBridge) -> Option<usize> {
        match self.config.selected_vmu {
            Some(id) if id < MAX_VMU_COUNT => Some(id).filter(|id| bridge.is_active(*id)),
            _ => (0..MAX_VMU_COUNT).find(|id| bridge.is_active(*id)),
        }
    }

    fn map_colors(&mut self) {
        let on = self.config.pixel_on_color.argb();
        let off = self.config.pixel_off_color.argb();
        for (color, px) in self.colors.iter_mut().zip(self.pixels.iter()) {
            *color = if is_lit(*px) { on } else { off };
        }
    }

    fn clear(&mut self) {
        self.colors.fill(self.config.pixel_off_color.argb());
    }

    /// Write the palette-mapped frame as RGBA8, 4 bytes per pixel.
    pub fn frame_rgba(&self, out: &mut [u8]) {
        write_rgba(&self.colors[..], out);
    }

    /// Forward a touch at `(x, y)` on a `width` x `height` surface to the shown VMU.
    ///
    /// Returns the buttons that were affected.
    pub fn touch(
        &self,
        bridge: &VmuBridge,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        pressed: bool,
    ) -> Option<VmuButtons> {
        if !self.config.show_button_overlay {
            return None;
        }
        let vmu_id = self.active_vmu?;
        let buttons = button_at(x, y, width, height)?;
        bridge.send_button(vmu_id, buttons, pressed);
        Some(buttons)
    }
}

/// Touch layout over the screen, a 3x3 grid:
///
/// ```text
///  .   UP    .
/// LEFT  .  RIGHT
///  A  DOWN   B
/// ```
pub fn button_at(x: f32, y: f32, width: f32, height: f32) -> Option<VmuButtons> {
    if width <= 0.0 || height <= 0.0 || x < 0.0 || y < 0.0 || x >= width || y >= height {
        return None;
    }
    let col = (x / width * 3.0) as u32;
    let row = (y / height * 3.0) as u32;

    match (col, row) {
        (1, 0) => Some(VmuButtons::UP),
        (1, 2) => Some(VmuButtons::DOWN),
        (0, 1) => Some(VmuButtons::LEFT),
        (2, 1) => Some(VmuButtons::RIGHT),
        (0, 2) => Some(VmuButtons::A),
        (2, 2) => Some(VmuButtons::B),
        _ => None,
    }
}
