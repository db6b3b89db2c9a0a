//! The bridge between an emulated VMU and whatever wants to show it on another screen.
//!
//! [`VmuBridge`] is an explicit context object: create it once, share it with an `Arc` between
//! the emulation thread and the display thread, and bracket its use with
//! [`VmuBridge::init`] and [`VmuBridge::term`].
//!
//! Consumer queries are tolerant. An unknown slot, an empty slot, and a bridge that is not
//! initialized all answer `false`/`None`/`0`. Producer hooks are strict and report a
//! [`BridgeError`] instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::clock::MonotonicClock;
use crate::config::BridgeConfig;
use crate::framebuffer::decode_lcd;
use crate::slot::VmuSlot;
use crate::{
    Framebuffer, VmuButtons, VmuFrameSink, MAX_VMU_COUNT, VMU_LCD_BYTES, VMU_LCD_PIXELS,
};

/// Called on the emulation thread after a frame was published: `(vmu_id, pixels, timestamp)`.
pub type UpdateCallback = Arc<dyn Fn(usize, &[u32], u64) + Send + Sync + 'static>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("VMU bridge is not initialized")]
    NotInitialized,
    #[error("VMU bridge is disabled")]
    Disabled,
    #[error("invalid VMU slot {0}")]
    InvalidSlot(usize),
    #[error("frame holds {len} pixels, expected {}", VMU_LCD_PIXELS)]
    ShortFrame { len: usize },
}

pub struct VmuBridge {
    config: BridgeConfig,
    initialized: AtomicBool,
    enabled: AtomicBool,
    clock: MonotonicClock,
    slots: [VmuSlot; MAX_VMU_COUNT],
    callback: Mutex<Option<UpdateCallback>>,
}

impl VmuBridge {
    /// Create a bridge. It stays dormant until [`VmuBridge::init`].
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            initialized: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            clock: MonotonicClock::new(),
            slots: std::array::from_fn(|_| VmuSlot::new()),
            callback: Mutex::new(None),
        }
    }

    //
    // Lifecycle
    //

    pub fn init(&self) {
        if self.initialized.load(Ordering::Acquire) {
            debug!("VMU bridge already initialized");
            return;
        }

        info!("Initializing VMU bridge");
        for slot in &self.slots {
            slot.reset();
        }
        self.enabled
            .store(self.config.enabled_on_init, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
        info!(
            "VMU bridge initialized ({})",
            if self.config.enabled_on_init {
                "enabled"
            } else {
                "disabled"
            }
        );
    }

    /// Shut the bridge down. Safe while the emulation thread is still pushing frames: those are
    /// rejected from here on, and slot memory lives as long as the bridge itself.
    pub fn term(&self) {
        // Disable first so that no new frame starts while we tear down.
        self.enabled.store(false, Ordering::Release);
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return;
        }

        info!("Terminating VMU bridge");
        self.set_callback(None);
        for slot in &self.slots {
            slot.reset();
        }
        info!("VMU bridge terminated");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.is_initialized() && self.enabled.load(Ordering::Acquire)
    }

    /// Disabling is not destructive: frames, stamps and connection state are kept, the bridge
    /// just stops taking new frames until enabled again.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        debug!(
            "VMU bridge {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    //
    // Consumer side
    //

    fn slot(&self, vmu_id: usize) -> Option<&VmuSlot> {
        if !self.is_initialized() {
            return None;
        }
        self.slots.get(vmu_id)
    }

    fn active_slot(&self, vmu_id: usize) -> Option<&VmuSlot> {
        self.slot(vmu_id).filter(|slot| slot.is_active())
    }

    /// Number of connected VMUs. Disabling the bridge does not reset it to 0.
    pub fn connected_count(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }

    pub fn is_active(&self, vmu_id: usize) -> bool {
        self.active_slot(vmu_id).is_some()
    }

    /// Peek at the dirty flag without clearing it.
    pub fn is_display_dirty(&self, vmu_id: usize) -> bool {
        self.slot(vmu_id).map_or(false, |slot| slot.is_dirty())
    }

    /// Clear the dirty flag and report whether it was set.
    pub fn take_display_dirty(&self, vmu_id: usize) -> bool {
        self.slot(vmu_id).map_or(false, |slot| slot.take_dirty())
    }

    /// Fresh copy of the current frame. Allocates, so prefer
    /// [`VmuBridge::copy_framebuffer`] when polling every frame.
    pub fn framebuffer(&self, vmu_id: usize) -> Option<Framebuffer> {
        self.active_slot(vmu_id).map(|slot| slot.snapshot())
    }

    /// Copy the current frame into `dest`, which must hold at least [`VMU_LCD_PIXELS`] pixels.
    ///
    /// Returns false, leaving `dest` untouched, when the slot is empty or unknown or `dest` is
    /// too small. On success the dirty flag is cleared; a frame landing during the copy sets it
    /// again.
    pub fn copy_framebuffer(&self, vmu_id: usize, dest: &mut [u32]) -> bool {
        let Some(slot) = self.active_slot(vmu_id) else {
            return false;
        };
        let Some(dest) = dest
            .get_mut(..VMU_LCD_PIXELS)
            .and_then(|dest| <&mut [u32; VMU_LCD_PIXELS]>::try_from(dest).ok())
        else {
            return false;
        };

        slot.take_dirty();
        slot.read_into(dest);
        true
    }

    /// Stamp of the last display update in milliseconds. `0` if the slot never got a frame or
    /// does not exist.
    pub fn last_update(&self, vmu_id: usize) -> u64 {
        self.slot(vmu_id).map_or(0, |slot| slot.last_update())
    }

    pub fn last_update_opt(&self, vmu_id: usize) -> Option<u64> {
        Some(self.last_update(vmu_id)).filter(|stamp| *stamp != 0)
    }

    pub fn send_button(&self, vmu_id: usize, buttons: VmuButtons, pressed: bool) {
        let Some(slot) = self.slot(vmu_id) else {
            debug!("Ignoring button {:?} for VMU {}", buttons, vmu_id);
            return;
        };

        if slot.set_buttons(buttons, pressed) {
            debug!(
                "VMU {} button {:02X} {}",
                vmu_id,
                buttons.bits(),
                if pressed { "pressed" } else { "released" }
            );
        }
    }

    //
    // Emulation side
    //

    pub fn button_state(&self, vmu_id: usize) -> VmuButtons {
        self.slot(vmu_id)
            .map_or(VmuButtons::empty(), |slot| slot.buttons())
    }

    /// Publish a new frame for `vmu_id` and return its stamp.
    pub fn on_display_update(&self, vmu_id: usize, frame: &[u32]) -> Result<u64, BridgeError> {
        if !self.is_initialized() {
            return Err(BridgeError::NotInitialized);
        }
        let slot = self
            .slots
            .get(vmu_id)
            .ok_or(BridgeError::InvalidSlot(vmu_id))?;
        if !self.enabled.load(Ordering::Acquire) {
            return Err(BridgeError::Disabled);
        }
        if frame.len() < VMU_LCD_PIXELS {
            return Err(BridgeError::ShortFrame { len: frame.len() });
        }

        let stamp = slot.publish(frame, self.clock.now_ms());
        trace!("VMU {} display updated at {}ms", vmu_id, stamp);

        let callback = self.callback.lock().ok().and_then(|cb| cb.clone());
        if let Some(callback) = callback {
            callback(vmu_id, &frame[..VMU_LCD_PIXELS], stamp);
        }

        Ok(stamp)
    }

    /// Same as [`VmuBridge::on_display_update`], from the raw one-bit-per-dot LCD plane.
    pub fn on_display_update_raw(
        &self,
        vmu_id: usize,
        lcd: &[u8; VMU_LCD_BYTES],
    ) -> Result<u64, BridgeError> {
        let mut frame = [0u32; VMU_LCD_PIXELS];
        decode_lcd(lcd, &mut frame);
        self.on_display_update(vmu_id, &frame)
    }

    pub fn on_connection_change(&self, vmu_id: usize, connected: bool) -> Result<(), BridgeError> {
        if !self.is_initialized() {
            return Err(BridgeError::NotInitialized);
        }
        let slot = self
            .slots
            .get(vmu_id)
            .ok_or(BridgeError::InvalidSlot(vmu_id))?;

        if connected {
            slot.set_active(true);
        } else {
            // A disabled bridge keeps the last frame around.
            slot.disconnect(self.enabled.load(Ordering::Acquire));
        }
        debug!(
            "VMU {} {}",
            vmu_id,
            if connected { "connected" } else { "disconnected" }
        );
        Ok(())
    }

    /// Register the update callback, or remove it with `None`.
    ///
    /// The callback runs on the emulation thread; keep it short.
    pub fn register_update_callback(&self, callback: Option<UpdateCallback>) {
        debug!(
            "VMU update callback {}",
            if callback.is_some() {
                "registered"
            } else {
                "unregistered"
            }
        );
        self.set_callback(callback);
    }

    fn set_callback(&self, callback: Option<UpdateCallback>) {
        match self.callback.lock() {
            Ok(mut cb) => *cb = callback,
            Err(poisoned) => *poisoned.into_inner() = callback,
        }
    }
}

impl Default for VmuBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl VmuFrameSink for VmuBridge {
    fn push_vmu_frame(&self, vmu_id: usize, lcd: &[u8; VMU_LCD_BYTES]) {
        match self.on_display_update_raw(vmu_id, lcd) {
            Ok(_) | Err(BridgeError::Disabled) => {}
            Err(e) => warn!("Dropping VMU {} frame: {}", vmu_id, e),
        }
    }

    fn set_vmu_connected(&self, vmu_id: usize, connected: bool) {
        if let Err(e) = self.on_connection_change(vmu_id, connected) {
            warn!("Ignoring VMU {} connection change: {}", vmu_id, e);
        }
    }

    fn vmu_buttons(&self, vmu_id: usize) -> VmuButtons {
        self.button_state(vmu_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::framebuffer::{PIXEL_OFF, PIXEL_ON};

    fn bridge() -> VmuBridge {
        let bridge = VmuBridge::default();
        bridge.init();
        bridge
    }

    fn frame(color: u32) -> Vec<u32> {
        vec![color; VMU_LCD_PIXELS]
    }

    #[test]
    fn test_init_defaults() {
        let bridge = bridge();
        assert!(bridge.is_initialized());
        assert!(bridge.is_enabled());
        assert_eq!(bridge.connected_count(), 0);

        let bridge = VmuBridge::new(BridgeConfig {
            enabled_on_init: false,
        });
        bridge.init();
        assert!(!bridge.is_enabled());
    }

    #[test]
    fn test_connection_tracking() {
        let bridge = bridge();
        bridge.on_connection_change(0, true).unwrap();
        bridge.on_connection_change(5, true).unwrap();
        assert_eq!(bridge.connected_count(), 2);
        assert!(bridge.is_active(0));
        assert!(bridge.is_active(5));
        assert!(!bridge.is_active(1));

        bridge.on_connection_change(0, false).unwrap();
        assert!(!bridge.is_active(0));
        assert_eq!(bridge.connected_count(), 1);

        assert_eq!(
            bridge.on_connection_change(8, true),
            Err(BridgeError::InvalidSlot(8))
        );
    }

    #[test]
    fn test_disconnect_leaves_consumer_state() {
        let bridge = bridge();
        bridge.on_display_update(0, &frame(PIXEL_ON)).unwrap();
        bridge.send_button(0, VmuButtons::A, true);

        bridge.set_enabled(false);
        bridge.on_connection_change(0, false).unwrap();
        assert!(!bridge.is_active(0));
        bridge.on_connection_change(0, true).unwrap();
        assert_eq!(bridge.button_state(0), VmuButtons::A);
        assert!(bridge.is_display_dirty(0));
        assert!(bridge.framebuffer(0).unwrap().iter().all(|px| *px == PIXEL_ON));

        // enabled: the screen is blanked, input and dirty are still left alone
        bridge.set_enabled(true);
        bridge.on_connection_change(0, false).unwrap();
        bridge.on_connection_change(0, true).unwrap();
        assert!(bridge.framebuffer(0).unwrap().iter().all(|px| *px == 0));
        assert_eq!(bridge.button_state(0), VmuButtons::A);
        assert!(bridge.is_display_dirty(0));
    }

    #[test]
    fn test_out_of_range_queries() {
        let bridge = bridge();
        for id in [8, 9, 100, usize::MAX] {
            assert!(!bridge.is_active(id));
            assert!(!bridge.is_display_dirty(id));
            assert!(!bridge.take_display_dirty(id));
            assert!(bridge.framebuffer(id).is_none());
            assert!(!bridge.copy_framebuffer(id, &mut [0; VMU_LCD_PIXELS]));
            assert_eq!(bridge.last_update(id), 0);
            assert!(bridge.button_state(id).is_empty());
            bridge.send_button(id, VmuButtons::A, true);
        }
    }

    #[test]
    fn test_update_sets_dirty_and_stamp() {
        let bridge = bridge();
        assert_eq!(bridge.last_update_opt(3), None);

        let first = bridge.on_display_update(3, &frame(PIXEL_ON)).unwrap();
        assert!(bridge.is_active(3));
        assert!(bridge.is_display_dirty(3));
        // peeking does not clear
        assert!(bridge.is_display_dirty(3));
        assert_eq!(bridge.last_update(3), first);
        assert_eq!(bridge.last_update_opt(3), Some(first));

        assert!(bridge.take_display_dirty(3));
        assert!(!bridge.is_display_dirty(3));

        let second = bridge.on_display_update(3, &frame(PIXEL_OFF)).unwrap();
        assert!(second > first);
        assert!(bridge.is_display_dirty(3));
    }

    #[test]
    fn test_copy_then_get_match() {
        let bridge = bridge();
        let mut pixels = frame(PIXEL_OFF);
        pixels[0] = PIXEL_ON;
        pixels[VMU_LCD_PIXELS - 1] = PIXEL_ON;
        bridge.on_display_update(1, &pixels).unwrap();

        let mut dest = vec![0u32; VMU_LCD_PIXELS];
        assert!(bridge.copy_framebuffer(1, &mut dest));
        assert!(!bridge.is_display_dirty(1));

        let fb = bridge.framebuffer(1).unwrap();
        assert_eq!(&fb[..], &dest[..]);
        assert_eq!(&dest[..], &pixels[..]);
        // the allocating path leaves the flag alone
        bridge.on_display_update(1, &pixels).unwrap();
        bridge.framebuffer(1).unwrap();
        assert!(bridge.is_display_dirty(1));
    }

    #[test]
    fn test_copy_failures_leave_dest_untouched() {
        let bridge = bridge();
        let mut dest = vec![7u32; VMU_LCD_PIXELS];
        assert!(!bridge.copy_framebuffer(2, &mut dest));
        assert!(dest.iter().all(|px| *px == 7));

        bridge.on_display_update(2, &frame(PIXEL_ON)).unwrap();
        let mut short = vec![7u32; VMU_LCD_PIXELS - 1];
        assert!(!bridge.copy_framebuffer(2, &mut short));
        assert!(short.iter().all(|px| *px == 7));
        assert!(bridge.is_display_dirty(2));

        let mut long = vec![7u32; VMU_LCD_PIXELS + 4];
        assert!(bridge.copy_framebuffer(2, &mut long));
        assert!(long[..VMU_LCD_PIXELS].iter().all(|px| *px == PIXEL_ON));
        assert!(long[VMU_LCD_PIXELS..].iter().all(|px| *px == 7));
    }

    #[test]
    fn test_rejected_updates() {
        let bridge = VmuBridge::default();
        assert_eq!(
            bridge.on_display_update(0, &frame(PIXEL_ON)),
            Err(BridgeError::NotInitialized)
        );

        bridge.init();
        assert_eq!(
            bridge.on_display_update(8, &frame(PIXEL_ON)),
            Err(BridgeError::InvalidSlot(8))
        );
        assert_eq!(
            bridge.on_display_update(0, &[PIXEL_ON; 10]),
            Err(BridgeError::ShortFrame { len: 10 })
        );
        assert!(!bridge.is_active(0));
    }

    #[test]
    fn test_disabled_is_dormant() {
        let bridge = bridge();
        bridge.on_display_update(0, &frame(PIXEL_ON)).unwrap();
        bridge.on_connection_change(4, true).unwrap();
        let stamp = bridge.last_update(0);
        bridge.take_display_dirty(0);

        bridge.set_enabled(false);
        assert!(!bridge.is_enabled());
        assert_eq!(
            bridge.on_display_update(0, &frame(PIXEL_OFF)),
            Err(BridgeError::Disabled)
        );

        // state is frozen, not wiped
        assert_eq!(bridge.connected_count(), 2);
        assert!(bridge.is_active(0));
        assert!(!bridge.is_display_dirty(0));
        assert_eq!(bridge.last_update(0), stamp);
        assert!(bridge.framebuffer(0).unwrap().iter().all(|px| *px == PIXEL_ON));

        bridge.set_enabled(true);
        bridge.on_display_update(0, &frame(PIXEL_OFF)).unwrap();
        assert!(bridge.last_update(0) > stamp);
    }

    #[test]
    fn test_button_toggle() {
        let bridge = bridge();
        bridge.send_button(6, VmuButtons::UP, true);
        let before = bridge.button_state(6);

        bridge.send_button(6, VmuButtons::A, true);
        assert!(bridge.button_state(6).contains(VmuButtons::A | VmuButtons::UP));
        bridge.send_button(6, VmuButtons::A, false);
        assert_eq!(bridge.button_state(6), before);
    }

    #[test]
    fn test_term_then_init_resets() {
        let bridge = bridge();
        for id in 0..MAX_VMU_COUNT {
            bridge.on_display_update(id, &frame(PIXEL_ON)).unwrap();
            bridge.send_button(id, VmuButtons::B, true);
        }
        assert_eq!(bridge.connected_count(), MAX_VMU_COUNT);

        bridge.term();
        assert!(!bridge.is_initialized());
        assert!(!bridge.is_enabled());
        assert_eq!(bridge.connected_count(), 0);
        assert!(!bridge.is_active(0));
        assert_eq!(
            bridge.on_connection_change(0, true),
            Err(BridgeError::NotInitialized)
        );
        // a second term is harmless
        bridge.term();

        bridge.init();
        for id in 0..MAX_VMU_COUNT {
            assert!(!bridge.is_active(id));
            assert!(!bridge.is_display_dirty(id));
            assert_eq!(bridge.last_update(id), 0);
            assert!(bridge.button_state(id).is_empty());
        }
    }

    #[test]
    fn test_init_twice_keeps_state() {
        let bridge = bridge();
        bridge.on_display_update(2, &frame(PIXEL_ON)).unwrap();
        bridge.init();
        assert!(bridge.is_active(2));
    }

    #[test]
    fn test_update_callback() {
        let bridge = bridge();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let callback: UpdateCallback = Arc::new(move |id: usize, pixels: &[u32], stamp: u64| {
            assert_eq!(id, 7);
            assert_eq!(pixels.len(), VMU_LCD_PIXELS);
            assert!(stamp > 0);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bridge.register_update_callback(Some(callback));

        bridge.on_display_update(7, &frame(PIXEL_ON)).unwrap();
        bridge.on_display_update(7, &frame(PIXEL_OFF)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        bridge.register_update_callback(None);
        bridge.on_display_update(7, &frame(PIXEL_ON)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_frame_sink_raw_plane() {
        let bridge = bridge();
        let mut lcd = [0u8; VMU_LCD_BYTES];
        lcd[0] = 0b1100_0000;

        bridge.set_vmu_connected(0, true);
        bridge.push_vmu_frame(0, &lcd);
        let fb = bridge.framebuffer(0).unwrap();
        assert_eq!(fb.pixel(0, 0), PIXEL_ON);
        assert_eq!(fb.pixel(1, 0), PIXEL_ON);
        assert_eq!(fb.pixel(2, 0), PIXEL_OFF);

        bridge.send_button(0, VmuButtons::MODE, true);
        assert_eq!(bridge.vmu_buttons(0), VmuButtons::MODE);
    }

    fn stress(frames: u32, pause: Duration) {
        let bridge = Arc::new(bridge());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let bridge = bridge.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for n in 0..frames {
                    bridge
                        .on_display_update(4, &frame(0xFF00_0000 | n))
                        .unwrap();
                    std::thread::sleep(pause);
                }
                done.store(true, Ordering::Release);
            })
        };

        let mut dest = frame(0);
        let mut last_stamp = 0;
        while !done.load(Ordering::Acquire) {
            if bridge.copy_framebuffer(4, &mut dest) {
                assert!(dest.iter().all(|px| *px == dest[0]), "torn frame");
            }
            let stamp = bridge.last_update(4);
            assert!(stamp >= last_stamp);
            last_stamp = stamp;
            std::thread::sleep(pause);
        }
        writer.join().unwrap();

        assert!(bridge.copy_framebuffer(4, &mut dest));
        assert!(dest.iter().all(|px| *px == 0xFF00_0000 | (frames - 1)));
    }

    #[test]
    fn test_no_torn_frames_half_second_at_60hz() {
        stress(30, Duration::from_millis(16));
    }

    #[test]
    #[ignore = "takes 10 seconds"]
    fn test_no_torn_frames_ten_seconds_at_60hz() {
        stress(600, Duration::from_millis(16));
    }

    #[test]
    fn test_no_torn_frames_flat_out() {
        stress(20_000, Duration::ZERO);
    }
}
