use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::button::InputMask;
use crate::clock::next_stamp;
use crate::framebuffer::SharedFramebuffer;
use crate::{Framebuffer, VmuButtons, VMU_LCD_PIXELS};

/// State of one VMU attachment point.
///
/// Fields are split by owner: the emulation thread writes `active`, the pixels, `last_update_ms`
/// and sets `dirty`. The display thread writes `input` and clears `dirty`.
pub(crate) struct VmuSlot {
    active: AtomicBool,
    dirty: AtomicBool,
    last_update_ms: AtomicU64,
    input: InputMask,
    framebuffer: SharedFramebuffer,
}

impl VmuSlot {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            last_update_ms: AtomicU64::new(0),
            input: InputMask::default(),
            framebuffer: SharedFramebuffer::new(),
        }
    }

    pub fn reset(&self) {
        self.active.store(false, Ordering::Release);
        {
            let writer = self.framebuffer.begin_write();
            writer.fill(0);
            self.last_update_ms.store(0, Ordering::Release);
        }
        self.dirty.store(false, Ordering::Release);
        self.input.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Mark the VMU as unplugged, blanking its screen when `blank` is set. `input` and `dirty`
    /// belong to the display thread and stay as they are.
    pub fn disconnect(&self, blank: bool) {
        self.active.store(false, Ordering::Release);
        if blank {
            self.framebuffer.begin_write().fill(0);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn last_update(&self) -> u64 {
        self.last_update_ms.load(Ordering::Acquire)
    }

    /// Store a new frame and return its stamp. `frame` holds at least [`VMU_LCD_PIXELS`] pixels.
    pub fn publish(&self, frame: &[u32], now_ms: u64) -> u64 {
        let stamp = {
            let writer = self.framebuffer.begin_write();
            writer.write(&frame[..VMU_LCD_PIXELS]);
            let stamp = next_stamp(self.last_update_ms.load(Ordering::Relaxed), now_ms);
            self.last_update_ms.store(stamp, Ordering::Release);
            stamp
        };
        self.active.store(true, Ordering::Release);
        // Last, so that a reader seeing the flag also sees the frame.
        self.dirty.store(true, Ordering::Release);
        stamp
    }

    pub fn read_into(&self, dest: &mut [u32; VMU_LCD_PIXELS]) {
        self.framebuffer.read_into(dest);
    }

    pub fn snapshot(&self) -> Framebuffer {
        let mut fb = Framebuffer::new();
        self.framebuffer.read_into(fb.as_array_mut());
        fb
    }

    pub fn set_buttons(&self, buttons: VmuButtons, pressed: bool) -> bool {
        self.input.set(buttons, pressed)
    }

    pub fn buttons(&self) -> VmuButtons {
        self.input.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framebuffer::PIXEL_ON;

    #[test]
    fn test_publish_marks_active_and_dirty() {
        let slot = VmuSlot::new();
        assert!(!slot.is_active());
        assert!(!slot.is_dirty());
        assert_eq!(slot.last_update(), 0);

        let frame = [PIXEL_ON; VMU_LCD_PIXELS];
        assert_eq!(slot.publish(&frame, 5), 5);
        assert!(slot.is_active());
        assert!(slot.is_dirty());
        assert_eq!(slot.last_update(), 5);

        // same millisecond still moves forward
        assert_eq!(slot.publish(&frame, 5), 6);

        assert!(slot.take_dirty());
        assert!(!slot.take_dirty());
        assert_eq!(slot.snapshot().as_array(), &frame);
    }

    #[test]
    fn test_disconnect_and_reset() {
        let slot = VmuSlot::new();
        slot.publish(&[PIXEL_ON; VMU_LCD_PIXELS], 3);
        slot.set_buttons(VmuButtons::A, true);

        slot.disconnect(false);
        assert!(!slot.is_active());
        assert!(slot.snapshot().iter().all(|px| *px == PIXEL_ON));

        slot.disconnect(true);
        assert!(slot.snapshot().iter().all(|px| *px == 0));
        // consumer-side state and the stamp survive, only a reset forgets them
        assert!(slot.is_dirty());
        assert_eq!(slot.buttons(), VmuButtons::A);
        assert_eq!(slot.last_update(), 3);

        slot.reset();
        assert_eq!(slot.last_update(), 0);
        assert!(!slot.is_dirty());
        assert!(slot.buttons().is_empty());
    }
}
