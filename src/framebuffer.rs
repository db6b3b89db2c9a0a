//! Pixel storage for the VMU LCD.
//!
//! [`Framebuffer`] is a plain owned frame handed to consumers. [`SharedFramebuffer`] is the
//! per-slot store written by the emulation thread and read by the display thread. It uses a
//! generation counter with a busy bit, so readers never observe a frame that mixes two writes.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{fence, AtomicU32, Ordering};

use bitvec::prelude::*;
use byteorder::{BigEndian, ByteOrder};

use crate::{VMU_LCD_BYTES, VMU_LCD_HEIGHT, VMU_LCD_PIXELS, VMU_LCD_WIDTH};

/// ARGB value of a lit LCD dot.
pub const PIXEL_ON: u32 = 0xFFFF_FFFF;
/// ARGB value of an unlit LCD dot.
pub const PIXEL_OFF: u32 = 0xFF00_0000;

/// Marks `generation` as "write in progress". Published generations never carry it.
const GENERATION_BUSY_BIT: u32 = 1 << 31;

/// One complete VMU frame: 48x32 ARGB pixels, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct Framebuffer(Box<[u32; VMU_LCD_PIXELS]>);

impl Framebuffer {
    pub fn new() -> Self {
        Self::filled(0)
    }

    pub fn filled(color: u32) -> Self {
        Self(Box::new([color; VMU_LCD_PIXELS]))
    }

    /// Decode a raw LCD plane. Each row is 6 bytes, most significant bit is the leftmost dot.
    pub fn from_lcd(lcd: &[u8; VMU_LCD_BYTES]) -> Self {
        let mut fb = Self::new();
        decode_lcd(lcd, &mut fb.0);
        fb
    }

    pub fn to_lcd(&self) -> [u8; VMU_LCD_BYTES] {
        let mut lcd = [0u8; VMU_LCD_BYTES];
        let bits = lcd.view_bits_mut::<Msb0>();
        for (i, px) in self.0.iter().enumerate() {
            bits.set(i, is_lit(*px));
        }
        lcd
    }

    /// # Panics
    ///
    /// If `(x, y)` lies outside the 48x32 screen.
    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.0[index(x, y)]
    }

    /// # Panics
    ///
    /// If `(x, y)` lies outside the 48x32 screen.
    pub fn set_pixel(&mut self, x: usize, y: usize, color: u32) {
        self.0[index(x, y)] = color;
    }

    pub fn as_array(&self) -> &[u32; VMU_LCD_PIXELS] {
        &self.0
    }

    pub fn as_array_mut(&mut self) -> &mut [u32; VMU_LCD_PIXELS] {
        &mut self.0
    }

    /// Write the frame as RGBA8 bytes, the layout `pixels` and `png` expect.
    pub fn write_rgba(&self, out: &mut [u8]) {
        write_rgba(&self.0[..], out);
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Framebuffer {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.0[..]
    }
}

impl DerefMut for Framebuffer {
    fn deref_mut(&mut self) -> &mut [u32] {
        &mut self.0[..]
    }
}

impl fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lit = self.0.iter().filter(|px| is_lit(**px)).count();
        f.debug_struct("Framebuffer")
            .field("width", &VMU_LCD_WIDTH)
            .field("height", &VMU_LCD_HEIGHT)
            .field("lit", &lit)
            .finish()
    }
}

fn index(x: usize, y: usize) -> usize {
    assert!(
        x < VMU_LCD_WIDTH && y < VMU_LCD_HEIGHT,
        "pixel ({}, {}) is off the VMU screen",
        x,
        y
    );
    y * VMU_LCD_WIDTH + x
}

/// Whether an ARGB pixel counts as a lit dot (R+G+B above half of full scale).
pub fn is_lit(px: u32) -> bool {
    let r = (px >> 16) & 0xFF;
    let g = (px >> 8) & 0xFF;
    let b = px & 0xFF;
    r + g + b > 384
}

pub fn decode_lcd(lcd: &[u8; VMU_LCD_BYTES], out: &mut [u32; VMU_LCD_PIXELS]) {
    let bits = lcd.view_bits::<Msb0>();
    for (px, bit) in out.iter_mut().zip(bits.iter()) {
        *px = if *bit { PIXEL_ON } else { PIXEL_OFF };
    }
}

/// ARGB to RGBA8. `out` must hold at least 4 bytes per pixel.
pub fn write_rgba(pixels: &[u32], out: &mut [u8]) {
    for (px, chunk) in pixels.iter().zip(out.chunks_exact_mut(4)) {
        BigEndian::write_u32(chunk, px.rotate_left(8));
    }
}

/// Tear-free framebuffer shared between one writer and any number of readers.
///
/// Protocol:
/// 1) The writer sets [`GENERATION_BUSY_BIT`] (see [`SharedFramebuffer::begin_write`]).
/// 2) Pixels are stored.
/// 3) Dropping the [`FrameWriter`] stores `generation + 1` with the busy bit cleared.
///
/// Readers retry until they copied a whole frame under a single, non-busy generation.
pub(crate) struct SharedFramebuffer {
    generation: AtomicU32,
    pixels: Box<[AtomicU32]>,
}

impl SharedFramebuffer {
    pub fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            pixels: (0..VMU_LCD_PIXELS).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn begin_write(&self) -> FrameWriter<'_> {
        let mut start = self.generation.load(Ordering::Relaxed);
        loop {
            if start & GENERATION_BUSY_BIT != 0 {
                // Only reachable when a reset races the emulation thread.
                std::hint::spin_loop();
                start = self.generation.load(Ordering::Relaxed);
                continue;
            }

            match self.generation.compare_exchange_weak(
                start,
                start | GENERATION_BUSY_BIT,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => start = actual,
            }
        }
        // Pixel stores must not become visible before the busy bit.
        fence(Ordering::Release);

        FrameWriter { fb: self, start }
    }

    /// Copy the latest complete frame into `dest` and return its generation.
    pub fn read_into(&self, dest: &mut [u32; VMU_LCD_PIXELS]) -> u32 {
        loop {
            let gen0 = self.generation.load(Ordering::Acquire);
            if gen0 & GENERATION_BUSY_BIT != 0 {
                std::hint::spin_loop();
                continue;
            }

            for (d, s) in dest.iter_mut().zip(self.pixels.iter()) {
                *d = s.load(Ordering::Relaxed);
            }

            fence(Ordering::Acquire);
            let gen1 = self.generation.load(Ordering::Relaxed);
            if gen0 == gen1 {
                return gen0;
            }
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire) & !GENERATION_BUSY_BIT
    }
}

pub(crate) struct FrameWriter<'a> {
    fb: &'a SharedFramebuffer,
    start: u32,
}

impl FrameWriter<'_> {
    pub fn write(&self, frame: &[u32]) {
        for (dst, src) in self.fb.pixels.iter().zip(frame) {
            dst.store(*src, Ordering::Relaxed);
        }
    }

    pub fn fill(&self, color: u32) {
        for dst in self.fb.pixels.iter() {
            dst.store(color, Ordering::Relaxed);
        }
    }
}

impl Drop for FrameWriter<'_> {
    fn drop(&mut self) {
        let next = self.start.wrapping_add(1) & !GENERATION_BUSY_BIT;
        self.fb.generation.store(next, Ordering::Release);
    }
}
