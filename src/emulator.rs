use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bitvec::prelude::*;
use log::{debug, info};

use vmu_bridge::{
    ButtonEdges, VmuButtons, VmuFrameSink, MAX_VMU_COUNT, VMU_LCD_BYTES, VMU_LCD_HEIGHT,
    VMU_LCD_WIDTH,
};

// The VMU LCD refreshes at roughly the host controller's polling rate
const FRAME_TIME: Duration = Duration::from_nanos(16_666_667);

/// Stand-in for an emulation core: runs a little program on every simulated VMU and pushes its
/// LCD through the sink, reading buttons back from it.
pub struct Emulator {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Emulator {
    pub fn spawn<S>(sink: Arc<S>, slots: usize) -> Result<Self>
    where
        S: VmuFrameSink + Send + Sync + 'static,
    {
        let slots = slots.min(MAX_VMU_COUNT);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("vmu-emulation".into())
            .spawn(move || run(sink.as_ref(), slots, &thread_stop))
            .context("Failed to spawn emulation thread")?;

        info!("Emulating {} VMU(s)", slots);
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Emulation thread panicked");
            }
        }
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(sink: &dyn VmuFrameSink, slots: usize, stop: &AtomicBool) {
    let mut scenes: Vec<Scene> = (0..slots).map(Scene::new).collect();
    for id in 0..slots {
        sink.set_vmu_connected(id, true);
    }

    let mut lcd = [0u8; VMU_LCD_BYTES];
    let mut next_frame = Instant::now();
    while !stop.load(Ordering::Acquire) {
        for scene in scenes.iter_mut() {
            scene.step(sink.vmu_buttons(scene.vmu_id));
            scene.render(&mut lcd);
            sink.push_vmu_frame(scene.vmu_id, &lcd);
        }

        next_frame += FRAME_TIME;
        let now = Instant::now();
        if next_frame > now {
            thread::sleep(next_frame - now);
        } else {
            // Fell behind, don't try to catch up
            next_frame = now;
        }
    }

    for id in 0..slots {
        sink.set_vmu_connected(id, false);
    }
    debug!("Emulation thread stopped");
}

/// What a simulated VMU shows: a frame border, a scan line sweeping down, and a 4x4 cursor the
/// D-pad moves around. A inverts the screen, MODE puts the cursor back.
#[derive(Debug)]
struct Scene {
    vmu_id: usize,
    tick: u32,
    cursor: (usize, usize),
    inverted: bool,
    edges: ButtonEdges,
}

const CURSOR_SIZE: usize = 4;

impl Scene {
    fn new(vmu_id: usize) -> Self {
        Self {
            vmu_id,
            tick: 0,
            cursor: Self::home(vmu_id),
            inverted: false,
            edges: ButtonEdges::default(),
        }
    }

    fn home(vmu_id: usize) -> (usize, usize) {
        (4 + vmu_id * 4, 4 + vmu_id * 2)
    }

    fn step(&mut self, buttons: VmuButtons) {
        self.tick = self.tick.wrapping_add(1);

        let edges = self.edges.update(buttons);
        if !edges.pressed.is_empty() {
            debug!("VMU {} pressed {:?}", self.vmu_id, edges.pressed);
        }
        if edges.pressed.contains(VmuButtons::A) {
            self.inverted = !self.inverted;
        }
        if edges.pressed.contains(VmuButtons::MODE) {
            self.cursor = Self::home(self.vmu_id);
        }

        // Held directions keep moving, every 4th frame
        if self.tick % 4 == 0 {
            let (x, y) = &mut self.cursor;
            let held = self.edges.held();
            if held.contains(VmuButtons::LEFT) {
                *x = x.saturating_sub(1);
            }
            if held.contains(VmuButtons::RIGHT) {
                *x = (*x + 1).min(VMU_LCD_WIDTH - CURSOR_SIZE);
            }
            if held.contains(VmuButtons::UP) {
                *y = y.saturating_sub(1);
            }
            if held.contains(VmuButtons::DOWN) {
                *y = (*y + 1).min(VMU_LCD_HEIGHT - CURSOR_SIZE);
            }
        }
    }

    fn render(&self, lcd: &mut [u8; VMU_LCD_BYTES]) {
        let bits = lcd.view_bits_mut::<Msb0>();
        bits.fill(false);

        let scan_line = (self.tick as usize / 2) % VMU_LCD_HEIGHT;
        let (cx, cy) = self.cursor;
        let cursor_x = cx..cx + CURSOR_SIZE;
        let cursor_y = cy..cy + CURSOR_SIZE;
        for y in 0..VMU_LCD_HEIGHT {
            for x in 0..VMU_LCD_WIDTH {
                let border =
                    x == 0 || y == 0 || x == VMU_LCD_WIDTH - 1 || y == VMU_LCD_HEIGHT - 1;
                let cursor = cursor_x.contains(&x) && cursor_y.contains(&y);
                let lit = border || cursor || (y == scan_line && x % 2 == 0);
                bits.set(y * VMU_LCD_WIDTH + x, lit != self.inverted);
            }
        }
    }
}
