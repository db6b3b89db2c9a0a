use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{error, info, warn};
use pixels::{Pixels, SurfaceTexture};
use winit::{
    dpi::LogicalSize,
    event::{Event, MouseButton, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    keyboard::KeyCode,
    window::WindowBuilder,
};
use winit_input_helper::WinitInputHelper;

use vmu_bridge::{
    config::DisplayConfig,
    display::{DisplayEvent, VmuDisplay},
    VmuBridge, VmuButtons, VMU_LCD_HEIGHT, VMU_LCD_WIDTH,
};

const KEYMAP: [(KeyCode, VmuButtons); 8] = [
    (KeyCode::ArrowUp, VmuButtons::UP),
    (KeyCode::ArrowDown, VmuButtons::DOWN),
    (KeyCode::ArrowLeft, VmuButtons::LEFT),
    (KeyCode::ArrowRight, VmuButtons::RIGHT),
    (KeyCode::KeyZ, VmuButtons::A),
    (KeyCode::KeyX, VmuButtons::B),
    (KeyCode::Enter, VmuButtons::MODE),
    (KeyCode::Backspace, VmuButtons::SLEEP),
];

/// Second screen: a window showing one VMU, refreshed at the configured rate.
pub fn run(bridge: Arc<VmuBridge>, config: DisplayConfig) -> Result<()> {
    if !config.use_nearest_neighbor {
        warn!("Only nearest-neighbour scaling is supported, ignoring use_nearest_neighbor");
    }
    let interval = config.update_interval();

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let window = WindowBuilder::new()
        .with_title("VMU")
        .with_inner_size(LogicalSize::new(
            config.scaled_width() as f64,
            config.scaled_height() as f64,
        ))
        .with_min_inner_size(LogicalSize::new(
            VMU_LCD_WIDTH as f64,
            VMU_LCD_HEIGHT as f64,
        ))
        .build(&event_loop)
        .context("Failed to create window")?;

    let window_size = window.inner_size();
    let surface = SurfaceTexture::new(window_size.width, window_size.height, &window);
    let mut pixels = Pixels::new(VMU_LCD_WIDTH as u32, VMU_LCD_HEIGHT as u32, surface)
        .context("Failed to create pixel surface")?;

    let mut display = VmuDisplay::new(DisplayConfig {
        enabled: true,
        ..config
    });
    let mut input = WinitInputHelper::new();
    let mut touched = VmuButtons::empty();

    event_loop.run(|event, elwt| {
        if let Event::WindowEvent {
            event: WindowEvent::RedrawRequested,
            ..
        } = event
        {
            display.frame_rgba(pixels.frame_mut());
            if let Err(e) = pixels.render() {
                error!("Failed to render VMU screen: {}", e);
                elwt.exit();
                return;
            }
        }

        if !input.update(&event) {
            return;
        }

        if input.key_pressed(KeyCode::Escape) || input.close_requested() || input.destroyed() {
            elwt.exit();
            return;
        }

        if let Some(size) = input.window_resized() {
            if let Err(e) = pixels.resize_surface(size.width, size.height) {
                error!("Failed to resize surface: {}", e);
                elwt.exit();
                return;
            }
            window.request_redraw();
        }

        if let Some(vmu_id) = display.active_vmu() {
            for (key, button) in KEYMAP {
                if input.key_pressed(key) {
                    bridge.send_button(vmu_id, button, true);
                } else if input.key_released(key) {
                    bridge.send_button(vmu_id, button, false);
                }
            }

            if input.mouse_pressed(MouseButton::Left) {
                let at = input
                    .cursor()
                    .and_then(|pos| pixels.window_pos_to_pixel(pos).ok());
                if let Some((x, y)) = at {
                    touched = display
                        .touch(
                            &bridge,
                            x as f32 + 0.5,
                            y as f32 + 0.5,
                            VMU_LCD_WIDTH as f32,
                            VMU_LCD_HEIGHT as f32,
                            true,
                        )
                        .unwrap_or_else(VmuButtons::empty);
                }
            }
        }
        if input.mouse_released(MouseButton::Left) && !touched.is_empty() {
            if let Some(vmu_id) = display.active_vmu() {
                bridge.send_button(vmu_id, touched, false);
            }
            touched = VmuButtons::empty();
        }

        match display.poll(&bridge) {
            Some(DisplayEvent::Connected(id)) => {
                info!("Showing VMU {}", id);
                window.set_title(&format!("VMU {}", id));
                window.request_redraw();
            }
            Some(DisplayEvent::Disconnected) => {
                info!("No VMU connected");
                window.set_title("VMU");
                window.request_redraw();
            }
            Some(DisplayEvent::Updated(_)) => window.request_redraw(),
            None => (),
        }

        elwt.set_control_flow(ControlFlow::WaitUntil(Instant::now() + interval));
    })?;

    Ok(())
}
