use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::debug;

use crate::framebuffer::write_rgba;
use crate::{VMU_LCD_HEIGHT, VMU_LCD_PIXELS, VMU_LCD_WIDTH};

/// Save a VMU frame (ARGB pixels) as an RGBA PNG, blown up `scale` times with nearest-neighbour.
pub fn write_png<P: AsRef<Path>>(path: P, pixels: &[u32], scale: u32) -> Result<()> {
    ensure!(
        pixels.len() >= VMU_LCD_PIXELS,
        "frame holds {} pixels, expected {}",
        pixels.len(),
        VMU_LCD_PIXELS
    );
    ensure!(scale > 0, "scale must be at least 1");

    let path = path.as_ref();
    let scale = scale as usize;
    let width = VMU_LCD_WIDTH * scale;
    let height = VMU_LCD_HEIGHT * scale;

    let mut row = vec![0u8; VMU_LCD_WIDTH * 4];
    let mut data = Vec::with_capacity(width * height * 4);
    for src_row in pixels[..VMU_LCD_PIXELS].chunks_exact(VMU_LCD_WIDTH) {
        write_rgba(src_row, &mut row);
        let scaled: Vec<u8> = row
            .chunks_exact(4)
            .flat_map(|px| std::iter::repeat(px).take(scale).flatten().copied())
            .collect();
        for _ in 0..scale {
            data.extend_from_slice(&scaled);
        }
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create snapshot file {}", path.display()))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), width as u32, height as u32);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder
        .write_header()
        .context("Failed to write PNG header")?;
    writer
        .write_image_data(&data)
        .context("Failed to write PNG data")?;

    debug!("Wrote {}x{} snapshot to {}", width, height, path.display());
    Ok(())
}
