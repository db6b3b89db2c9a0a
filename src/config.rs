use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{VMU_LCD_HEIGHT, VMU_LCD_WIDTH};

/// An opaque ARGB colour, written as `"#RRGGBB"` in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub u32);

impl Color {
    pub const fn rgb(rgb: u32) -> Self {
        Color(0xFF00_0000 | (rgb & 0x00FF_FFFF))
    }

    pub fn argb(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid colour `{0}`, expected #RRGGBB")]
pub struct ParseColorError(String);

impl TryFrom<String> for Color {
    type Error = ParseColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex = value.strip_prefix('#').unwrap_or(&value);
        if hex.len() != 6 {
            return Err(ParseColorError(value));
        }
        u32::from_str_radix(hex, 16)
            .map(Color::rgb)
            .map_err(|_| ParseColorError(value))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06X}", self.0 & 0x00FF_FFFF)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Whether `init` leaves the bridge enabled.
    pub enabled_on_init: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled_on_init: true,
        }
    }
}

/// How a consumer presents a VMU screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
    /// Slot to show. `None` picks the first active VMU.
    pub selected_vmu: Option<usize>,
    pub pixel_on_color: Color,
    pub pixel_off_color: Color,
    /// 1.0 is the native 48x32.
    pub scale_factor: f32,
    pub target_fps: u32,
    pub use_nearest_neighbor: bool,
    /// Turn clicks/touches on the screen into VMU buttons.
    pub show_button_overlay: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            selected_vmu: None,
            pixel_on_color: Color::rgb(0x00FF00),
            pixel_off_color: Color::rgb(0x001100),
            scale_factor: 4.0,
            target_fps: 30,
            use_nearest_neighbor: true,
            show_button_overlay: false,
        }
    }
}

impl DisplayConfig {
    fn with_colors(on: u32, off: u32) -> Self {
        Self {
            pixel_on_color: Color::rgb(on),
            pixel_off_color: Color::rgb(off),
            ..Default::default()
        }
    }

    pub fn classic_green() -> Self {
        Self::with_colors(0x00FF00, 0x001100)
    }

    pub fn classic_gray() -> Self {
        Self::with_colors(0x000000, 0x8B9B8B)
    }

    pub fn high_contrast() -> Self {
        Self::with_colors(0xFFFFFF, 0x000000)
    }

    pub fn amber() -> Self {
        Self::with_colors(0xFFBF00, 0x1A0F00)
    }

    pub fn blue() -> Self {
        Self::with_colors(0x00BFFF, 0x000F1A)
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "classic-green" => Some(Self::classic_green()),
            "classic-gray" => Some(Self::classic_gray()),
            "high-contrast" => Some(Self::high_contrast()),
            "amber" => Some(Self::amber()),
            "blue" => Some(Self::blue()),
            _ => None,
        }
    }

    pub fn scaled_width(&self) -> u32 {
        (VMU_LCD_WIDTH as f32 * self.scale_factor) as u32
    }

    pub fn scaled_height(&self) -> u32 {
        (VMU_LCD_HEIGHT as f32 * self.scale_factor) as u32
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.target_fps.max(1)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub display: DisplayConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
