use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Button mask as the VMU hardware reports it, one bit per button.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct VmuButtons: u8 {
        const MODE  = 0b0000_0001;
        const SLEEP = 0b0000_0010;
        const UP    = 0b0000_0100;
        const DOWN  = 0b0000_1000;
        const LEFT  = 0b0001_0000;
        const RIGHT = 0b0010_0000;
        const A     = 0b0100_0000;
        const B     = 0b1000_0000;
    }
}

impl VmuButtons {
    /// Interpret a raw button code coming from a consumer. Unknown bits are dropped.
    pub fn from_code(code: u8) -> Self {
        Self::from_bits_truncate(code)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Button {
    Mode = 0,
    Sleep,
    Up,
    Down,
    Left,
    Right,
    A,
    B,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::Mode,
        Button::Sleep,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
        Button::A,
        Button::B,
    ];

    pub fn mask(self) -> VmuButtons {
        VmuButtons::from_bits_retain(1 << self as u8)
    }
}

impl From<Button> for VmuButtons {
    fn from(button: Button) -> Self {
        button.mask()
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Button::Mode => "mode",
            Button::Sleep => "sleep",
            Button::Up => "up",
            Button::Down => "down",
            Button::Left => "left",
            Button::Right => "right",
            Button::A => "a",
            Button::B => "b",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown VMU button `{0}`")]
pub struct ParseButtonError(String);

impl FromStr for Button {
    type Err = ParseButtonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Button::ALL
            .into_iter()
            .find(|b| b.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseButtonError(s.to_string()))
    }
}

/// Pressed-button mask of one slot.
///
/// The display thread presses and releases, the emulation thread reads whenever it runs the
/// VMU. Neither side waits for the other.
#[derive(Debug, Default)]
pub(crate) struct InputMask(AtomicU8);

impl InputMask {
    /// Returns whether the mask actually changed.
    pub fn set(&self, buttons: VmuButtons, pressed: bool) -> bool {
        let bits = buttons.bits();
        let previous = if pressed {
            self.0.fetch_or(bits, Ordering::AcqRel)
        } else {
            self.0.fetch_and(!bits, Ordering::AcqRel)
        };
        let current = if pressed {
            previous | bits
        } else {
            previous & !bits
        };
        previous != current
    }

    pub fn get(&self) -> VmuButtons {
        VmuButtons::from_bits_retain(self.0.load(Ordering::Acquire))
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Edge detector the emulation side keeps next to its VMU, fed with the mask on every cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct ButtonEdges {
    last: VmuButtons,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Edges {
    pub pressed: VmuButtons,
    pub released: VmuButtons,
}

impl ButtonEdges {
    pub fn update(&mut self, current: VmuButtons) -> Edges {
        let edges = Edges {
            pressed: current - self.last,
            released: self.last - current,
        };
        self.last = current;
        edges
    }

    pub fn held(&self) -> VmuButtons {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_bits() {
        assert_eq!(Button::Mode.mask().bits(), 0x01);
        assert_eq!(Button::Sleep.mask().bits(), 0x02);
        assert_eq!(Button::Up.mask().bits(), 0x04);
        assert_eq!(Button::Down.mask().bits(), 0x08);
        assert_eq!(Button::Left.mask().bits(), 0x10);
        assert_eq!(Button::Right.mask().bits(), 0x20);
        assert_eq!(Button::A.mask(), VmuButtons::A);
        assert_eq!(Button::B.mask().bits(), 0x80);
        assert_eq!(VmuButtons::from_code(0x41), VmuButtons::A | VmuButtons::MODE);
    }

    #[test]
    fn test_parse_button() {
        assert_eq!("Up".parse::<Button>(), Ok(Button::Up));
        assert_eq!("b".parse::<Button>(), Ok(Button::B));
        assert!("start".parse::<Button>().is_err());
    }

    #[test]
    fn test_input_mask_press_release() {
        let mask = InputMask::default();

        assert!(mask.set(VmuButtons::A, true));
        assert!(!mask.set(VmuButtons::A, true));
        assert!(mask.set(VmuButtons::UP | VmuButtons::LEFT, true));
        assert_eq!(
            mask.get(),
            VmuButtons::A | VmuButtons::UP | VmuButtons::LEFT
        );

        assert!(mask.set(VmuButtons::A, false));
        assert_eq!(mask.get(), VmuButtons::UP | VmuButtons::LEFT);
        assert!(!mask.set(VmuButtons::B, false));

        mask.clear();
        assert!(mask.get().is_empty());
    }

    #[test]
    fn test_edges() {
        let mut edges = ButtonEdges::default();

        let e = edges.update(VmuButtons::A);
        assert_eq!(e.pressed, VmuButtons::A);
        assert!(e.released.is_empty());

        let e = edges.update(VmuButtons::A | VmuButtons::B);
        assert_eq!(e.pressed, VmuButtons::B);
        assert!(e.released.is_empty());

        let e = edges.update(VmuButtons::B);
        assert!(e.pressed.is_empty());
        assert_eq!(e.released, VmuButtons::A);
        assert_eq!(edges.held(), VmuButtons::B);
    }
}
