//! Gamepad shape shared by the touch client and the host.
//!
//! Follows the W3C Gamepad standard mapping: four axes (two sticks) and
//! twenty buttons, of which the first seventeen have a defined meaning.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Number of axes on a standard gamepad.
pub const AXIS_COUNT: usize = 4;

/// Number of buttons a virtual gamepad starts with.
pub const BUTTON_COUNT: usize = 20;

/// Mapping reported for every virtual gamepad.
pub const MAPPING_STANDARD: &str = "standard";

/// State of a single gamepad button.
///
/// Touch clients only report pressed/released, so `touched` mirrors
/// `pressed` and `value` is either `0.0` or `1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Encode, Decode)]
pub struct GamepadButton {
    pub pressed: bool,
    pub touched: bool,
    pub value: f64,
}

impl GamepadButton {
    /// A pressed button.
    pub const PRESSED: Self = Self {
        pressed: true,
        touched: true,
        value: 1.0,
    };

    /// A released button.
    pub const RELEASED: Self = Self {
        pressed: false,
        touched: false,
        value: 0.0,
    };

    /// Update `pressed` and mirror it into `touched` and `value`.
    pub fn set_pressed(&mut self, pressed: bool) {
        *self = if pressed {
            Self::PRESSED
        } else {
            Self::RELEASED
        };
    }
}

/// Which thumbstick an axis update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum Pad {
    Left,
    Right,
}

impl Pad {
    /// Logical stick index carried in `axisUpdate` messages.
    #[must_use]
    pub fn index(self) -> u32 {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    /// Axis slots written by an update of this stick: `(x, y)`.
    #[must_use]
    pub fn axis_slots(self) -> (usize, usize) {
        axis_slots(self.index())
    }
}

/// Axis slots `(2 * index, 2 * index + 1)` for a logical stick index.
#[must_use]
pub fn axis_slots(index: u32) -> (usize, usize) {
    let x = index as usize * 2;
    (x, x + 1)
}

/// Buttons of the W3C standard mapping, by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum StandardButton {
    /// Bottom face button (A / Cross).
    South,
    /// Right face button (B / Circle).
    East,
    /// Left face button (X / Square).
    West,
    /// Top face button (Y / Triangle).
    North,
    LeftBumper,
    RightBumper,
    LeftTrigger,
    RightTrigger,
    Select,
    Start,
    LeftStick,
    RightStick,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    Home,
}

impl StandardButton {
    /// All standard buttons in index order.
    pub const ALL: [Self; 17] = [
        Self::South,
        Self::East,
        Self::West,
        Self::North,
        Self::LeftBumper,
        Self::RightBumper,
        Self::LeftTrigger,
        Self::RightTrigger,
        Self::Select,
        Self::Start,
        Self::LeftStick,
        Self::RightStick,
        Self::DPadUp,
        Self::DPadDown,
        Self::DPadLeft,
        Self::DPadRight,
        Self::Home,
    ];

    /// Index in the standard mapping.
    #[must_use]
    pub fn index(self) -> u32 {
        self as u32
    }

    /// Look up a standard button by index.
    #[must_use]
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_pressed_mirrors_touched_and_value() {
        let mut button = GamepadButton::default();
        button.set_pressed(true);
        assert_eq!(button, GamepadButton::PRESSED);
        assert!((button.value - 1.0).abs() < f64::EPSILON);

        button.set_pressed(false);
        assert_eq!(button, GamepadButton::RELEASED);
        assert!(!button.touched);
    }

    #[test]
    fn default_button_is_released() {
        assert_eq!(GamepadButton::default(), GamepadButton::RELEASED);
    }

    #[test]
    fn pad_axis_slots() {
        assert_eq!(Pad::Left.axis_slots(), (0, 1));
        assert_eq!(Pad::Right.axis_slots(), (2, 3));
        assert_eq!(axis_slots(3), (6, 7));
    }

    #[test]
    fn standard_button_indices() {
        assert_eq!(StandardButton::South.index(), 0);
        assert_eq!(StandardButton::Start.index(), 9);
        assert_eq!(StandardButton::Home.index(), 16);
        assert_eq!(StandardButton::from_index(12), Some(StandardButton::DPadUp));
        assert_eq!(StandardButton::from_index(17), None);
        for (i, button) in StandardButton::ALL.iter().enumerate() {
            assert_eq!(button.index() as usize, i);
        }
    }
}
