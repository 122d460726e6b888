//! Standard controller: strobe latch plus 8-bit shift register at
//! $4016/$4017.

use serde::{Deserialize, Serialize};

/// Buttons in shift-register read order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

/// Controller port selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Player {
    One,
    Two,
}

impl Button {
    const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::Select => 2,
            Self::Start => 3,
            Self::Up => 4,
            Self::Down => 5,
            Self::Left => 6,
            Self::Right => 7,
        }
    }
}

/// Serializable controller state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoypadState {
    pub strobe: bool,
    pub cursor: u8,
    pub buttons: [bool; 8],
}

#[derive(Debug, Default)]
pub(crate) struct Joypad {
    strobe: bool,
    cursor: u8,
    buttons: [bool; 8],
}

impl Joypad {
    pub(crate) fn set_button(&mut self, button: Button, pressed: bool) {
        self.buttons[button.index()] = pressed;
    }

    /// CPU read: while strobed, repeatedly reports A; afterwards shifts
    /// through all eight buttons, then returns 1.
    pub(crate) fn read(&mut self) -> u8 {
        if self.strobe {
            return u8::from(self.buttons[0]);
        }
        let bit = match self.buttons.get(self.cursor as usize) {
            Some(&pressed) => u8::from(pressed),
            None => 1,
        };
        self.cursor = self.cursor.saturating_add(1);
        bit
    }

    /// CPU write to $4016: bit 0 high latches button state continuously;
    /// the falling edge arms the shift register.
    pub(crate) fn write(&mut self, value: u8) {
        let strobe = value & 1 != 0;
        if strobe {
            self.cursor = 0;
        }
        self.strobe = strobe;
    }

    pub(crate) fn state(&self) -> JoypadState {
        JoypadState {
            strobe: self.strobe,
            cursor: self.cursor,
            buttons: self.buttons,
        }
    }

    pub(crate) fn restore(&mut self, state: &JoypadState) {
        self.strobe = state.strobe;
        self.cursor = state.cursor;
        self.buttons = state.buttons;
    }
}
