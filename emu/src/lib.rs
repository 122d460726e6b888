//! Cycle-stepped NES emulation core.
//!
//! The crate is organized the way the console is wired: [`nes::Nes`] owns
//! the CPU, the CPU owns the bus, and the bus owns the PPU, APU,
//! controllers, and cartridge. Everything here is single-threaded; the
//! companion `session` crate wraps a machine in a dedicated execution
//! thread for real-time playback.

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_lossless)]
pub mod apu;
#[allow(clippy::missing_panics_doc)]
pub mod bus;
pub mod cartridge;
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::too_many_lines)]
pub mod cpu;
pub mod error;
pub mod joypad;
pub mod mapper;
pub mod nes;
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::large_stack_frames)]
pub mod ppu;
pub mod save_state;

pub use error::EmuError;
pub use joypad::{Button, Player};
pub use nes::Nes;
pub use ppu::{FRAME_BYTES, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use save_state::SaveState;
