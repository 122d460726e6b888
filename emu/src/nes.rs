//! The console itself.
//!
//! [`Nes`] is the single-threaded machine API: load a ROM, step frames,
//! read back pixels and audio, feed input. It owns the CPU, which owns
//! the bus, which owns every other device — mirroring the way the real
//! 2A03 sits between the program and the rest of the board.
//!
//! No internal locking: callers that need concurrency wrap the machine in
//! the session harness instead of sharing it directly.

use crate::cartridge::{Cartridge, RomInfo};
use crate::cpu::Cpu;
use crate::error::EmuError;
use crate::joypad::{Button, Player};
use crate::ppu::FRAME_BYTES;
use crate::save_state::SaveState;

pub struct Nes {
    pub(crate) cpu: Cpu,
}

impl Nes {
    /// An empty machine; [`Self::load_rom`] brings it to life.
    #[must_use]
    pub fn new() -> Self {
        Self { cpu: Cpu::new() }
    }

    /// Load an iNES image and power the machine on.
    ///
    /// All-or-nothing: on [`EmuError::InvalidRom`] /
    /// [`EmuError::UnsupportedMapper`] the previous machine state is left
    /// untouched.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), EmuError> {
        let cartridge = Cartridge::load(data)?;

        let mut cpu = Cpu::new();
        cpu.bus.cartridge = Some(cartridge);
        cpu.power_up();
        self.cpu = cpu;
        Ok(())
    }

    /// Power-on reset without reloading ROM bytes: CPU re-vectors, PPU and
    /// APU return to their power-on register state, cycle and frame
    /// counters restart.
    pub fn reset(&mut self) {
        self.cpu.bus.ppu.reset();
        self.cpu.bus.apu.reset();
        self.cpu.reset();
    }

    /// True once a ROM has been loaded.
    #[must_use]
    pub fn rom_loaded(&self) -> bool {
        self.cpu.bus.cartridge.is_some()
    }

    /// Identity of the loaded ROM, if any.
    #[must_use]
    pub fn rom(&self) -> Option<RomInfo> {
        self.cpu.bus.cartridge.as_ref().map(Cartridge::info)
    }

    /// Run exactly one CPU instruction (plus any interrupt entry at the
    /// boundary), advancing the PPU/APU in lockstep. Returns the elapsed
    /// CPU cycles.
    pub fn step_instruction(&mut self) -> Result<u16, EmuError> {
        if !self.rom_loaded() {
            return Err(EmuError::InvalidRom("no ROM loaded"));
        }
        self.cpu.step_instruction()
    }

    /// Run until the PPU completes exactly one frame. Two calls advance
    /// exactly two frames; there is no hidden catch-up buffering.
    pub fn step_frame(&mut self) -> Result<(), EmuError> {
        if !self.rom_loaded() {
            return Err(EmuError::InvalidRom("no ROM loaded"));
        }
        let start = self.cpu.bus.ppu.frame();
        while self.cpu.bus.ppu.frame() == start {
            self.cpu.step_instruction()?;
        }
        Ok(())
    }

    /// Copy the most recently completed 256x240 RGBA framebuffer into
    /// `out`. Never writes past the buffer; undersized buffers fail with
    /// [`EmuError::BufferTooSmall`].
    pub fn read_pixels(&self, out: &mut [u8]) -> Result<(), EmuError> {
        if out.len() < FRAME_BYTES {
            return Err(EmuError::BufferTooSmall {
                required: FRAME_BYTES,
                provided: out.len(),
            });
        }
        self.cpu.bus.ppu.copy_pixels(out);
        Ok(())
    }

    /// Drain pending audio samples into `out`; returns the number written.
    /// See the `apu` module docs for the overflow policy.
    pub fn read_audio(&mut self, out: &mut [f32]) -> usize {
        self.cpu.bus.apu.drain_samples(out)
    }

    /// Samples currently queued for [`Self::read_audio`].
    #[must_use]
    pub fn pending_audio(&self) -> usize {
        self.cpu.bus.apu.pending_samples()
    }

    /// Set one controller button. Takes effect at the program's next
    /// controller read.
    pub fn set_button(&mut self, player: Player, button: Button, pressed: bool) {
        let pad = match player {
            Player::One => &mut self.cpu.bus.joypad1,
            Player::Two => &mut self.cpu.bus.joypad2,
        };
        pad.set_button(button, pressed);
    }

    /// Touch input entry point for the dual-screen console variant. The
    /// NES core has no touch surface, so the event is accepted and
    /// discarded.
    pub fn set_touch(&mut self, x: u16, y: u16, pressed: bool) {
        tracing::trace!(x, y, pressed, "touch input ignored by NES core");
    }

    /// Capability query: whether this machine drives a dual-screen,
    /// touch-capable console. Always false for the NES core.
    #[must_use]
    pub fn is_dual_screen(&self) -> bool {
        false
    }

    /// Completed frames since power-on/reset.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.cpu.bus.ppu.frame()
    }

    /// Monotonic CPU cycle counter; resets only with reset/ROM load.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cpu.cycles()
    }

    #[must_use]
    pub fn program_counter(&self) -> u16 {
        self.cpu.pc()
    }

    /// (A, X, Y, SP, P) for diagnostics.
    #[must_use]
    pub fn cpu_registers(&self) -> (u8, u8, u8, u8, u8) {
        self.cpu.registers()
    }

    /// Current PPU position as (scanline, dot).
    #[must_use]
    pub fn ppu_position(&self) -> (u16, u16) {
        (self.cpu.bus.ppu.scanline(), self.cpu.bus.ppu.dot())
    }

    // ---- battery-backed RAM ----

    /// Battery RAM contents, when the board has a battery.
    #[must_use]
    pub fn sram(&self) -> Option<&[u8]> {
        self.cpu
            .bus
            .cartridge
            .as_ref()
            .filter(|cart| cart.header().battery())
            .map(Cartridge::sram)
    }

    /// Load previously persisted battery RAM.
    pub fn load_sram(&mut self, data: &[u8]) {
        if let Some(cart) = self.cpu.bus.cartridge.as_mut() {
            cart.load_sram(data);
        }
    }

    /// True when battery RAM changed since the last flush.
    #[must_use]
    pub fn sram_dirty(&self) -> bool {
        self.cpu
            .bus
            .cartridge
            .as_ref()
            .is_some_and(Cartridge::sram_dirty)
    }

    pub fn mark_sram_flushed(&mut self) {
        if let Some(cart) = self.cpu.bus.cartridge.as_mut() {
            cart.mark_sram_flushed();
        }
    }

    // ---- save states (delegating to the serializer) ----

    pub fn save_state(&self) -> Result<SaveState, EmuError> {
        SaveState::capture(self)
    }

    pub fn load_state(&mut self, state: &SaveState) -> Result<(), EmuError> {
        state.restore(self)
    }

    pub fn save_state_to_bytes(&self) -> Result<Vec<u8>, EmuError> {
        self.save_state()?.to_bytes()
    }

    pub fn load_state_from_bytes(&mut self, data: &[u8]) -> Result<(), EmuError> {
        let state = SaveState::from_bytes(data)?;
        self.load_state(&state)
    }

    pub fn save_state_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), EmuError> {
        self.save_state()?.save_to_file(path)
    }

    pub fn load_state_from_file(
        &mut self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), EmuError> {
        let state = SaveState::load_from_file(path)?;
        self.load_state(&state)
    }

    // ---- snapshot plumbing for the serializer ----

    pub(crate) fn cartridge(&self) -> Option<&Cartridge> {
        self.cpu.bus.cartridge.as_ref()
    }

    pub(crate) fn cpu_state(&self) -> crate::save_state::CpuState {
        self.cpu.state()
    }

    pub(crate) fn ppu_state(&self) -> crate::save_state::PpuState {
        self.cpu.bus.ppu.state()
    }

    pub(crate) fn apu_state(&self) -> crate::save_state::ApuState {
        self.cpu.bus.apu.state()
    }

    pub(crate) fn joypad_state(&self, player: Player) -> crate::joypad::JoypadState {
        match player {
            Player::One => self.cpu.bus.joypad1.state(),
            Player::Two => self.cpu.bus.joypad2.state(),
        }
    }
}

impl Default for Nes {
    fn default() -> Self {
        Self::new()
    }
}
