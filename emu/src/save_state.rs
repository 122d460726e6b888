//! Versioned save states.
//!
//! A [`SaveState`] is a complete snapshot of the machine: CPU, PPU, APU,
//! controllers, mapper registers, work RAM, and the identity (CRC32) of
//! the ROM it was captured against. Restoring reproduces bit-identical
//! subsequent emulation.
//!
//! Byte layout: a 12-byte header — magic `SSTM`, little-endian format
//! version, little-endian ROM CRC — followed by a bincode payload. The
//! version leads so future payload revisions can be dispatched before any
//! payload bytes are touched; unknown versions fail with
//! [`EmuError::FormatVersionMismatch`], corrupt or truncated payloads with
//! [`EmuError::IncompatibleState`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::error::EmuError;
use crate::mapper::MapperState;
use crate::nes::Nes;

/// Current save-state format revision.
pub const FORMAT_VERSION: u32 = 1;

const MAGIC: [u8; 4] = *b"SSTM";
const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuState {
    pub pc: u16,
    pub sp: u8,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub cycles: u64,
    pub ram: Vec<u8>,
    pub stall: u16,
    pub mapper_irq: bool,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpuState {
    pub ctrl: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub data_bus: u8,
    pub v: u16,
    pub t: u16,
    pub fine_x: u8,
    pub write_latch: bool,
    pub read_buffer: u8,
    pub dot: u16,
    pub scanline: u16,
    pub frame: u64,
    pub suppress_vblank: bool,
    pub nt_latch: u8,
    pub at_latch: u8,
    pub pt_low_latch: u8,
    pub pt_high_latch: u8,
    pub pattern_low: u16,
    pub pattern_high: u16,
    pub attr_low: u16,
    pub attr_high: u16,
    #[serde_as(as = "[_; 256]")]
    pub oam: [u8; 256],
    pub secondary_oam: [u8; 32],
    pub sprite_count: u8,
    pub sprite_pattern_low: [u8; 8],
    pub sprite_pattern_high: [u8; 8],
    pub sprite_attr: [u8; 8],
    pub sprite_x: [u8; 8],
    pub sprite0_in_line: bool,
    pub nametables: Vec<u8>,
    pub palette: Vec<u8>,
    /// Framebuffer contents, so readback after restore matches readback
    /// at capture even for partially rendered scanlines.
    pub pixels: Vec<u8>,
    pub nmi_pending: bool,
    pub mapper_irq: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeState {
    pub start: bool,
    pub divider: u8,
    pub decay: u8,
    pub period: u8,
    pub looped: bool,
    pub constant: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseState {
    pub enabled: bool,
    pub duty: u8,
    pub duty_step: u8,
    pub length_halt: bool,
    pub length: u8,
    pub envelope: EnvelopeState,
    pub sweep_enabled: bool,
    pub sweep_period: u8,
    pub sweep_negate: bool,
    pub sweep_shift: u8,
    pub sweep_reload: bool,
    pub sweep_divider: u8,
    pub timer_period: u16,
    pub timer: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriangleState {
    pub enabled: bool,
    pub control: bool,
    pub linear_period: u8,
    pub linear: u8,
    pub linear_reload: bool,
    pub length: u8,
    pub timer_period: u16,
    pub timer: u16,
    pub step: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseState {
    pub enabled: bool,
    pub length_halt: bool,
    pub length: u8,
    pub envelope: EnvelopeState,
    pub mode: bool,
    pub timer_period: u16,
    pub timer: u16,
    pub shift: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmcState {
    pub enabled: bool,
    pub irq_enabled: bool,
    pub looped: bool,
    pub timer_period: u16,
    pub timer: u16,
    pub output: u8,
    pub sample_address: u16,
    pub sample_length: u16,
    pub current_address: u16,
    pub bytes_remaining: u16,
    pub shift: u8,
    pub bits_remaining: u8,
    pub silence: bool,
    pub buffer: u8,
    pub buffer_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApuState {
    pub pulse1: PulseState,
    pub pulse2: PulseState,
    pub triangle: TriangleState,
    pub noise: NoiseState,
    pub dmc: DmcState,
    pub cycle: u64,
    pub frame_cycle: u32,
    pub five_step: bool,
    pub irq_inhibit: bool,
    pub frame_irq: bool,
    pub dmc_irq: bool,
    pub sample_accumulator: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Payload {
    cpu: CpuState,
    ppu: PpuState,
    apu: ApuState,
    joypad1: crate::joypad::JoypadState,
    joypad2: crate::joypad::JoypadState,
    mapper: MapperState,
    prg_ram: Vec<u8>,
    chr_ram: Option<Vec<u8>>,
}

/// A complete, immutable machine snapshot.
pub struct SaveState {
    version: u32,
    rom_crc: u32,
    payload: Payload,
}

impl SaveState {
    /// Snapshot the machine. Fails when no ROM is loaded, since a state
    /// without a ROM identity could never be restored safely.
    pub fn capture(nes: &Nes) -> Result<Self, EmuError> {
        let cart = nes
            .cartridge()
            .ok_or(EmuError::IncompatibleState("no ROM loaded"))?;

        Ok(Self {
            version: FORMAT_VERSION,
            rom_crc: cart.crc(),
            payload: Payload {
                cpu: nes.cpu_state(),
                ppu: nes.ppu_state(),
                apu: nes.apu_state(),
                joypad1: nes.joypad_state(crate::joypad::Player::One),
                joypad2: nes.joypad_state(crate::joypad::Player::Two),
                mapper: cart.mapper_state(),
                prg_ram: cart.prg_ram_bytes(),
                chr_ram: cart.chr_ram_bytes(),
            },
        })
    }

    /// Restore this snapshot into `nes`.
    ///
    /// Fails with [`EmuError::IncompatibleState`] when the machine has a
    /// different ROM loaded (checksum mismatch), leaving the machine
    /// untouched in that case.
    pub fn restore(&self, nes: &mut Nes) -> Result<(), EmuError> {
        let crc = nes
            .cartridge()
            .ok_or(EmuError::IncompatibleState("no ROM loaded"))?
            .crc();
        if crc != self.rom_crc {
            return Err(EmuError::IncompatibleState(
                "save state belongs to a different ROM",
            ));
        }

        nes.apply_state(&self.payload);
        Ok(())
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// CRC32 of the ROM this state was captured against.
    #[must_use]
    pub const fn rom_crc(&self) -> u32 {
        self.rom_crc
    }

    // ---- buffer form ----

    /// Exact encoded length in bytes, so callers can size storage.
    pub fn serialized_len(&self) -> Result<usize, EmuError> {
        let payload = bincode::serialized_size(&self.payload)
            .map_err(|_| EmuError::IncompatibleState("state serialization failed"))?;
        Ok(HEADER_LEN + payload as usize)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EmuError> {
        let payload = bincode::serialize(&self.payload)
            .map_err(|_| EmuError::IncompatibleState("state serialization failed"))?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.rom_crc.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Encode into a caller-supplied buffer, returning the bytes written;
    /// reports the required size when the buffer is too small instead of
    /// writing anything.
    pub fn write_to_buffer(&self, out: &mut [u8]) -> Result<usize, EmuError> {
        let bytes = self.to_bytes()?;
        if out.len() < bytes.len() {
            return Err(EmuError::BufferTooSmall {
                required: bytes.len(),
                provided: out.len(),
            });
        }
        out[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Decode a snapshot. Never reads past `data`; truncated or tampered
    /// input fails with a format error.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EmuError> {
        if data.len() < HEADER_LEN {
            return Err(EmuError::IncompatibleState("shorter than the header"));
        }
        if data[0..4] != MAGIC {
            return Err(EmuError::IncompatibleState("missing save-state magic"));
        }

        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != FORMAT_VERSION {
            return Err(EmuError::FormatVersionMismatch { version });
        }
        let rom_crc = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);

        let payload: Payload = bincode::deserialize(&data[HEADER_LEN..])
            .map_err(|_| EmuError::IncompatibleState("truncated or corrupt payload"))?;

        Ok(Self {
            version,
            rom_crc,
            payload,
        })
    }

    // ---- file form (layered over the buffer form) ----

    /// Write the encoded state to `path`. I/O failures surface as
    /// [`EmuError::Io`], distinct from format errors.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), EmuError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, EmuError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }
}

impl Nes {
    pub(crate) fn apply_state(&mut self, payload: &Payload) {
        self.cpu.restore(&payload.cpu);
        self.cpu.bus.ppu.restore(&payload.ppu);
        self.cpu.bus.apu.restore(&payload.apu);
        self.cpu.bus.joypad1.restore(&payload.joypad1);
        self.cpu.bus.joypad2.restore(&payload.joypad2);
        if let Some(cart) = self.cpu.bus.cartridge.as_mut() {
            cart.restore_mapper(&payload.mapper);
            cart.restore_ram(&payload.prg_ram, payload.chr_ram.as_deref());
        }
    }
}
