//! iNES ROM images and the loaded cartridge.
//!
//! A [`Cartridge`] couples the raw PRG/CHR data with the bank-switching
//! logic selected by the header's mapper id. All PRG/CHR accesses from the
//! CPU bus and the PPU go through it.

use serde::{Deserialize, Serialize};

use crate::error::EmuError;
use crate::mapper::{self, Mapper, MapperState};

/// Size of the iNES header in bytes.
pub const HEADER_SIZE: usize = 16;
/// One PRG-ROM bank as counted by the header.
pub const PRG_BANK_SIZE: usize = 16 * 1024;
/// One CHR bank as counted by the header.
pub const CHR_BANK_SIZE: usize = 8 * 1024;
/// Battery-backed work RAM mapped at $6000-$7FFF.
pub const PRG_RAM_SIZE: usize = 8 * 1024;

const TRAINER_SIZE: usize = 512;
const MAGIC: [u8; 4] = [b'N', b'E', b'S', 0x1A];

/// Nametable arrangement, either fixed by the header or driven by the
/// mapper's control registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    SingleScreenLow,
    SingleScreenHigh,
    FourScreen,
}

/// Parsed iNES header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomHeader {
    prg_banks: u8,
    chr_banks: u8,
    mapper: u8,
    mirroring: Mirroring,
    battery: bool,
    trainer: bool,
}

impl RomHeader {
    /// Parse the 16-byte iNES header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, EmuError> {
        if data.len() < HEADER_SIZE {
            return Err(EmuError::InvalidRom("shorter than the iNES header"));
        }
        if data[0..4] != MAGIC {
            return Err(EmuError::InvalidRom("missing NES<EOF> magic"));
        }

        let prg_banks = data[4];
        if prg_banks == 0 {
            return Err(EmuError::InvalidRom("zero PRG-ROM banks"));
        }
        let chr_banks = data[5];
        let flags6 = data[6];
        let flags7 = data[7];

        let mirroring = if flags6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        Ok(Self {
            prg_banks,
            chr_banks,
            mapper: (flags7 & 0xF0) | (flags6 >> 4),
            mirroring,
            battery: flags6 & 0x02 != 0,
            trainer: flags6 & 0x04 != 0,
        })
    }

    #[must_use]
    pub const fn prg_banks(&self) -> u8 {
        self.prg_banks
    }

    #[must_use]
    pub const fn chr_banks(&self) -> u8 {
        self.chr_banks
    }

    #[must_use]
    pub const fn mapper(&self) -> u8 {
        self.mapper
    }

    /// Nametable arrangement hard-wired by the cartridge board.
    #[must_use]
    pub const fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    /// True when the board carries battery-backed PRG-RAM.
    #[must_use]
    pub const fn battery(&self) -> bool {
        self.battery
    }

    #[must_use]
    pub const fn trainer(&self) -> bool {
        self.trainer
    }
}

/// Identity of a loaded ROM, used for save-state compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomInfo {
    pub mapper: u8,
    pub prg_banks: u8,
    pub chr_banks: u8,
    pub mirroring: Mirroring,
    pub battery: bool,
    /// CRC32 over the complete ROM image including the header.
    pub crc: u32,
}

/// A loaded cartridge: ROM data plus the mapper selected at load time.
pub struct Cartridge {
    header: RomHeader,
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_writable: bool,
    prg_ram: Vec<u8>,
    prg_ram_dirty: bool,
    crc: u32,
    mapper: Box<dyn Mapper>,
}

impl Cartridge {
    /// Build a cartridge from a raw iNES image.
    ///
    /// Fails with [`EmuError::InvalidRom`] on a malformed image and
    /// [`EmuError::UnsupportedMapper`] when the mapper id is unknown.
    /// Nothing is mutated on failure, so callers can keep their previous
    /// cartridge on error.
    pub fn load(data: &[u8]) -> Result<Self, EmuError> {
        let header = RomHeader::parse(data)?;

        let prg_len = header.prg_banks() as usize * PRG_BANK_SIZE;
        let chr_len = header.chr_banks() as usize * CHR_BANK_SIZE;
        let prg_start = HEADER_SIZE + if header.trainer() { TRAINER_SIZE } else { 0 };
        let chr_start = prg_start + prg_len;

        if data.len() < chr_start + chr_len {
            return Err(EmuError::InvalidRom("data shorter than the header claims"));
        }

        let mapper = mapper::build(&header)?;

        // CHR bank count 0 means the board ships 8KB of CHR-RAM instead.
        let (chr, chr_writable) = if header.chr_banks() == 0 {
            (vec![0; CHR_BANK_SIZE], true)
        } else {
            (data[chr_start..chr_start + chr_len].to_vec(), false)
        };

        tracing::debug!(
            mapper = header.mapper(),
            prg_banks = header.prg_banks(),
            chr_banks = header.chr_banks(),
            battery = header.battery(),
            "cartridge loaded"
        );

        Ok(Self {
            header,
            prg_rom: data[prg_start..prg_start + prg_len].to_vec(),
            chr,
            chr_writable,
            prg_ram: vec![0; PRG_RAM_SIZE],
            prg_ram_dirty: false,
            crc: crc32(data),
            mapper,
        })
    }

    #[must_use]
    pub const fn header(&self) -> &RomHeader {
        &self.header
    }

    #[must_use]
    pub fn info(&self) -> RomInfo {
        RomInfo {
            mapper: self.header.mapper(),
            prg_banks: self.header.prg_banks(),
            chr_banks: self.header.chr_banks(),
            mirroring: self.header.mirroring(),
            battery: self.header.battery(),
            crc: self.crc,
        }
    }

    #[must_use]
    pub const fn crc(&self) -> u32 {
        self.crc
    }

    /// CPU read in $8000-$FFFF, routed through the mapper's PRG banking.
    #[must_use]
    pub fn read_prg(&self, address: u16) -> u8 {
        let index = self.mapper.map_prg(address) % self.prg_rom.len();
        self.prg_rom[index]
    }

    /// CPU write in $8000-$FFFF hits the mapper's control registers; the
    /// new banking is visible to the very next read.
    pub fn write_prg(&mut self, address: u16, value: u8) {
        self.mapper.write(address, value);
    }

    /// PPU read in $0000-$1FFF through the mapper's CHR banking.
    #[must_use]
    pub fn read_chr(&self, address: u16) -> u8 {
        let index = self.mapper.map_chr(address) % self.chr.len();
        self.chr[index]
    }

    /// PPU write in $0000-$1FFF; only effective on CHR-RAM boards.
    pub fn write_chr(&mut self, address: u16, value: u8) {
        if self.chr_writable {
            let index = self.mapper.map_chr(address) % self.chr.len();
            self.chr[index] = value;
        }
    }

    /// Work/battery RAM at $6000-$7FFF.
    #[must_use]
    pub fn read_prg_ram(&self, address: u16) -> u8 {
        self.prg_ram[address as usize % PRG_RAM_SIZE]
    }

    pub fn write_prg_ram(&mut self, address: u16, value: u8) {
        self.prg_ram[address as usize % PRG_RAM_SIZE] = value;
        if self.header.battery() {
            self.prg_ram_dirty = true;
        }
    }

    /// Effective mirroring: the mapper's runtime choice when it has one,
    /// the header's wiring otherwise.
    #[must_use]
    pub fn mirroring(&self) -> Mirroring {
        self.mapper
            .mirroring()
            .unwrap_or_else(|| self.header.mirroring())
    }

    /// Scanline hook driven by the PPU (MMC3 IRQ counter). Returns true
    /// when the mapper asserts IRQ.
    pub fn notify_scanline(&mut self) -> bool {
        self.mapper.notify_scanline()
    }

    /// CPU-cycle hook (FME-7 IRQ counter). Returns true when the mapper
    /// asserts IRQ.
    pub fn notify_cpu_cycle(&mut self) -> bool {
        self.mapper.notify_cpu_cycle()
    }

    pub(crate) fn mapper_state(&self) -> MapperState {
        self.mapper.state()
    }

    pub(crate) fn restore_mapper(&mut self, state: &MapperState) {
        self.mapper.restore(state);
    }

    /// Battery-backed RAM contents for hosts that persist `.sav` files.
    #[must_use]
    pub fn sram(&self) -> &[u8] {
        &self.prg_ram
    }

    /// Replace battery-backed RAM, e.g. from a `.sav` file.
    pub fn load_sram(&mut self, data: &[u8]) {
        let len = data.len().min(PRG_RAM_SIZE);
        self.prg_ram[..len].copy_from_slice(&data[..len]);
        self.prg_ram_dirty = false;
    }

    /// True when battery RAM changed since the last [`Self::load_sram`] /
    /// [`Self::mark_sram_flushed`].
    #[must_use]
    pub const fn sram_dirty(&self) -> bool {
        self.prg_ram_dirty
    }

    pub fn mark_sram_flushed(&mut self) {
        self.prg_ram_dirty = false;
    }

    pub(crate) fn prg_ram_bytes(&self) -> Vec<u8> {
        self.prg_ram.clone()
    }

    pub(crate) fn chr_ram_bytes(&self) -> Option<Vec<u8>> {
        self.chr_writable.then(|| self.chr.clone())
    }

    pub(crate) fn restore_ram(&mut self, prg_ram: &[u8], chr_ram: Option<&[u8]>) {
        let len = prg_ram.len().min(self.prg_ram.len());
        self.prg_ram[..len].copy_from_slice(&prg_ram[..len]);
        if let (true, Some(chr)) = (self.chr_writable, chr_ram) {
            let len = chr.len().min(self.chr.len());
            self.chr[..len].copy_from_slice(&chr[..len]);
        }
    }
}

/// Plain bitwise CRC32 (IEEE polynomial). Runs once per ROM load, so no
/// table is worth carrying.
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn build_rom(mapper: u8, prg_banks: u8, chr_banks: u8, flags6_low: u8) -> Vec<u8> {
        let mut data = vec![0_u8; HEADER_SIZE];
        data[0..4].copy_from_slice(&MAGIC);
        data[4] = prg_banks;
        data[5] = chr_banks;
        data[6] = (mapper << 4) | flags6_low;
        data[7] = mapper & 0xF0;
        data.resize(
            HEADER_SIZE
                + prg_banks as usize * PRG_BANK_SIZE
                + chr_banks as usize * CHR_BANK_SIZE,
            0,
        );
        data
    }

    #[test]
    fn parses_nrom_header() {
        let data = build_rom(0, 2, 1, 0x01);
        let header = RomHeader::parse(&data).unwrap();

        assert_eq!(header.mapper(), 0);
        assert_eq!(header.prg_banks(), 2);
        assert_eq!(header.chr_banks(), 1);
        assert_eq!(header.mirroring(), Mirroring::Vertical);
        assert!(!header.battery());
    }

    #[test]
    fn battery_and_four_screen_flags() {
        let data = build_rom(4, 2, 1, 0x0A);
        let header = RomHeader::parse(&data).unwrap();

        assert!(header.battery());
        assert_eq!(header.mirroring(), Mirroring::FourScreen);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = build_rom(0, 1, 1, 0);
        data[0] = b'X';
        assert!(matches!(
            RomHeader::parse(&data),
            Err(EmuError::InvalidRom(_))
        ));
    }

    #[test]
    fn rejects_truncated_image() {
        let mut data = build_rom(0, 1, 1, 0);
        data.truncate(data.len() - 1);
        assert!(matches!(Cartridge::load(&data), Err(EmuError::InvalidRom(_))));
    }

    #[test]
    fn rejects_unknown_mapper() {
        let data = build_rom(77, 1, 1, 0);
        assert!(matches!(
            Cartridge::load(&data),
            Err(EmuError::UnsupportedMapper { mapper: 77 })
        ));
    }

    #[test]
    fn chr_ram_board_is_writable() {
        let data = build_rom(0, 1, 0, 0);
        let mut cart = Cartridge::load(&data).unwrap();

        cart.write_chr(0x0123, 0xAB);
        assert_eq!(cart.read_chr(0x0123), 0xAB);
    }

    #[test]
    fn chr_rom_board_ignores_writes() {
        let data = build_rom(0, 1, 1, 0);
        let mut cart = Cartridge::load(&data).unwrap();

        cart.write_chr(0x0123, 0xAB);
        assert_eq!(cart.read_chr(0x0123), 0x00);
    }

    #[test]
    fn crc_is_stable_and_data_sensitive() {
        let data = build_rom(0, 1, 1, 0);
        let mut tweaked = data.clone();
        tweaked[HEADER_SIZE] = 0xFF;

        assert_eq!(crc32(&data), crc32(&data));
        assert_ne!(crc32(&data), crc32(&tweaked));
    }

    #[test]
    fn sram_dirty_tracks_battery_writes() {
        let data = build_rom(0, 1, 1, 0x02);
        let mut cart = Cartridge::load(&data).unwrap();
        assert!(!cart.sram_dirty());

        cart.write_prg_ram(0x6000, 7);
        assert!(cart.sram_dirty());
        cart.mark_sram_flushed();
        assert!(!cart.sram_dirty());
    }
}
