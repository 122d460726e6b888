//! Cartridge mappers: PRG/CHR bank switching and cartridge IRQ logic.
//!
//! One mapper instance is selected at ROM load from the header's mapper id
//! and consulted through a single `Box<dyn Mapper>` indirection afterwards.
//! Unknown ids fail the load with [`EmuError::UnsupportedMapper`].

use serde::{Deserialize, Serialize};

use crate::cartridge::{Mirroring, RomHeader};
use crate::error::EmuError;

/// Behavior a cartridge board contributes to the address space.
///
/// `map_prg` covers CPU reads in $8000-$FFFF, `map_chr` PPU reads in
/// $0000-$1FFF; both return offsets into the raw PRG/CHR data. Register
/// writes land in [`Mapper::write`] and change the mapping immediately.
/// The two notify hooks drive cartridge IRQ counters: `notify_scanline`
/// once per rendered scanline (MMC3), `notify_cpu_cycle` once per CPU
/// cycle (FME-7); returning true asserts the IRQ line.
pub trait Mapper: Send {
    fn map_prg(&self, address: u16) -> usize;

    fn map_chr(&self, address: u16) -> usize;

    fn write(&mut self, address: u16, value: u8);

    /// Runtime mirroring override; None defers to the header wiring.
    fn mirroring(&self) -> Option<Mirroring> {
        None
    }

    fn notify_scanline(&mut self) -> bool {
        false
    }

    fn notify_cpu_cycle(&mut self) -> bool {
        false
    }

    fn state(&self) -> MapperState;

    fn restore(&mut self, state: &MapperState);
}

/// Serializable snapshot of mapper-internal registers, tagged per board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapperState {
    NRom,
    Mmc1 {
        shift: u8,
        writes: u8,
        control: u8,
        chr_bank0: u8,
        chr_bank1: u8,
        prg_bank: u8,
    },
    UxRom {
        bank: u8,
    },
    CnRom {
        bank: u8,
    },
    Mmc3 {
        bank_select: u8,
        banks: [u8; 8],
        mirroring: u8,
        irq_latch: u8,
        irq_counter: u8,
        irq_reload: bool,
        irq_enabled: bool,
    },
    Fme7 {
        command: u8,
        chr_banks: [u8; 8],
        prg_banks: [u8; 4],
        mirroring: u8,
        irq_enabled: bool,
        irq_counter_enabled: bool,
        irq_counter: u16,
    },
}

/// Select and build the mapper named by the ROM header.
pub fn build(header: &RomHeader) -> Result<Box<dyn Mapper>, EmuError> {
    match header.mapper() {
        0 => Ok(Box::new(NRom::new(header))),
        1 => Ok(Box::new(Mmc1::new(header))),
        2 => Ok(Box::new(UxRom::new(header))),
        3 => Ok(Box::new(CnRom::new())),
        4 => Ok(Box::new(Mmc3::new(header))),
        69 => Ok(Box::new(Fme7::new(header))),
        mapper => Err(EmuError::UnsupportedMapper { mapper }),
    }
}

/// Mapper 0: fixed banks; 16KB boards mirror $8000-$BFFF at $C000.
struct NRom {
    prg_banks: u8,
}

impl NRom {
    fn new(header: &RomHeader) -> Self {
        Self {
            prg_banks: header.prg_banks(),
        }
    }
}

impl Mapper for NRom {
    fn map_prg(&self, address: u16) -> usize {
        let mut offset = address as usize - 0x8000;
        if self.prg_banks == 1 {
            offset &= 0x3FFF;
        }
        offset
    }

    fn map_chr(&self, address: u16) -> usize {
        address as usize
    }

    fn write(&mut self, address: u16, value: u8) {
        tracing::debug!(address, value, "write to NROM register space ignored");
    }

    fn state(&self) -> MapperState {
        MapperState::NRom
    }

    fn restore(&mut self, _state: &MapperState) {}
}

/// Mapper 1: serial shift register loading four internal registers.
struct Mmc1 {
    prg_banks: u8,
    shift: u8,
    writes: u8,
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
}

impl Mmc1 {
    fn new(header: &RomHeader) -> Self {
        Self {
            prg_banks: header.prg_banks(),
            shift: 0,
            writes: 0,
            // Power-on: last PRG bank fixed at $C000.
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
        }
    }
}

impl Mapper for Mmc1 {
    fn map_prg(&self, address: u16) -> usize {
        let bank_num = usize::from(self.prg_bank & 0x0F);
        let mut offset = address as usize & 0x3FFF;
        let bank = match (self.control >> 2) & 0x03 {
            0 | 1 => {
                // 32KB switching, low bit of the bank number ignored.
                offset |= address as usize & 0x4000;
                bank_num & 0x0E
            }
            2 => {
                // First bank fixed at $8000, 16KB switch at $C000.
                if address < 0xC000 { 0 } else { bank_num }
            }
            _ => {
                // Last bank fixed at $C000, 16KB switch at $8000.
                if address >= 0xC000 {
                    usize::from(self.prg_banks) - 1
                } else {
                    bank_num
                }
            }
        };
        bank * 0x4000 + offset
    }

    fn map_chr(&self, address: u16) -> usize {
        if self.control & 0x10 == 0 {
            // One 8KB bank, low bit ignored.
            let bank = usize::from(self.chr_bank0 & 0x1E);
            bank * 0x1000 + (address as usize & 0x1FFF)
        } else {
            // Two independent 4KB banks.
            let bank = if address < 0x1000 {
                self.chr_bank0
            } else {
                self.chr_bank1
            };
            usize::from(bank & 0x1F) * 0x1000 + (address as usize & 0x0FFF)
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        if value & 0x80 != 0 {
            // Reset bit: clear the shift register and fix the last bank.
            self.shift = 0;
            self.writes = 0;
            self.control |= 0x0C;
            return;
        }

        self.shift = ((value & 1) << 4) | (self.shift >> 1);
        self.writes += 1;
        if self.writes < 5 {
            return;
        }

        let loaded = self.shift;
        match address & 0x6000 {
            0x0000 => self.control = loaded,
            0x2000 => self.chr_bank0 = loaded,
            0x4000 => self.chr_bank1 = loaded,
            _ => self.prg_bank = loaded,
        }
        self.shift = 0;
        self.writes = 0;
    }

    fn mirroring(&self) -> Option<Mirroring> {
        Some(match self.control & 0x03 {
            0 => Mirroring::SingleScreenLow,
            1 => Mirroring::SingleScreenHigh,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        })
    }

    fn state(&self) -> MapperState {
        MapperState::Mmc1 {
            shift: self.shift,
            writes: self.writes,
            control: self.control,
            chr_bank0: self.chr_bank0,
            chr_bank1: self.chr_bank1,
            prg_bank: self.prg_bank,
        }
    }

    fn restore(&mut self, state: &MapperState) {
        if let MapperState::Mmc1 {
            shift,
            writes,
            control,
            chr_bank0,
            chr_bank1,
            prg_bank,
        } = state
        {
            self.shift = *shift;
            self.writes = *writes;
            self.control = *control;
            self.chr_bank0 = *chr_bank0;
            self.chr_bank1 = *chr_bank1;
            self.prg_bank = *prg_bank;
        }
    }
}

/// Mapper 2: 16KB PRG switch at $8000, last bank fixed at $C000.
struct UxRom {
    prg_banks: u8,
    bank: u8,
}

impl UxRom {
    fn new(header: &RomHeader) -> Self {
        Self {
            prg_banks: header.prg_banks(),
            bank: 0,
        }
    }
}

impl Mapper for UxRom {
    fn map_prg(&self, address: u16) -> usize {
        let bank = if address < 0xC000 {
            self.bank
        } else {
            self.prg_banks - 1
        };
        usize::from(bank) * 0x4000 + (address as usize & 0x3FFF)
    }

    fn map_chr(&self, address: u16) -> usize {
        address as usize
    }

    fn write(&mut self, _address: u16, value: u8) {
        self.bank = value & 0x0F;
    }

    fn state(&self) -> MapperState {
        MapperState::UxRom { bank: self.bank }
    }

    fn restore(&mut self, state: &MapperState) {
        if let MapperState::UxRom { bank } = state {
            self.bank = *bank;
        }
    }
}

/// Mapper 3: fixed PRG, 8KB CHR bank select.
struct CnRom {
    bank: u8,
}

impl CnRom {
    const fn new() -> Self {
        Self { bank: 0 }
    }
}

impl Mapper for CnRom {
    fn map_prg(&self, address: u16) -> usize {
        address as usize - 0x8000
    }

    fn map_chr(&self, address: u16) -> usize {
        usize::from(self.bank) * 0x2000 + (address as usize & 0x1FFF)
    }

    fn write(&mut self, _address: u16, value: u8) {
        self.bank = value & 0x0F;
    }

    fn state(&self) -> MapperState {
        MapperState::CnRom { bank: self.bank }
    }

    fn restore(&mut self, state: &MapperState) {
        if let MapperState::CnRom { bank } = state {
            self.bank = *bank;
        }
    }
}

/// Mapper 4: 8KB PRG / 1-2KB CHR banking plus the scanline IRQ counter.
struct Mmc3 {
    prg_banks: u8,
    chr_banks: u8,
    bank_select: u8,
    banks: [u8; 8],
    mirroring: u8,
    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
}

impl Mmc3 {
    fn new(header: &RomHeader) -> Self {
        Self {
            prg_banks: header.prg_banks(),
            chr_banks: header.chr_banks(),
            bank_select: 0,
            banks: [0; 8],
            mirroring: 0,
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
        }
    }

    fn prg_bank_count_8k(&self) -> usize {
        usize::from(self.prg_banks) * 2
    }

    fn chr_bank_count_1k(&self) -> usize {
        usize::from(self.chr_banks).max(1) * 8
    }
}

impl Mapper for Mmc3 {
    fn map_prg(&self, address: u16) -> usize {
        let last = self.prg_bank_count_8k() - 1;
        let swap = self.bank_select & 0x40 != 0;
        let bank = match address {
            0x8000..=0x9FFF => {
                if swap {
                    last - 1
                } else {
                    usize::from(self.banks[6])
                }
            }
            0xA000..=0xBFFF => usize::from(self.banks[7]),
            0xC000..=0xDFFF => {
                if swap {
                    usize::from(self.banks[6])
                } else {
                    last - 1
                }
            }
            _ => last,
        };
        (bank % self.prg_bank_count_8k()) * 0x2000 + (address as usize & 0x1FFF)
    }

    fn map_chr(&self, address: u16) -> usize {
        let invert = self.bank_select & 0x80 != 0;
        let slot = (address as usize & 0x1FFF) / 0x400;
        let slot = if invert { slot ^ 4 } else { slot };
        let bank = match slot {
            // Two 2KB banks: even/odd 1KB halves share a register.
            0 => usize::from(self.banks[0] & 0xFE),
            1 => usize::from(self.banks[0] | 0x01),
            2 => usize::from(self.banks[1] & 0xFE),
            3 => usize::from(self.banks[1] | 0x01),
            other => usize::from(self.banks[other - 2]),
        };
        (bank % self.chr_bank_count_1k()) * 0x400 + (address as usize & 0x3FF)
    }

    fn write(&mut self, address: u16, value: u8) {
        match (address, address & 1) {
            (0x8000..=0x9FFF, 0) => self.bank_select = value,
            (0x8000..=0x9FFF, _) => {
                let target = usize::from(self.bank_select & 0x07);
                self.banks[target] = match target {
                    0 | 1 => value & 0xFE,
                    6 | 7 => value & 0x3F,
                    _ => value,
                };
            }
            (0xA000..=0xBFFF, 0) => self.mirroring = value,
            (0xA000..=0xBFFF, _) => {
                // PRG-RAM protect, not modelled.
            }
            (0xC000..=0xDFFF, 0) => self.irq_latch = value,
            (0xC000..=0xDFFF, _) => self.irq_reload = true,
            (_, 0) => self.irq_enabled = false,
            (_, _) => self.irq_enabled = true,
        }
    }

    fn mirroring(&self) -> Option<Mirroring> {
        Some(if self.mirroring & 1 != 0 {
            Mirroring::Horizontal
        } else {
            Mirroring::Vertical
        })
    }

    fn notify_scanline(&mut self) -> bool {
        if self.irq_reload || self.irq_counter == 0 {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
            return false;
        }
        self.irq_counter -= 1;
        self.irq_counter == 0 && self.irq_enabled
    }

    fn state(&self) -> MapperState {
        MapperState::Mmc3 {
            bank_select: self.bank_select,
            banks: self.banks,
            mirroring: self.mirroring,
            irq_latch: self.irq_latch,
            irq_counter: self.irq_counter,
            irq_reload: self.irq_reload,
            irq_enabled: self.irq_enabled,
        }
    }

    fn restore(&mut self, state: &MapperState) {
        if let MapperState::Mmc3 {
            bank_select,
            banks,
            mirroring,
            irq_latch,
            irq_counter,
            irq_reload,
            irq_enabled,
        } = state
        {
            self.bank_select = *bank_select;
            self.banks = *banks;
            self.mirroring = *mirroring;
            self.irq_latch = *irq_latch;
            self.irq_counter = *irq_counter;
            self.irq_reload = *irq_reload;
            self.irq_enabled = *irq_enabled;
        }
    }
}

/// Mapper 69 (Sunsoft FME-7): command/parameter register pair, 8KB PRG and
/// 1KB CHR banks, and a CPU-cycle-driven 16-bit IRQ counter.
struct Fme7 {
    prg_bank_mask: usize,
    chr_bank_mask: usize,
    command: u8,
    chr_banks: [u8; 8],
    prg_banks: [u8; 4],
    mirroring: u8,
    irq_enabled: bool,
    irq_counter_enabled: bool,
    irq_counter: u16,
}

impl Fme7 {
    fn new(header: &RomHeader) -> Self {
        let prg_8k = usize::from(header.prg_banks()) * 2;
        let chr_1k = usize::from(header.chr_banks()).max(1) * 8;
        let mut mapper = Self {
            prg_bank_mask: prg_8k.saturating_sub(1),
            chr_bank_mask: chr_1k.saturating_sub(1),
            command: 0,
            chr_banks: [0; 8],
            prg_banks: [0; 4],
            mirroring: 0,
            irq_enabled: false,
            irq_counter_enabled: false,
            irq_counter: 0,
        };
        // The $E000 region is hard-wired to the last bank.
        mapper.prg_banks[3] = (prg_8k - 1) as u8;
        mapper
    }
}

impl Mapper for Fme7 {
    fn map_prg(&self, address: u16) -> usize {
        let slot = match address {
            0x8000..=0x9FFF => 1,
            0xA000..=0xBFFF => 2,
            0xC000..=0xDFFF => 3,
            _ => return self.prg_bank_mask * 0x2000 + (address as usize & 0x1FFF),
        };
        let bank = usize::from(self.prg_banks[slot]) & self.prg_bank_mask;
        bank * 0x2000 + (address as usize & 0x1FFF)
    }

    fn map_chr(&self, address: u16) -> usize {
        let slot = (address as usize & 0x1FFF) / 0x400;
        let bank = usize::from(self.chr_banks[slot]) & self.chr_bank_mask;
        bank * 0x400 + (address as usize & 0x3FF)
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x8000..=0x9FFF => self.command = value & 0x0F,
            0xA000..=0xBFFF => match self.command {
                0..=7 => self.chr_banks[self.command as usize] = value,
                8..=11 => self.prg_banks[(self.command - 8) as usize] = value,
                12 => self.mirroring = value & 0x03,
                13 => {
                    self.irq_enabled = value & 0x80 != 0;
                    self.irq_counter_enabled = value & 0x01 != 0;
                }
                14 => self.irq_counter = (self.irq_counter & 0xFF00) | u16::from(value),
                _ => {
                    self.irq_counter =
                        (self.irq_counter & 0x00FF) | (u16::from(value) << 8);
                }
            },
            _ => {}
        }
    }

    fn mirroring(&self) -> Option<Mirroring> {
        Some(match self.mirroring {
            0 => Mirroring::Vertical,
            1 => Mirroring::Horizontal,
            2 => Mirroring::SingleScreenLow,
            _ => Mirroring::SingleScreenHigh,
        })
    }

    fn notify_cpu_cycle(&mut self) -> bool {
        if !self.irq_counter_enabled {
            return false;
        }
        self.irq_counter = self.irq_counter.wrapping_sub(1);
        self.irq_counter == 0xFFFF && self.irq_enabled
    }

    fn state(&self) -> MapperState {
        MapperState::Fme7 {
            command: self.command,
            chr_banks: self.chr_banks,
            prg_banks: self.prg_banks,
            mirroring: self.mirroring,
            irq_enabled: self.irq_enabled,
            irq_counter_enabled: self.irq_counter_enabled,
            irq_counter: self.irq_counter,
        }
    }

    fn restore(&mut self, state: &MapperState) {
        if let MapperState::Fme7 {
            command,
            chr_banks,
            prg_banks,
            mirroring,
            irq_enabled,
            irq_counter_enabled,
            irq_counter,
        } = state
        {
            self.command = *command;
            self.chr_banks = *chr_banks;
            self.prg_banks = *prg_banks;
            self.mirroring = *mirroring;
            self.irq_enabled = *irq_enabled;
            self.irq_counter_enabled = *irq_counter_enabled;
            self.irq_counter = *irq_counter;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn nrom_single_bank_mirrors_upper_half() {
        let mapper = NRom { prg_banks: 1 };
        assert_eq!(mapper.map_prg(0x8000), 0x0000);
        assert_eq!(mapper.map_prg(0xBFFF), 0x3FFF);
        assert_eq!(mapper.map_prg(0xC000), 0x0000);
        assert_eq!(mapper.map_prg(0xFFFF), 0x3FFF);
    }

    #[test]
    fn nrom_two_banks_map_linearly() {
        let mapper = NRom { prg_banks: 2 };
        assert_eq!(mapper.map_prg(0x8000), 0x0000);
        assert_eq!(mapper.map_prg(0xC000), 0x4000);
        assert_eq!(mapper.map_prg(0xFFFF), 0x7FFF);
    }

    fn mmc1() -> Mmc1 {
        Mmc1 {
            prg_banks: 8,
            shift: 0,
            writes: 0,
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
        }
    }

    fn mmc1_serial_write(mapper: &mut Mmc1, address: u16, value: u8) {
        for i in 0..5 {
            mapper.write(address, (value >> i) & 1);
        }
    }

    #[test]
    fn mmc1_power_on_fixes_last_bank_high() {
        let mapper = mmc1();
        assert_eq!(mapper.map_prg(0xC000), 7 * 0x4000);
        assert_eq!(mapper.map_prg(0x8000), 0x0000);
    }

    #[test]
    fn mmc1_serial_load_switches_prg_bank() {
        let mut mapper = mmc1();
        mmc1_serial_write(&mut mapper, 0xE000, 3);
        assert_eq!(mapper.map_prg(0x8000), 3 * 0x4000);
        // $C000 stays fixed to the last bank in mode 3.
        assert_eq!(mapper.map_prg(0xC000), 7 * 0x4000);
    }

    #[test]
    fn mmc1_reset_bit_clears_shift_register() {
        let mut mapper = mmc1();
        mapper.write(0xE000, 1);
        mapper.write(0xE000, 1);
        mapper.write(0xE000, 0x80);
        // A fresh five-write sequence must start from scratch.
        mmc1_serial_write(&mut mapper, 0xE000, 2);
        assert_eq!(mapper.map_prg(0x8000), 2 * 0x4000);
    }

    #[test]
    fn mmc1_mirroring_follows_control_register() {
        let mut mapper = mmc1();
        mmc1_serial_write(&mut mapper, 0x8000, 0x02);
        assert_eq!(mapper.mirroring(), Some(Mirroring::Vertical));
    }

    #[test]
    fn uxrom_switches_low_window_only() {
        let mut mapper = UxRom {
            prg_banks: 8,
            bank: 0,
        };
        mapper.write(0x8000, 5);
        assert_eq!(mapper.map_prg(0x8000), 5 * 0x4000);
        assert_eq!(mapper.map_prg(0xC000), 7 * 0x4000);
    }

    #[test]
    fn cnrom_switches_chr_only() {
        let mut mapper = CnRom::new();
        mapper.write(0x8000, 2);
        assert_eq!(mapper.map_chr(0x0000), 2 * 0x2000);
        assert_eq!(mapper.map_prg(0x8000), 0x0000);
    }

    fn mmc3() -> Mmc3 {
        let data = {
            let mut d = vec![0_u8; 16];
            d[0..4].copy_from_slice(b"NES\x1A");
            d[4] = 4;
            d[5] = 2;
            d[6] = 4 << 4;
            d
        };
        Mmc3::new(&RomHeader::parse(&data).unwrap())
    }

    #[test]
    fn mmc3_fixed_banks_follow_swap_bit() {
        let mut mapper = mmc3();
        // banks[6] = 2 via bank select 6.
        mapper.write(0x8000, 6);
        mapper.write(0x8001, 2);

        assert_eq!(mapper.map_prg(0x8000), 2 * 0x2000);
        assert_eq!(mapper.map_prg(0xC000), 6 * 0x2000);

        // Swap bit exchanges the $8000 and $C000 windows.
        mapper.write(0x8000, 0x46);
        assert_eq!(mapper.map_prg(0x8000), 6 * 0x2000);
        assert_eq!(mapper.map_prg(0xC000), 2 * 0x2000);
        // $E000 always maps the last bank.
        assert_eq!(mapper.map_prg(0xE000), 7 * 0x2000);
    }

    #[test]
    fn mmc3_irq_fires_after_latch_scanlines() {
        let mut mapper = mmc3();
        mapper.write(0xC000, 3); // latch
        mapper.write(0xC001, 0); // reload
        mapper.write(0xE001, 0); // enable

        // Reload scanline, then count 3 -> 2 -> 1 -> 0 (fires).
        assert!(!mapper.notify_scanline());
        assert!(!mapper.notify_scanline());
        assert!(!mapper.notify_scanline());
        assert!(mapper.notify_scanline());
    }

    #[test]
    fn mmc3_irq_disabled_does_not_fire() {
        let mut mapper = mmc3();
        mapper.write(0xC000, 1);
        mapper.write(0xC001, 0);
        mapper.write(0xE000, 0); // disable

        assert!(!mapper.notify_scanline());
        assert!(!mapper.notify_scanline());
        assert!(!mapper.notify_scanline());
    }

    fn fme7() -> Fme7 {
        let data = {
            let mut d = vec![0_u8; 16];
            d[0..4].copy_from_slice(b"NES\x1A");
            d[4] = 8;
            d[5] = 8;
            d[6] = 5 << 4; // low nibble of 69
            d[7] = 0x40; // high nibble of 69
            d
        };
        Fme7::new(&RomHeader::parse(&data).unwrap())
    }

    #[test]
    fn fme7_command_parameter_banking() {
        let mut mapper = fme7();
        mapper.write(0x8000, 9); // select PRG slot for $8000
        mapper.write(0xA000, 4);
        assert_eq!(mapper.map_prg(0x8000), 4 * 0x2000);

        mapper.write(0x8000, 0); // CHR slot 0
        mapper.write(0xA000, 3);
        assert_eq!(mapper.map_chr(0x0000), 3 * 0x400);

        // $E000 window stays pinned to the final bank.
        assert_eq!(mapper.map_prg(0xE000), 15 * 0x2000);
    }

    #[test]
    fn fme7_irq_counts_cpu_cycles() {
        let mut mapper = fme7();
        mapper.write(0x8000, 14);
        mapper.write(0xA000, 2); // counter low
        mapper.write(0x8000, 15);
        mapper.write(0xA000, 0); // counter high
        mapper.write(0x8000, 13);
        mapper.write(0xA000, 0x81); // enable IRQ + counter

        assert!(!mapper.notify_cpu_cycle()); // 2 -> 1
        assert!(!mapper.notify_cpu_cycle()); // 1 -> 0
        assert!(mapper.notify_cpu_cycle()); // 0 -> 0xFFFF fires
    }

    #[test]
    fn unknown_mapper_is_rejected() {
        let data = {
            let mut d = vec![0_u8; 16];
            d[0..4].copy_from_slice(b"NES\x1A");
            d[4] = 1;
            d[6] = 7 << 4;
            d
        };
        let header = RomHeader::parse(&data).unwrap();
        assert!(matches!(
            build(&header),
            Err(EmuError::UnsupportedMapper { mapper: 7 })
        ));
    }
}
