//! CPU address space.
//!
//! The bus owns every device the CPU can see: 2KB internal RAM, the PPU
//! register window, the APU/IO block, the controllers, and the cartridge.
//! It also carries time forward: [`Bus::tick`] advances the PPU three dots
//! and the APU one step per CPU cycle, runs the mapper's cycle hook, and
//! services DMC sample fetches.

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::joypad::Joypad;
use crate::ppu::Ppu;

const RAM_SIZE: usize = 0x800;

pub(crate) struct Bus {
    ram: [u8; RAM_SIZE],
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) joypad1: Joypad,
    pub(crate) joypad2: Joypad,
    pub(crate) cartridge: Option<Cartridge>,
    /// Extra CPU cycles owed by DMA transfers and DMC fetches.
    stall: u16,
    /// Latched cartridge IRQ line; cleared when the CPU services it.
    mapper_irq: bool,
}

impl Bus {
    pub(crate) fn new() -> Self {
        Self {
            ram: [0; RAM_SIZE],
            ppu: Ppu::new(),
            apu: Apu::new(),
            joypad1: Joypad::default(),
            joypad2: Joypad::default(),
            cartridge: None,
            stall: 0,
            mapper_irq: false,
        }
    }

    pub(crate) fn read(&mut self, address: u16) -> u8 {
        match address {
            // 2KB RAM mirrored through $1FFF.
            0x0000..=0x1FFF => self.ram[usize::from(address) & (RAM_SIZE - 1)],
            // PPU registers mirrored every 8 bytes through $3FFF.
            0x2000..=0x3FFF => {
                let Self { ppu, cartridge, .. } = self;
                match cartridge.as_mut() {
                    Some(cart) => ppu.read_register(address, cart),
                    None => 0,
                }
            }
            0x4015 => self.apu.read_status(),
            0x4016 => self.joypad1.read(),
            0x4017 => self.joypad2.read(),
            0x4000..=0x401F => 0,
            0x4020..=0x5FFF => {
                tracing::trace!(address, "read from unmapped expansion space");
                0
            }
            0x6000..=0x7FFF => match self.cartridge.as_ref() {
                Some(cart) => cart.read_prg_ram(address),
                None => 0,
            },
            0x8000..=0xFFFF => match self.cartridge.as_ref() {
                Some(cart) => cart.read_prg(address),
                None => 0,
            },
        }
    }

    pub(crate) fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram[usize::from(address) & (RAM_SIZE - 1)] = value,
            0x2000..=0x3FFF => {
                let Self { ppu, cartridge, .. } = self;
                if let Some(cart) = cartridge.as_mut() {
                    ppu.write_register(address, value, cart);
                }
            }
            0x4014 => self.oam_dma(value),
            0x4016 => {
                // The strobe line is shared by both controller ports.
                self.joypad1.write(value);
                self.joypad2.write(value);
            }
            0x4000..=0x4013 | 0x4015 | 0x4017 => self.apu.write_register(address, value),
            0x4018..=0x401F => {}
            0x4020..=0x5FFF => {
                tracing::trace!(address, value, "write to unmapped expansion space");
            }
            0x6000..=0x7FFF => {
                if let Some(cart) = self.cartridge.as_mut() {
                    cart.write_prg_ram(address, value);
                }
            }
            0x8000..=0xFFFF => {
                if let Some(cart) = self.cartridge.as_mut() {
                    cart.write_prg(address, value);
                }
            }
        }
    }

    /// $4014: copy one CPU page into PPU OAM. Stalls the CPU 513 cycles
    /// plus one on odd cycles.
    fn oam_dma(&mut self, page: u8) {
        let base = u16::from(page) << 8;
        for offset in 0..256 {
            let value = self.read(base + offset);
            self.ppu.write_oam_data(value);
        }
        self.stall += 513 + (self.apu.cycle_parity() as u16);
    }

    /// Advance the rest of the machine by `cpu_cycles` CPU cycles.
    pub(crate) fn tick(&mut self, cpu_cycles: u16) {
        for _ in 0..cpu_cycles {
            let mut cart_irq = false;
            {
                let Self { ppu, cartridge, .. } = self;
                if let Some(cart) = cartridge.as_mut() {
                    ppu.step(cart);
                    ppu.step(cart);
                    ppu.step(cart);
                    cart_irq = cart.notify_cpu_cycle();
                }
            }
            if cart_irq || self.ppu.take_mapper_irq() {
                self.mapper_irq = true;
            }

            // The DMC fetches through the CPU bus and stalls it.
            if self.apu.dmc_wants_sample() {
                let address = self.apu.dmc_address();
                let value = self.read(address);
                self.apu.dmc_supply_sample(value);
                self.stall += 4;
            }
            self.apu.step();
        }
    }

    /// Consume pending stall cycles accumulated by DMA/DMC traffic.
    pub(crate) fn take_stall(&mut self) -> u16 {
        std::mem::take(&mut self.stall)
    }

    /// Cartridge IRQ line level.
    pub(crate) const fn mapper_irq_asserted(&self) -> bool {
        self.mapper_irq
    }

    pub(crate) fn ack_mapper_irq(&mut self) {
        self.mapper_irq = false;
    }

    pub(crate) fn ram_bytes(&self) -> Vec<u8> {
        self.ram.to_vec()
    }

    pub(crate) fn restore_ram(&mut self, data: &[u8]) {
        let len = data.len().min(RAM_SIZE);
        self.ram[..len].copy_from_slice(&data[..len]);
    }

    pub(crate) fn stall_state(&self) -> (u16, bool) {
        (self.stall, self.mapper_irq)
    }

    pub(crate) fn restore_stall_state(&mut self, stall: u16, mapper_irq: bool) {
        self.stall = stall;
        self.mapper_irq = mapper_irq;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cartridge::Cartridge;

    fn bus_with_cart() -> Bus {
        let mut data = vec![0_u8; 16];
        data[0..4].copy_from_slice(b"NES\x1A");
        data[4] = 1;
        data[5] = 1;
        data.resize(16 + 16 * 1024 + 8 * 1024, 0);
        let mut bus = Bus::new();
        bus.cartridge = Some(Cartridge::load(&data).unwrap());
        bus
    }

    #[test]
    fn ram_mirrors_every_2k() {
        let mut bus = Bus::new();
        bus.write(0x0005, 0xAB);
        assert_eq!(bus.read(0x0005), 0xAB);
        assert_eq!(bus.read(0x0805), 0xAB);
        assert_eq!(bus.read(0x1805), 0xAB);
    }

    #[test]
    fn prg_ram_lives_at_6000() {
        let mut bus = bus_with_cart();
        bus.write(0x6123, 0x77);
        assert_eq!(bus.read(0x6123), 0x77);
    }

    #[test]
    fn oam_dma_copies_a_page_and_stalls() {
        let mut bus = bus_with_cart();
        for i in 0..256_u16 {
            bus.write(0x0200 + i, i as u8);
        }
        bus.write(0x4014, 0x02);

        let stall = bus.take_stall();
        assert!(stall == 513 || stall == 514);
        // Spot-check the copy landed in OAM via $2004 reads.
        bus.write(0x2003, 0x10);
        assert_eq!(bus.read(0x2004), 0x10);
    }

    #[test]
    fn ram_mirrors_hold_arbitrary_data() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        let mut bus = Bus::new();
        for _ in 0..512 {
            let address: u16 = rng.gen_range(0x0000..0x0800);
            let value: u8 = rng.gen_range(0x00..=0xFF);
            bus.write(address, value);
            assert_eq!(bus.read(address | 0x0800), value);
            assert_eq!(bus.read(address | 0x1000), value);
        }
    }

    #[test]
    fn controller_strobe_is_shared() {
        let mut bus = Bus::new();
        bus.joypad1.set_button(crate::joypad::Button::A, true);
        bus.write(0x4016, 1);
        bus.write(0x4016, 0);
        assert_eq!(bus.read(0x4016), 1);
        assert_eq!(bus.read(0x4016), 0);
    }
}
