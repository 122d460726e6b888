//! Ricoh 2A03 core (6502 without decimal arithmetic).
//!
//! Table-driven fetch/decode/execute; one [`Cpu::step_instruction`] call
//! runs exactly one instruction, including any interrupt entry at the
//! boundary, and advances the rest of the machine through the bus.
//!
//! Undefined-opcode policy: the documented-stable unofficial set (the
//! multi-byte NOPs, LAX, SAX, DCP, ISB, SLO, RLA, SRE, RRA, and the $EB
//! SBC alias) executes with hardware behavior. The twelve JAM encodings
//! and the unstable set (ANC, ALR, ARR, XAA, AXS, TAS, LAS, SHX, SHY,
//! AHX, immediate LAX) surface as [`EmuError::IllegalOpcode`] without
//! touching machine state. One policy, applied to every encoding.

use crate::bus::Bus;
use crate::error::EmuError;

const FLAG_C: u8 = 0x01;
const FLAG_Z: u8 = 0x02;
const FLAG_I: u8 = 0x04;
const FLAG_D: u8 = 0x08;
const FLAG_B: u8 = 0x10;
const FLAG_U: u8 = 0x20;
const FLAG_V: u8 = 0x40;
const FLAG_N: u8 = 0x80;

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

/// Processor status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Status(u8);

impl Status {
    const fn bits(self) -> u8 {
        self.0
    }

    const fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    fn set_nz(&mut self, value: u8) {
        self.set(FLAG_Z, value == 0);
        self.set(FLAG_N, value & 0x80 != 0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
    // Stable unofficial set.
    Lax, Sax, Dcp, Isb, Slo, Rla, Sre, Rra,
    // Everything else: refused with IllegalOpcode.
    Jam,
}

#[derive(Debug, Clone, Copy)]
struct Op {
    mnemonic: Mnemonic,
    mode: Mode,
    cycles: u8,
    /// Reads that pay one extra cycle when indexing crosses a page.
    page_penalty: bool,
}

const fn op(mnemonic: Mnemonic, mode: Mode, cycles: u8) -> Op {
    Op {
        mnemonic,
        mode,
        cycles,
        page_penalty: false,
    }
}

const fn opp(mnemonic: Mnemonic, mode: Mode, cycles: u8) -> Op {
    Op {
        mnemonic,
        mode,
        cycles,
        page_penalty: true,
    }
}

const fn jam() -> Op {
    op(Mnemonic::Jam, Mode::Implied, 2)
}

#[rustfmt::skip]
static OPCODES: [Op; 256] = {
    use Mnemonic::*;
    use Mode::*;
    [
        // 0x00
        op(Brk, Implied, 7),    op(Ora, IndirectX, 6), jam(),                 op(Slo, IndirectX, 8),
        op(Nop, ZeroPage, 3),   op(Ora, ZeroPage, 3),  op(Asl, ZeroPage, 5),  op(Slo, ZeroPage, 5),
        op(Php, Implied, 3),    op(Ora, Immediate, 2), op(Asl, Accumulator, 2), jam(),
        op(Nop, Absolute, 4),   op(Ora, Absolute, 4),  op(Asl, Absolute, 6),  op(Slo, Absolute, 6),
        // 0x10
        op(Bpl, Relative, 2),   opp(Ora, IndirectY, 5), jam(),                op(Slo, IndirectY, 8),
        op(Nop, ZeroPageX, 4),  op(Ora, ZeroPageX, 4), op(Asl, ZeroPageX, 6), op(Slo, ZeroPageX, 6),
        op(Clc, Implied, 2),    opp(Ora, AbsoluteY, 4), op(Nop, Implied, 2),  op(Slo, AbsoluteY, 7),
        opp(Nop, AbsoluteX, 4), opp(Ora, AbsoluteX, 4), op(Asl, AbsoluteX, 7), op(Slo, AbsoluteX, 7),
        // 0x20
        op(Jsr, Absolute, 6),   op(And, IndirectX, 6), jam(),                 op(Rla, IndirectX, 8),
        op(Bit, ZeroPage, 3),   op(And, ZeroPage, 3),  op(Rol, ZeroPage, 5),  op(Rla, ZeroPage, 5),
        op(Plp, Implied, 4),    op(And, Immediate, 2), op(Rol, Accumulator, 2), jam(),
        op(Bit, Absolute, 4),   op(And, Absolute, 4),  op(Rol, Absolute, 6),  op(Rla, Absolute, 6),
        // 0x30
        op(Bmi, Relative, 2),   opp(And, IndirectY, 5), jam(),                op(Rla, IndirectY, 8),
        op(Nop, ZeroPageX, 4),  op(And, ZeroPageX, 4), op(Rol, ZeroPageX, 6), op(Rla, ZeroPageX, 6),
        op(Sec, Implied, 2),    opp(And, AbsoluteY, 4), op(Nop, Implied, 2),  op(Rla, AbsoluteY, 7),
        opp(Nop, AbsoluteX, 4), opp(And, AbsoluteX, 4), op(Rol, AbsoluteX, 7), op(Rla, AbsoluteX, 7),
        // 0x40
        op(Rti, Implied, 6),    op(Eor, IndirectX, 6), jam(),                 op(Sre, IndirectX, 8),
        op(Nop, ZeroPage, 3),   op(Eor, ZeroPage, 3),  op(Lsr, ZeroPage, 5),  op(Sre, ZeroPage, 5),
        op(Pha, Implied, 3),    op(Eor, Immediate, 2), op(Lsr, Accumulator, 2), jam(),
        op(Jmp, Absolute, 3),   op(Eor, Absolute, 4),  op(Lsr, Absolute, 6),  op(Sre, Absolute, 6),
        // 0x50
        op(Bvc, Relative, 2),   opp(Eor, IndirectY, 5), jam(),                op(Sre, IndirectY, 8),
        op(Nop, ZeroPageX, 4),  op(Eor, ZeroPageX, 4), op(Lsr, ZeroPageX, 6), op(Sre, ZeroPageX, 6),
        op(Cli, Implied, 2),    opp(Eor, AbsoluteY, 4), op(Nop, Implied, 2),  op(Sre, AbsoluteY, 7),
        opp(Nop, AbsoluteX, 4), opp(Eor, AbsoluteX, 4), op(Lsr, AbsoluteX, 7), op(Sre, AbsoluteX, 7),
        // 0x60
        op(Rts, Implied, 6),    op(Adc, IndirectX, 6), jam(),                 op(Rra, IndirectX, 8),
        op(Nop, ZeroPage, 3),   op(Adc, ZeroPage, 3),  op(Ror, ZeroPage, 5),  op(Rra, ZeroPage, 5),
        op(Pla, Implied, 4),    op(Adc, Immediate, 2), op(Ror, Accumulator, 2), jam(),
        op(Jmp, Indirect, 5),   op(Adc, Absolute, 4),  op(Ror, Absolute, 6),  op(Rra, Absolute, 6),
        // 0x70
        op(Bvs, Relative, 2),   opp(Adc, IndirectY, 5), jam(),                op(Rra, IndirectY, 8),
        op(Nop, ZeroPageX, 4),  op(Adc, ZeroPageX, 4), op(Ror, ZeroPageX, 6), op(Rra, ZeroPageX, 6),
        op(Sei, Implied, 2),    opp(Adc, AbsoluteY, 4), op(Nop, Implied, 2),  op(Rra, AbsoluteY, 7),
        opp(Nop, AbsoluteX, 4), opp(Adc, AbsoluteX, 4), op(Ror, AbsoluteX, 7), op(Rra, AbsoluteX, 7),
        // 0x80
        op(Nop, Immediate, 2),  op(Sta, IndirectX, 6), op(Nop, Immediate, 2), op(Sax, IndirectX, 6),
        op(Sty, ZeroPage, 3),   op(Sta, ZeroPage, 3),  op(Stx, ZeroPage, 3),  op(Sax, ZeroPage, 3),
        op(Dey, Implied, 2),    op(Nop, Immediate, 2), op(Txa, Implied, 2),   jam(),
        op(Sty, Absolute, 4),   op(Sta, Absolute, 4),  op(Stx, Absolute, 4),  op(Sax, Absolute, 4),
        // 0x90
        op(Bcc, Relative, 2),   op(Sta, IndirectY, 6), jam(),                 jam(),
        op(Sty, ZeroPageX, 4),  op(Sta, ZeroPageX, 4), op(Stx, ZeroPageY, 4), op(Sax, ZeroPageY, 4),
        op(Tya, Implied, 2),    op(Sta, AbsoluteY, 5), op(Txs, Implied, 2),   jam(),
        jam(),                  op(Sta, AbsoluteX, 5), jam(),                 jam(),
        // 0xA0
        op(Ldy, Immediate, 2),  op(Lda, IndirectX, 6), op(Ldx, Immediate, 2), op(Lax, IndirectX, 6),
        op(Ldy, ZeroPage, 3),   op(Lda, ZeroPage, 3),  op(Ldx, ZeroPage, 3),  op(Lax, ZeroPage, 3),
        op(Tay, Implied, 2),    op(Lda, Immediate, 2), op(Tax, Implied, 2),   jam(),
        op(Ldy, Absolute, 4),   op(Lda, Absolute, 4),  op(Ldx, Absolute, 4),  op(Lax, Absolute, 4),
        // 0xB0
        op(Bcs, Relative, 2),   opp(Lda, IndirectY, 5), jam(),                opp(Lax, IndirectY, 5),
        op(Ldy, ZeroPageX, 4),  op(Lda, ZeroPageX, 4), op(Ldx, ZeroPageY, 4), op(Lax, ZeroPageY, 4),
        op(Clv, Implied, 2),    opp(Lda, AbsoluteY, 4), op(Tsx, Implied, 2),  jam(),
        opp(Ldy, AbsoluteX, 4), opp(Lda, AbsoluteX, 4), opp(Ldx, AbsoluteY, 4), opp(Lax, AbsoluteY, 4),
        // 0xC0
        op(Cpy, Immediate, 2),  op(Cmp, IndirectX, 6), op(Nop, Immediate, 2), op(Dcp, IndirectX, 8),
        op(Cpy, ZeroPage, 3),   op(Cmp, ZeroPage, 3),  op(Dec, ZeroPage, 5),  op(Dcp, ZeroPage, 5),
        op(Iny, Implied, 2),    op(Cmp, Immediate, 2), op(Dex, Implied, 2),   jam(),
        op(Cpy, Absolute, 4),   op(Cmp, Absolute, 4),  op(Dec, Absolute, 6),  op(Dcp, Absolute, 6),
        // 0xD0
        op(Bne, Relative, 2),   opp(Cmp, IndirectY, 5), jam(),                op(Dcp, IndirectY, 8),
        op(Nop, ZeroPageX, 4),  op(Cmp, ZeroPageX, 4), op(Dec, ZeroPageX, 6), op(Dcp, ZeroPageX, 6),
        op(Cld, Implied, 2),    opp(Cmp, AbsoluteY, 4), op(Nop, Implied, 2),  op(Dcp, AbsoluteY, 7),
        opp(Nop, AbsoluteX, 4), opp(Cmp, AbsoluteX, 4), op(Dec, AbsoluteX, 7), op(Dcp, AbsoluteX, 7),
        // 0xE0
        op(Cpx, Immediate, 2),  op(Sbc, IndirectX, 6), op(Nop, Immediate, 2), op(Isb, IndirectX, 8),
        op(Cpx, ZeroPage, 3),   op(Sbc, ZeroPage, 3),  op(Inc, ZeroPage, 5),  op(Isb, ZeroPage, 5),
        op(Inx, Implied, 2),    op(Sbc, Immediate, 2), op(Nop, Implied, 2),   op(Sbc, Immediate, 2),
        op(Cpx, Absolute, 4),   op(Sbc, Absolute, 4),  op(Inc, Absolute, 6),  op(Isb, Absolute, 6),
        // 0xF0
        op(Beq, Relative, 2),   opp(Sbc, IndirectY, 5), jam(),                op(Isb, IndirectY, 8),
        op(Nop, ZeroPageX, 4),  op(Sbc, ZeroPageX, 4), op(Inc, ZeroPageX, 6), op(Isb, ZeroPageX, 6),
        op(Sed, Implied, 2),    opp(Sbc, AbsoluteY, 4), op(Nop, Implied, 2),  op(Isb, AbsoluteY, 7),
        opp(Nop, AbsoluteX, 4), opp(Sbc, AbsoluteX, 4), op(Inc, AbsoluteX, 7), op(Isb, AbsoluteX, 7),
    ]
};

pub(crate) struct Cpu {
    pc: u16,
    sp: u8,
    a: u8,
    x: u8,
    y: u8,
    p: Status,
    /// Monotonic CPU cycle counter; resets only with reset/ROM load.
    cycles: u64,
    pub(crate) bus: Bus,
}

impl Cpu {
    pub(crate) fn new() -> Self {
        Self {
            pc: 0,
            sp: 0,
            a: 0,
            x: 0,
            y: 0,
            p: Status(0),
            cycles: 0,
            bus: Bus::new(),
        }
    }

    /// Power-on sequence: registers to documented defaults, APU register
    /// block cleared, then the reset vector.
    pub(crate) fn power_up(&mut self) {
        self.p = Status(0x34);
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0xFD;

        for address in 0x4000..=0x400F {
            self.bus.write(address, 0);
        }
        self.bus.write(0x4015, 0);
        self.bus.write(0x4017, 0);

        self.pc = self.read_word(RESET_VECTOR);
        self.cycles = 7;
    }

    /// The RES line: stack pointer slips by three, interrupts masked,
    /// execution re-vectors. PPU/APU are reset by the machine wrapper.
    pub(crate) fn reset(&mut self) {
        self.sp = self.sp.wrapping_sub(3);
        self.p.set(FLAG_I, true);
        self.pc = self.read_word(RESET_VECTOR);
        self.cycles = 7;
    }

    #[must_use]
    pub(crate) const fn pc(&self) -> u16 {
        self.pc
    }

    #[must_use]
    pub(crate) const fn cycles(&self) -> u64 {
        self.cycles
    }

    #[must_use]
    pub(crate) const fn registers(&self) -> (u8, u8, u8, u8, u8) {
        (self.a, self.x, self.y, self.sp, self.p.bits())
    }

    /// Run one instruction (servicing a pending interrupt first) and
    /// advance the PPU/APU by the elapsed cycles.
    pub(crate) fn step_instruction(&mut self) -> Result<u16, EmuError> {
        let mut cycles: u16 = 0;

        // Interrupt lines are sampled only at instruction boundaries.
        if self.bus.ppu.take_nmi() {
            self.enter_interrupt(NMI_VECTOR);
            cycles += 7;
        } else if !self.p.has(FLAG_I)
            && (self.bus.apu.irq_asserted() || self.bus.mapper_irq_asserted())
        {
            self.bus.ack_mapper_irq();
            self.enter_interrupt(IRQ_VECTOR);
            cycles += 7;
        }

        let pc = self.pc;
        let opcode = self.bus.read(pc);
        self.pc = pc.wrapping_add(1);
        let operation = OPCODES[usize::from(opcode)];

        if operation.mnemonic == Mnemonic::Jam {
            self.pc = pc;
            tracing::debug!(opcode, pc, "refusing undefined opcode");
            return Err(EmuError::IllegalOpcode { opcode, pc });
        }

        cycles += u16::from(operation.cycles);
        cycles += self.execute(operation);
        cycles += self.bus.take_stall();
        self.bus.tick(cycles);

        self.cycles = self
            .cycles
            .checked_add(u64::from(cycles))
            .expect("CPU cycle counter overflow");
        Ok(cycles)
    }

    // ---- memory helpers ----

    fn read_word(&mut self, address: u16) -> u16 {
        let low = u16::from(self.bus.read(address));
        let high = u16::from(self.bus.read(address.wrapping_add(1)));
        (high << 8) | low
    }

    /// 16-bit read that wraps within the zero page.
    fn read_word_zp(&mut self, address: u8) -> u16 {
        let low = u16::from(self.bus.read(u16::from(address)));
        let high = u16::from(self.bus.read(u16::from(address.wrapping_add(1))));
        (high << 8) | low
    }

    /// 16-bit read that wraps within the page (the JMP ($xxFF) quirk).
    fn read_word_in_page(&mut self, address: u16) -> u16 {
        let low = u16::from(self.bus.read(address));
        let high_addr = (address & 0xFF00) | (address.wrapping_add(1) & 0x00FF);
        let high = u16::from(self.bus.read(high_addr));
        (high << 8) | low
    }

    fn fetch(&mut self) -> u8 {
        let value = self.bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch_word(&mut self) -> u16 {
        let low = u16::from(self.fetch());
        let high = u16::from(self.fetch());
        (high << 8) | low
    }

    /// Resolve the effective address; the bool reports a page crossing for
    /// the indexed modes.
    fn operand_address(&mut self, mode: Mode) -> (u16, bool) {
        match mode {
            Mode::Immediate => {
                let address = self.pc;
                self.pc = self.pc.wrapping_add(1);
                (address, false)
            }
            Mode::ZeroPage => (u16::from(self.fetch()), false),
            Mode::ZeroPageX => (u16::from(self.fetch().wrapping_add(self.x)), false),
            Mode::ZeroPageY => (u16::from(self.fetch().wrapping_add(self.y)), false),
            Mode::Absolute => (self.fetch_word(), false),
            Mode::AbsoluteX => {
                let base = self.fetch_word();
                let address = base.wrapping_add(u16::from(self.x));
                (address, page_crossed(base, address))
            }
            Mode::AbsoluteY => {
                let base = self.fetch_word();
                let address = base.wrapping_add(u16::from(self.y));
                (address, page_crossed(base, address))
            }
            Mode::Indirect => {
                let pointer = self.fetch_word();
                (self.read_word_in_page(pointer), false)
            }
            Mode::IndirectX => {
                let pointer = self.fetch().wrapping_add(self.x);
                (self.read_word_zp(pointer), false)
            }
            Mode::IndirectY => {
                let pointer = self.fetch();
                let base = self.read_word_zp(pointer);
                let address = base.wrapping_add(u16::from(self.y));
                (address, page_crossed(base, address))
            }
            // Implied/Accumulator/Relative operands never come through
            // here; the arms exist to keep the resolver total.
            Mode::Implied | Mode::Accumulator | Mode::Relative => (self.pc, false),
        }
    }

    fn load_operand(&mut self, operation: Op) -> (u8, u16) {
        if operation.mode == Mode::Accumulator {
            return (self.a, 0);
        }
        let (address, crossed) = self.operand_address(operation.mode);
        let value = self.bus.read(address);
        let extra = u16::from(crossed && operation.page_penalty);
        (value, extra)
    }

    // ---- stack ----

    fn push(&mut self, value: u8) {
        self.bus.write(0x0100 + u16::from(self.sp), value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn push_word(&mut self, value: u16) {
        self.push((value >> 8) as u8);
        self.push(value as u8);
    }

    fn pop(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        self.bus.read(0x0100 + u16::from(self.sp))
    }

    fn pop_word(&mut self) -> u16 {
        let low = u16::from(self.pop());
        let high = u16::from(self.pop());
        (high << 8) | low
    }

    // ---- interrupts ----

    fn enter_interrupt(&mut self, vector: u16) {
        self.push_word(self.pc);
        self.push((self.p.bits() | FLAG_U) & !FLAG_B);
        self.p.set(FLAG_I, true);
        self.pc = self.read_word(vector);
    }

    // ---- arithmetic helpers ----

    fn adc(&mut self, value: u8) {
        let carry = u16::from(self.p.has(FLAG_C));
        let sum = u16::from(self.a) + u16::from(value) + carry;
        let result = sum as u8;
        self.p.set(FLAG_C, sum > 0xFF);
        self.p
            .set(FLAG_V, (!(self.a ^ value) & (self.a ^ result) & 0x80) != 0);
        self.a = result;
        self.p.set_nz(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.p.set(FLAG_C, register >= value);
        self.p.set_nz(result);
    }

    fn asl_value(&mut self, value: u8) -> u8 {
        self.p.set(FLAG_C, value & 0x80 != 0);
        let result = value << 1;
        self.p.set_nz(result);
        result
    }

    fn lsr_value(&mut self, value: u8) -> u8 {
        self.p.set(FLAG_C, value & 0x01 != 0);
        let result = value >> 1;
        self.p.set_nz(result);
        result
    }

    fn rol_value(&mut self, value: u8) -> u8 {
        let carry_in = u8::from(self.p.has(FLAG_C));
        self.p.set(FLAG_C, value & 0x80 != 0);
        let result = (value << 1) | carry_in;
        self.p.set_nz(result);
        result
    }

    fn ror_value(&mut self, value: u8) -> u8 {
        let carry_in = u8::from(self.p.has(FLAG_C)) << 7;
        self.p.set(FLAG_C, value & 0x01 != 0);
        let result = (value >> 1) | carry_in;
        self.p.set_nz(result);
        result
    }

    /// Read-modify-write through the resolved address; returns the new
    /// value for the combined unofficial forms.
    fn rmw(&mut self, operation: Op, f: fn(&mut Self, u8) -> u8) -> u8 {
        if operation.mode == Mode::Accumulator {
            let result = f(self, self.a);
            self.a = result;
            return result;
        }
        let (address, _) = self.operand_address(operation.mode);
        let value = self.bus.read(address);
        let result = f(self, value);
        self.bus.write(address, result);
        result
    }

    fn branch(&mut self, taken: bool) -> u16 {
        let offset = self.fetch() as i8;
        if !taken {
            return 0;
        }
        let old = self.pc;
        self.pc = old.wrapping_add(offset as u16);
        1 + u16::from(page_crossed(old, self.pc))
    }

    // ---- dispatch ----

    fn execute(&mut self, operation: Op) -> u16 {
        use Mnemonic::*;

        let mut extra = 0;
        match operation.mnemonic {
            Adc => {
                let (value, e) = self.load_operand(operation);
                self.adc(value);
                extra = e;
            }
            Sbc => {
                let (value, e) = self.load_operand(operation);
                self.adc(!value);
                extra = e;
            }
            And => {
                let (value, e) = self.load_operand(operation);
                self.a &= value;
                self.p.set_nz(self.a);
                extra = e;
            }
            Ora => {
                let (value, e) = self.load_operand(operation);
                self.a |= value;
                self.p.set_nz(self.a);
                extra = e;
            }
            Eor => {
                let (value, e) = self.load_operand(operation);
                self.a ^= value;
                self.p.set_nz(self.a);
                extra = e;
            }
            Bit => {
                let (value, _) = self.load_operand(operation);
                self.p.set(FLAG_Z, self.a & value == 0);
                self.p.set(FLAG_V, value & 0x40 != 0);
                self.p.set(FLAG_N, value & 0x80 != 0);
            }
            Cmp => {
                let (value, e) = self.load_operand(operation);
                self.compare(self.a, value);
                extra = e;
            }
            Cpx => {
                let (value, _) = self.load_operand(operation);
                self.compare(self.x, value);
            }
            Cpy => {
                let (value, _) = self.load_operand(operation);
                self.compare(self.y, value);
            }
            Lda => {
                let (value, e) = self.load_operand(operation);
                self.a = value;
                self.p.set_nz(value);
                extra = e;
            }
            Ldx => {
                let (value, e) = self.load_operand(operation);
                self.x = value;
                self.p.set_nz(value);
                extra = e;
            }
            Ldy => {
                let (value, e) = self.load_operand(operation);
                self.y = value;
                self.p.set_nz(value);
                extra = e;
            }
            Lax => {
                let (value, e) = self.load_operand(operation);
                self.a = value;
                self.x = value;
                self.p.set_nz(value);
                extra = e;
            }
            Sta => {
                let (address, _) = self.operand_address(operation.mode);
                self.bus.write(address, self.a);
            }
            Stx => {
                let (address, _) = self.operand_address(operation.mode);
                self.bus.write(address, self.x);
            }
            Sty => {
                let (address, _) = self.operand_address(operation.mode);
                self.bus.write(address, self.y);
            }
            Sax => {
                let (address, _) = self.operand_address(operation.mode);
                self.bus.write(address, self.a & self.x);
            }
            Asl => {
                self.rmw(operation, Self::asl_value);
            }
            Lsr => {
                self.rmw(operation, Self::lsr_value);
            }
            Rol => {
                self.rmw(operation, Self::rol_value);
            }
            Ror => {
                self.rmw(operation, Self::ror_value);
            }
            Inc => {
                self.rmw(operation, |cpu, v| {
                    let result = v.wrapping_add(1);
                    cpu.p.set_nz(result);
                    result
                });
            }
            Dec => {
                self.rmw(operation, |cpu, v| {
                    let result = v.wrapping_sub(1);
                    cpu.p.set_nz(result);
                    result
                });
            }
            Slo => {
                let result = self.rmw(operation, Self::asl_value);
                self.a |= result;
                self.p.set_nz(self.a);
            }
            Rla => {
                let result = self.rmw(operation, Self::rol_value);
                self.a &= result;
                self.p.set_nz(self.a);
            }
            Sre => {
                let result = self.rmw(operation, Self::lsr_value);
                self.a ^= result;
                self.p.set_nz(self.a);
            }
            Rra => {
                let result = self.rmw(operation, Self::ror_value);
                self.adc(result);
            }
            Dcp => {
                let result = self.rmw(operation, |cpu, v| {
                    let result = v.wrapping_sub(1);
                    cpu.p.set_nz(result);
                    result
                });
                self.compare(self.a, result);
            }
            Isb => {
                let result = self.rmw(operation, |cpu, v| {
                    let result = v.wrapping_add(1);
                    cpu.p.set_nz(result);
                    result
                });
                self.adc(!result);
            }
            Inx => {
                self.x = self.x.wrapping_add(1);
                self.p.set_nz(self.x);
            }
            Iny => {
                self.y = self.y.wrapping_add(1);
                self.p.set_nz(self.y);
            }
            Dex => {
                self.x = self.x.wrapping_sub(1);
                self.p.set_nz(self.x);
            }
            Dey => {
                self.y = self.y.wrapping_sub(1);
                self.p.set_nz(self.y);
            }
            Tax => {
                self.x = self.a;
                self.p.set_nz(self.x);
            }
            Tay => {
                self.y = self.a;
                self.p.set_nz(self.y);
            }
            Txa => {
                self.a = self.x;
                self.p.set_nz(self.a);
            }
            Tya => {
                self.a = self.y;
                self.p.set_nz(self.a);
            }
            Tsx => {
                self.x = self.sp;
                self.p.set_nz(self.x);
            }
            Txs => self.sp = self.x,
            Pha => self.push(self.a),
            Php => self.push(self.p.bits() | FLAG_B | FLAG_U),
            Pla => {
                self.a = self.pop();
                self.p.set_nz(self.a);
            }
            Plp => {
                let value = self.pop();
                self.p = Status((value & !FLAG_B) | FLAG_U);
            }
            Jmp => {
                let (address, _) = self.operand_address(operation.mode);
                self.pc = address;
            }
            Jsr => {
                let (address, _) = self.operand_address(operation.mode);
                self.push_word(self.pc.wrapping_sub(1));
                self.pc = address;
            }
            Rts => self.pc = self.pop_word().wrapping_add(1),
            Rti => {
                let value = self.pop();
                self.p = Status((value & !FLAG_B) | FLAG_U);
                self.pc = self.pop_word();
            }
            Brk => {
                // The byte after BRK is padding; the pushed address skips it.
                self.pc = self.pc.wrapping_add(1);
                self.push_word(self.pc);
                self.push(self.p.bits() | FLAG_B | FLAG_U);
                self.p.set(FLAG_I, true);
                self.pc = self.read_word(IRQ_VECTOR);
            }
            Bcc => extra = self.branch(!self.p.has(FLAG_C)),
            Bcs => extra = self.branch(self.p.has(FLAG_C)),
            Bne => extra = self.branch(!self.p.has(FLAG_Z)),
            Beq => extra = self.branch(self.p.has(FLAG_Z)),
            Bpl => extra = self.branch(!self.p.has(FLAG_N)),
            Bmi => extra = self.branch(self.p.has(FLAG_N)),
            Bvc => extra = self.branch(!self.p.has(FLAG_V)),
            Bvs => extra = self.branch(self.p.has(FLAG_V)),
            Clc => self.p.set(FLAG_C, false),
            Sec => self.p.set(FLAG_C, true),
            Cli => self.p.set(FLAG_I, false),
            Sei => self.p.set(FLAG_I, true),
            Clv => self.p.set(FLAG_V, false),
            Cld => self.p.set(FLAG_D, false),
            Sed => self.p.set(FLAG_D, true),
            Nop => {
                // Multi-byte NOPs still consume (and read) their operand.
                if !matches!(operation.mode, Mode::Implied) {
                    let (_, e) = self.load_operand(operation);
                    extra = e;
                }
            }
            Jam => unreachable!("jam opcodes are rejected before dispatch"),
        }
        extra
    }

    // ---- state capture ----

    pub(crate) fn state(&self) -> crate::save_state::CpuState {
        let (stall, mapper_irq) = self.bus.stall_state();
        crate::save_state::CpuState {
            pc: self.pc,
            sp: self.sp,
            a: self.a,
            x: self.x,
            y: self.y,
            p: self.p.bits(),
            cycles: self.cycles,
            ram: self.bus.ram_bytes(),
            stall,
            mapper_irq,
        }
    }

    pub(crate) fn restore(&mut self, state: &crate::save_state::CpuState) {
        self.pc = state.pc;
        self.sp = state.sp;
        self.a = state.a;
        self.x = state.x;
        self.y = state.y;
        self.p = Status(state.p);
        self.cycles = state.cycles;
        self.bus.restore_ram(&state.ram);
        self.bus.restore_stall_state(state.stall, state.mapper_irq);
    }
}

const fn page_crossed(a: u16, b: u16) -> bool {
    a & 0xFF00 != b & 0xFF00
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cartridge::Cartridge;

    /// NROM cartridge with `program` at $8000 and the reset vector
    /// pointing there.
    fn cpu_with_program(program: &[u8]) -> Cpu {
        let mut prg = vec![0_u8; 16 * 1024];
        prg[..program.len()].copy_from_slice(program);
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;

        let mut data = vec![0_u8; 16];
        data[0..4].copy_from_slice(b"NES\x1A");
        data[4] = 1;
        data[5] = 1;
        data.extend_from_slice(&prg);
        data.extend_from_slice(&[0; 8 * 1024]);

        let mut cpu = Cpu::new();
        cpu.bus.cartridge = Some(Cartridge::load(&data).unwrap());
        cpu.power_up();
        cpu
    }

    #[test]
    fn power_up_state_matches_console_defaults() {
        let cpu = cpu_with_program(&[0xEA]);
        let (a, x, y, sp, p) = cpu.registers();
        assert_eq!((a, x, y), (0, 0, 0));
        assert_eq!(sp, 0xFD);
        assert_eq!(p, 0x34);
        assert_eq!(cpu.pc(), 0x8000);
    }

    #[test]
    fn lda_immediate_sets_flags() {
        let mut cpu = cpu_with_program(&[0xA9, 0x00, 0xA9, 0x80]);
        cpu.step_instruction().unwrap();
        assert!(cpu.p.has(FLAG_Z));
        cpu.step_instruction().unwrap();
        assert!(cpu.p.has(FLAG_N));
        assert_eq!(cpu.a, 0x80);
    }

    #[test]
    fn adc_reports_carry_and_overflow() {
        // LDA #$7F; ADC #$01 -> 0x80, V set, C clear.
        let mut cpu = cpu_with_program(&[0xA9, 0x7F, 0x69, 0x01]);
        cpu.step_instruction().unwrap();
        cpu.step_instruction().unwrap();
        assert_eq!(cpu.a, 0x80);
        assert!(cpu.p.has(FLAG_V));
        assert!(!cpu.p.has(FLAG_C));

        // LDA #$FF; ADC #$01 -> 0x00, C set, Z set, V clear.
        let mut cpu = cpu_with_program(&[0xA9, 0xFF, 0x69, 0x01]);
        cpu.step_instruction().unwrap();
        cpu.step_instruction().unwrap();
        assert_eq!(cpu.a, 0x00);
        assert!(cpu.p.has(FLAG_C));
        assert!(cpu.p.has(FLAG_Z));
        assert!(!cpu.p.has(FLAG_V));
    }

    #[test]
    fn sbc_borrows_through_carry() {
        // SEC; LDA #$10; SBC #$01 -> 0x0F with carry still set.
        let mut cpu = cpu_with_program(&[0x38, 0xA9, 0x10, 0xE9, 0x01]);
        for _ in 0..3 {
            cpu.step_instruction().unwrap();
        }
        assert_eq!(cpu.a, 0x0F);
        assert!(cpu.p.has(FLAG_C));
    }

    #[test]
    fn stack_round_trip() {
        // LDA #$42; PHA; LDA #$00; PLA.
        let mut cpu = cpu_with_program(&[0xA9, 0x42, 0x48, 0xA9, 0x00, 0x68]);
        for _ in 0..4 {
            cpu.step_instruction().unwrap();
        }
        assert_eq!(cpu.a, 0x42);
        assert_eq!(cpu.sp, 0xFD);
    }

    #[test]
    fn jsr_rts_round_trip() {
        // JSR $8005; NOP(pad); NOP; target: RTS at $8005.
        let mut cpu = cpu_with_program(&[0x20, 0x05, 0x80, 0xEA, 0xEA, 0x60]);
        cpu.step_instruction().unwrap();
        assert_eq!(cpu.pc(), 0x8005);
        cpu.step_instruction().unwrap();
        assert_eq!(cpu.pc(), 0x8003);
    }

    #[test]
    fn branch_timing_accounts_for_taken_and_page_cross() {
        // BNE +0x10 with Z clear: 2 base + 1 taken.
        let mut cpu = cpu_with_program(&[0xA9, 0x01, 0xD0, 0x10]);
        cpu.step_instruction().unwrap();
        let cycles = cpu.step_instruction().unwrap();
        assert_eq!(cycles, 3);

        // BEQ not taken: exactly 2.
        let mut cpu = cpu_with_program(&[0xA9, 0x01, 0xF0, 0x10]);
        cpu.step_instruction().unwrap();
        let cycles = cpu.step_instruction().unwrap();
        assert_eq!(cycles, 2);
    }

    #[test]
    fn absolute_x_read_pays_page_cross_penalty() {
        // LDX #$01; LDA $80FF,X crosses into $8100.
        let mut cpu = cpu_with_program(&[0xA2, 0x01, 0xBD, 0xFF, 0x80]);
        cpu.step_instruction().unwrap();
        let cycles = cpu.step_instruction().unwrap();
        assert_eq!(cycles, 5);

        // Same read without crossing costs 4.
        let mut cpu = cpu_with_program(&[0xA2, 0x01, 0xBD, 0x00, 0x80]);
        cpu.step_instruction().unwrap();
        let cycles = cpu.step_instruction().unwrap();
        assert_eq!(cycles, 4);
    }

    #[test]
    fn jmp_indirect_wraps_within_page() {
        // Pointer at $02FF: low byte from $02FF, high byte from $0200.
        let mut cpu = cpu_with_program(&[0x6C, 0xFF, 0x02]);
        cpu.bus.write(0x02FF, 0x34);
        cpu.bus.write(0x0200, 0x12);
        cpu.bus.write(0x0300, 0x99); // must NOT be used
        cpu.step_instruction().unwrap();
        assert_eq!(cpu.pc(), 0x1234);
    }

    #[test]
    fn stable_unofficial_lax_loads_both_registers() {
        let mut cpu = cpu_with_program(&[0xA7, 0x10]);
        cpu.bus.write(0x0010, 0x5A);
        cpu.step_instruction().unwrap();
        assert_eq!(cpu.a, 0x5A);
        assert_eq!(cpu.x, 0x5A);
    }

    #[test]
    fn jam_opcode_reports_illegal_and_rewinds() {
        let mut cpu = cpu_with_program(&[0x02]);
        let err = cpu.step_instruction().unwrap_err();
        assert!(matches!(
            err,
            EmuError::IllegalOpcode {
                opcode: 0x02,
                pc: 0x8000
            }
        ));
        // PC stays on the offending opcode.
        assert_eq!(cpu.pc(), 0x8000);
    }

    #[test]
    fn irq_respects_interrupt_disable_flag() {
        // Program: CLI; NOP; NOP ... with IRQ vector at $8010.
        let mut program = vec![0x58, 0xEA, 0xEA, 0xEA];
        program.resize(0x10, 0xEA);
        program.push(0xEA); // $8010: NOP (IRQ handler)
        let mut cpu = cpu_with_program(&program);
        // IRQ vector -> $8010.
        let data_fix = {
            let mut prg = vec![0_u8; 16 * 1024];
            prg[..program.len()].copy_from_slice(&program);
            prg[0x3FFC] = 0x00;
            prg[0x3FFD] = 0x80;
            prg[0x3FFE] = 0x10;
            prg[0x3FFF] = 0x80;
            let mut data = vec![0_u8; 16];
            data[0..4].copy_from_slice(b"NES\x1A");
            data[4] = 1;
            data[5] = 1;
            data.extend_from_slice(&prg);
            data.extend_from_slice(&[0; 8 * 1024]);
            data
        };
        cpu.bus.cartridge = Some(Cartridge::load(&data_fix).unwrap());
        cpu.power_up();

        // I is set at power-on: a pending mapper IRQ is held off.
        cpu.bus.restore_stall_state(0, true);
        cpu.step_instruction().unwrap(); // CLI
        cpu.step_instruction().unwrap(); // IRQ serviced before this one
        assert_eq!(cpu.pc(), 0x8011);
        assert!(cpu.p.has(FLAG_I));
    }

    #[test]
    fn brk_vectors_and_sets_break_on_stack() {
        let mut program = vec![0x00, 0xFF]; // BRK + padding
        program.resize(0x20, 0xEA);
        let mut prg = vec![0_u8; 16 * 1024];
        prg[..program.len()].copy_from_slice(&program);
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;
        prg[0x3FFE] = 0x08;
        prg[0x3FFF] = 0x80;
        let mut data = vec![0_u8; 16];
        data[0..4].copy_from_slice(b"NES\x1A");
        data[4] = 1;
        data[5] = 1;
        data.extend_from_slice(&prg);
        data.extend_from_slice(&[0; 8 * 1024]);

        let mut cpu = Cpu::new();
        cpu.bus.cartridge = Some(Cartridge::load(&data).unwrap());
        cpu.power_up();

        cpu.step_instruction().unwrap();
        assert_eq!(cpu.pc(), 0x8008);
        // Pushed status has B and U set.
        let pushed = cpu.bus.read(0x0100 + u16::from(cpu.sp.wrapping_add(1)));
        assert_eq!(pushed & (FLAG_B | FLAG_U), FLAG_B | FLAG_U);
    }
}
