//! Audio processing unit.
//!
//! Five channels (two pulses, triangle, noise, DMC) clocked from the CPU
//! cycle stream, sequenced by the $4017 frame counter and mixed with the
//! console's non-linear formula into normalized `f32` samples at a fixed
//! 44.1kHz target rate.
//!
//! Sample delivery policy: samples accumulate in a bounded one-second
//! queue; when the queue is full the oldest samples are dropped, and
//! [`Apu::drain_samples`] hands out at most the caller's capacity, keeping
//! the remainder for the next drain. One policy, applied everywhere.

use std::collections::VecDeque;

/// Output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 44_100;
/// NTSC CPU clock in Hz; the sample accumulator divides this down.
pub const CPU_CLOCK: u32 = 1_789_773;

/// Bounded queue holding at most one second of audio.
const SAMPLE_QUEUE_LIMIT: usize = SAMPLE_RATE as usize;

const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14,
    12, 16, 24, 18, 48, 20, 96, 22, 192, 24, 72, 26, 16, 28, 32, 30,
];

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

/// Noise timer periods in CPU cycles.
const NOISE_PERIODS: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

/// DMC timer periods in CPU cycles.
const DMC_PERIODS: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

// Frame counter sequence points, in CPU cycles from the last reset.
const FRAME_QUARTER: [u32; 4] = [7_457, 14_913, 22_371, 29_829];
const FRAME_STEP5_EXTRA: u32 = 37_281;
const FRAME_PERIOD_4STEP: u32 = 29_830;
const FRAME_PERIOD_5STEP: u32 = 37_282;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Envelope {
    start: bool,
    divider: u8,
    decay: u8,
    period: u8,
    looped: bool,
    constant: bool,
}

impl Envelope {
    fn clock(&mut self) {
        if self.start {
            self.start = false;
            self.decay = 15;
            self.divider = self.period;
        } else if self.divider == 0 {
            self.divider = self.period;
            if self.decay > 0 {
                self.decay -= 1;
            } else if self.looped {
                self.decay = 15;
            }
        } else {
            self.divider -= 1;
        }
    }

    fn volume(&self) -> u8 {
        if self.constant { self.period } else { self.decay }
    }
}

#[derive(Debug, Default)]
struct Pulse {
    /// Pulse 2's sweep negation is one's-complement rather than two's.
    second: bool,
    enabled: bool,
    duty: u8,
    duty_step: u8,
    length_halt: bool,
    length: u8,
    envelope: Envelope,
    sweep_enabled: bool,
    sweep_period: u8,
    sweep_negate: bool,
    sweep_shift: u8,
    sweep_reload: bool,
    sweep_divider: u8,
    timer_period: u16,
    timer: u16,
}

impl Pulse {
    fn write_control(&mut self, value: u8) {
        self.duty = value >> 6;
        self.length_halt = value & 0x20 != 0;
        self.envelope.looped = value & 0x20 != 0;
        self.envelope.constant = value & 0x10 != 0;
        self.envelope.period = value & 0x0F;
    }

    fn write_sweep(&mut self, value: u8) {
        self.sweep_enabled = value & 0x80 != 0;
        self.sweep_period = (value >> 4) & 0x07;
        self.sweep_negate = value & 0x08 != 0;
        self.sweep_shift = value & 0x07;
        self.sweep_reload = true;
    }

    fn write_timer_low(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0xFF00) | u16::from(value);
    }

    fn write_timer_high(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | (u16::from(value & 0x07) << 8);
        if self.enabled {
            self.length = LENGTH_TABLE[usize::from(value >> 3)];
        }
        self.duty_step = 0;
        self.envelope.start = true;
    }

    /// Clocked every other CPU cycle.
    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            self.duty_step = (self.duty_step + 1) % 8;
        } else {
            self.timer -= 1;
        }
    }

    fn clock_length(&mut self) {
        if !self.length_halt && self.length > 0 {
            self.length -= 1;
        }
    }

    fn sweep_target(&self) -> u16 {
        let change = self.timer_period >> self.sweep_shift;
        if self.sweep_negate {
            let change = if self.second { change } else { change + 1 };
            self.timer_period.wrapping_sub(change)
        } else {
            self.timer_period + change
        }
    }

    fn clock_sweep(&mut self) {
        let target = self.sweep_target();
        if self.sweep_divider == 0
            && self.sweep_enabled
            && self.sweep_shift > 0
            && self.timer_period >= 8
            && target <= 0x7FF
        {
            self.timer_period = target;
        }
        if self.sweep_divider == 0 || self.sweep_reload {
            self.sweep_divider = self.sweep_period;
            self.sweep_reload = false;
        } else {
            self.sweep_divider -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled
            || self.length == 0
            || self.timer_period < 8
            || self.sweep_target() > 0x7FF
            || DUTY_TABLE[usize::from(self.duty)][usize::from(self.duty_step)] == 0
        {
            return 0;
        }
        self.envelope.volume()
    }
}

#[derive(Debug, Default)]
struct Triangle {
    enabled: bool,
    control: bool,
    linear_period: u8,
    linear: u8,
    linear_reload: bool,
    length: u8,
    timer_period: u16,
    timer: u16,
    step: u8,
}

impl Triangle {
    fn write_control(&mut self, value: u8) {
        self.control = value & 0x80 != 0;
        self.linear_period = value & 0x7F;
    }

    fn write_timer_low(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0xFF00) | u16::from(value);
    }

    fn write_timer_high(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | (u16::from(value & 0x07) << 8);
        if self.enabled {
            self.length = LENGTH_TABLE[usize::from(value >> 3)];
        }
        self.linear_reload = true;
    }

    /// Clocked every CPU cycle.
    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            if self.length > 0 && self.linear > 0 {
                self.step = (self.step + 1) % 32;
            }
        } else {
            self.timer -= 1;
        }
    }

    fn clock_linear(&mut self) {
        if self.linear_reload {
            self.linear = self.linear_period;
        } else if self.linear > 0 {
            self.linear -= 1;
        }
        if !self.control {
            self.linear_reload = false;
        }
    }

    fn clock_length(&mut self) {
        if !self.control && self.length > 0 {
            self.length -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length == 0 || self.linear == 0 {
            return 0;
        }
        if self.step < 16 { 15 - self.step } else { self.step - 16 }
    }
}

#[derive(Debug)]
struct Noise {
    enabled: bool,
    length_halt: bool,
    length: u8,
    envelope: Envelope,
    mode: bool,
    timer_period: u16,
    timer: u16,
    shift: u16,
}

impl Default for Noise {
    fn default() -> Self {
        Self {
            enabled: false,
            length_halt: false,
            length: 0,
            envelope: Envelope::default(),
            mode: false,
            timer_period: NOISE_PERIODS[0],
            timer: 0,
            shift: 1,
        }
    }
}

impl Noise {
    fn write_control(&mut self, value: u8) {
        self.length_halt = value & 0x20 != 0;
        self.envelope.looped = value & 0x20 != 0;
        self.envelope.constant = value & 0x10 != 0;
        self.envelope.period = value & 0x0F;
    }

    fn write_mode(&mut self, value: u8) {
        self.mode = value & 0x80 != 0;
        self.timer_period = NOISE_PERIODS[usize::from(value & 0x0F)];
    }

    fn write_length(&mut self, value: u8) {
        if self.enabled {
            self.length = LENGTH_TABLE[usize::from(value >> 3)];
        }
        self.envelope.start = true;
    }

    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            let tap = if self.mode { 6 } else { 1 };
            let feedback = (self.shift ^ (self.shift >> tap)) & 1;
            self.shift = (self.shift >> 1) | (feedback << 14);
        } else {
            self.timer -= 1;
        }
    }

    fn clock_length(&mut self) {
        if !self.length_halt && self.length > 0 {
            self.length -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length == 0 || self.shift & 1 != 0 {
            return 0;
        }
        self.envelope.volume()
    }
}

#[derive(Debug, Default)]
struct Dmc {
    enabled: bool,
    irq_enabled: bool,
    looped: bool,
    timer_period: u16,
    timer: u16,
    output: u8,
    sample_address: u16,
    sample_length: u16,
    current_address: u16,
    bytes_remaining: u16,
    shift: u8,
    bits_remaining: u8,
    silence: bool,
    buffer: u8,
    buffer_empty: bool,
}

impl Dmc {
    fn write_control(&mut self, value: u8) {
        self.irq_enabled = value & 0x80 != 0;
        self.looped = value & 0x40 != 0;
        self.timer_period = DMC_PERIODS[usize::from(value & 0x0F)];
    }

    fn write_output(&mut self, value: u8) {
        self.output = value & 0x7F;
    }

    fn write_address(&mut self, value: u8) {
        self.sample_address = 0xC000 | (u16::from(value) << 6);
    }

    fn write_length(&mut self, value: u8) {
        self.sample_length = (u16::from(value) << 4) | 1;
    }

    fn restart(&mut self) {
        self.current_address = self.sample_address;
        self.bytes_remaining = self.sample_length;
    }

    /// True when the unit needs a byte fetched over the CPU bus.
    fn wants_sample(&self) -> bool {
        self.buffer_empty && self.bytes_remaining > 0
    }

    /// Supply the fetched byte; returns true when the sample just ended
    /// with IRQ enabled.
    fn supply_sample(&mut self, value: u8) -> bool {
        self.buffer = value;
        self.buffer_empty = false;
        self.current_address = self.current_address.checked_add(1).unwrap_or(0x8000);
        self.bytes_remaining -= 1;
        if self.bytes_remaining == 0 {
            if self.looped {
                self.restart();
            } else if self.irq_enabled {
                return true;
            }
        }
        false
    }

    fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
            return;
        }
        self.timer = self.timer_period.saturating_sub(1);

        if !self.silence {
            if self.shift & 1 != 0 {
                if self.output <= 125 {
                    self.output += 2;
                }
            } else if self.output >= 2 {
                self.output -= 2;
            }
        }
        self.shift >>= 1;

        if self.bits_remaining > 0 {
            self.bits_remaining -= 1;
        }
        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            if self.buffer_empty {
                self.silence = true;
            } else {
                self.silence = false;
                self.shift = self.buffer;
                self.buffer_empty = true;
            }
        }
    }
}

pub(crate) struct Apu {
    pulse1: Pulse,
    pulse2: Pulse,
    triangle: Triangle,
    noise: Noise,
    dmc: Dmc,

    /// CPU cycles since power-on, drives timer parity.
    cycle: u64,
    /// CPU cycles since the frame counter was last reset.
    frame_cycle: u32,
    five_step: bool,
    irq_inhibit: bool,
    frame_irq: bool,
    dmc_irq: bool,

    /// Fixed-point remainder of the CPU-clock to sample-rate division.
    sample_accumulator: u32,
    samples: VecDeque<f32>,
}

impl Apu {
    pub(crate) fn new() -> Self {
        Self {
            pulse1: Pulse::default(),
            pulse2: Pulse {
                second: true,
                ..Pulse::default()
            },
            triangle: Triangle::default(),
            noise: Noise::default(),
            dmc: Dmc::default(),
            cycle: 0,
            frame_cycle: 0,
            five_step: false,
            irq_inhibit: false,
            frame_irq: false,
            dmc_irq: false,
            sample_accumulator: 0,
            samples: VecDeque::with_capacity(SAMPLE_QUEUE_LIMIT),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Level-triggered IRQ line (frame counter or DMC).
    pub(crate) fn irq_asserted(&self) -> bool {
        self.frame_irq || self.dmc_irq
    }

    /// Parity of the CPU cycle stream, used for the OAM DMA stall length.
    pub(crate) fn cycle_parity(&self) -> bool {
        self.cycle % 2 == 1
    }

    pub(crate) fn dmc_wants_sample(&self) -> bool {
        self.dmc.wants_sample()
    }

    pub(crate) fn dmc_address(&self) -> u16 {
        self.dmc.current_address
    }

    pub(crate) fn dmc_supply_sample(&mut self, value: u8) {
        if self.dmc.supply_sample(value) {
            self.dmc_irq = true;
        }
    }

    // ---- register interface ($4000-$4017) ----

    pub(crate) fn write_register(&mut self, address: u16, value: u8) {
        match address {
            0x4000 => self.pulse1.write_control(value),
            0x4001 => self.pulse1.write_sweep(value),
            0x4002 => self.pulse1.write_timer_low(value),
            0x4003 => self.pulse1.write_timer_high(value),
            0x4004 => self.pulse2.write_control(value),
            0x4005 => self.pulse2.write_sweep(value),
            0x4006 => self.pulse2.write_timer_low(value),
            0x4007 => self.pulse2.write_timer_high(value),
            0x4008 => self.triangle.write_control(value),
            0x400A => self.triangle.write_timer_low(value),
            0x400B => self.triangle.write_timer_high(value),
            0x400C => self.noise.write_control(value),
            0x400E => self.noise.write_mode(value),
            0x400F => self.noise.write_length(value),
            0x4010 => {
                self.dmc.write_control(value);
                if !self.dmc.irq_enabled {
                    self.dmc_irq = false;
                }
            }
            0x4011 => self.dmc.write_output(value),
            0x4012 => self.dmc.write_address(value),
            0x4013 => self.dmc.write_length(value),
            0x4015 => self.write_status(value),
            0x4017 => {
                self.five_step = value & 0x80 != 0;
                self.irq_inhibit = value & 0x40 != 0;
                if self.irq_inhibit {
                    self.frame_irq = false;
                }
                self.frame_cycle = 0;
                if self.five_step {
                    self.clock_quarter_frame();
                    self.clock_half_frame();
                }
            }
            _ => tracing::debug!(address, value, "unhandled APU register write"),
        }
    }

    fn write_status(&mut self, value: u8) {
        self.pulse1.enabled = value & 0x01 != 0;
        self.pulse2.enabled = value & 0x02 != 0;
        self.triangle.enabled = value & 0x04 != 0;
        self.noise.enabled = value & 0x08 != 0;
        self.dmc.enabled = value & 0x10 != 0;

        if !self.pulse1.enabled {
            self.pulse1.length = 0;
        }
        if !self.pulse2.enabled {
            self.pulse2.length = 0;
        }
        if !self.triangle.enabled {
            self.triangle.length = 0;
        }
        if !self.noise.enabled {
            self.noise.length = 0;
        }
        if self.dmc.enabled {
            if self.dmc.bytes_remaining == 0 {
                self.dmc.restart();
            }
        } else {
            self.dmc.bytes_remaining = 0;
        }
        self.dmc_irq = false;
    }

    /// $4015 status: channel activity plus IRQ flags; reading clears the
    /// frame IRQ.
    pub(crate) fn read_status(&mut self) -> u8 {
        let mut value = 0;
        if self.pulse1.length > 0 {
            value |= 0x01;
        }
        if self.pulse2.length > 0 {
            value |= 0x02;
        }
        if self.triangle.length > 0 {
            value |= 0x04;
        }
        if self.noise.length > 0 {
            value |= 0x08;
        }
        if self.dmc.bytes_remaining > 0 {
            value |= 0x10;
        }
        if self.frame_irq {
            value |= 0x40;
        }
        if self.dmc_irq {
            value |= 0x80;
        }
        self.frame_irq = false;
        value
    }

    // ---- clocking ----

    fn clock_quarter_frame(&mut self) {
        self.pulse1.envelope.clock();
        self.pulse2.envelope.clock();
        self.noise.envelope.clock();
        self.triangle.clock_linear();
    }

    fn clock_half_frame(&mut self) {
        self.pulse1.clock_length();
        self.pulse1.clock_sweep();
        self.pulse2.clock_length();
        self.pulse2.clock_sweep();
        self.triangle.clock_length();
        self.noise.clock_length();
    }

    fn clock_frame_counter(&mut self) {
        self.frame_cycle += 1;

        if FRAME_QUARTER.contains(&self.frame_cycle) {
            // The final 4-step tick belongs to the 5-step slot instead.
            if !(self.five_step && self.frame_cycle == FRAME_QUARTER[3]) {
                self.clock_quarter_frame();
            }
        }
        match self.frame_cycle {
            c if c == FRAME_QUARTER[1] => self.clock_half_frame(),
            c if c == FRAME_QUARTER[3] && !self.five_step => {
                self.clock_half_frame();
                if !self.irq_inhibit {
                    self.frame_irq = true;
                }
            }
            c if c == FRAME_STEP5_EXTRA && self.five_step => {
                self.clock_quarter_frame();
                self.clock_half_frame();
            }
            _ => {}
        }

        let period = if self.five_step {
            FRAME_PERIOD_5STEP
        } else {
            FRAME_PERIOD_4STEP
        };
        if self.frame_cycle >= period {
            self.frame_cycle = 0;
        }
    }

    /// Advance one CPU cycle.
    pub(crate) fn step(&mut self) {
        self.cycle += 1;
        self.clock_frame_counter();

        self.triangle.clock_timer();
        if self.cycle % 2 == 0 {
            self.pulse1.clock_timer();
            self.pulse2.clock_timer();
        }
        self.noise.clock_timer();
        self.dmc.clock_timer();

        self.sample_accumulator += SAMPLE_RATE;
        if self.sample_accumulator >= CPU_CLOCK {
            self.sample_accumulator -= CPU_CLOCK;
            let sample = self.mix();
            if self.samples.len() == SAMPLE_QUEUE_LIMIT {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
    }

    /// Non-linear mixer approximation from the console's DAC layout.
    fn mix(&self) -> f32 {
        let pulse = f32::from(self.pulse1.output()) + f32::from(self.pulse2.output());
        let pulse_out = if pulse > 0.0 {
            95.88 / (8128.0 / pulse + 100.0)
        } else {
            0.0
        };

        let tnd = f32::from(self.triangle.output()) / 8227.0
            + f32::from(self.noise.output()) / 12241.0
            + f32::from(self.dmc.output) / 22638.0;
        let tnd_out = if tnd > 0.0 {
            159.79 / (1.0 / tnd + 100.0)
        } else {
            0.0
        };

        pulse_out + tnd_out
    }

    /// Copy out up to `out.len()` pending samples; the rest stay queued.
    pub(crate) fn drain_samples(&mut self, out: &mut [f32]) -> usize {
        let count = out.len().min(self.samples.len());
        for slot in out.iter_mut().take(count) {
            // The queue is non-empty for each of these iterations.
            *slot = self.samples.pop_front().unwrap_or(0.0);
        }
        count
    }

    #[must_use]
    pub(crate) fn pending_samples(&self) -> usize {
        self.samples.len()
    }

    // ---- state capture ----

    pub(crate) fn state(&self) -> crate::save_state::ApuState {
        crate::save_state::ApuState {
            pulse1: self.pulse_state(&self.pulse1),
            pulse2: self.pulse_state(&self.pulse2),
            triangle: crate::save_state::TriangleState {
                enabled: self.triangle.enabled,
                control: self.triangle.control,
                linear_period: self.triangle.linear_period,
                linear: self.triangle.linear,
                linear_reload: self.triangle.linear_reload,
                length: self.triangle.length,
                timer_period: self.triangle.timer_period,
                timer: self.triangle.timer,
                step: self.triangle.step,
            },
            noise: crate::save_state::NoiseState {
                enabled: self.noise.enabled,
                length_halt: self.noise.length_halt,
                length: self.noise.length,
                envelope: self.envelope_state(&self.noise.envelope),
                mode: self.noise.mode,
                timer_period: self.noise.timer_period,
                timer: self.noise.timer,
                shift: self.noise.shift,
            },
            dmc: crate::save_state::DmcState {
                enabled: self.dmc.enabled,
                irq_enabled: self.dmc.irq_enabled,
                looped: self.dmc.looped,
                timer_period: self.dmc.timer_period,
                timer: self.dmc.timer,
                output: self.dmc.output,
                sample_address: self.dmc.sample_address,
                sample_length: self.dmc.sample_length,
                current_address: self.dmc.current_address,
                bytes_remaining: self.dmc.bytes_remaining,
                shift: self.dmc.shift,
                bits_remaining: self.dmc.bits_remaining,
                silence: self.dmc.silence,
                buffer: self.dmc.buffer,
                buffer_empty: self.dmc.buffer_empty,
            },
            cycle: self.cycle,
            frame_cycle: self.frame_cycle,
            five_step: self.five_step,
            irq_inhibit: self.irq_inhibit,
            frame_irq: self.frame_irq,
            dmc_irq: self.dmc_irq,
            sample_accumulator: self.sample_accumulator,
        }
    }

    fn pulse_state(&self, pulse: &Pulse) -> crate::save_state::PulseState {
        crate::save_state::PulseState {
            enabled: pulse.enabled,
            duty: pulse.duty,
            duty_step: pulse.duty_step,
            length_halt: pulse.length_halt,
            length: pulse.length,
            envelope: self.envelope_state(&pulse.envelope),
            sweep_enabled: pulse.sweep_enabled,
            sweep_period: pulse.sweep_period,
            sweep_negate: pulse.sweep_negate,
            sweep_shift: pulse.sweep_shift,
            sweep_reload: pulse.sweep_reload,
            sweep_divider: pulse.sweep_divider,
            timer_period: pulse.timer_period,
            timer: pulse.timer,
        }
    }

    fn envelope_state(&self, envelope: &Envelope) -> crate::save_state::EnvelopeState {
        crate::save_state::EnvelopeState {
            start: envelope.start,
            divider: envelope.divider,
            decay: envelope.decay,
            period: envelope.period,
            looped: envelope.looped,
            constant: envelope.constant,
        }
    }

    pub(crate) fn restore(&mut self, state: &crate::save_state::ApuState) {
        Self::restore_pulse(&mut self.pulse1, &state.pulse1);
        Self::restore_pulse(&mut self.pulse2, &state.pulse2);

        self.triangle.enabled = state.triangle.enabled;
        self.triangle.control = state.triangle.control;
        self.triangle.linear_period = state.triangle.linear_period;
        self.triangle.linear = state.triangle.linear;
        self.triangle.linear_reload = state.triangle.linear_reload;
        self.triangle.length = state.triangle.length;
        self.triangle.timer_period = state.triangle.timer_period;
        self.triangle.timer = state.triangle.timer;
        self.triangle.step = state.triangle.step;

        self.noise.enabled = state.noise.enabled;
        self.noise.length_halt = state.noise.length_halt;
        self.noise.length = state.noise.length;
        Self::restore_envelope(&mut self.noise.envelope, &state.noise.envelope);
        self.noise.mode = state.noise.mode;
        self.noise.timer_period = state.noise.timer_period;
        self.noise.timer = state.noise.timer;
        self.noise.shift = state.noise.shift;

        self.dmc.enabled = state.dmc.enabled;
        self.dmc.irq_enabled = state.dmc.irq_enabled;
        self.dmc.looped = state.dmc.looped;
        self.dmc.timer_period = state.dmc.timer_period;
        self.dmc.timer = state.dmc.timer;
        self.dmc.output = state.dmc.output;
        self.dmc.sample_address = state.dmc.sample_address;
        self.dmc.sample_length = state.dmc.sample_length;
        self.dmc.current_address = state.dmc.current_address;
        self.dmc.bytes_remaining = state.dmc.bytes_remaining;
        self.dmc.shift = state.dmc.shift;
        self.dmc.bits_remaining = state.dmc.bits_remaining;
        self.dmc.silence = state.dmc.silence;
        self.dmc.buffer = state.dmc.buffer;
        self.dmc.buffer_empty = state.dmc.buffer_empty;

        self.cycle = state.cycle;
        self.frame_cycle = state.frame_cycle;
        self.five_step = state.five_step;
        self.irq_inhibit = state.irq_inhibit;
        self.frame_irq = state.frame_irq;
        self.dmc_irq = state.dmc_irq;
        self.sample_accumulator = state.sample_accumulator;
        // Queued audio is host-side, not machine state.
        self.samples.clear();
    }

    fn restore_pulse(pulse: &mut Pulse, state: &crate::save_state::PulseState) {
        pulse.enabled = state.enabled;
        pulse.duty = state.duty;
        pulse.duty_step = state.duty_step;
        pulse.length_halt = state.length_halt;
        pulse.length = state.length;
        Self::restore_envelope(&mut pulse.envelope, &state.envelope);
        pulse.sweep_enabled = state.sweep_enabled;
        pulse.sweep_period = state.sweep_period;
        pulse.sweep_negate = state.sweep_negate;
        pulse.sweep_shift = state.sweep_shift;
        pulse.sweep_reload = state.sweep_reload;
        pulse.sweep_divider = state.sweep_divider;
        pulse.timer_period = state.timer_period;
        pulse.timer = state.timer;
    }

    fn restore_envelope(envelope: &mut Envelope, state: &crate::save_state::EnvelopeState) {
        envelope.start = state.start;
        envelope.divider = state.divider;
        envelope.decay = state.decay;
        envelope.period = state.period;
        envelope.looped = state.looped;
        envelope.constant = state.constant;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn status_write_enables_and_silences_channels() {
        let mut apu = Apu::new();
        apu.write_register(0x4015, 0x01);
        apu.write_register(0x4003, 0x08); // length index 1 -> 254

        assert_eq!(apu.read_status() & 0x01, 0x01);

        apu.write_register(0x4015, 0x00);
        assert_eq!(apu.read_status() & 0x01, 0x00);
    }

    #[test]
    fn length_counter_ticks_down_at_half_frames() {
        let mut apu = Apu::new();
        apu.write_register(0x4015, 0x01);
        apu.write_register(0x4000, 0x00); // halt clear
        apu.write_register(0x4003, 0x18); // length index 3 -> 2

        assert_eq!(apu.pulse1.length, 2);
        for _ in 0..FRAME_QUARTER[1] {
            apu.step();
        }
        assert_eq!(apu.pulse1.length, 1);
        for _ in 0..FRAME_PERIOD_4STEP - FRAME_QUARTER[1] {
            apu.step();
        }
        assert_eq!(apu.pulse1.length, 0);
    }

    #[test]
    fn halted_length_counter_does_not_tick() {
        let mut apu = Apu::new();
        apu.write_register(0x4015, 0x01);
        apu.write_register(0x4000, 0x20); // halt
        apu.write_register(0x4003, 0x18);

        for _ in 0..FRAME_PERIOD_4STEP {
            apu.step();
        }
        assert_eq!(apu.pulse1.length, 2);
    }

    #[test]
    fn frame_irq_raised_in_four_step_mode() {
        let mut apu = Apu::new();
        apu.write_register(0x4017, 0x00);
        for _ in 0..FRAME_PERIOD_4STEP {
            apu.step();
        }
        assert!(apu.irq_asserted());

        // Status read acknowledges it.
        let status = apu.read_status();
        assert_eq!(status & 0x40, 0x40);
        assert!(!apu.irq_asserted());
    }

    #[test]
    fn five_step_mode_raises_no_frame_irq() {
        let mut apu = Apu::new();
        apu.write_register(0x4017, 0x80);
        for _ in 0..FRAME_PERIOD_5STEP {
            apu.step();
        }
        assert!(!apu.irq_asserted());
    }

    #[test]
    fn irq_inhibit_clears_pending_frame_irq() {
        let mut apu = Apu::new();
        for _ in 0..FRAME_PERIOD_4STEP {
            apu.step();
        }
        assert!(apu.irq_asserted());
        apu.write_register(0x4017, 0x40);
        assert!(!apu.irq_asserted());
    }

    #[test]
    fn samples_accumulate_near_target_rate() {
        let mut apu = Apu::new();
        for _ in 0..CPU_CLOCK / 60 {
            apu.step();
        }
        let per_frame = SAMPLE_RATE as usize / 60;
        let pending = apu.pending_samples();
        assert!(pending.abs_diff(per_frame) <= 1, "pending = {pending}");
    }

    #[test]
    fn drain_respects_capacity_and_keeps_remainder() {
        let mut apu = Apu::new();
        for _ in 0..CPU_CLOCK / 60 {
            apu.step();
        }
        let total = apu.pending_samples();

        let mut out = [0.0_f32; 100];
        assert_eq!(apu.drain_samples(&mut out), 100);
        assert_eq!(apu.pending_samples(), total - 100);

        let mut rest = vec![0.0_f32; total];
        assert_eq!(apu.drain_samples(&mut rest), total - 100);
    }

    #[test]
    fn noise_lfsr_walks_deterministically() {
        let mut noise = Noise::default();
        noise.write_mode(0x00);
        let start = noise.shift;
        for _ in 0..NOISE_PERIODS[0] as usize + 1 {
            noise.clock_timer();
        }
        assert!(noise.shift != start);
    }

    #[test]
    fn dmc_requests_memory_when_started() {
        let mut apu = Apu::new();
        apu.write_register(0x4012, 0x00); // address $C000
        apu.write_register(0x4013, 0x01); // length 17
        apu.write_register(0x4015, 0x10);

        assert!(apu.dmc_wants_sample());
        assert_eq!(apu.dmc_address(), 0xC000);

        apu.dmc_supply_sample(0xFF);
        assert!(!apu.dmc_wants_sample());
        assert_eq!(apu.dmc.bytes_remaining, 16);
    }
}
