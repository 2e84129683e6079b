/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! The interface of the sound chip emulators driven by the pipeline.
use super::SID_REGISTERS;

/// The number of SID registers cleared when the host resets the sound chips.
pub const SID_RESET_REGISTERS: u8 = 24;

/// An interface for emulating a sound chip, e.g. a SID or an FM synthesizer.
///
/// The emulation is driven by [SoundPipeline][super::SoundPipeline] in fixed steps of bus cycles.
pub trait ChipEngine {
    /// Advances the emulation by `cycles` of the bus clock.
    fn clock(&mut self, cycles: u32);
    /// Writes `data` to the chip's register `reg`.
    fn write(&mut self, reg: u8, data: u8);
    /// Reads the chip's register `reg`.
    fn read(&mut self, reg: u8) -> u8;
    /// Returns the current output level.
    fn output(&mut self) -> i16;
    /// Silences the chip.
    ///
    /// The default implementation clears the first [SID_RESET_REGISTERS] registers, which
    /// silences a SID. FM engines should override it with the reset of the whole chip.
    fn reset(&mut self) {
        for reg in 0..SID_RESET_REGISTERS {
            self.write(reg, 0);
        }
    }
    /// Called when the measured bus clock frequency or the sample rate changes.
    fn set_sampling_parameters(&mut self, _clock_hz: u32, _sample_rate: u32) {}
}

impl<E: ChipEngine + ?Sized> ChipEngine for Box<E> {
    #[inline]
    fn clock(&mut self, cycles: u32) {
        (**self).clock(cycles)
    }
    #[inline]
    fn write(&mut self, reg: u8, data: u8) {
        (**self).write(reg, data)
    }
    #[inline]
    fn read(&mut self, reg: u8) -> u8 {
        (**self).read(reg)
    }
    #[inline]
    fn output(&mut self) -> i16 {
        (**self).output()
    }
    fn reset(&mut self) {
        (**self).reset()
    }
    fn set_sampling_parameters(&mut self, clock_hz: u32, sample_rate: u32) {
        (**self).set_sampling_parameters(clock_hz, sample_rate)
    }
}

/// A silent chip remembering the written registers.
///
/// Useful in place of a missing emulator and for tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NullEngine {
    pub regs: [u8; SID_REGISTERS],
    pub cycles: u64,
    pub writes: u64,
    reset_registers: u8,
}

impl Default for NullEngine {
    fn default() -> Self {
        NullEngine::sid()
    }
}

impl NullEngine {
    /// Creates an engine in place of a SID, resetting only the voice and filter registers.
    pub fn sid() -> Self {
        NullEngine { regs: [0; SID_REGISTERS], cycles: 0, writes: 0, reset_registers: SID_RESET_REGISTERS }
    }
    /// Creates an engine in place of an FM chip, resetting all registers.
    pub fn fm() -> Self {
        NullEngine { reset_registers: SID_REGISTERS as u8, ..NullEngine::sid() }
    }
}

impl ChipEngine for NullEngine {
    fn clock(&mut self, cycles: u32) {
        self.cycles += u64::from(cycles);
    }
    fn write(&mut self, reg: u8, data: u8) {
        self.regs[usize::from(reg) % SID_REGISTERS] = data;
        self.writes += 1;
    }
    fn read(&mut self, reg: u8) -> u8 {
        self.regs[usize::from(reg) % SID_REGISTERS]
    }
    fn output(&mut self) -> i16 {
        0
    }
    fn reset(&mut self) {
        for reg in self.regs[..usize::from(self.reset_registers)].iter_mut() {
            *reg = 0;
        }
    }
}
