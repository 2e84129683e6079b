/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! Expansion port signals, the GPIO port interface and the expansion device trait.
//!
//! All expansion port lines are sampled with a single read of the GPIO level register.
//! A [BusSnapshot] wraps the raw 32-bit word and decodes the individual lines from it.
//!
//! Most of the control lines are active-low. Accessors of [BusSnapshot] are named by their
//! logical meaning and return `true` when the line is *asserted*, e.g. [BusSnapshot::io1]
//! returns `true` when the `IO1` pin reads low.
use core::fmt::{self, Debug};

use bitflags::bitflags;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

mod gpio;
mod sim;

use crate::clock::CycleTimings;

pub use gpio::*;
pub use sim::*;

/// GPIO pin numbers of the expansion port wiring.
pub mod pins {
    /// Output: `EXROM` memory configuration line.
    pub const EXROM: u32 = 0;
    /// Input: the host's `RESET` line.
    pub const RESET: u32 = 2;
    /// Input: the `IO1` select line (`$DE00-$DEFF`).
    pub const IO1: u32 = 3;
    /// Input: the `IO2` select line (`$DF00-$DFFF`).
    pub const IO2: u32 = 4;
    /// Input: the lowest address line `A0`, followed by `A1..A7` on the next 7 pins.
    pub const A0: u32 = 5;
    /// Input: `ROML` when the address multiplexer is switched.
    pub const ROML: u32 = 6;
    /// Input: `ROMH` when the address multiplexer is switched.
    pub const ROMH: u32 = 7;
    /// Input: `A8` when the address multiplexer is switched, followed by `A9..A12`.
    pub const A8: u32 = 8;
    /// Input: the sound chip select line (decoded by the adapter).
    pub const CS: u32 = 13;
    /// Output: the data buffer enable, active low.
    pub const BUFFER_OE: u32 = 14;
    /// Output: `GAME` memory configuration line.
    pub const GAME: u32 = 15;
    /// Output: the address latch enable.
    pub const LATCH_LE: u32 = 16;
    /// Input: the `PHI2` clock phase.
    pub const PHI2: u32 = 17;
    /// Output: the address multiplexer switch.
    pub const ADDRESS_MUX: u32 = 18;
    /// Input: the `R/W` line, high on reads.
    pub const RW: u32 = 19;
    /// Input/output: the lowest data line `D0`, followed by `D1..D7`.
    pub const D0: u32 = 20;
}

bitflags! {
    /// Input lines of the expansion port as they appear in the GPIO level register.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct InputLines: u32 {
        const RESET = 1 << pins::RESET;
        const IO1   = 1 << pins::IO1;
        const IO2   = 1 << pins::IO2;
        const ROML  = 1 << pins::ROML;
        const ROMH  = 1 << pins::ROMH;
        const CS    = 1 << pins::CS;
        const PHI2  = 1 << pins::PHI2;
        const RW    = 1 << pins::RW;
    }
}

bitflags! {
    /// Output lines driven by the expansion hardware.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OutputLines: u32 {
        const EXROM       = 1 << pins::EXROM;
        const BUFFER_OE   = 1 << pins::BUFFER_OE;
        const GAME        = 1 << pins::GAME;
        const LATCH_LE    = 1 << pins::LATCH_LE;
        const ADDRESS_MUX = 1 << pins::ADDRESS_MUX;
        const DATA        = 0xff << pins::D0;
    }
}

/// Active-low input lines; all of them read high when nothing is asserted.
pub const ACTIVE_LOW_INPUTS: InputLines = InputLines::RESET.union(InputLines::IO1)
                                                           .union(InputLines::IO2)
                                                           .union(InputLines::ROML)
                                                           .union(InputLines::ROMH)
                                                           .union(InputLines::CS);

const ADDRESS_LOW_MASK: u32 = 0xff << pins::A0;
const ADDRESS_HIGH_MASK: u32 = 0x1f << pins::A8;

/// Returns the data byte placed on the `D0..D7` pins of the output word.
#[inline(always)]
pub const fn encode_data(data: u8) -> u32 {
    (data as u32) << pins::D0
}

/// Returns the address byte placed on the `A0..A7` pins, as seen on the bus.
#[inline(always)]
pub const fn encode_address_low(address: u8) -> u32 {
    (address as u32) << pins::A0
}

/// Returns `A8..A12` placed on their multiplexed pins, as seen on the bus.
#[inline(always)]
pub const fn encode_address_high(address_high: u8) -> u32 {
    ((address_high & 0x1f) as u32) << pins::A8
}

/// A single sample of the GPIO level register.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(transparent))]
pub struct BusSnapshot(pub u32);

impl BusSnapshot {
    /// Returns a snapshot of an idle bus: the `PHI2` phase is valid, `R/W` reads high,
    /// none of the select lines is asserted and the address and data lines are low.
    pub const fn idle() -> Self {
        BusSnapshot(ACTIVE_LOW_INPUTS.bits() | InputLines::PHI2.bits() | InputLines::RW.bits())
    }
    /// Returns the raw GPIO word.
    #[inline(always)]
    pub const fn raw(self) -> u32 {
        self.0
    }
    /// Returns `A0..A7` as sampled from the non-multiplexed address pins.
    #[inline(always)]
    pub const fn address_low(self) -> u8 {
        (self.0 >> pins::A0) as u8
    }
    /// Returns `A8..A12` as sampled after the address multiplexer has been switched.
    #[inline(always)]
    pub const fn address_high(self) -> u8 {
        ((self.0 & ADDRESS_HIGH_MASK) >> pins::A8) as u8
    }
    /// Returns the data byte on `D0..D7`.
    #[inline(always)]
    pub const fn data(self) -> u8 {
        (self.0 >> pins::D0) as u8
    }
    /// Returns `true` if the host is reading.
    #[inline(always)]
    pub const fn is_read(self) -> bool {
        self.0 & InputLines::RW.bits() != 0
    }
    /// Returns `true` if the host is writing.
    #[inline(always)]
    pub const fn is_write(self) -> bool {
        !self.is_read()
    }
    /// Returns `true` if this sample was taken in the second half of the `PHI2` clock cycle.
    #[inline(always)]
    pub const fn phase_valid(self) -> bool {
        self.0 & InputLines::PHI2.bits() != 0
    }
    #[inline(always)]
    const fn asserted(self, line: InputLines) -> bool {
        self.0 & line.bits() == 0
    }
    /// Returns `true` if the host holds its `RESET` line.
    #[inline(always)]
    pub const fn reset(self) -> bool {
        self.asserted(InputLines::RESET)
    }
    #[inline(always)]
    pub const fn io1(self) -> bool {
        self.asserted(InputLines::IO1)
    }
    #[inline(always)]
    pub const fn io2(self) -> bool {
        self.asserted(InputLines::IO2)
    }
    /// Returns `true` if the sound chip select line is asserted.
    #[inline(always)]
    pub const fn chip_select(self) -> bool {
        self.asserted(InputLines::CS)
    }
    /// Only meaningful when the address multiplexer was switched.
    #[inline(always)]
    pub const fn roml(self) -> bool {
        self.asserted(InputLines::ROML)
    }
    /// Only meaningful when the address multiplexer was switched.
    #[inline(always)]
    pub const fn romh(self) -> bool {
        self.asserted(InputLines::ROMH)
    }
    /// Returns a copy with the given active-low lines asserted (pulled low).
    pub const fn asserting(self, lines: InputLines) -> Self {
        BusSnapshot(self.0 & !lines.bits())
    }
    /// Returns a copy with `R/W` low.
    pub const fn writing(self) -> Self {
        BusSnapshot(self.0 & !InputLines::RW.bits())
    }
    /// Returns a copy sampled in the first half of the clock cycle.
    pub const fn phase_invalid(self) -> Self {
        BusSnapshot(self.0 & !InputLines::PHI2.bits())
    }
    /// Returns a copy with `A0..A7` replaced.
    pub const fn with_address_low(self, address: u8) -> Self {
        BusSnapshot(self.0 & !ADDRESS_LOW_MASK | encode_address_low(address))
    }
    /// Returns a copy with the multiplexed `A8..A12` pins replaced.
    pub const fn with_address_high(self, address_high: u8) -> Self {
        BusSnapshot(self.0 & !ADDRESS_HIGH_MASK | encode_address_high(address_high))
    }
    /// Returns a copy with `D0..D7` replaced.
    pub const fn with_data(self, data: u8) -> Self {
        BusSnapshot(self.0 & !OutputLines::DATA.bits() | encode_data(data))
    }
}

impl Debug for BusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusSnapshot({:#010x}: {} a: {:02x} d: {:02x}{}{}{}{}{})",
            self.0,
            if self.phase_valid() { if self.is_read() { "R" } else { "W" } } else { "-" },
            self.address_low(), self.data(),
            if self.io1() { " IO1" } else { "" },
            if self.io2() { " IO2" } else { "" },
            if self.chip_select() { " CS" } else { "" },
            if self.reset() { " RESET" } else { "" },
            if self.roml() || self.romh() { " ROM" } else { "" })
    }
}

/// The two samples of the GPIO level register taken during one bus cycle.
///
/// When the address multiplexer was switched before the first sample, `early` holds
/// the latched `A0..A7` and `settled` holds `A8..A12` with `ROML` and `ROMH`.
/// Otherwise both samples carry `A0..A7` and the `settled` one is authoritative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleSample {
    pub early: BusSnapshot,
    pub settled: BusSnapshot,
    pub muxed: bool,
}

impl CycleSample {
    pub fn new(early: BusSnapshot, settled: BusSnapshot, muxed: bool) -> Self {
        CycleSample { early, settled, muxed }
    }
    /// Returns the low address byte.
    #[inline]
    pub fn address_low(&self) -> u8 {
        if self.muxed {
            self.early.address_low()
        }
        else {
            self.settled.address_low()
        }
    }
    /// Returns the 13-bit address within a ROM window when multiplexed, otherwise `A0..A7`.
    #[inline]
    pub fn address(&self) -> u16 {
        let lo = u16::from(self.address_low());
        if self.muxed {
            lo | u16::from(self.settled.address_high()) << 8
        }
        else {
            lo
        }
    }
    #[inline]
    pub fn is_read(&self) -> bool {
        self.settled.is_read()
    }
    #[inline]
    pub fn io1(&self) -> bool {
        self.settled.io1()
    }
    #[inline]
    pub fn io2(&self) -> bool {
        self.settled.io2()
    }
    #[inline]
    pub fn chip_select(&self) -> bool {
        self.settled.chip_select()
    }
    #[inline]
    pub fn roml(&self) -> bool {
        self.muxed && self.settled.roml()
    }
    #[inline]
    pub fn romh(&self) -> bool {
        self.muxed && self.settled.romh()
    }
}

/// The direction of the data pins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataDirection {
    Input,
    Output
}

/// An interface to the GPIO pins wired to the expansion port.
///
/// Implemented by [GpioPort] for the real hardware and by [SimulatedPort] for tests.
pub trait BusPort {
    /// Reads all pin levels at once.
    fn sample_inputs(&mut self) -> BusSnapshot;
    /// Drives the output pins selected by `mask` to the levels of the corresponding bits of `values`.
    fn drive_outputs(&mut self, mask: OutputLines, values: u32);
    /// Disables the data buffer so the adapter no longer drives the data bus.
    fn release_outputs(&mut self);
    /// Switches the address multiplexer: `true` selects `A8..A12`, `ROML` and `ROMH`.
    fn switch_address_mux(&mut self, high: bool);
    /// Changes the direction of the data pins.
    fn set_data_direction(&mut self, direction: DataDirection);
}

/// A region of the expansion port address space claimed by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum Region {
    /// `$8000-$9FFF` (or `$E000-$FFFF` in Ultimax mode) via `ROML`.
    RomLow,
    /// `$A000-$BFFF` (or `$E000-$FFFF` in Ultimax mode) via `ROMH`.
    RomHigh,
    Io1,
    Io2,
    /// The sound chip address space.
    ChipSelect
}

/// An access to the expansion port claimed by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct BusAccess {
    pub region: Region,
    /// An offset into the region.
    pub address: u16,
}

impl BusAccess {
    pub fn new(region: Region, address: u16) -> Self {
        BusAccess { region, address }
    }
}

/// An interface for emulating devices attached to the expansion port.
///
/// The methods are called by [BusCycleMachine][crate::cycle::BusCycleMachine] in the order
/// of the bus cycle: [ExpansionDevice::on_cycle], [ExpansionDevice::claim], then either
/// [ExpansionDevice::read] or [ExpansionDevice::write] and finally [ExpansionDevice::deferred_output]
/// after the bus has been released.
///
/// All of the methods except `reset` run under the cycle deadline; they must not block,
/// allocate or log.
pub trait ExpansionDevice: Debug {
    /// Returns the cycle offsets used by this device.
    fn timings(&self) -> CycleTimings;
    /// Should return `true` if the device needs `A8..A12`, `ROML` and `ROMH`.
    ///
    /// The address multiplexer is then switched before the first sample of each cycle.
    #[inline]
    fn uses_address_mux(&self) -> bool {
        false
    }
    /// Called once per valid bus cycle right after the first sample.
    ///
    /// `timestamp` is the number of valid bus cycles counted so far, including this one.
    /// Devices may pre-fetch data here, e.g. the cache line likely addressed by `address_low`.
    #[inline]
    fn on_cycle(&mut self, _timestamp: u64, _address_low: u8) {}
    /// Decides whether the device responds to the sampled bus cycle.
    fn claim(&self, sample: &CycleSample) -> Option<BusAccess>;
    /// Returns the data byte to be driven on the bus for a claimed read.
    fn read(&mut self, access: BusAccess) -> u8;
    /// Receives the data byte of a claimed write.
    fn write(&mut self, access: BusAccess, data: u8, timestamp: u64);
    /// Drives any output changes deferred until the bus was released.
    #[inline]
    fn deferred_output(&mut self, _port: &mut dyn BusPort) {}
    /// Returns the device to its power-on state when the host held `RESET`.
    fn reset(&mut self);
}
