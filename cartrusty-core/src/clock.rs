/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! Cycle counting, timing gates and host clock measurement.
use core::cell::Cell;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

mod hardware;

pub use hardware::*;

/// The nominal `PHI2` frequency of a PAL C64 in Hz.
pub const PAL_CLOCK_HZ: u32 = 985_248;

/// A free-running counter of CPU cycles.
///
/// The counter wraps around; differences must be computed with wrapping arithmetic.
pub trait CycleClock {
    fn now(&self) -> u32;
}

impl<C: CycleClock + ?Sized> CycleClock for &C {
    #[inline(always)]
    fn now(&self) -> u32 {
        (**self).now()
    }
}

/// Busy-waits until a number of CPU cycles have passed since the gate was started.
///
/// Every offset given to [TimingGate::wait_until] is relative to the gate's start,
/// so the delays do not accumulate the time spent between the waits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingGate {
    start: u32
}

impl TimingGate {
    #[inline(always)]
    pub fn start<C: CycleClock>(clock: &C) -> Self {
        TimingGate { start: clock.now() }
    }
    #[inline(always)]
    pub fn restart<C: CycleClock>(&mut self, clock: &C) {
        self.start = clock.now();
    }
    /// Returns the number of CPU cycles since the start of the gate.
    #[inline(always)]
    pub fn elapsed<C: CycleClock>(&self, clock: &C) -> u32 {
        clock.now().wrapping_sub(self.start)
    }
    /// Spins until at least `offset` CPU cycles have passed since the start.
    #[inline(always)]
    pub fn wait_until<C: CycleClock>(&self, clock: &C, offset: u32) {
        while self.elapsed(clock) < offset {
            core::hint::spin_loop();
        }
    }
}

/// Offsets in CPU cycles from the start of a bus cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct CycleTimings {
    /// When the bus lines are settled and the authoritative sample is taken.
    pub settle: u32,
    /// Until when the read data is held on the bus.
    pub read_hold: u32,
    /// When the host's write data is sampled.
    pub write_sample: u32,
}

impl CycleTimings {
    pub const fn new(settle: u32, read_hold: u32, write_sample: u32) -> Self {
        CycleTimings { settle, read_hold, write_sample }
    }
}

/// The Raspberry Pi model the cycle offsets are tuned for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum HardwareRevision {
    /// Raspberry Pi 3B, 1.2 GHz.
    Rpi3B,
    /// Raspberry Pi 3B+, 1.4 GHz.
    Rpi3BPlus
}

impl HardwareRevision {
    /// The revision selected at build time with the `rpi3b` feature.
    #[cfg(feature = "rpi3b")]
    pub const BUILD: HardwareRevision = HardwareRevision::Rpi3B;
    /// The revision selected at build time with the `rpi3b` feature.
    #[cfg(not(feature = "rpi3b"))]
    pub const BUILD: HardwareRevision = HardwareRevision::Rpi3BPlus;

    /// Returns one of the timings depending on the revision.
    #[inline]
    pub const fn select(self, rpi3b: CycleTimings, rpi3b_plus: CycleTimings) -> CycleTimings {
        match self {
            HardwareRevision::Rpi3B => rpi3b,
            HardwareRevision::Rpi3BPlus => rpi3b_plus
        }
    }
}

impl Default for HardwareRevision {
    fn default() -> Self {
        HardwareRevision::BUILD
    }
}

/// A [CycleClock] advancing by a fixed step on every read.
///
/// Useful for driving a [TimingGate] in tests and simulations.
#[derive(Clone, Debug, Default)]
pub struct StepClock {
    now: Cell<u32>,
    step: u32,
}

impl StepClock {
    pub fn new(start: u32, step: u32) -> Self {
        StepClock { now: Cell::new(start), step }
    }
    /// Returns the current counter value without advancing it.
    pub fn peek(&self) -> u32 {
        self.now.get()
    }
}

impl CycleClock for StepClock {
    fn now(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }
}

/// Measures the actual frequency of the host's bus clock.
///
/// Compares the number of bus cycles counted over a span of the microsecond timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockMeter {
    start_cycles: u64,
    start_micros: u32,
    interval_micros: u32,
}

impl ClockMeter {
    pub const DEFAULT_INTERVAL_MICROS: u32 = 1_000_000;

    pub fn new(cycles: u64, micros: u32, interval_micros: u32) -> Self {
        ClockMeter { start_cycles: cycles, start_micros: micros, interval_micros }
    }
    /// Returns the measured frequency in Hz once the interval has passed and starts a new measurement.
    ///
    /// Returns `None` if the interval has not passed yet or no cycles were counted.
    pub fn measure(&mut self, cycles: u64, micros: u32) -> Option<u32> {
        let elapsed = micros.wrapping_sub(self.start_micros);
        if elapsed < self.interval_micros || elapsed == 0 {
            return None
        }
        let counted = cycles.checked_sub(self.start_cycles)?;
        self.start_cycles = cycles;
        self.start_micros = micros;
        if counted == 0 {
            return None
        }
        let hz = counted * 1_000_000 / u64::from(elapsed);
        Some(hz.min(u64::from(u32::MAX)) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_gate_works() {
        let clock = StepClock::new(u32::MAX - 10, 3);
        let gate = TimingGate::start(&clock);
        gate.wait_until(&clock, 100);
        assert!(gate.elapsed(&clock) >= 100);
        let mut gate = gate;
        gate.restart(&clock);
        let elapsed = gate.elapsed(&clock);
        assert!(elapsed < 10, "{}", elapsed);
        gate.wait_until(&clock, 0);
    }

    #[test]
    fn clock_meter_works() {
        let mut meter = ClockMeter::new(1000, u32::MAX - 500_000, ClockMeter::DEFAULT_INTERVAL_MICROS);
        assert_eq!(meter.measure(500_000, 400_000), None);
        assert_eq!(meter.measure(1000 + 985_248, 499_999), Some(PAL_CLOCK_HZ));
        assert_eq!(meter.measure(1000 + 985_248 * 3, 499_999 + 2_000_000), Some(PAL_CLOCK_HZ));
        assert_eq!(meter.measure(0, 499_999 + 3_000_000), None);
    }

    #[test]
    fn hardware_revision_selects_timings() {
        let a = CycleTimings::new(1, 2, 3);
        let b = CycleTimings::new(4, 5, 6);
        assert_eq!(HardwareRevision::Rpi3B.select(a, b), a);
        assert_eq!(HardwareRevision::Rpi3BPlus.select(a, b), b);
        assert_eq!(HardwareRevision::default(), HardwareRevision::BUILD);
    }
}
