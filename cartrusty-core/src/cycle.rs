/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! The bus-cycle state machine run on every falling edge of the host's clock.
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use crate::bus::{encode_data, BusAccess, BusPort, CycleSample, DataDirection, ExpansionDevice, OutputLines};
use crate::clock::{CycleClock, TimingGate};

/// The number of consecutive cycles with `RESET` held that must be exceeded to reset a device.
pub const RESET_THRESHOLD: u32 = 3;

/// Counts consecutive bus cycles sampled with the host's `RESET` line asserted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResetCounter {
    count: u32
}

impl ResetCounter {
    /// Registers the state of the `RESET` line.
    ///
    /// Returns `true` once the line was held for more than [RESET_THRESHOLD] consecutive
    /// cycles and starts counting anew.
    #[inline]
    pub fn observe(&mut self, asserted: bool) -> bool {
        if !asserted {
            self.count = 0;
            return false
        }
        self.count += 1;
        if self.count > RESET_THRESHOLD {
            self.count = 0;
            true
        }
        else {
            false
        }
    }
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// The result of handling a single clock edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The edge was sampled in the wrong clock phase and was ignored.
    Spurious,
    /// The cycle was not addressed to the device.
    Unclaimed,
    /// The device served a read with the data byte.
    Read(BusAccess, u8),
    /// The device received a write of the data byte.
    Written(BusAccess, u8),
}

/// Drives an [ExpansionDevice] through the steps of each bus cycle.
///
/// The machine owns the valid-cycle counter used as the time-stamp of the cycle and
/// the reset detector.
#[derive(Clone, Debug, Default)]
pub struct BusCycleMachine {
    cycles: u64,
    resets: u64,
    reset_counter: ResetCounter,
}

impl BusCycleMachine {
    pub fn new() -> Self {
        Self::default()
    }
    /// Returns the number of valid bus cycles handled so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
    /// Returns how many times the device has been reset by the host.
    pub fn resets(&self) -> u64 {
        self.resets
    }
    /// Handles a single falling edge of the host's clock.
    ///
    /// Must be called as soon as possible after the edge; all cycle offsets of the
    /// device's [timings][ExpansionDevice::timings] are measured from the start of this call.
    pub fn handle_cycle<P, C, D>(&mut self, port: &mut P, clock: &C, device: &mut D) -> CycleOutcome
        where P: BusPort, C: CycleClock, D: ExpansionDevice + ?Sized
    {
        let gate = TimingGate::start(clock);
        let muxed = device.uses_address_mux();
        if muxed {
            port.switch_address_mux(true);
        }
        let early = port.sample_inputs();
        if !early.phase_valid() {
            port.release_outputs();
            if muxed {
                port.switch_address_mux(false);
            }
            return CycleOutcome::Spurious
        }

        self.cycles += 1;
        let timestamp = self.cycles;
        let reset = self.reset_counter.observe(early.reset());
        device.on_cycle(timestamp, early.address_low());

        let timings = device.timings();
        gate.wait_until(clock, timings.settle);
        let settled = port.sample_inputs();
        let sample = CycleSample::new(early, settled, muxed);

        let outcome = match device.claim(&sample) {
            None => {
                if muxed {
                    port.switch_address_mux(false);
                }
                CycleOutcome::Unclaimed
            }
            Some(access) if sample.is_read() => {
                let data = device.read(access);
                let mut mask = OutputLines::DATA|OutputLines::BUFFER_OE;
                if muxed {
                    mask |= OutputLines::ADDRESS_MUX;
                }
                port.drive_outputs(mask, encode_data(data));
                gate.wait_until(clock, timings.read_hold);
                port.release_outputs();
                CycleOutcome::Read(access, data)
            }
            Some(access) => {
                port.set_data_direction(DataDirection::Input);
                let mut mask = OutputLines::BUFFER_OE;
                if muxed {
                    mask |= OutputLines::ADDRESS_MUX;
                }
                port.drive_outputs(mask, 0);
                gate.wait_until(clock, timings.write_sample);
                let data = port.sample_inputs().data();
                port.release_outputs();
                port.set_data_direction(DataDirection::Output);
                device.write(access, data, timestamp);
                CycleOutcome::Written(access, data)
            }
        };

        if reset {
            self.resets += 1;
            debug!("host reset at bus cycle {}", self.cycles());
            device.reset();
        }
        device.deferred_output(port);
        outcome
    }
}
