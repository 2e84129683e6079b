/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
use std::collections::VecDeque;

use super::{BusPort, BusSnapshot, DataDirection, OutputLines};

/// An action performed on a [SimulatedPort].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortAction {
    Sample(BusSnapshot),
    Drive { mask: OutputLines, values: u32 },
    Release,
    AddressMux(bool),
    Direction(DataDirection),
}

/// A [BusPort] replaying queued samples and recording every action.
///
/// When the queue runs dry [SimulatedPort::sample_inputs] returns the idle sample.
#[derive(Clone, Debug)]
pub struct SimulatedPort {
    pub inputs: VecDeque<BusSnapshot>,
    pub idle: BusSnapshot,
    pub actions: Vec<PortAction>,
    levels: u32,
}

impl Default for SimulatedPort {
    fn default() -> Self {
        SimulatedPort {
            inputs: VecDeque::new(),
            idle: BusSnapshot::idle(),
            actions: Vec::new(),
            levels: (OutputLines::BUFFER_OE|OutputLines::GAME|OutputLines::EXROM|OutputLines::LATCH_LE).bits()
        }
    }
}

impl SimulatedPort {
    pub fn new() -> Self {
        Self::default()
    }
    /// Appends samples to be returned by the following calls to `sample_inputs`.
    pub fn queue<I: IntoIterator<Item=BusSnapshot>>(&mut self, samples: I) {
        self.inputs.extend(samples)
    }
    /// Returns the current level of the given output line.
    pub fn output_level(&self, line: OutputLines) -> bool {
        self.levels & line.bits() == line.bits()
    }
    /// Returns the data byte most recently driven on the bus.
    pub fn driven_data(&self) -> Option<u8> {
        self.actions.iter().rev().find_map(|action| match *action {
            PortAction::Drive { mask, values } if mask.contains(OutputLines::DATA) => {
                Some(BusSnapshot(values).data())
            }
            _ => None
        })
    }
    /// Returns `true` if the data buffer is currently enabled.
    pub fn buffer_enabled(&self) -> bool {
        !self.output_level(OutputLines::BUFFER_OE)
    }
    /// Removes and returns all recorded actions.
    pub fn take_actions(&mut self) -> Vec<PortAction> {
        core::mem::take(&mut self.actions)
    }
}

impl BusPort for SimulatedPort {
    fn sample_inputs(&mut self) -> BusSnapshot {
        let sample = self.inputs.pop_front().unwrap_or(self.idle);
        self.actions.push(PortAction::Sample(sample));
        sample
    }

    fn drive_outputs(&mut self, mask: OutputLines, values: u32) {
        self.levels = self.levels & !mask.bits() | values & mask.bits();
        self.actions.push(PortAction::Drive { mask, values });
    }

    fn release_outputs(&mut self) {
        self.levels |= OutputLines::BUFFER_OE.bits();
        self.actions.push(PortAction::Release);
    }

    fn switch_address_mux(&mut self, high: bool) {
        if high {
            self.levels |= OutputLines::ADDRESS_MUX.bits();
        }
        else {
            self.levels &= !OutputLines::ADDRESS_MUX.bits();
        }
        self.actions.push(PortAction::AddressMux(high));
    }

    fn set_data_direction(&mut self, direction: DataDirection) {
        self.actions.push(PortAction::Direction(direction));
    }
}
