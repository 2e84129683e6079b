/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
use core::fmt;
use core::sync::atomic::Ordering;
use std::sync::Arc;

use cartrusty_core::bus::{BusAccess, CycleSample, ExpansionDevice, Region};
use cartrusty_core::clock::{CycleTimings, HardwareRevision};

use super::{ChipSelector, EventProducer, RegisterEvent, SharedState, SoundConfig, SID_REGISTERS};

/// SID cycle timings on the Raspberry Pi 3B.
pub const TIMINGS_RPI3B: CycleTimings = CycleTimings::new(45, 690, 500);
/// SID cycle timings on the Raspberry Pi 3B+.
pub const TIMINGS_RPI3B_PLUS: CycleTimings = CycleTimings::new(90, 805, 570);
/// The address bit selecting the second SID.
pub const SID2_ADDRESS_BIT: u8 = 0x20;
/// The `IO2` address of the FM chip status register.
pub const FM_STATUS_ADDRESS: u8 = 0x60;
/// The FM status register values answered alternately, satisfying detection routines.
pub const FM_STATUS_TOGGLE: u8 = 0xc0;

/// The real-time half of the sound chips.
///
/// Every write to the sound chips is appended with the bus cycle time-stamp to the event ring.
/// Reads are answered from the read-back registers kept up to date by the pipeline.
pub struct SoundCapture {
    producer: EventProducer,
    shared: Arc<SharedState>,
    dual_sid: bool,
    fm: bool,
    fm_status: u8,
    timings: CycleTimings,
}

impl fmt::Debug for SoundCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundCapture")
         .field("producer", &self.producer)
         .field("dual_sid", &self.dual_sid)
         .field("fm", &self.fm)
         .finish()
    }
}

impl SoundCapture {
    pub(crate) fn new(producer: EventProducer, shared: Arc<SharedState>, config: &SoundConfig) -> Self {
        SoundCapture {
            producer,
            shared,
            dual_sid: config.dual_sid,
            fm: config.fm,
            fm_status: 0,
            timings: HardwareRevision::BUILD.select(TIMINGS_RPI3B, TIMINGS_RPI3B_PLUS),
        }
    }
    /// Overrides the cycle timings, e.g. for another hardware revision.
    pub fn with_timings(mut self, timings: CycleTimings) -> Self {
        self.timings = timings;
        self
    }
    /// Returns the number of writes lost because the event ring was full.
    pub fn dropped_events(&self) -> u32 {
        self.producer.dropped()
    }
    /// Returns the number of events waiting in the ring.
    pub fn pending_events(&self) -> usize {
        self.producer.len()
    }
    /// Returns the most recently published bus cycle count.
    pub fn bus_cycles(&self) -> u64 {
        self.shared.bus_cycles.load(Ordering::Acquire)
    }

    fn selector(&self, access: BusAccess) -> ChipSelector {
        match access.region {
            Region::Io2 => ChipSelector::Fm,
            _ if self.dual_sid && access.address as u8 & SID2_ADDRESS_BIT != 0 => ChipSelector::Sid2,
            _ => ChipSelector::Sid1
        }
    }
}

impl ExpansionDevice for SoundCapture {
    #[inline]
    fn timings(&self) -> CycleTimings {
        self.timings
    }

    #[inline(always)]
    fn on_cycle(&mut self, timestamp: u64, _address_low: u8) {
        self.shared.bus_cycles.store(timestamp, Ordering::Release);
    }

    #[inline]
    fn claim(&self, sample: &CycleSample) -> Option<BusAccess> {
        let address = sample.address_low();
        if sample.chip_select() {
            Some(BusAccess::new(Region::ChipSelect, u16::from(address & 0x3f)))
        }
        else if self.fm && sample.io2() && (!sample.is_read() || address == FM_STATUS_ADDRESS) {
            Some(BusAccess::new(Region::Io2, u16::from(address)))
        }
        else {
            None
        }
    }

    #[inline]
    fn read(&mut self, access: BusAccess) -> u8 {
        match access.region {
            Region::ChipSelect => {
                // the second SID's window reads back the first SID's registers
                self.shared.read_back[usize::from(access.address) % SID_REGISTERS].load(Ordering::Relaxed)
            }
            Region::Io2 => {
                let status = self.fm_status;
                self.fm_status = FM_STATUS_TOGGLE - status;
                status
            }
            _ => 0xff
        }
    }

    #[inline]
    fn write(&mut self, access: BusAccess, data: u8, timestamp: u64) {
        let event = RegisterEvent::new(timestamp, self.selector(access), access.address as u8 & 0x1f, data);
        // a rejected event is counted by the ring and reported by the pipeline
        let _ = self.producer.push(event);
    }

    fn reset(&mut self) {
        self.fm_status = 0;
        self.shared.reset.raise();
    }
}
