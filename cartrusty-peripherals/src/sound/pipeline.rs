/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
use core::fmt;
use core::sync::atomic::Ordering;
use std::sync::Arc;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use arrayvec::ArrayVec;

use cartrusty_core::audio::{clamp_sample, AudioSink};

use super::{
    ChipEngine, ChipSelector, EventConsumer, MixerMode, RegisterEvent, SharedState, SoundConfig
};

/// The maximum number of chip engines attached to a pipeline.
pub const MAX_ENGINES: usize = 3;
/// SID registers refreshed in the read-back file on every step: the paddles `POTX` and `POTY`.
pub const STATUS_REGISTERS: [u8;2] = [27, 28];

/// A chip engine attached to the pipeline.
pub struct EngineSlot {
    pub selector: ChipSelector,
    pub engine: Box<dyn ChipEngine + Send>,
}

impl fmt::Debug for EngineSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineSlot {{ selector: {:?} }}", self.selector)
    }
}

/// The background half of the sound chips.
///
/// Emulates the attached chips in fixed steps of bus cycles, applying the recorded
/// register writes once the emulated time reaches their time-stamps, and produces
/// one stereo sample each time the emulated time crosses a sample boundary.
#[derive(Debug)]
pub struct SoundPipeline {
    consumer: EventConsumer,
    shared: Arc<SharedState>,
    engines: ArrayVec<EngineSlot, MAX_ENGINES>,
    emulated_cycles: u64,
    samples_elapsed: u64,
    applied_events: u64,
    reported_drops: u32,
    step_cycles: u32,
    sample_rate: u32,
    clock_hz: u32,
    mixer: MixerMode,
}

impl SoundPipeline {
    pub(crate) fn new(consumer: EventConsumer, shared: Arc<SharedState>, config: &SoundConfig) -> Self {
        SoundPipeline {
            consumer,
            shared,
            engines: ArrayVec::new(),
            emulated_cycles: 0,
            samples_elapsed: 0,
            applied_events: 0,
            reported_drops: 0,
            step_cycles: config.step_cycles.max(1),
            sample_rate: config.sample_rate,
            clock_hz: config.clock_hz.max(1),
            mixer: config.mixer,
        }
    }
    /// Attaches the `engine` emulating the chip `selector`, replacing one attached before.
    ///
    /// Returns the replaced engine.
    pub fn attach(
            &mut self,
            selector: ChipSelector,
            mut engine: Box<dyn ChipEngine + Send>
        ) -> Option<Box<dyn ChipEngine + Send>>
    {
        engine.set_sampling_parameters(self.clock_hz, self.sample_rate);
        if let Some(slot) = self.engines.iter_mut().find(|slot| slot.selector == selector) {
            return Some(core::mem::replace(&mut slot.engine, engine))
        }
        // there are as many slots as selectors
        let _ = self.engines.try_push(EngineSlot { selector, engine });
        None
    }
    /// Returns the engine emulating the chip `selector`.
    pub fn engine_mut(&mut self, selector: ChipSelector) -> Option<&mut (dyn ChipEngine + Send + 'static)> {
        self.engines.iter_mut()
                    .find(|slot| slot.selector == selector)
                    .map(|slot| &mut *slot.engine)
    }
    pub fn emulated_cycles(&self) -> u64 {
        self.emulated_cycles
    }
    /// Returns the number of samples produced, counted from the start of emulation.
    pub fn samples_elapsed(&self) -> u64 {
        self.samples_elapsed
    }
    /// Returns the number of register writes applied to the engines.
    pub fn applied_events(&self) -> u64 {
        self.applied_events
    }
    /// Returns the number of events waiting in the ring.
    pub fn pending_events(&self) -> usize {
        self.consumer.len()
    }
    /// Returns the bus cycle count most recently published by the real-time handler.
    pub fn bus_cycles(&self) -> u64 {
        self.shared.bus_cycles.load(Ordering::Acquire)
    }
    /// Returns the value the real-time handler answers to reads of the first SID's register `reg`.
    pub fn read_back(&self, reg: u8) -> u8 {
        self.shared.read_back[usize::from(reg & 31)].load(Ordering::Relaxed)
    }
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }
    /// Updates the bus clock frequency, e.g. measured with a [ClockMeter][cartrusty_core::clock::ClockMeter].
    pub fn set_clock_hz(&mut self, clock_hz: u32) {
        if clock_hz == 0 || clock_hz == self.clock_hz {
            return
        }
        info!("bus clock frequency: {} Hz", clock_hz);
        self.clock_hz = clock_hz;
        self.samples_elapsed = self.sample_clock();
        let sample_rate = self.sample_rate;
        for slot in self.engines.iter_mut() {
            slot.engine.set_sampling_parameters(clock_hz, sample_rate);
        }
    }
    /// Silences all the engines. The event ring is left untouched.
    pub fn reset_engines(&mut self) {
        for slot in self.engines.iter_mut() {
            slot.engine.reset();
        }
    }
    /// Runs a single iteration of the background loop.
    ///
    /// Handles the host's reset request, reports events lost since the last call and catches
    /// the emulation up with the published bus cycle count. Returns the number of samples produced.
    pub fn run_once<S: AudioSink + ?Sized>(&mut self, sink: &mut S) -> usize {
        if self.shared.reset.take() {
            debug!("sound chips reset by the host");
            self.reset_engines();
        }
        let dropped = self.consumer.dropped();
        if dropped != self.reported_drops {
            error!("register event ring overflow: {} events lost", dropped.wrapping_sub(self.reported_drops));
            self.reported_drops = dropped;
        }
        let target = self.bus_cycles();
        self.advance_to(target, sink)
    }
    /// Emulates the chips until the emulated cycle count reaches `target`.
    ///
    /// Every event with a time-stamp not later than the emulated cycle count after a step
    /// is applied before the next step. Returns the number of samples produced.
    pub fn advance_to<S: AudioSink + ?Sized>(&mut self, target: u64, sink: &mut S) -> usize {
        let mut produced = 0;
        while self.emulated_cycles < target {
            self.step();
            let elapsed = self.sample_clock();
            while self.samples_elapsed < elapsed {
                let (left, right) = self.mix();
                sink.put_sample(left, right);
                self.samples_elapsed += 1;
                produced += 1;
            }
        }
        produced
    }

    #[inline]
    fn sample_clock(&self) -> u64 {
        self.emulated_cycles * u64::from(self.sample_rate) / u64::from(self.clock_hz)
    }

    fn step(&mut self) {
        let step = self.step_cycles;
        for slot in self.engines.iter_mut() {
            slot.engine.clock(step);
        }
        self.emulated_cycles += u64::from(step);
        if let Some(slot) = self.engines.iter_mut().find(|slot| slot.selector == ChipSelector::Sid1) {
            for &reg in STATUS_REGISTERS.iter() {
                let value = slot.engine.read(reg);
                self.shared.read_back[usize::from(reg)].store(value, Ordering::Relaxed);
            }
        }
        while let Some(event) = self.consumer.pop_due(self.emulated_cycles) {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: RegisterEvent) {
        let reg = event.register();
        match self.engines.iter_mut().find(|slot| slot.selector == event.selector) {
            Some(slot) => slot.engine.write(reg, event.data),
            None => trace!("no engine for {:?}", event)
        }
        if event.selector == ChipSelector::Sid1 {
            self.shared.read_back[usize::from(reg)].store(event.data, Ordering::Relaxed);
        }
        self.applied_events += 1;
    }

    fn output_of(&mut self, selector: ChipSelector) -> Option<i32> {
        self.engine_mut(selector).map(|engine| i32::from(engine.output()))
    }

    fn mix(&mut self) -> (i16, i16) {
        let sid1 = self.output_of(ChipSelector::Sid1);
        let sid2 = self.output_of(ChipSelector::Sid2);
        let fm = self.output_of(ChipSelector::Fm);
        match self.mixer {
            MixerMode::Mono => {
                let (sum, count) = [sid1, sid2, fm].iter().flatten()
                                   .fold((0i32, 0i32), |(sum, count), &v| (sum + v, count + 1));
                let mono = if count == 0 { 0 } else { clamp_sample(sum / count) };
                (mono, mono)
            }
            MixerMode::SidStereo => {
                let left = sid1.unwrap_or(0);
                let right = sid2.or(sid1).unwrap_or(0);
                match fm {
                    Some(fm) => (clamp_sample((left + fm / 2) * 2 / 3), clamp_sample((right + fm / 2) * 2 / 3)),
                    None => (clamp_sample(left), clamp_sample(right))
                }
            }
        }
    }
}
