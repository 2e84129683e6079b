/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! Sound chips attached to the expansion port: up to two SIDs and an FM chip.
//!
//! The real-time part, [SoundCapture], only records time-stamped register writes into
//! the [event ring][ring] and answers register reads from a shared read-back file.
//! The chip emulation runs in the background in [SoundPipeline], which replays the
//! recorded writes at their bus cycle time-stamps while generating audio samples.
//!
//! Use [sound_chips] to create the connected pair.
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicU8};
use std::sync::Arc;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use cartrusty_core::clock::PAL_CLOCK_HZ;
use cartrusty_core::sync::Flag;

pub mod capture;
pub mod engine;
pub mod pipeline;
pub mod ring;

pub use capture::*;
pub use engine::*;
pub use pipeline::*;
pub use ring::*;

/// The number of registers of a single SID.
pub const SID_REGISTERS: usize = 32;
/// The default capacity of the event ring.
pub const DEFAULT_RING_CAPACITY: usize = 128 * 1024;
/// The default audio sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
/// The default number of bus cycles emulated in one step of the pipeline.
pub const DEFAULT_STEP_CYCLES: u32 = 2;

/// The chip addressed by a register write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum ChipSelector {
    Sid1,
    Sid2,
    Fm
}

impl Default for ChipSelector {
    fn default() -> Self {
        ChipSelector::Sid1
    }
}

/// A time-stamped register write of a sound chip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct RegisterEvent {
    /// The number of valid bus cycles counted up to and including the write.
    pub timestamp: u64,
    /// The address bits of the register.
    pub address: u8,
    pub data: u8,
    pub selector: ChipSelector,
}

impl RegisterEvent {
    #[inline]
    pub const fn new(timestamp: u64, selector: ChipSelector, address: u8, data: u8) -> Self {
        RegisterEvent { timestamp, address, data, selector }
    }
    /// Returns the register number of the addressed chip.
    ///
    /// For the FM chip that is the port: 0 for the address and 1 for the data port,
    /// selected by the address bit 4.
    #[inline]
    pub fn register(&self) -> u8 {
        match self.selector {
            ChipSelector::Fm => (self.address >> 4) & 1,
            _ => self.address & 31
        }
    }
}

/// How the chip outputs are mixed into the stereo samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "kebab-case"))]
pub enum MixerMode {
    /// The average of all chips in both channels.
    Mono,
    /// The first SID on the left and the second SID on the right with the FM chip in the center.
    SidStereo
}

impl Default for MixerMode {
    fn default() -> Self {
        MixerMode::Mono
    }
}

/// The configuration of the sound chips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
pub struct SoundConfig {
    /// The audio sample rate in Hz.
    pub sample_rate: u32,
    /// The initial host clock frequency in Hz; may be updated by measurement.
    pub clock_hz: u32,
    /// The capacity of the event ring, a power of two.
    pub ring_capacity: usize,
    /// Whether the second SID responds to addresses with the bit 5 set.
    pub dual_sid: bool,
    /// Whether the FM chip responds in `IO2`.
    pub fm: bool,
    pub mixer: MixerMode,
    /// The number of bus cycles emulated in one step.
    pub step_cycles: u32,
}

impl Default for SoundConfig {
    fn default() -> Self {
        SoundConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            clock_hz: PAL_CLOCK_HZ,
            ring_capacity: DEFAULT_RING_CAPACITY,
            dual_sid: true,
            fm: true,
            mixer: MixerMode::default(),
            step_cycles: DEFAULT_STEP_CYCLES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoundConfigError {
    RingCapacity(usize),
    SampleRate(u32),
    ClockFrequency(u32),
    StepCycles(u32),
}

impl std::error::Error for SoundConfigError {}

impl fmt::Display for SoundConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoundConfigError::RingCapacity(cap) => write!(f,
                "event ring capacity must be a non-zero power of two: {}", cap),
            SoundConfigError::SampleRate(rate) => write!(f,
                "sample rate must be non-zero and lower than the clock frequency: {}", rate),
            SoundConfigError::ClockFrequency(hz) => write!(f,
                "clock frequency must be non-zero: {}", hz),
            SoundConfigError::StepCycles(cycles) => write!(f,
                "emulation step must be between 1 and 64 cycles: {}", cycles),
        }
    }
}

impl SoundConfig {
    pub fn validate(&self) -> Result<(), SoundConfigError> {
        if !self.ring_capacity.is_power_of_two() {
            return Err(SoundConfigError::RingCapacity(self.ring_capacity))
        }
        if self.clock_hz == 0 {
            return Err(SoundConfigError::ClockFrequency(self.clock_hz))
        }
        if self.sample_rate == 0 || self.sample_rate >= self.clock_hz {
            return Err(SoundConfigError::SampleRate(self.sample_rate))
        }
        if self.step_cycles == 0 || self.step_cycles > 64 {
            return Err(SoundConfigError::StepCycles(self.step_cycles))
        }
        Ok(())
    }
}

/// The state shared between [SoundCapture] and [SoundPipeline] besides the event ring.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    /// The valid bus cycle count published by the real-time handler.
    pub bus_cycles: AtomicU64,
    /// The register values answered to the host's reads of the first SID.
    pub read_back: [AtomicU8; SID_REGISTERS],
    /// Raised by the real-time handler when the host reset its sound chips.
    pub reset: Flag,
}

/// Creates the connected real-time capture device and the background pipeline.
///
/// The pipeline starts without any chip engines; attach them with [SoundPipeline::attach].
pub fn sound_chips(config: &SoundConfig) -> Result<(SoundCapture, SoundPipeline), SoundConfigError> {
    config.validate()?;
    let (producer, consumer) = event_ring(config.ring_capacity)
                               .map_err(|_| SoundConfigError::RingCapacity(config.ring_capacity))?;
    let shared = Arc::new(SharedState::default());
    let capture = SoundCapture::new(producer, Arc::clone(&shared), config);
    let pipeline = SoundPipeline::new(consumer, shared, config);
    Ok((capture, pipeline))
}
