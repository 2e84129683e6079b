/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! Start-up assembly of the real-time handler and the background loop.
use std::fs::File;
use std::io::{BufReader, Read};

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use crate::audio::AudioSink;
use crate::bus::{BusAccess, BusPort, CycleSample, ExpansionDevice};
use crate::clock::{ClockMeter, CycleClock, CycleTimings};
use crate::cycle::{BusCycleMachine, CycleOutcome};
use crate::formats::crt::read_crt;
use crate::memory::CartridgeImage;
use crate::peripherals::cartridge::BankSwitchCartridge;
use crate::peripherals::georam::GeoRam;
use crate::peripherals::sound::{
    sound_chips, ChipSelector, NullEngine, SoundCapture, SoundConfig, SoundPipeline
};
use crate::config::{ConfigError, ExpansionConfig, LoadError};

/// The device personality answering the bus cycles, selected once at start-up.
#[derive(Debug)]
pub enum Personality {
    BankSwitch(BankSwitchCartridge),
    RamWindow(GeoRam),
    SoundChips(SoundCapture),
}

macro_rules! delegate {
    ($personality:expr, $device:ident => $call:expr) => {
        match $personality {
            Personality::BankSwitch($device) => $call,
            Personality::RamWindow($device) => $call,
            Personality::SoundChips($device) => $call,
        }
    };
}

impl Personality {
    pub fn name(&self) -> &'static str {
        match self {
            Personality::BankSwitch(..) => "bank-switch",
            Personality::RamWindow(..) => "ram-window",
            Personality::SoundChips(..) => "sound-chips",
        }
    }
}

impl ExpansionDevice for Personality {
    #[inline]
    fn timings(&self) -> CycleTimings {
        delegate!(self, dev => dev.timings())
    }
    #[inline]
    fn uses_address_mux(&self) -> bool {
        delegate!(self, dev => dev.uses_address_mux())
    }
    #[inline(always)]
    fn on_cycle(&mut self, timestamp: u64, address_low: u8) {
        delegate!(self, dev => dev.on_cycle(timestamp, address_low))
    }
    #[inline]
    fn claim(&self, sample: &CycleSample) -> Option<BusAccess> {
        delegate!(self, dev => dev.claim(sample))
    }
    #[inline]
    fn read(&mut self, access: BusAccess) -> u8 {
        delegate!(self, dev => dev.read(access))
    }
    #[inline]
    fn write(&mut self, access: BusAccess, data: u8, timestamp: u64) {
        delegate!(self, dev => dev.write(access, data, timestamp))
    }
    #[inline]
    fn deferred_output(&mut self, port: &mut dyn BusPort) {
        delegate!(self, dev => dev.deferred_output(port))
    }
    fn reset(&mut self) {
        delegate!(self, dev => dev.reset())
    }
}

impl From<BankSwitchCartridge> for Personality {
    fn from(cart: BankSwitchCartridge) -> Self {
        Personality::BankSwitch(cart)
    }
}

impl From<GeoRam> for Personality {
    fn from(ram: GeoRam) -> Self {
        Personality::RamWindow(ram)
    }
}

impl From<SoundCapture> for Personality {
    fn from(capture: SoundCapture) -> Self {
        Personality::SoundChips(capture)
    }
}

/// The handler of the host's clock edges. Owns all of the real-time state.
#[derive(Debug)]
pub struct RealTimeHandler {
    machine: BusCycleMachine,
    personality: Personality,
}

impl RealTimeHandler {
    pub fn new<P: Into<Personality>>(personality: P) -> Self {
        RealTimeHandler { machine: BusCycleMachine::new(), personality: personality.into() }
    }
    /// Handles a single falling edge of the host's clock. Call it from the edge interrupt.
    #[inline]
    pub fn on_clock_edge<P: BusPort, C: CycleClock>(&mut self, port: &mut P, clock: &C) -> CycleOutcome {
        self.machine.handle_cycle(port, clock, &mut self.personality)
    }
    pub fn machine(&self) -> &BusCycleMachine {
        &self.machine
    }
    pub fn personality(&self) -> &Personality {
        &self.personality
    }
    pub fn personality_mut(&mut self) -> &mut Personality {
        &mut self.personality
    }
    pub fn into_personality(self) -> Personality {
        self.personality
    }
}

/// The work done outside of the real-time handler.
#[derive(Debug)]
pub enum BackgroundLoop {
    /// Nothing to do: the personality completes all its work within the bus cycles.
    Idle,
    Sound(SoundPipeline),
}

impl BackgroundLoop {
    /// Runs a single iteration. Returns the number of audio samples produced.
    pub fn run_once<S: AudioSink + ?Sized>(&mut self, sink: &mut S) -> usize {
        match self {
            BackgroundLoop::Idle => 0,
            BackgroundLoop::Sound(pipeline) => pipeline.run_once(sink)
        }
    }
    /// Feeds the `meter` with the bus cycle count and the microsecond timer reading.
    ///
    /// Updates the sampling clock when a new frequency has been measured.
    pub fn calibrate(&mut self, meter: &mut ClockMeter, micros: u32) -> Option<u32> {
        match self {
            BackgroundLoop::Idle => None,
            BackgroundLoop::Sound(pipeline) => {
                let hz = meter.measure(pipeline.bus_cycles(), micros)?;
                pipeline.set_clock_hz(hz);
                Some(hz)
            }
        }
    }
    pub fn sound_pipeline(&self) -> Option<&SoundPipeline> {
        match self {
            BackgroundLoop::Sound(pipeline) => Some(pipeline),
            _ => None
        }
    }
    pub fn sound_pipeline_mut(&mut self) -> Option<&mut SoundPipeline> {
        match self {
            BackgroundLoop::Sound(pipeline) => Some(pipeline),
            _ => None
        }
    }
}

/// The assembled expansion: the real-time handler and the background loop.
#[derive(Debug)]
pub struct Expansion {
    pub handler: RealTimeHandler,
    pub background: BackgroundLoop,
}

impl Expansion {
    /// Builds the expansion described by `config`, loading the cartridge image if needed.
    ///
    /// The sound chips personality gets silent [NullEngine]s attached; replace them with
    /// [SoundPipeline::attach] to hear anything.
    pub fn assemble(config: &ExpansionConfig) -> Result<Self, LoadError> {
        config.validate()?;
        info!("expansion personality: {}", config.personality());
        match config {
            ExpansionConfig::BankSwitch { image, jumper } => {
                debug!("loading cartridge image: {}", image.display());
                let file = File::open(image)?;
                Self::from_crt(BufReader::new(file), *jumper)
            }
            ExpansionConfig::RamWindow { size_kib } => {
                Ok(Self::ram_window(*size_kib)?)
            }
            ExpansionConfig::SoundChips(sound) => {
                Ok(Self::sound_chips(sound)?)
            }
        }
    }
    /// Builds the bank-switch cartridge from the `.CRT` data read from `rd`.
    pub fn from_crt<R: Read>(rd: R, jumper: bool) -> Result<Self, LoadError> {
        let image = read_crt(rd)?;
        Ok(Self::cartridge(&image, jumper))
    }
    /// Builds the bank-switch cartridge from the loaded `image`.
    pub fn cartridge(image: &CartridgeImage, jumper: bool) -> Self {
        info!("cartridge: {:?} {:?} banks: {} jumper: {}",
              image.name, image.bankswitch, image.bank_count(), jumper);
        let cart = BankSwitchCartridge::new(image, jumper);
        Expansion {
            handler: RealTimeHandler::new(cart),
            background: BackgroundLoop::Idle
        }
    }
    /// Builds the RAM expansion with a pool of `size_kib` kilobytes.
    pub fn ram_window(size_kib: u32) -> Result<Self, ConfigError> {
        let ram = GeoRam::new(size_kib)?;
        info!("RAM expansion: {} KB", size_kib);
        Ok(Expansion {
            handler: RealTimeHandler::new(ram),
            background: BackgroundLoop::Idle
        })
    }
    /// Builds the sound chips with silent engines attached for each configured chip.
    pub fn sound_chips(config: &SoundConfig) -> Result<Self, ConfigError> {
        let (capture, mut pipeline) = sound_chips(config)?;
        pipeline.attach(ChipSelector::Sid1, Box::new(NullEngine::default()));
        if config.dual_sid {
            pipeline.attach(ChipSelector::Sid2, Box::new(NullEngine::default()));
        }
        if config.fm {
            pipeline.attach(ChipSelector::Fm, Box::new(NullEngine::fm()));
        }
        info!("sound chips: dual SID: {} FM: {} mixer: {:?} sample rate: {} Hz",
              config.dual_sid, config.fm, config.mixer, config.sample_rate);
        Ok(Expansion {
            handler: RealTimeHandler::new(capture),
            background: BackgroundLoop::Sound(pipeline)
        })
    }
    pub fn into_parts(self) -> (RealTimeHandler, BackgroundLoop) {
        (self.handler, self.background)
    }
}
