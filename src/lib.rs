/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    CARTRUSTY is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    CARTRUSTY is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
//! CARTRUSTY emulates C64 expansion port hardware on a Raspberry Pi wired directly to the bus.
//!
//! A single real-time handler is invoked on every falling edge of the host's `PHI2` clock.
//! It samples the bus through a [BusPort][bus::BusPort], lets the selected device
//! personality decide whether the cycle belongs to it, and answers or captures the data
//! within the calibrated cycle offsets of the hardware revision.
//!
//! Three personalities are available:
//!
//! * [BankSwitchCartridge][peripherals::cartridge::BankSwitchCartridge] serves a ROM image
//!   loaded from a `.CRT` file: generic 8K/16K cartridges, Magic Desk and EasyFlash.
//! * [GeoRam][peripherals::georam::GeoRam] provides a GeoRAM/NeoRAM compatible RAM expansion.
//! * [SoundCapture][peripherals::sound::SoundCapture] records register writes of up to two SIDs
//!   and an FM chip, replayed by the [SoundPipeline][peripherals::sound::SoundPipeline] running
//!   in the background loop.
//!
//! Use [ExpansionConfig] to describe the personality and [Expansion::assemble] to build the
//! real-time handler and the background loop from it.
pub use cartrusty_core::{audio, bus, clock, cycle, memory, sync};

pub use cartrusty_formats as formats;
pub use cartrusty_peripherals as peripherals;

pub mod config;
pub mod expansion;

pub use config::*;
pub use expansion::*;
