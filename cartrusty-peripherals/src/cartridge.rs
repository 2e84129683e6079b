/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! Bank-switching ROM cartridges: generic, Magic Desk and EasyFlash.
//!
//! The cartridge serves its ROM banks through `ROML` and `ROMH` and exposes
//! the bank-switching registers in `IO1`. An EasyFlash cartridge additionally
//! provides 256 bytes of RAM in `IO2`.
//!
//! The `GAME` and `EXROM` lines are never changed while the bus cycle is in progress;
//! a change is deferred until after the bus has been released.
use bitflags::bitflags;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use cartrusty_core::bus::{
    BusAccess, BusPort, CycleSample, ExpansionDevice, OutputLines, Region
};
use cartrusty_core::clock::{CycleTimings, HardwareRevision};
use cartrusty_core::memory::{BankSwitchType, CartridgeImage, InterleavedBanks, RomHalf, RomLines, BANK_MASK};
use cartrusty_core::sync::Mailbox;

/// The size of the EasyFlash RAM in `IO2`.
pub const EXTRA_RAM_SIZE: usize = 256;
/// The significant bits of the EasyFlash mode register.
pub const MODE_MASK: u8 = 0x87;
/// The mode register bit selecting the mode from the register instead of the jumper.
pub const MODE_FROM_REGISTER: u8 = 0b100;
/// The mode register bit requesting the `EXROM` line asserted.
pub const MODE_EXROM: u8 = 0b010;
/// The mode register bit requesting the `GAME` line asserted.
pub const MODE_GAME: u8 = 0b001;
/// The Magic Desk register bit releasing the `EXROM` line.
pub const MAGIC_DESK_DISABLE: u8 = 0x80;

/// EasyFlash cycle timings on the Raspberry Pi 3B.
pub const TIMINGS_RPI3B: CycleTimings = CycleTimings::new(170, 620, 490);
/// EasyFlash cycle timings on the Raspberry Pi 3B+.
pub const TIMINGS_RPI3B_PLUS: CycleTimings = CycleTimings::new(200, 725, 570);

bitflags! {
    /// Levels of the memory configuration lines driven by the cartridge.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MemoryConfig: u8 {
        /// `GAME` is pulled low.
        const GAME_ASSERTED  = 0b01;
        /// `EXROM` is left high.
        const EXROM_RELEASED = 0b10;
    }
}

impl MemoryConfig {
    /// `EXROM` low, `GAME` high: 8 KB of ROM at `$8000`.
    pub const MODE_8K: MemoryConfig = MemoryConfig::empty();
    /// Both lines low: 16 KB of ROM at `$8000`.
    pub const MODE_16K: MemoryConfig = MemoryConfig::GAME_ASSERTED;
    /// `EXROM` high, `GAME` low: ROM at `$8000` and `$E000`, no RAM above `$1000`.
    pub const ULTIMAX: MemoryConfig = MemoryConfig::GAME_ASSERTED.union(MemoryConfig::EXROM_RELEASED);
    /// Both lines high: the cartridge ROM is invisible.
    pub const OFF: MemoryConfig = MemoryConfig::EXROM_RELEASED;

    /// Returns the output word with the `GAME` and `EXROM` pins at their levels.
    pub fn line_levels(self) -> u32 {
        let mut levels = 0;
        if self.contains(MemoryConfig::EXROM_RELEASED) {
            levels |= OutputLines::EXROM.bits();
        }
        if !self.contains(MemoryConfig::GAME_ASSERTED) {
            levels |= OutputLines::GAME.bits();
        }
        levels
    }
}

/// Memory configurations indexed by the boot jumper (bit 3) and the three low bits of the mode register.
///
/// With the jumper off and bit 2 of the mode register clear the cartridge boots in the Ultimax mode.
pub const MEMORY_CONFIGS: [MemoryConfig;16] = [
    MemoryConfig::ULTIMAX, MemoryConfig::ULTIMAX, MemoryConfig::MODE_16K, MemoryConfig::MODE_16K,
    MemoryConfig::OFF,     MemoryConfig::ULTIMAX, MemoryConfig::MODE_8K,  MemoryConfig::MODE_16K,
    MemoryConfig::OFF,     MemoryConfig::ULTIMAX, MemoryConfig::MODE_8K,  MemoryConfig::MODE_16K,
    MemoryConfig::OFF,     MemoryConfig::ULTIMAX, MemoryConfig::MODE_8K,  MemoryConfig::MODE_16K,
];

/// Returns the memory configuration selected by the boot `jumper` and the `mode` register.
#[inline]
pub fn memory_config(jumper: bool, mode: u8) -> MemoryConfig {
    MEMORY_CONFIGS[(usize::from(jumper) << 3) | usize::from(mode & 7)]
}

/// The register state of a bank-switching cartridge.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
pub struct BankSwitchState {
    /// The selected bank, 0 to 63.
    pub bank: u8,
    /// The mode register.
    pub mode: u8,
    /// The EasyFlash RAM in `IO2`.
    pub extra_ram: Box<[u8]>,
}

impl Default for BankSwitchState {
    fn default() -> Self {
        BankSwitchState {
            bank: 0,
            mode: 0,
            extra_ram: vec![0xff; EXTRA_RAM_SIZE].into_boxed_slice()
        }
    }
}

/// A bank-switching ROM cartridge built from a [CartridgeImage].
///
/// For images other than EasyFlash the initial mode is derived from the image's requested
/// line levels and the `IO1` register behaves like the Magic Desk bank register:
/// bits 0 to 5 select the bank and bit 7 releases the `EXROM` line, which disables
/// the ROM of an 8K image. The `GAME` line stays as requested by the image.
#[derive(Debug)]
pub struct BankSwitchCartridge {
    kind: BankSwitchType,
    rom_lines: RomLines,
    roms: InterleavedBanks,
    initial_mode: u8,
    jumper: bool,
    timings: CycleTimings,
    state: BankSwitchState,
    config: MemoryConfig,
    config_update: Mailbox,
}

impl BankSwitchCartridge {
    /// Creates the cartridge from the `image` with the boot `jumper` setting.
    pub fn new(image: &CartridgeImage, jumper: bool) -> Self {
        let initial_mode = match image.bankswitch {
            BankSwitchType::EasyFlash => 0,
            _ => {
                let mut mode = MODE_FROM_REGISTER;
                if image.exrom_asserted {
                    mode |= MODE_EXROM;
                }
                if image.game_asserted {
                    mode |= MODE_GAME;
                }
                mode
            }
        };
        let mut cart = BankSwitchCartridge {
            kind: image.bankswitch,
            rom_lines: image.rom_lines,
            roms: InterleavedBanks::from_image(image),
            initial_mode,
            jumper,
            timings: HardwareRevision::BUILD.select(TIMINGS_RPI3B, TIMINGS_RPI3B_PLUS),
            state: BankSwitchState::default(),
            config: MemoryConfig::OFF,
            config_update: Mailbox::new(),
        };
        cart.reset();
        cart
    }
    /// Overrides the cycle timings, e.g. for another hardware revision.
    pub fn with_timings(mut self, timings: CycleTimings) -> Self {
        self.timings = timings;
        self
    }
    pub fn kind(&self) -> BankSwitchType {
        self.kind
    }
    pub fn rom_lines(&self) -> RomLines {
        self.rom_lines
    }
    pub fn state(&self) -> &BankSwitchState {
        &self.state
    }
    /// Returns the memory configuration the `GAME` and `EXROM` lines are set to.
    pub fn memory_config(&self) -> MemoryConfig {
        self.config
    }
    /// Returns `true` if a change of the `GAME` and `EXROM` lines awaits being driven.
    pub fn is_config_pending(&self) -> bool {
        self.config_update.is_pending()
    }
    /// Loads every cache line of the selected bank.
    pub fn warm_selected_bank(&self) {
        self.roms.warm_bank(self.state.bank);
    }

    fn update_config(&mut self, force: bool) {
        let config = memory_config(self.jumper, self.state.mode);
        if force || config != self.config {
            self.config = config;
            self.config_update.post(config.bits());
        }
    }

    fn select_bank(&mut self, bank: u8) {
        self.state.bank = bank & BANK_MASK;
        self.roms.warm_bank(self.state.bank);
    }

    fn write_register(&mut self, address: u16, data: u8) {
        match self.kind {
            BankSwitchType::EasyFlash => {
                if address & 2 == 0 {
                    self.select_bank(data);
                }
                else {
                    self.state.mode = data & MODE_MASK;
                    self.update_config(false);
                }
            }
            _ => {
                // only EXROM follows the register, GAME keeps the image's level
                let exrom = if data & MAGIC_DESK_DISABLE == 0 { MODE_EXROM } else { 0 };
                self.state.mode = (self.state.mode & !MODE_EXROM) | exrom;
                self.select_bank(data);
                self.update_config(false);
            }
        }
    }
}

impl ExpansionDevice for BankSwitchCartridge {
    #[inline]
    fn timings(&self) -> CycleTimings {
        self.timings
    }

    #[inline]
    fn uses_address_mux(&self) -> bool {
        true
    }

    #[inline(always)]
    fn on_cycle(&mut self, _timestamp: u64, address_low: u8) {
        self.roms.prefetch(self.state.bank, address_low);
    }

    #[inline]
    fn claim(&self, sample: &CycleSample) -> Option<BusAccess> {
        if sample.is_read() {
            if sample.romh() && self.rom_lines.contains(RomLines::ROMH) {
                return Some(BusAccess::new(Region::RomHigh, sample.address() & 0x1fff))
            }
            if sample.roml() && self.rom_lines.contains(RomLines::ROML) {
                return Some(BusAccess::new(Region::RomLow, sample.address() & 0x1fff))
            }
        }
        let region = if sample.io1() {
            Region::Io1
        }
        else if sample.io2() {
            Region::Io2
        }
        else {
            return None
        };
        if sample.is_read() && self.kind != BankSwitchType::EasyFlash {
            return None
        }
        Some(BusAccess::new(region, u16::from(sample.address_low())))
    }

    #[inline]
    fn read(&mut self, access: BusAccess) -> u8 {
        match access.region {
            Region::RomLow => self.roms.read(RomHalf::Low, self.state.bank, access.address),
            Region::RomHigh => self.roms.read(RomHalf::High, self.state.bank, access.address),
            Region::Io1 if access.address & 2 == 0 => self.state.bank,
            Region::Io1 => self.state.mode,
            Region::Io2 => self.state.extra_ram[usize::from(access.address as u8)],
            Region::ChipSelect => 0xff
        }
    }

    #[inline]
    fn write(&mut self, access: BusAccess, data: u8, _timestamp: u64) {
        match access.region {
            Region::Io1 => self.write_register(access.address, data),
            Region::Io2 if self.kind == BankSwitchType::EasyFlash => {
                self.state.extra_ram[usize::from(access.address as u8)] = data;
            }
            _ => {}
        }
    }

    #[inline]
    fn deferred_output(&mut self, port: &mut dyn BusPort) {
        if let Some(bits) = self.config_update.take() {
            let config = MemoryConfig::from_bits_truncate(bits);
            port.drive_outputs(OutputLines::GAME|OutputLines::EXROM, config.line_levels());
        }
    }

    fn reset(&mut self) {
        self.state.bank = 0;
        self.state.mode = self.initial_mode;
        for byte in self.state.extra_ram.iter_mut() {
            *byte = 0xff;
        }
        self.update_config(true);
        self.roms.warm_bank(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartrusty_core::bus::{BusSnapshot, InputLines, SimulatedPort};
    use cartrusty_core::memory::BANK_SIZE;

    fn easyflash() -> CartridgeImage {
        let mut image = CartridgeImage::new("EF".into(), 32, true, false);
        for bank in 0..8 {
            let low: Vec<u8> = (0..BANK_SIZE).map(|i| (i as u8) ^ (bank as u8)).collect();
            let high: Vec<u8> = (0..BANK_SIZE).map(|i| !(i as u8) ^ (bank as u8)).collect();
            image.load_bank(RomHalf::Low, bank, &low).unwrap();
            image.load_bank(RomHalf::High, bank, &high).unwrap();
        }
        image
    }

    fn sample(early: BusSnapshot, settled: BusSnapshot) -> CycleSample {
        CycleSample::new(early, settled, true)
    }

    #[test]
    fn memory_config_table_works() {
        for &index in &[2usize, 3, 7, 11, 15] {
            assert_eq!(MEMORY_CONFIGS[index], MemoryConfig::GAME_ASSERTED);
        }
        assert_eq!(memory_config(false, 0), MemoryConfig::ULTIMAX);
        assert_eq!(memory_config(false, 1), MemoryConfig::ULTIMAX);
        assert_eq!(memory_config(true, 0), MemoryConfig::OFF);
        assert_eq!(memory_config(true, 2), MemoryConfig::MODE_8K);
        assert_eq!(memory_config(false, 0x80|6), MemoryConfig::MODE_8K);
        assert_eq!(memory_config(false, 4), MemoryConfig::OFF);
        assert_eq!(MemoryConfig::ULTIMAX.line_levels(), OutputLines::EXROM.bits());
        assert_eq!(MemoryConfig::OFF.line_levels(), (OutputLines::EXROM|OutputLines::GAME).bits());
        assert_eq!(MemoryConfig::MODE_16K.line_levels(), 0);
        assert_eq!(MemoryConfig::MODE_8K.line_levels(), OutputLines::GAME.bits());
    }

    #[test]
    fn easyflash_registers_work() {
        let mut cart = BankSwitchCartridge::new(&easyflash(), false);
        assert_eq!(cart.memory_config(), MemoryConfig::ULTIMAX);
        assert!(cart.is_config_pending());
        let mut port = SimulatedPort::new();
        cart.deferred_output(&mut port);
        assert!(!cart.is_config_pending());
        assert!(port.output_level(OutputLines::EXROM));
        assert!(!port.output_level(OutputLines::GAME));

        cart.write(BusAccess::new(Region::Io1, 0x00), 0xc5, 1);
        assert_eq!(cart.state().bank, 5);
        assert!(!cart.is_config_pending());
        assert_eq!(cart.read(BusAccess::new(Region::Io1, 0x00)), 5);

        cart.write(BusAccess::new(Region::Io1, 0x02), 0xff, 2);
        assert_eq!(cart.state().mode, 0x87);
        assert_eq!(cart.read(BusAccess::new(Region::Io1, 0x02)), 0x87);
        assert_eq!(cart.memory_config(), MemoryConfig::MODE_16K);
        cart.deferred_output(&mut port);
        assert!(!port.output_level(OutputLines::EXROM));
        assert!(!port.output_level(OutputLines::GAME));
        // rewriting the same mode leaves the lines alone
        cart.write(BusAccess::new(Region::Io1, 0x02), 0x07, 3);
        assert!(!cart.is_config_pending());

        assert_eq!(cart.read(BusAccess::new(Region::RomLow, 0x0010)), 0x10 ^ 5);
        assert_eq!(cart.read(BusAccess::new(Region::RomHigh, 0x1ff0)), !0xf0 ^ 5);

        assert_eq!(cart.read(BusAccess::new(Region::Io2, 0x42)), 0xff);
        cart.write(BusAccess::new(Region::Io2, 0x42), 0x24, 4);
        assert_eq!(cart.read(BusAccess::new(Region::Io2, 0x42)), 0x24);

        cart.reset();
        assert_eq!(cart.state().bank, 0);
        assert_eq!(cart.state().mode, 0);
        assert_eq!(cart.read(BusAccess::new(Region::Io2, 0x42)), 0xff);
        assert!(cart.is_config_pending());
    }

    #[test]
    fn claim_works() {
        let cart = BankSwitchCartridge::new(&easyflash(), false);
        let early = BusSnapshot::idle().with_address_low(0x34);
        let roml = BusSnapshot::idle().with_address_high(0x0a).asserting(InputLines::ROML);
        assert_eq!(cart.claim(&sample(early, roml)), Some(BusAccess::new(Region::RomLow, 0x0a34)));
        let romh = BusSnapshot::idle().with_address_high(0x1f).asserting(InputLines::ROMH);
        assert_eq!(cart.claim(&sample(early, romh)), Some(BusAccess::new(Region::RomHigh, 0x1f34)));
        assert_eq!(cart.claim(&sample(early.writing(), romh.writing())), None);
        let io1 = BusSnapshot::idle().asserting(InputLines::IO1);
        assert_eq!(cart.claim(&sample(early, io1)), Some(BusAccess::new(Region::Io1, 0x34)));
        let io2 = BusSnapshot::idle().asserting(InputLines::IO2).writing();
        assert_eq!(cart.claim(&sample(early.writing(), io2)), Some(BusAccess::new(Region::Io2, 0x34)));
        assert_eq!(cart.claim(&sample(early, BusSnapshot::idle())), None);
    }

    #[test]
    fn magic_desk_works() {
        let mut image = CartridgeImage::new("MD".into(), 19, true, false);
        for bank in 0..16 {
            image.load_bank(RomHalf::Low, bank, &[bank as u8 + 1; BANK_SIZE]).unwrap();
        }
        let mut cart = BankSwitchCartridge::new(&image, false);
        assert_eq!(cart.kind(), BankSwitchType::MagicDesk);
        assert_eq!(cart.rom_lines(), RomLines::ROML);
        assert_eq!(cart.memory_config(), MemoryConfig::MODE_8K);

        let early = BusSnapshot::idle();
        let io1 = BusSnapshot::idle().asserting(InputLines::IO1);
        assert_eq!(cart.claim(&sample(early, io1)), None);
        let romh = BusSnapshot::idle().asserting(InputLines::ROMH);
        assert_eq!(cart.claim(&sample(early, romh)), None);

        cart.write(BusAccess::new(Region::Io1, 0), 0x0c, 1);
        assert_eq!(cart.read(BusAccess::new(Region::RomLow, 0x100)), 13);
        assert_eq!(cart.memory_config(), MemoryConfig::MODE_8K);
        cart.write(BusAccess::new(Region::Io1, 0), 0x80, 2);
        assert_eq!(cart.state().bank, 0);
        assert_eq!(cart.memory_config(), MemoryConfig::OFF);
        let mut port = SimulatedPort::new();
        cart.deferred_output(&mut port);
        assert!(port.output_level(OutputLines::EXROM));
        assert!(port.output_level(OutputLines::GAME));
        cart.write(BusAccess::new(Region::Io1, 0), 0x41, 3);
        assert_eq!(cart.state().bank, 1);
        assert_eq!(cart.memory_config(), MemoryConfig::MODE_8K);
        // no RAM in IO2
        cart.write(BusAccess::new(Region::Io2, 0), 0, 4);
        assert_eq!(cart.state().extra_ram[0], 0xff);
    }

    #[test]
    fn generic_cartridge_works() {
        let mut image = CartridgeImage::new("16K".into(), 0, true, true);
        image.load_bank(RomHalf::Low, 0, &[1; BANK_SIZE]).unwrap();
        image.load_bank(RomHalf::High, 0, &[2; BANK_SIZE]).unwrap();
        let mut cart = BankSwitchCartridge::new(&image, true);
        assert_eq!(cart.memory_config(), MemoryConfig::MODE_16K);
        assert_eq!(cart.read(BusAccess::new(Region::RomHigh, 0)), 2);
        cart.write(BusAccess::new(Region::Io1, 0), 0x00, 1);
        assert_eq!(cart.state().bank, 0);
        assert_eq!(cart.memory_config(), MemoryConfig::MODE_16K);
        assert_eq!(cart.read(BusAccess::new(Region::RomHigh, 0)), 2);
        cart.write(BusAccess::new(Region::Io1, 0), 0x80, 2);
        assert_eq!(cart.memory_config(), MemoryConfig::ULTIMAX);
        cart.write(BusAccess::new(Region::Io1, 0), 0x00, 3);
        assert_eq!(cart.memory_config(), MemoryConfig::MODE_16K);
        cart.reset();
        assert_eq!(cart.state().mode, MODE_FROM_REGISTER|MODE_EXROM|MODE_GAME);
        let image = CartridgeImage::new("ULTIMAX".into(), 0, false, true);
        let cart = BankSwitchCartridge::new(&image, false);
        assert_eq!(cart.memory_config(), MemoryConfig::ULTIMAX);
        let image = CartridgeImage::new("8K".into(), 0, true, false);
        let mut cart = BankSwitchCartridge::new(&image, false);
        assert_eq!(cart.memory_config(), MemoryConfig::MODE_8K);
        cart.write(BusAccess::new(Region::Io1, 0), 0x00, 1);
        assert_eq!(cart.memory_config(), MemoryConfig::MODE_8K);
        cart.write(BusAccess::new(Region::Io1, 0), 0x80, 2);
        assert_eq!(cart.memory_config(), MemoryConfig::OFF);
    }
}
