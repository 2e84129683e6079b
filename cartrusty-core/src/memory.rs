/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! Cartridge ROM images and their cache-friendly layout.
use core::fmt;
use std::io;

use bitflags::bitflags;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

/// The size of a single ROM bank half in bytes.
pub const BANK_SIZE: usize = 0x2000;
/// The maximum number of banks of a cartridge image.
pub const MAX_BANKS: usize = 64;
/// The mask applied to bank numbers written by the host.
pub const BANK_MASK: u8 = (MAX_BANKS - 1) as u8;
/// The size of the ARM cache line in bytes.
pub const CACHE_LINE: usize = 64;

#[non_exhaustive]
#[derive(Debug)]
pub enum MemoryError {
    InvalidBankIndex,
    Io(io::Error)
}

impl std::error::Error for MemoryError {}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", match self {
            MemoryError::InvalidBankIndex => "Memory bank index is out of range",
            MemoryError::Io(err) => return err.fmt(f)
        })
    }
}

impl From<MemoryError> for io::Error {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Io(err) => err,
            e => io::Error::new(io::ErrorKind::InvalidInput, e)
        }
    }
}

impl From<io::Error> for MemoryError {
    fn from(err: io::Error) -> Self {
        MemoryError::Io(err)
    }
}

pub type Result<T> = core::result::Result<T, MemoryError>;

/// The half of a 16 KB cartridge bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum RomHalf {
    /// Visible via `ROML`.
    Low = 0,
    /// Visible via `ROMH`.
    High = 1
}

/// The bank-switching scheme of a cartridge image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum BankSwitchType {
    /// A generic cartridge.
    None,
    /// Magic Desk compatible: a single bank register in `IO1`.
    MagicDesk,
    /// EasyFlash: bank and mode registers in `IO1` and 256 bytes of RAM in `IO2`.
    EasyFlash
}

impl BankSwitchType {
    /// The CRT hardware type of EasyFlash.
    pub const EASYFLASH_HARDWARE_TYPE: u16 = 32;
    /// The CRT hardware type of Magic Desk.
    pub const MAGIC_DESK_HARDWARE_TYPE: u16 = 19;

    pub fn from_hardware_type(hardware_type: u16) -> Self {
        match hardware_type {
            Self::EASYFLASH_HARDWARE_TYPE => BankSwitchType::EasyFlash,
            Self::MAGIC_DESK_HARDWARE_TYPE => BankSwitchType::MagicDesk,
            _ => BankSwitchType::None
        }
    }
    /// Returns the ROM lines to which a cartridge of this type always responds.
    pub fn default_rom_lines(self) -> RomLines {
        match self {
            BankSwitchType::None => RomLines::empty(),
            BankSwitchType::MagicDesk => RomLines::ROML,
            BankSwitchType::EasyFlash => RomLines::ROML|RomLines::ROMH,
        }
    }
}

bitflags! {
    /// ROM lines served by a cartridge.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RomLines: u8 {
        const ROML = 0b01;
        const ROMH = 0b10;
    }
}

impl From<RomHalf> for RomLines {
    fn from(half: RomHalf) -> Self {
        match half {
            RomHalf::Low => RomLines::ROML,
            RomHalf::High => RomLines::ROMH,
        }
    }
}

/// The content of a cartridge with up to [MAX_BANKS] banks of two halves.
#[derive(Clone)]
pub struct CartridgeImage {
    /// The cartridge name.
    pub name: String,
    /// The CRT hardware type code.
    pub hardware_type: u16,
    pub bankswitch: BankSwitchType,
    /// `true` if the image requests the `EXROM` line asserted at power-on.
    pub exrom_asserted: bool,
    /// `true` if the image requests the `GAME` line asserted at power-on.
    pub game_asserted: bool,
    /// ROM lines the cartridge responds to.
    pub rom_lines: RomLines,
    low_banks: Box<[u8]>,
    high_banks: Box<[u8]>,
    bank_count: usize,
}

impl fmt::Debug for CartridgeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartridgeImage")
         .field("name", &self.name)
         .field("hardware_type", &self.hardware_type)
         .field("bankswitch", &self.bankswitch)
         .field("exrom_asserted", &self.exrom_asserted)
         .field("game_asserted", &self.game_asserted)
         .field("rom_lines", &self.rom_lines)
         .field("bank_count", &self.bank_count)
         .finish()
    }
}

impl CartridgeImage {
    /// Creates an image with all banks zeroed.
    pub fn new(name: String, hardware_type: u16, exrom_asserted: bool, game_asserted: bool) -> Self {
        let bankswitch = BankSwitchType::from_hardware_type(hardware_type);
        CartridgeImage {
            name,
            hardware_type,
            bankswitch,
            exrom_asserted,
            game_asserted,
            rom_lines: bankswitch.default_rom_lines(),
            low_banks: vec![0; MAX_BANKS * BANK_SIZE].into_boxed_slice(),
            high_banks: vec![0; MAX_BANKS * BANK_SIZE].into_boxed_slice(),
            bank_count: 0
        }
    }
    /// Returns the number of banks up to the highest one loaded.
    pub fn bank_count(&self) -> usize {
        self.bank_count
    }
    /// Returns the content of the `bank` half.
    pub fn bank(&self, half: RomHalf, bank: usize) -> Result<&[u8]> {
        if bank >= MAX_BANKS {
            return Err(MemoryError::InvalidBankIndex)
        }
        let offset = bank * BANK_SIZE;
        let banks = match half {
            RomHalf::Low => &self.low_banks,
            RomHalf::High => &self.high_banks,
        };
        Ok(&banks[offset..offset + BANK_SIZE])
    }
    /// Copies at most [BANK_SIZE] bytes of `data` into the `bank` half and marks the half as served.
    pub fn load_bank(&mut self, half: RomHalf, bank: usize, data: &[u8]) -> Result<()> {
        if bank >= MAX_BANKS {
            return Err(MemoryError::InvalidBankIndex)
        }
        let offset = bank * BANK_SIZE;
        let banks = match half {
            RomHalf::Low => &mut self.low_banks,
            RomHalf::High => &mut self.high_banks,
        };
        let len = data.len().min(BANK_SIZE);
        banks[offset..offset + len].copy_from_slice(&data[..len]);
        self.rom_lines |= RomLines::from(half);
        self.bank_count = self.bank_count.max(bank + 1);
        Ok(())
    }
}

/// Returns the position of `offset` within an interleaved bank.
///
/// Bytes `offset` and `offset + 256` are neighbours, so the 32 addresses sharing
/// the low byte (`A0..A7`) fit in one cache line per half.
#[inline(always)]
pub const fn interleave(offset: u16) -> usize {
    ((offset as usize & 0xff) << 5) | ((offset as usize >> 8) & 0x1f)
}

/// Both halves of all cartridge banks laid out for the bus-cycle deadline.
///
/// Within each bank the bytes are reordered by [interleave] and the two halves are
/// interleaved byte by byte. Knowing just the bank and `A0..A7` at the start of a cycle
/// is enough to pre-fetch the single cache line containing the byte which will be requested.
#[derive(Clone)]
pub struct InterleavedBanks {
    data: Box<[u8]>
}

impl fmt::Debug for InterleavedBanks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterleavedBanks {{ {} }}", self.data.len())
    }
}

impl Default for InterleavedBanks {
    fn default() -> Self {
        InterleavedBanks { data: vec![0; MAX_BANKS * BANK_SIZE * 2].into_boxed_slice() }
    }
}

impl InterleavedBanks {
    /// Reorders the banks of `image`.
    pub fn from_image(image: &CartridgeImage) -> Self {
        let mut banks = Self::default();
        for bank in 0..MAX_BANKS {
            for &half in &[RomHalf::Low, RomHalf::High] {
                if let Ok(data) = image.bank(half, bank) {
                    banks.store(half, bank as u8, data);
                }
            }
        }
        banks
    }

    #[inline(always)]
    fn index(half: RomHalf, bank: u8, offset: u16) -> usize {
        ((usize::from(bank & BANK_MASK) * BANK_SIZE + interleave(offset & 0x1fff)) << 1) | half as usize
    }
    /// Stores up to [BANK_SIZE] bytes of `data` in the `bank` half.
    pub fn store(&mut self, half: RomHalf, bank: u8, data: &[u8]) {
        for (offset, &byte) in data.iter().take(BANK_SIZE).enumerate() {
            self.data[Self::index(half, bank, offset as u16)] = byte;
        }
    }
    /// Returns the byte at `offset` of the `bank` half.
    #[inline(always)]
    pub fn read(&self, half: RomHalf, bank: u8, offset: u16) -> u8 {
        self.data[Self::index(half, bank, offset)]
    }
    /// Returns the bytes of both halves sharing `address_low` in `bank`.
    #[inline(always)]
    pub fn line(&self, bank: u8, address_low: u8) -> &[u8] {
        let start = (usize::from(bank & BANK_MASK) * BANK_SIZE + (usize::from(address_low) << 5)) << 1;
        &self.data[start..start + CACHE_LINE]
    }
    /// Hints the CPU to load the cache line with both halves sharing `address_low` in `bank`.
    #[inline(always)]
    pub fn prefetch(&self, bank: u8, address_low: u8) {
        prefetch_line(self.line(bank, address_low).as_ptr());
    }
    /// Touches every cache line of `bank`, e.g. after switching banks.
    pub fn warm_bank(&self, bank: u8) {
        let start = usize::from(bank & BANK_MASK) * BANK_SIZE * 2;
        let mut sum = 0u8;
        for line in self.data[start..start + BANK_SIZE * 2].chunks(CACHE_LINE) {
            sum = sum.wrapping_add(line[0]);
        }
        core::hint::black_box(sum);
    }
}

/// Issues a data pre-load hint for the cache line at `ptr`.
#[inline(always)]
pub fn prefetch_line(ptr: *const u8) {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("prfm pldl1keep, [{0}]", in(reg) ptr, options(nostack, readonly, preserves_flags));
    }
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("pld [{0}]", in(reg) ptr, options(nostack, readonly, preserves_flags));
    }
    #[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
    {
        let _ = ptr;
    }
}
