/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! GeoRAM / NeoRAM compatible RAM expansion.
//!
//! A 256 byte window into the RAM pool is visible in `IO1`. The window position is
//! selected with two write-only registers in `IO2`: the page within a 16 KB block at
//! even addresses and the block at odd addresses.
use core::fmt;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use cartrusty_core::bus::{BusAccess, CycleSample, ExpansionDevice, Region};
use cartrusty_core::clock::{CycleTimings, HardwareRevision};
use cartrusty_core::memory::prefetch_line;

/// The size of the RAM window and of a single page in bytes.
pub const PAGE_SIZE: usize = 256;
/// The size of a block in bytes.
pub const BLOCK_SIZE: usize = 16384;
/// The mask of the page register.
pub const PAGE_MASK: u8 = (BLOCK_SIZE / PAGE_SIZE - 1) as u8;
/// The default size of the RAM pool in kilobytes.
pub const DEFAULT_SIZE_KIB: u32 = 2048;
/// The largest size of the RAM pool in kilobytes.
pub const MAX_SIZE_KIB: u32 = 4096;

/// GeoRAM cycle timings on the Raspberry Pi 3B.
pub const TIMINGS_RPI3B: CycleTimings = CycleTimings::new(85, 900, 500);
/// GeoRAM cycle timings on the Raspberry Pi 3B+.
pub const TIMINGS_RPI3B_PLUS: CycleTimings = CycleTimings::new(91, 1025, 570);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RamWindowError {
    /// The pool size in kilobytes must be a power of two multiple of 16, up to 4096.
    InvalidPoolSize(u32)
}

impl std::error::Error for RamWindowError {}

impl fmt::Display for RamWindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RamWindowError::InvalidPoolSize(size) => write!(f,
                "RAM pool size of {} KB is not a power of two between 16 and {} KB", size, MAX_SIZE_KIB)
        }
    }
}

/// Checks if a pool of `size_kib` kilobytes can be created.
pub fn validate_pool_size(size_kib: u32) -> Result<(), RamWindowError> {
    if size_kib < 16 || size_kib > MAX_SIZE_KIB || !size_kib.is_power_of_two() {
        return Err(RamWindowError::InvalidPoolSize(size_kib))
    }
    Ok(())
}

/// The window selection registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct WindowRegisters {
    /// The 256 byte page within the block.
    pub page: u8,
    /// The 16 KB block.
    pub block: u8,
}

/// The RAM expansion with its pool and the window registers.
#[derive(Clone)]
pub struct GeoRam {
    pool: Box<[u8]>,
    block_mask: u8,
    registers: WindowRegisters,
    timings: CycleTimings,
}

impl fmt::Debug for GeoRam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoRam")
         .field("pool", &self.pool.len())
         .field("registers", &self.registers)
         .finish()
    }
}

impl GeoRam {
    /// Creates the expansion with a zeroed pool of `size_kib` kilobytes.
    pub fn new(size_kib: u32) -> Result<Self, RamWindowError> {
        validate_pool_size(size_kib)?;
        let pool = vec![0; size_kib as usize * 1024].into_boxed_slice();
        Ok(GeoRam {
            block_mask: (size_kib / 16 - 1) as u8,
            pool,
            registers: WindowRegisters::default(),
            timings: HardwareRevision::BUILD.select(TIMINGS_RPI3B, TIMINGS_RPI3B_PLUS),
        })
    }
    /// Overrides the cycle timings, e.g. for another hardware revision.
    pub fn with_timings(mut self, timings: CycleTimings) -> Self {
        self.timings = timings;
        self
    }
    pub fn registers(&self) -> WindowRegisters {
        self.registers
    }
    /// Sets the page register, ignoring the bits above the block size.
    pub fn set_page(&mut self, page: u8) {
        self.registers.page = page & PAGE_MASK;
    }
    /// Sets the block register, ignoring the bits above the pool size.
    pub fn set_block(&mut self, block: u8) {
        self.registers.block = block & self.block_mask;
    }
    /// Returns the offset of the window into the pool.
    #[inline]
    pub fn window_offset(&self) -> usize {
        usize::from(self.registers.block) * BLOCK_SIZE + usize::from(self.registers.page) * PAGE_SIZE
    }
    /// Returns the bytes visible through the window.
    pub fn window(&self) -> &[u8] {
        let offset = self.window_offset();
        &self.pool[offset..offset + PAGE_SIZE]
    }
    pub fn pool(&self) -> &[u8] {
        &self.pool
    }
    pub fn pool_mut(&mut self) -> &mut [u8] {
        &mut self.pool
    }
}

impl ExpansionDevice for GeoRam {
    #[inline]
    fn timings(&self) -> CycleTimings {
        self.timings
    }

    #[inline(always)]
    fn on_cycle(&mut self, _timestamp: u64, address_low: u8) {
        let offset = self.window_offset() + usize::from(address_low);
        prefetch_line(self.pool[offset..].as_ptr());
    }

    #[inline]
    fn claim(&self, sample: &CycleSample) -> Option<BusAccess> {
        let region = if sample.io1() {
            Region::Io1
        }
        else if sample.io2() {
            Region::Io2
        }
        else {
            return None
        };
        Some(BusAccess::new(region, u16::from(sample.address_low())))
    }

    #[inline]
    fn read(&mut self, access: BusAccess) -> u8 {
        match access.region {
            Region::Io1 => self.pool[self.window_offset() + usize::from(access.address as u8)],
            Region::Io2 if access.address == 0 => self.registers.page,
            Region::Io2 if access.address == 1 => self.registers.block,
            Region::Io2 => 0,
            _ => 0xff
        }
    }

    #[inline]
    fn write(&mut self, access: BusAccess, data: u8, _timestamp: u64) {
        match access.region {
            Region::Io1 => {
                let offset = self.window_offset() + usize::from(access.address as u8);
                self.pool[offset] = data;
            }
            Region::Io2 if access.address & 1 == 0 => self.set_page(data),
            Region::Io2 => self.set_block(data),
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.registers = WindowRegisters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn georam_window_works() {
        let mut ram = GeoRam::new(DEFAULT_SIZE_KIB).unwrap();
        assert_eq!(ram.pool().len(), 2048 * 1024);
        ram.write(BusAccess::new(Region::Io2, 0xfe), 3, 1);
        ram.write(BusAccess::new(Region::Io2, 0xff), 2, 2);
        assert_eq!(ram.window_offset(), 2 * 16384 + 3 * 256);
        ram.write(BusAccess::new(Region::Io1, 0x10), 0xab, 3);
        assert_eq!(ram.pool()[2 * 16384 + 3 * 256 + 0x10], 0xab);
        assert_eq!(ram.read(BusAccess::new(Region::Io1, 0x10)), 0xab);
        assert_eq!(ram.window()[0x10], 0xab);
        assert_eq!(ram.read(BusAccess::new(Region::Io2, 0)), 3);
        assert_eq!(ram.read(BusAccess::new(Region::Io2, 1)), 2);
        // writes are mirrored over the whole page, reads are not
        assert_eq!(ram.read(BusAccess::new(Region::Io2, 2)), 0);
        assert_eq!(ram.read(BusAccess::new(Region::Io2, 0xff)), 0);

        ram.set_page(0xff);
        ram.set_block(0xff);
        assert_eq!(ram.registers(), WindowRegisters { page: 63, block: 127 });
        assert_eq!(ram.window_offset() + PAGE_SIZE, ram.pool().len());
        ram.write(BusAccess::new(Region::Io1, 0xff), 0x5a, 4);
        assert_eq!(ram.pool()[ram.pool().len() - 1], 0x5a);

        ram.reset();
        assert_eq!(ram.registers(), WindowRegisters::default());
        assert_eq!(ram.pool()[2 * 16384 + 3 * 256 + 0x10], 0xab);
    }

    #[test]
    fn georam_sizes_work() {
        let mut ram = GeoRam::new(512).unwrap();
        ram.set_block(0xff);
        assert_eq!(ram.registers().block, 31);
        let mut ram = GeoRam::new(16).unwrap();
        ram.set_block(0xff);
        assert_eq!(ram.registers().block, 0);
        ram.set_page(0x41);
        assert_eq!(ram.window_offset(), 256);
        assert_eq!(GeoRam::new(0).unwrap_err(), RamWindowError::InvalidPoolSize(0));
        assert!(GeoRam::new(8).is_err());
        assert!(GeoRam::new(1000).is_err());
        assert!(GeoRam::new(8192).is_err());
        assert!(GeoRam::new(4096).is_ok());
        assert!(format!("{}", RamWindowError::InvalidPoolSize(3)).contains("3 KB"));
    }
}
