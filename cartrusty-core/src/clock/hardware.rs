/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
use core::ptr::{self, NonNull};

use super::CycleClock;

/// The offset of the system timer block from [PERIPHERAL_BASE][crate::bus::PERIPHERAL_BASE].
pub const SYSTIMER_OFFSET: usize = 0x3000;
const SYSTIMER_CLO: usize = 0x04;

/// The free-running 1 MHz system timer of the BCM283x.
#[derive(Debug)]
pub struct SystemTimer {
    base: NonNull<u32>,
}

unsafe impl Send for SystemTimer {}

impl SystemTimer {
    /// # Safety
    /// `base` must point to the mapped system timer block valid for volatile reads
    /// for the lifetime of the timer.
    pub unsafe fn new(base: *mut u32) -> Option<Self> {
        NonNull::new(base).map(|base| SystemTimer { base })
    }
    /// Returns the lower 32 bits of the microsecond counter.
    #[inline]
    pub fn micros(&self) -> u32 {
        unsafe { ptr::read_volatile(self.base.as_ptr().add(SYSTIMER_CLO / 4)) }
    }
    /// Spins for at least `us` microseconds.
    pub fn delay_micros(&self, us: u32) {
        let start = self.micros();
        while self.micros().wrapping_sub(start) < us {
            core::hint::spin_loop();
        }
    }
}

/// The performance monitor's CPU cycle counter of the ARM core.
///
/// Reading it takes a single instruction, which makes it suitable for timing the bus cycle.
#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
#[derive(Clone, Copy, Debug)]
pub struct PmuCycleCounter {
    _private: ()
}

#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
impl PmuCycleCounter {
    /// Enables and resets the cycle counter.
    ///
    /// # Safety
    /// Must be executed at a privilege level allowed to program the performance monitor.
    pub unsafe fn enable() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            // PMCR_EL0: E (enable), C (reset cycle counter)
            core::arch::asm!("msr pmcr_el0, {0}", in(reg) 0b101u64, options(nostack));
            core::arch::asm!("msr pmcntenset_el0, {0}", in(reg) 1u64 << 31, options(nostack));
        }
        #[cfg(target_arch = "arm")]
        {
            core::arch::asm!("mcr p15, 0, {0}, c9, c12, 0", in(reg) 0b101u32, options(nostack));
            core::arch::asm!("mcr p15, 0, {0}, c9, c12, 1", in(reg) 1u32 << 31, options(nostack));
        }
        PmuCycleCounter { _private: () }
    }
}

#[cfg(target_arch = "aarch64")]
impl CycleClock for PmuCycleCounter {
    #[inline(always)]
    fn now(&self) -> u32 {
        let count: u64;
        unsafe {
            core::arch::asm!("mrs {0}, pmccntr_el0", out(reg) count, options(nomem, nostack));
        }
        count as u32
    }
}

#[cfg(target_arch = "arm")]
impl CycleClock for PmuCycleCounter {
    #[inline(always)]
    fn now(&self) -> u32 {
        let count: u32;
        unsafe {
            core::arch::asm!("mrc p15, 0, {0}, c9, c13, 0", out(reg) count, options(nomem, nostack));
        }
        count
    }
}
