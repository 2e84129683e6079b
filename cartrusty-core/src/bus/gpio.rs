/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
use core::ptr::{self, NonNull};

use super::{pins, BusPort, BusSnapshot, DataDirection, OutputLines};

/// The physical base address of the peripherals on the Raspberry Pi 2/3.
pub const PERIPHERAL_BASE: usize = 0x3F00_0000;
/// The offset of the GPIO register block from [PERIPHERAL_BASE].
pub const GPIO_OFFSET: usize = 0x0020_0000;

const GPFSEL0: usize = 0x00;
const GPFSEL2: usize = 0x08;
const GPSET0: usize = 0x1C;
const GPCLR0: usize = 0x28;
const GPLEV0: usize = 0x34;

const FSEL_INPUT: u32 = 0b000;
const FSEL_OUTPUT: u32 = 0b001;
/// `GPFSEL2` bits of the data pins `D0..D7` (GPIO 20..27).
const DATA_FSEL_MASK: u32 = 0x00ff_ffff;
/// `GPFSEL2` bits selecting the output function for all of the data pins.
const DATA_FSEL_OUTPUT: u32 = 0x0024_9249;

/// The expansion port wired to the GPIO register block of the BCM283x.
#[derive(Debug)]
pub struct GpioPort {
    base: NonNull<u32>,
}

unsafe impl Send for GpioPort {}

impl GpioPort {
    /// Creates a port accessing the GPIO register block at `base`.
    ///
    /// Returns `None` if `base` is null.
    ///
    /// # Safety
    /// `base` must point to a mapped GPIO register block (or to a memory region of at least
    /// `0x40` bytes) valid for volatile reads and writes for the lifetime of the port.
    /// No other code should change the function select registers while the port is in use.
    pub unsafe fn new(base: *mut u32) -> Option<Self> {
        NonNull::new(base).map(|base| GpioPort { base })
    }

    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.base.as_ptr().add(offset / 4)) }
    }

    #[inline(always)]
    fn write(&mut self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(self.base.as_ptr().add(offset / 4), value) }
    }

    fn select_function(&mut self, pin: u32, function: u32) {
        let offset = GPFSEL0 + (pin / 10) as usize * 4;
        let shift = (pin % 10) * 3;
        let value = self.read(offset) & !(0b111 << shift) | function << shift;
        self.write(offset, value);
    }

    /// Sets up pin functions and the initial levels of the outputs.
    ///
    /// The data buffer starts disabled, the address multiplexer selects `A0..A7` and the latch is open.
    /// If `memory_lines` is `true` the `GAME` and `EXROM` lines become outputs too, initially released.
    pub fn configure(&mut self, memory_lines: bool) {
        for pin in pins::D0..pins::D0 + 8 {
            self.select_function(pin, FSEL_INPUT);
        }
        for pin in pins::A0..pins::A0 + 8 {
            self.select_function(pin, FSEL_INPUT);
        }
        for &pin in &[pins::RW, pins::CS, pins::PHI2, pins::RESET, pins::IO1, pins::IO2] {
            self.select_function(pin, FSEL_INPUT);
        }
        self.select_function(pins::BUFFER_OE, FSEL_OUTPUT);
        self.write(GPSET0, OutputLines::BUFFER_OE.bits());
        self.select_function(pins::ADDRESS_MUX, FSEL_OUTPUT);
        self.write(GPCLR0, OutputLines::ADDRESS_MUX.bits());
        self.select_function(pins::LATCH_LE, FSEL_OUTPUT);
        self.write(GPSET0, OutputLines::LATCH_LE.bits());
        if memory_lines {
            self.select_function(pins::GAME, FSEL_OUTPUT);
            self.select_function(pins::EXROM, FSEL_OUTPUT);
            self.write(GPSET0, (OutputLines::GAME|OutputLines::EXROM).bits());
        }
    }
}

impl BusPort for GpioPort {
    #[inline(always)]
    fn sample_inputs(&mut self) -> BusSnapshot {
        BusSnapshot(self.read(GPLEV0))
    }

    #[inline(always)]
    fn drive_outputs(&mut self, mask: OutputLines, values: u32) {
        let set = mask.bits() & values;
        let clr = mask.bits() & !values;
        if set != 0 {
            self.write(GPSET0, set);
        }
        if clr != 0 {
            self.write(GPCLR0, clr);
        }
    }

    #[inline(always)]
    fn release_outputs(&mut self) {
        self.write(GPSET0, OutputLines::BUFFER_OE.bits());
    }

    #[inline(always)]
    fn switch_address_mux(&mut self, high: bool) {
        let offset = if high { GPSET0 } else { GPCLR0 };
        self.write(offset, OutputLines::ADDRESS_MUX.bits());
    }

    #[inline(always)]
    fn set_data_direction(&mut self, direction: DataDirection) {
        let fsel = self.read(GPFSEL2) & !DATA_FSEL_MASK;
        let fsel = match direction {
            DataDirection::Input => fsel,
            DataDirection::Output => fsel | DATA_FSEL_OUTPUT
        };
        self.write(GPFSEL2, fsel);
    }
}
