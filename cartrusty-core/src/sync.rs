/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! Lock-free primitives shared between the real-time handler and the background loop.
use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

const PENDING: u16 = 0x100;

/// A single-slot mailbox carrying a byte.
///
/// Posting overwrites any value not taken yet, so only the most recent one is delivered.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: AtomicU16
}

impl Mailbox {
    pub const fn new() -> Self {
        Mailbox { slot: AtomicU16::new(0) }
    }
    #[inline]
    pub fn post(&self, value: u8) {
        self.slot.store(PENDING | u16::from(value), Ordering::Release);
    }
    /// Returns the posted value, leaving the mailbox empty.
    #[inline]
    pub fn take(&self) -> Option<u8> {
        let slot = self.slot.swap(0, Ordering::Acquire);
        if slot & PENDING != 0 {
            Some(slot as u8)
        }
        else {
            None
        }
    }
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.slot.load(Ordering::Acquire) & PENDING != 0
    }
}

/// A request flag; raising it more than once before it is taken has no additional effect.
#[derive(Debug, Default)]
pub struct Flag(AtomicBool);

impl Flag {
    pub const fn new() -> Self {
        Flag(AtomicBool::new(false))
    }
    #[inline]
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
    /// Returns `true` if the flag was raised and lowers it.
    #[inline]
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::Acquire)
    }
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
