//! Emulators of various C64 expansion port devices.
pub mod cartridge;
pub mod georam;
pub mod sound;
