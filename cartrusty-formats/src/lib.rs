//! C64 cartridge related file format utilities.
// https://vice-emu.sourceforge.io/vice_17.html#SEC391
pub mod crt;
