/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! **CRT** cartridge image parser.
//!
//! A CRT file consists of a 64 byte header followed by any number of `CHIP` packets,
//! each carrying the content of a single ROM chip of one bank. All numbers are big-endian.
use core::fmt;
use std::io;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use memchr::memchr;
use nom::bytes::complete::{tag, take};
use nom::combinator::cut;
use nom::error::{context, ContextError, ErrorKind, ParseError};
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::sequence::tuple;
use nom::{Err, IResult, Offset};

use cartrusty_core::memory::{CartridgeImage, RomHalf, BANK_SIZE};

/// The signature at the start of every CRT file.
pub const CRT_SIGNATURE: &[u8;16] = b"C64 CARTRIDGE   ";
/// The signature at the start of every chip packet.
pub const CHIP_SIGNATURE: &[u8;4] = b"CHIP";
/// The load address of chips mapped to `ROML`.
pub const ROML_LOAD_ADDRESS: u16 = 0x8000;
/// The size of the CRT header.
pub const CRT_HEADER_SIZE: usize = 64;

/// The parsed CRT header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrtHeader {
    /// The header length as declared in the file.
    pub header_length: u32,
    pub version: u16,
    /// The hardware type code, e.g. 32 for EasyFlash.
    pub hardware_type: u16,
    /// The `EXROM` line status, 0 means asserted.
    pub exrom: u8,
    /// The `GAME` line status, 0 means asserted.
    pub game: u8,
    /// The cartridge name without the zero padding.
    pub name: String,
}

/// The parsed chip packet referencing the ROM data of the original input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChipPacket<'a> {
    pub packet_length: u32,
    pub chip_type: u16,
    pub bank: u16,
    pub load_address: u16,
    pub rom: &'a [u8],
}

/// The type of the error returned by the *CRT* file parser.
#[derive(Clone, Debug, PartialEq)]
pub struct CrtParseError {
    /// Data parsed.
    pub data: Box<[u8]>,
    /// *CRT* file parser backtrace and error messages.
    pub description: String,
}

impl std::error::Error for CrtParseError {}

impl fmt::Display for CrtParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

impl From<(Box<[u8]>, String)> for CrtParseError {
    fn from((data, description): (Box<[u8]>, String)) -> Self {
        CrtParseError { data, description }
    }
}

/// Parses given `data` and returns the [CartridgeImage] with all chips loaded.
///
/// Chips loaded at `$8000` fill the `ROML` half of their bank. If such a chip is larger
/// than a single half, the rest of it fills the `ROMH` half of the same bank.
/// Chips at any other load address fill the `ROMH` half.
///
/// On error returns the `data` wrapped in [CrtParseError].
pub fn parse_crt<B: Into<Box<[u8]>>>(
        data: B
    ) -> Result<CartridgeImage, CrtParseError>
{
    let raw: Box<[u8]> = data.into();
    let res = parse_crt_raw::<CrtNomError>(&raw)
                        .map_err(|e| match e {
                            Err::Error(e)|Err::Failure(e) => e.describe(&raw),
                            Err::Incomplete(..) => String::from("unexpected end of data")
                        });
    match res {
        Ok(image) => Ok(image),
        Err(err) => Err(CrtParseError::from((raw, err)))
    }
}

/// Reads data from `rd`, parses data and returns the [CartridgeImage] on success.
/// When there was a parse error returns `Err` with [CrtParseError] wrapped in [io::Error]
/// with [io::ErrorKind::InvalidData]. To get to the inner [CrtParseError] you need either
/// to downcast it yourself or use one of convenient [IoErrorExt] methods.
pub fn read_crt<R: io::Read>(
        mut rd: R
    ) -> io::Result<CartridgeImage>
{
    let mut data = Vec::new();
    rd.read_to_end(&mut data)?;
    parse_crt(data).map_err(|e|
        io::Error::new(io::ErrorKind::InvalidData, e)
    )
}

/// A trait with helpers for extracting [CrtParseError] from [io::Error].
pub trait IoErrorExt: Sized {
    fn is_crt_parse(&self) -> bool {
        self.crt_parse_ref().is_some()
    }
    fn into_crt_parse(self) -> Option<Box<CrtParseError>>;
    fn crt_parse_ref(&self) -> Option<&CrtParseError>;
}

impl IoErrorExt for io::Error {
    fn into_crt_parse(self) -> Option<Box<CrtParseError>> {
        if let Some(inner) = self.into_inner() {
            if let Ok(crt_err) = inner.downcast::<CrtParseError>() {
                return Some(crt_err)
            }
        }
        None
    }
    fn crt_parse_ref(&self) -> Option<&CrtParseError> {
        self.get_ref().and_then(|inner| inner.downcast_ref::<CrtParseError>())
    }
}

/// Remembers where the parser failed and the innermost context of the failure.
#[derive(Clone, Debug, PartialEq)]
struct CrtNomError<'a> {
    input: &'a [u8],
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl<'a> CrtNomError<'a> {
    fn describe(&self, data: &'a [u8]) -> String {
        format!("{} at byte {} of {}: {:?}",
            self.context.unwrap_or("CRT data"), data.offset(self.input), data.len(), self.kind)
    }
}

impl<'a> ParseError<&'a[u8]> for CrtNomError<'a> {
    fn from_error_kind(input: &'a[u8], kind: ErrorKind) -> Self {
        CrtNomError { input, kind, context: None }
    }

    fn append(_input: &'a[u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> ContextError<&'a[u8]> for CrtNomError<'a> {
    fn add_context(_input: &'a[u8], ctx: &'static str, mut other: Self) -> Self {
        other.context.get_or_insert(ctx);
        other
    }
}

fn fixed_str(input: &[u8]) -> String {
    let len = memchr(0, input).unwrap_or(input.len());
    String::from_utf8_lossy(&input[..len]).trim_end().to_string()
}

fn crt_header<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], CrtHeader, E>
    where E: ParseError<&'a [u8]> + ContextError<&'a [u8]>
{
    let (input, (_, header_length, version, hardware_type, exrom, game, _, name)) = tuple((
        context("CRT signature", tag(&CRT_SIGNATURE[..])),
        context("header length", be_u32),
        context("version", be_u16),
        context("hardware type", be_u16),
        context("EXROM line status", be_u8),
        context("GAME line status", be_u8),
        context("reserved", take(6usize)),
        context("cartridge name", take(32usize)),
    ))(input)?;
    let name = fixed_str(name);
    Ok((input, CrtHeader { header_length, version, hardware_type, exrom, game, name }))
}

fn chip_packet<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], ChipPacket<'a>, E>
    where E: ParseError<&'a [u8]> + ContextError<&'a [u8]>
{
    let (input, (_, packet_length, chip_type, bank, load_address, rom_size)) = tuple((
        context("CHIP signature", tag(&CHIP_SIGNATURE[..])),
        context("packet length", be_u32),
        context("chip type", be_u16),
        context("bank number", be_u16),
        context("load address", be_u16),
        context("ROM size", be_u16),
    ))(input)?;
    let (input, rom) = context("ROM data", take(rom_size))(input)?;
    Ok((input, ChipPacket { packet_length, chip_type, bank, load_address, rom }))
}

fn parse_crt_raw<'a, E>(
        raw: &'a [u8]
    ) -> Result<CartridgeImage, Err<E>>
    where E: ParseError<&'a [u8]> + ContextError<&'a [u8]>
{
    let (mut input, header) = cut(crt_header::<E>)(raw)?;
    debug!("CRT: {:?} version: {:#06x} hardware type: {} EXROM: {} GAME: {}",
        header.name, header.version, header.hardware_type, header.exrom, header.game);

    let mut image = CartridgeImage::new(header.name,
                                        header.hardware_type,
                                        header.exrom == 0,
                                        header.game == 0);
    while !input.is_empty() {
        let (rest, chip) = cut(chip_packet::<E>)(input)?;
        debug!("CHIP: type: {} bank: {} address: {:#06x} size: {}",
            chip.chip_type, chip.bank, chip.load_address, chip.rom.len());
        let bank = usize::from(chip.bank);
        let loaded = if chip.load_address == ROML_LOAD_ADDRESS {
            let (low, high) = chip.rom.split_at(chip.rom.len().min(BANK_SIZE));
            image.load_bank(RomHalf::Low, bank, low).and_then(|_|
                if high.is_empty() {
                    Ok(())
                }
                else {
                    image.load_bank(RomHalf::High, bank, high)
                }
            )
        }
        else {
            image.load_bank(RomHalf::High, bank, chip.rom)
        };
        if loaded.is_err() {
            return Err(Err::Failure(
                E::add_context(input, "bank number out of range",
                    E::from_error_kind(input, ErrorKind::Verify))
            ))
        }
        input = rest;
    }
    debug!("CRT: {:?} banks: {} lines: {:?}", image.bankswitch, image.bank_count(), image.rom_lines);
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::SmallRng;
    use cartrusty_core::memory::{BankSwitchType, RomLines};

    fn crt_bytes(hardware_type: u16, exrom: u8, game: u8, chips: &[(u16, u16, Vec<u8>)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(CRT_SIGNATURE);
        data.extend_from_slice(&(CRT_HEADER_SIZE as u32).to_be_bytes());
        data.extend_from_slice(&0x0100u16.to_be_bytes());
        data.extend_from_slice(&hardware_type.to_be_bytes());
        data.push(exrom);
        data.push(game);
        data.extend_from_slice(&[0; 6]);
        let mut name = [0u8; 32];
        name[..9].copy_from_slice(b"TEST CART");
        data.extend_from_slice(&name);
        assert_eq!(data.len(), CRT_HEADER_SIZE);
        for (bank, address, rom) in chips {
            data.extend_from_slice(CHIP_SIGNATURE);
            data.extend_from_slice(&(rom.len() as u32 + 16).to_be_bytes());
            data.extend_from_slice(&2u16.to_be_bytes());
            data.extend_from_slice(&bank.to_be_bytes());
            data.extend_from_slice(&address.to_be_bytes());
            data.extend_from_slice(&(rom.len() as u16).to_be_bytes());
            data.extend_from_slice(rom);
        }
        data
    }

    fn filled(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn parse_easyflash_works() {
        let data = crt_bytes(32, 1, 0, &[
            (0, 0x8000, filled(BANK_SIZE, 1)),
            (0, 0xA000, filled(BANK_SIZE, 2)),
            (5, 0x8000, filled(BANK_SIZE, 3)),
            (5, 0xE000, filled(BANK_SIZE, 4)),
        ]);
        let image = parse_crt(data).unwrap();
        assert_eq!(image.name, "TEST CART");
        assert_eq!(image.hardware_type, 32);
        assert_eq!(image.bankswitch, BankSwitchType::EasyFlash);
        assert_eq!(image.rom_lines, RomLines::ROML|RomLines::ROMH);
        assert!(!image.exrom_asserted);
        assert!(image.game_asserted);
        assert_eq!(image.bank_count(), 6);
        assert_eq!(image.bank(RomHalf::Low, 0).unwrap()[0], 1);
        assert_eq!(image.bank(RomHalf::High, 0).unwrap()[0], 2);
        assert_eq!(image.bank(RomHalf::Low, 5).unwrap()[0x10], 0x13);
        assert_eq!(image.bank(RomHalf::High, 5).unwrap()[BANK_SIZE - 1], 3);
        assert!(image.bank(RomHalf::Low, 1).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn parse_generic_16k_works() {
        let data = crt_bytes(0, 0, 0, &[(0, 0x8000, filled(2 * BANK_SIZE, 0x40))]);
        let image = parse_crt(data).unwrap();
        assert_eq!(image.bankswitch, BankSwitchType::None);
        assert_eq!(image.rom_lines, RomLines::ROML|RomLines::ROMH);
        assert!(image.exrom_asserted && image.game_asserted);
        assert_eq!(image.bank(RomHalf::Low, 0).unwrap()[0], 0x40);
        assert_eq!(image.bank(RomHalf::High, 0).unwrap()[0], 0x40);
        assert_eq!(image.bank(RomHalf::High, 0).unwrap()[1], 0x41);
    }

    #[test]
    fn parse_magic_desk_works() {
        let data = crt_bytes(19, 0, 1, &[
            (0, 0x8000, filled(BANK_SIZE, 0)),
            (1, 0x8000, filled(BANK_SIZE / 2, 0x80)),
            (2, 0x8000, filled(BANK_SIZE, 0x90)),
        ]);
        let image = parse_crt(data).unwrap();
        assert_eq!(image.bankswitch, BankSwitchType::MagicDesk);
        assert_eq!(image.rom_lines, RomLines::ROML);
        assert_eq!(image.bank_count(), 3);
        let bank1 = image.bank(RomHalf::Low, 1).unwrap();
        assert_eq!(bank1[BANK_SIZE / 2 - 1], 0x7f);
        assert_eq!(bank1[BANK_SIZE / 2], 0);
        assert_eq!(image.bank(RomHalf::Low, 2).unwrap()[0], 0x90);
    }

    #[test]
    fn parse_errors_work() {
        let mut data = crt_bytes(32, 1, 0, &[(0, 0x8000, filled(16, 0))]);
        data[0] = b'c';
        let err = parse_crt(data.clone()).unwrap_err();
        assert!(err.description.starts_with("CRT signature at byte 0 of 96"), "{}", err);
        assert_eq!(&err.data[..], &data[..]);

        let mut data = crt_bytes(32, 1, 0, &[(0, 0x8000, filled(16, 0))]);
        data.truncate(data.len() - 1);
        let err = parse_crt(data).unwrap_err();
        assert!(err.description.contains("ROM data"), "{}", err);

        let mut data = crt_bytes(32, 1, 0, &[(0, 0x8000, filled(16, 0))]);
        data[CRT_HEADER_SIZE] = b'X';
        let err = parse_crt(data).unwrap_err();
        assert!(err.description.contains("CHIP signature"), "{}", err);

        let data = crt_bytes(32, 1, 0, &[(64, 0x8000, filled(16, 0))]);
        let err = parse_crt(data).unwrap_err();
        assert!(err.description.contains("bank number out of range"), "{}", err);

        let err = parse_crt(&CRT_SIGNATURE[..]).unwrap_err();
        assert!(err.description.contains("header length"), "{}", err);
    }

    #[test]
    fn read_crt_works() {
        let data = crt_bytes(0, 0, 1, &[(0, 0x8000, filled(BANK_SIZE, 9))]);
        let image = read_crt(&data[..]).unwrap();
        assert_eq!(image.rom_lines, RomLines::ROML);
        assert!(image.exrom_asserted && !image.game_asserted);

        let err = read_crt(&data[..100]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.is_crt_parse());
        let crt_err = err.into_crt_parse().unwrap();
        assert_eq!(crt_err.data.len(), 100);
        assert!(!io::Error::from(io::ErrorKind::Other).is_crt_parse());
    }

    #[test]
    fn parse_garbage_fails_gracefully() {
        let mut rng = SmallRng::seed_from_u64(64);
        let valid = crt_bytes(32, 1, 0, &[(0, 0x8000, filled(256, 0)), (1, 0xA000, filled(256, 0))]);
        for _ in 0..1000 {
            let mut data = valid.clone();
            let len = rng.gen_range(0..data.len());
            data.truncate(len);
            if len > 0 {
                let index = rng.gen_range(0..len);
                data[index] = rng.gen();
            }
            let _ = parse_crt(data);
        }
    }
}
