use cartrusty::bus::*;
use cartrusty::clock::StepClock;
use cartrusty::cycle::{CycleOutcome, RESET_THRESHOLD};
use cartrusty::formats::crt::{CHIP_SIGNATURE, CRT_HEADER_SIZE, CRT_SIGNATURE};
use cartrusty::memory::BANK_SIZE;
use cartrusty::peripherals::cartridge::{BankSwitchCartridge, MemoryConfig};
use cartrusty::{Expansion, ExpansionConfig, LoadError, Personality, RealTimeHandler};

fn crt_bytes(hardware_type: u16, exrom: u8, game: u8, chips: &[(u16, u16, Vec<u8>)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(CRT_SIGNATURE);
    data.extend_from_slice(&(CRT_HEADER_SIZE as u32).to_be_bytes());
    data.extend_from_slice(&0x0100u16.to_be_bytes());
    data.extend_from_slice(&hardware_type.to_be_bytes());
    data.push(exrom);
    data.push(game);
    data.extend_from_slice(&[0; 6]);
    data.extend_from_slice(&[0; 32]);
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

fn rom_byte(bank: u16, half: u8, offset: usize) -> u8 {
    (offset as u8) ^ (offset >> 8) as u8 ^ (bank as u8).wrapping_mul(17) ^ half
}

fn rom(bank: u16, half: u8) -> Vec<u8> {
    (0..BANK_SIZE).map(|i| rom_byte(bank, half, i)).collect()
}

fn cartridge(handler: &RealTimeHandler) -> &BankSwitchCartridge {
    match handler.personality() {
        Personality::BankSwitch(cart) => cart,
        other => panic!("unexpected personality: {:?}", other)
    }
}

fn rom_read(port: &mut SimulatedPort, lines: InputLines, address: u16) {
    let early = BusSnapshot::idle().with_address_low(address as u8);
    let settled = BusSnapshot::idle().with_address_high((address >> 8) as u8).asserting(lines);
    port.queue(vec![early, settled]);
}

fn io_write(port: &mut SimulatedPort, lines: InputLines, address: u8, data: u8) {
    let early = BusSnapshot::idle().with_address_low(address).writing();
    let settled = BusSnapshot::idle().asserting(lines).writing();
    port.queue(vec![early, settled, settled.with_data(data)]);
}

fn io_read(port: &mut SimulatedPort, lines: InputLines, address: u8) {
    let early = BusSnapshot::idle().with_address_low(address);
    port.queue(vec![early, BusSnapshot::idle().asserting(lines)]);
}

fn lines(port: &SimulatedPort) -> (bool, bool) {
    (port.output_level(OutputLines::GAME), port.output_level(OutputLines::EXROM))
}

#[test]
fn easyflash_bus_cycles() {
    let mut chips = Vec::new();
    for bank in 0..8 {
        chips.push((bank, 0x8000, rom(bank, 0)));
        chips.push((bank, 0xA000, rom(bank, 0xff)));
    }
    let data = crt_bytes(32, 1, 0, &chips);
    let (mut handler, mut background) = Expansion::from_crt(&data[..], false).unwrap().into_parts();
    assert_eq!(background.run_once(&mut Vec::new()), 0);
    let clock = StepClock::new(0, 11);
    let mut port = SimulatedPort::new();

    // the first cycle drives the boot configuration
    assert_eq!(handler.on_clock_edge(&mut port, &clock), CycleOutcome::Unclaimed);
    assert_eq!(cartridge(&handler).memory_config(), MemoryConfig::ULTIMAX);
    assert_eq!(lines(&port), (false, true));

    io_write(&mut port, InputLines::IO1, 0x00, 5);
    assert_eq!(handler.on_clock_edge(&mut port, &clock),
               CycleOutcome::Written(BusAccess::new(Region::Io1, 0), 5));
    assert_eq!(cartridge(&handler).state().bank, 5);

    rom_read(&mut port, InputLines::ROML, 0x0123);
    let expected = rom_byte(5, 0, 0x123);
    assert_eq!(handler.on_clock_edge(&mut port, &clock),
               CycleOutcome::Read(BusAccess::new(Region::RomLow, 0x0123), expected));
    assert_eq!(port.driven_data(), Some(expected));
    assert!(!port.buffer_enabled());

    rom_read(&mut port, InputLines::ROMH, 0x1fff);
    let expected = rom_byte(5, 0xff, 0x1fff);
    assert_eq!(handler.on_clock_edge(&mut port, &clock),
               CycleOutcome::Read(BusAccess::new(Region::RomHigh, 0x1fff), expected));

    io_read(&mut port, InputLines::IO1, 0x00);
    assert_eq!(handler.on_clock_edge(&mut port, &clock),
               CycleOutcome::Read(BusAccess::new(Region::Io1, 0), 5));

    io_write(&mut port, InputLines::IO1, 0x02, 0x07);
    handler.on_clock_edge(&mut port, &clock);
    assert_eq!(cartridge(&handler).memory_config(), MemoryConfig::MODE_16K);
    assert_eq!(lines(&port), (false, false));

    io_write(&mut port, InputLines::IO2, 0x80, 0x5a);
    handler.on_clock_edge(&mut port, &clock);
    io_read(&mut port, InputLines::IO2, 0x80);
    assert_eq!(handler.on_clock_edge(&mut port, &clock),
               CycleOutcome::Read(BusAccess::new(Region::Io2, 0x80), 0x5a));

    // the host holds RESET
    let reset = BusSnapshot::idle().asserting(InputLines::RESET);
    for _ in 0..RESET_THRESHOLD {
        port.queue(vec![reset, reset]);
        handler.on_clock_edge(&mut port, &clock);
    }
    assert_eq!(cartridge(&handler).state().bank, 5);
    port.queue(vec![reset, reset]);
    handler.on_clock_edge(&mut port, &clock);
    assert_eq!(handler.machine().resets(), 1);
    let cart = cartridge(&handler);
    assert_eq!(cart.state().bank, 0);
    assert_eq!(cart.state().mode, 0);
    assert_eq!(cart.state().extra_ram[0x80], 0xff);
    assert_eq!(lines(&port), (false, true));
    assert!(!cart.is_config_pending());

    rom_read(&mut port, InputLines::ROML, 0x0123);
    assert_eq!(handler.on_clock_edge(&mut port, &clock),
               CycleOutcome::Read(BusAccess::new(Region::RomLow, 0x0123), rom_byte(0, 0, 0x123)));
}

#[test]
fn magic_desk_bus_cycles() {
    let chips: Vec<_> = (0..16).map(|bank| (bank, 0x8000, rom(bank, 0))).collect();
    let data = crt_bytes(19, 0, 1, &chips);
    let (mut handler, _) = Expansion::from_crt(&data[..], false).unwrap().into_parts();
    let clock = StepClock::new(0, 3);
    let mut port = SimulatedPort::new();

    handler.on_clock_edge(&mut port, &clock);
    assert_eq!(lines(&port), (true, false));

    io_write(&mut port, InputLines::IO1, 0x00, 0x0c);
    handler.on_clock_edge(&mut port, &clock);
    rom_read(&mut port, InputLines::ROML, 0x1000);
    assert_eq!(handler.on_clock_edge(&mut port, &clock),
               CycleOutcome::Read(BusAccess::new(Region::RomLow, 0x1000), rom_byte(12, 0, 0x1000)));
    // write-only register, ROMH not served
    io_read(&mut port, InputLines::IO1, 0x00);
    assert_eq!(handler.on_clock_edge(&mut port, &clock), CycleOutcome::Unclaimed);
    rom_read(&mut port, InputLines::ROMH, 0x1000);
    assert_eq!(handler.on_clock_edge(&mut port, &clock), CycleOutcome::Unclaimed);
    assert_eq!(port.driven_data(), Some(rom_byte(12, 0, 0x1000)));

    io_write(&mut port, InputLines::IO1, 0x00, 0x80);
    handler.on_clock_edge(&mut port, &clock);
    assert_eq!(cartridge(&handler).memory_config(), MemoryConfig::OFF);
    assert_eq!(lines(&port), (true, true));
}

#[test]
fn spurious_cycles_are_ignored() {
    let data = crt_bytes(0, 0, 1, &[(0, 0x8000, rom(0, 0))]);
    let (mut handler, _) = Expansion::from_crt(&data[..], false).unwrap().into_parts();
    let clock = StepClock::new(0, 3);
    let mut port = SimulatedPort::new();
    let early = BusSnapshot::idle().with_address_low(0x10).phase_invalid();
    port.queue(vec![early]);
    assert_eq!(handler.on_clock_edge(&mut port, &clock), CycleOutcome::Spurious);
    assert_eq!(handler.machine().cycles(), 0);
    let actions = port.take_actions();
    assert_eq!(actions.first(), Some(&PortAction::AddressMux(true)));
    assert_eq!(actions.last(), Some(&PortAction::AddressMux(false)));
    assert_eq!(port.driven_data(), None);
}

#[test]
fn load_errors() {
    let mut data = crt_bytes(32, 1, 0, &[(0, 0x8000, rom(0, 0))]);
    data[CRT_HEADER_SIZE + 1] = b'X';
    match Expansion::from_crt(&data[..], false) {
        Err(LoadError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::InvalidData),
        other => panic!("unexpected result: {:?}", other.map(|_| ()))
    }
    let config = ExpansionConfig::BankSwitch {
        image: "/this/file/does/not/exist.crt".into(), jumper: false
    };
    assert!(matches!(Expansion::assemble(&config), Err(LoadError::Io(..))));
    let config = ExpansionConfig::BankSwitch { image: "".into(), jumper: false };
    assert!(matches!(Expansion::assemble(&config), Err(LoadError::Config(..))));
}
