//! Whole-console behaviour: result-protocol ROMs, DMA timing and board interrupts

use rnes_core::config::Config;
use rnes_core::cpu::CpuBus;
use rnes_core::region::RegionSetting;
use rnes_core::testing::{
    nrom_image, RESULT_MESSAGE, RESULT_SIGNATURE, RESULT_STATUS, STATUS_RESET_REQUESTED,
    STATUS_RUNNING,
};
use rnes_core::{CpuError, Nes, NesError};

/// LDA #value; STA address
fn store(address: u16, value: u8) -> [u8; 5] {
    [0xA9, value, 0x8D, address as u8, (address >> 8) as u8]
}

/// JMP to itself, assembled at $8000 + current length
fn spin(program: &mut Vec<u8>) {
    let at = 0x8000 + program.len() as u16;
    program.extend([0x4C, at as u8, (at >> 8) as u8]);
}

fn sign(program: &mut Vec<u8>) {
    for (offset, byte) in RESULT_SIGNATURE.into_iter().enumerate() {
        program.extend(store(RESULT_STATUS + 1 + offset as u16, byte));
    }
}

fn report(program: &mut Vec<u8>, code: u8, message: &str) {
    sign(program);
    program.extend(store(RESULT_STATUS, STATUS_RUNNING));
    for (offset, byte) in message.bytes().chain([0]).enumerate() {
        program.extend(store(RESULT_MESSAGE + offset as u16, byte));
    }
    program.extend(store(RESULT_STATUS, code));
    spin(program);
}

fn console(program: &[u8]) -> Nes {
    let mut nes = Nes::default();
    nes.load_cartridge(&nrom_image(program, 0x8000)).unwrap();
    nes
}

/// Step until the next instruction starts at `pc`
fn run_to(nes: &mut Nes, pc: u16) {
    for _ in 0..100_000 {
        if nes.cpu().registers().pc == pc {
            return;
        }
        nes.step().unwrap();
    }
    panic!("never reached ${pc:04X}");
}

#[test]
fn test_passing_result_rom() {
    let mut program = Vec::new();
    report(&mut program, 0, "Passed\n");
    let mut nes = console(&program);
    let outcome = nes.run_until_result(10).unwrap();
    assert!(outcome.passed());
    assert_eq!(outcome.message, "Passed");
    assert_eq!(nes.frame_count(), 1);
}

#[test]
fn test_failing_result_rom() {
    let mut program = Vec::new();
    report(&mut program, 3, "Failed #3");
    let mut nes = console(&program);
    let outcome = nes.run_until_result(10).unwrap();
    assert!(!outcome.passed());
    assert_eq!(outcome.code, 3);
    assert_eq!(outcome.message, "Failed #3");
}

#[test]
fn test_result_rom_without_report_times_out() {
    let mut program = Vec::new();
    sign(&mut program);
    program.extend(store(RESULT_STATUS, STATUS_RUNNING));
    spin(&mut program);
    let mut nes = console(&program);
    assert!(matches!(
        nes.run_until_result(5),
        Err(NesError::TestTimeout { frames: 5 })
    ));
}

/// First boot asks for a reset; after the reset a marker in work RAM sends it down the passing path
#[test]
fn test_reset_request_is_honoured_after_delay() {
    let mut program = vec![
        0xAD, 0x00, 0x61, // LDA $6100
        0xD0, 0x00, // BNE after_reset
    ];
    program.extend(store(0x6100, 0x01));
    sign(&mut program);
    program.extend(store(RESULT_STATUS, STATUS_RESET_REQUESTED));
    spin(&mut program);
    let after_reset = program.len();
    program[4] = (after_reset - 5) as u8;
    report(&mut program, 0, "");

    let mut nes = console(&program);
    let outcome = nes.run_until_result(30).unwrap();
    assert!(outcome.passed());
    // ceil(60.1 / 10) frames of waiting before the reset
    assert!(nes.frame_count() >= 8, "{}", nes.frame_count());
}

#[test]
fn test_oam_dma_stalls_cpu() {
    #[rustfmt::skip]
    let program = [
        0xA2, 0x00,       // LDX #0
        0x8A,             // TXA
        0x9D, 0x00, 0x02, // STA $0200,X
        0xE8,             // INX
        0xD0, 0xF9,       // BNE $8002
        0xA9, 0x02,       // LDA #2
        0x8D, 0x14, 0x40, // STA $4014
        0xEA,             // NOP
    ];
    let mut nes = console(&program);
    run_to(&mut nes, 0x800E);
    let cycles = nes.step().unwrap();
    // NOP plus halt, optional alignment and 256 read/write pairs
    assert!((515..=516).contains(&cycles), "{cycles}");

    let bus = nes.bus_mut();
    bus.write(0x2003, 0x05);
    assert_eq!(bus.read(0x2004), 0x05);
    bus.write(0x2003, 0x80);
    assert_eq!(bus.read(0x2004), 0x80);
}

#[test]
fn test_dmc_fetch_steals_cycles() {
    let mut program = Vec::new();
    program.extend(store(0x4010, 0x0F));
    program.extend(store(0x4013, 0xFF));
    program.extend(store(0x4015, 0x10));
    program.extend([0xEA, 0xEA]);
    let mut nes = console(&program);
    run_to(&mut nes, 0x800F);
    assert_eq!(nes.step().unwrap(), 6);
    assert_eq!(nes.step().unwrap(), 2);
}

#[test]
fn test_nmi_fires_once_per_frame() {
    let mut program = Vec::new();
    program.extend(store(0x2000, 0x80));
    spin(&mut program);
    let mut image = nrom_image(&program, 0x8000);
    // NMI handler at $9000: INC $10; RTI
    let handler = [0xE6, 0x10, 0x40];
    image[16 + 0x1000..16 + 0x1003].copy_from_slice(&handler);
    image[16 + 0x7FFA..16 + 0x7FFC].copy_from_slice(&[0x00, 0x90]);

    let mut nes = Nes::default();
    nes.load_cartridge(&image).unwrap();
    for _ in 0..3 {
        nes.run_frame().unwrap();
    }
    // each frame ends as vertical blank begins, so the NMI lands in the next one
    assert_eq!(nes.bus().ram()[0x10], 2);
}

/// MMC3 board whose fixed last bank holds `program` at $E000 and an IRQ handler
fn mmc3_console(program: &[u8], handler: &[u8]) -> Nes {
    let mut image = vec![b'N', b'E', b'S', 0x1A, 2, 1, 0x40, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    image.resize(16 + 0x8000, 0xEA);
    image.resize(16 + 0x8000 + 0x2000, 0x00);
    let at = |address: u16| 16 + (address - 0x8000) as usize;
    image[at(0xE000)..at(0xE000) + program.len()].copy_from_slice(program);
    image[at(0xF000)..at(0xF000) + handler.len()].copy_from_slice(handler);
    image[at(0xFFF0)] = 0x40; // RTI
    image[at(0xFFFA)..at(0xFFFA) + 6].copy_from_slice(&[0xF0, 0xFF, 0x00, 0xE0, 0x00, 0xF0]);

    let mut nes = Nes::default();
    nes.load_cartridge(&image).unwrap();
    nes
}

#[test]
fn test_mmc3_scanline_interrupt_through_console() {
    let mut program = Vec::new();
    program.extend(store(0x4017, 0x40));
    program.extend(store(0xC000, 20));
    program.extend([0x8D, 0x01, 0xC0]); // STA $C001
    program.extend([0x8D, 0x01, 0xE0]); // STA $E001
    // sprites from $1000 so A12 rises once per line
    program.extend(store(0x2000, 0x08));
    program.extend(store(0x2001, 0x18));
    program.push(0x58); // CLI
    let at = 0xE000 + program.len() as u16;
    program.extend([0x4C, at as u8, (at >> 8) as u8]);
    #[rustfmt::skip]
    let handler = [
        0x8D, 0x00, 0xE0, // STA $E000
        0xE6, 0x10,       // INC $10
        0x40,             // RTI
    ];

    let mut nes = mmc3_console(&program, &handler);
    run_to(&mut nes, 0xF000);
    let line = nes.bus().video().scanline();
    assert!((20..=21).contains(&line), "{line}");

    nes.run_frame().unwrap();
    nes.run_frame().unwrap();
    assert_eq!(nes.bus().ram()[0x10], 1);
}

#[test]
fn test_pal_frame_length() {
    let config = Config {
        region: RegionSetting::Pal,
        ..Config::default()
    };
    let mut nes = Nes::new(config);
    let mut program = Vec::new();
    spin(&mut program);
    nes.load_cartridge(&nrom_image(&program, 0x8000)).unwrap();

    nes.run_frame().unwrap();
    let start = nes.cpu().cycles();
    nes.run_frame().unwrap();
    let cycles = nes.cpu().cycles() - start;
    // 312 lines of 341 dots at 3.2 dots per cycle
    assert!((33_240..=33_255).contains(&cycles), "{cycles}");
}

#[test]
fn test_strict_console_reports_unofficial_opcode() {
    let config = Config {
        strict_opcodes: true,
        ..Config::default()
    };
    let mut nes = Nes::new(config);
    nes.load_cartridge(&nrom_image(&[0xA7, 0x00], 0x8000)).unwrap();
    assert!(matches!(
        nes.step(),
        Err(NesError::Cpu(CpuError::IllegalOpcode { opcode: 0xA7, address: 0x8000 }))
    ));
}

#[test]
fn test_jammed_console_keeps_producing_frames() {
    let mut nes = console(&[0x02]);
    nes.run_frame().unwrap();
    assert!(nes.cpu().is_jammed());
    nes.run_frame().unwrap();
    assert_eq!(nes.frame_count(), 2);
}

#[test]
fn test_ejected_console_refuses_to_run() {
    let mut program = Vec::new();
    spin(&mut program);
    let mut nes = console(&program);
    nes.run_frame().unwrap();
    nes.eject_cartridge();
    assert!(matches!(nes.run_frame(), Err(NesError::NoCartridge)));
    assert!(matches!(nes.step(), Err(NesError::NoCartridge)));
    assert_eq!(nes.cartridge_id(), None);
}
