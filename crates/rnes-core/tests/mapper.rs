//! Board behaviour through the `Mapper` trait, built from iNES images

use rnes_core::cartridge::{Cartridge, CartridgeError};
use rnes_core::mapper::{Mapper, Mirroring};

/// iNES image whose 8 KiB PRG banks and 1 KiB CHR banks are filled with their index
fn image(mapper: u8, prg_16k: u8, chr_8k: u8, flags_6: u8) -> Vec<u8> {
    let mut rom = vec![
        b'N', b'E', b'S', 0x1A,
        prg_16k,
        chr_8k,
        (mapper << 4) | flags_6,
        mapper & 0xF0,
        0, 0, 0, 0, 0, 0, 0, 0,
    ];
    for bank in 0..prg_16k as usize * 2 {
        rom.extend(std::iter::repeat(bank as u8).take(0x2000));
    }
    for bank in 0..chr_8k as usize * 8 {
        rom.extend(std::iter::repeat(bank as u8).take(0x400));
    }
    rom
}

fn board(mapper: u8, prg_16k: u8, chr_8k: u8) -> Box<dyn Mapper> {
    let cartridge = Cartridge::from_rom(&image(mapper, prg_16k, chr_8k, 0)).unwrap();
    cartridge.into_parts().2
}

fn prg_banks(mapper: &dyn Mapper) -> [u8; 4] {
    [0x8000, 0xA000, 0xC000, 0xE000].map(|address| mapper.read_prg(address).unwrap())
}

/// Load an MMC1 register through the serial port, spacing writes apart
fn mmc1_load(mapper: &mut dyn Mapper, address: u16, value: u8) {
    for bit in 0..5 {
        mapper.cpu_clock();
        mapper.cpu_clock();
        mapper.write_prg(address, (value >> bit) & 1);
    }
}

/// One MMC3-visible scanline: A12 low for a while, then a rising edge
fn mmc3_scanline(mapper: &mut dyn Mapper) {
    mapper.on_ppu_address(0x0000);
    for _ in 0..4 {
        mapper.cpu_clock();
    }
    mapper.on_ppu_address(0x1000);
}

#[test]
fn test_nrom_128_mirrors_upper_half() {
    let mapper = board(0, 1, 1);
    assert_eq!(prg_banks(mapper.as_ref()), [0, 1, 0, 1]);
    assert_eq!(mapper.read_prg(0x5000), None);
}

#[test]
fn test_uxrom_switches_low_bank() {
    let mut mapper = board(2, 4, 0);
    assert_eq!(prg_banks(mapper.as_ref()), [0, 1, 6, 7]);
    mapper.write_prg(0x8000, 2);
    assert_eq!(prg_banks(mapper.as_ref()), [4, 5, 6, 7]);

    // no CHR ROM: pattern memory is writable RAM
    mapper.write_chr(0x0123, 0x5A);
    assert_eq!(mapper.read_chr(0x0123), 0x5A);
}

#[test]
fn test_cnrom_switches_chr() {
    let mut mapper = board(3, 2, 2);
    assert_eq!(mapper.read_chr(0x0000), 0);
    mapper.write_prg(0x8000, 1);
    assert_eq!(mapper.read_chr(0x0000), 8);
    assert_eq!(mapper.read_chr(0x1C00), 15);
    // CHR ROM ignores writes
    mapper.write_chr(0x0000, 0xFF);
    assert_eq!(mapper.read_chr(0x0000), 8);
}

#[test]
fn test_mmc1_prg_modes() {
    let mut mapper = board(1, 4, 2);
    // power-on control selects 16 KiB switching with the last bank fixed
    assert_eq!(prg_banks(mapper.as_ref()), [0, 1, 6, 7]);
    mmc1_load(mapper.as_mut(), 0xE000, 1);
    assert_eq!(prg_banks(mapper.as_ref()), [2, 3, 6, 7]);

    // mode 2: first bank fixed at $8000
    mmc1_load(mapper.as_mut(), 0x8000, 0x0B);
    assert_eq!(prg_banks(mapper.as_ref()), [0, 1, 2, 3]);
    assert_eq!(mapper.mirroring(), Mirroring::Horizontal);
}

#[test]
fn test_mmc1_chr_4k_mode() {
    let mut mapper = board(1, 2, 2);
    mmc1_load(mapper.as_mut(), 0x8000, 0x1C);
    mmc1_load(mapper.as_mut(), 0xA000, 1);
    mmc1_load(mapper.as_mut(), 0xC000, 3);
    assert_eq!(mapper.read_chr(0x0000), 4);
    assert_eq!(mapper.read_chr(0x1000), 12);
    assert_eq!(mapper.mirroring(), Mirroring::SingleScreenLower);
}

#[test]
fn test_mmc1_ignores_back_to_back_writes() {
    let mut mapper = board(1, 2, 1);
    for bit in [1, 1, 0, 0, 0] {
        mapper.cpu_clock();
        mapper.cpu_clock();
        mapper.write_prg(0x8000, bit);
        // the second write of a read-modify-write pair is dropped
        mapper.write_prg(0x8000, 0);
    }
    assert_eq!(mapper.mirroring(), Mirroring::Horizontal);
}

#[test]
fn test_mmc1_reset_bit_restores_fixed_last_bank() {
    let mut mapper = board(1, 4, 1);
    mmc1_load(mapper.as_mut(), 0x8000, 0x02);
    mmc1_load(mapper.as_mut(), 0xE000, 2);
    assert_eq!(prg_banks(mapper.as_ref()), [4, 5, 6, 7]);
    mapper.cpu_clock();
    mapper.cpu_clock();
    mapper.write_prg(0x8000, 0x80);
    assert_eq!(prg_banks(mapper.as_ref()), [4, 5, 6, 7]);
    mmc1_load(mapper.as_mut(), 0xE000, 0);
    assert_eq!(prg_banks(mapper.as_ref()), [0, 1, 6, 7]);
}

#[test]
fn test_mmc1_work_ram() {
    let mut mapper = board(1, 2, 1);
    mapper.write_prg(0x6000, 0x42);
    assert_eq!(mapper.read_prg(0x6000), Some(0x42));
    // bit 4 of the PRG register disables the RAM
    mmc1_load(mapper.as_mut(), 0xE000, 0x10);
    assert_eq!(mapper.read_prg(0x6000), None);
}

#[test]
fn test_mmc3_prg_banking() {
    let mut mapper = board(4, 4, 2);
    mapper.write_prg(0x8000, 6);
    mapper.write_prg(0x8001, 3);
    mapper.write_prg(0x8000, 7);
    mapper.write_prg(0x8001, 1);
    assert_eq!(prg_banks(mapper.as_ref()), [3, 1, 6, 7]);

    // PRG mode 1 swaps $8000 and $C000
    mapper.write_prg(0x8000, 0x40);
    assert_eq!(prg_banks(mapper.as_ref()), [6, 1, 3, 7]);
}

#[test]
fn test_mmc3_chr_banking_and_inversion() {
    let mut mapper = board(4, 2, 2);
    mapper.write_prg(0x8000, 0);
    mapper.write_prg(0x8001, 4);
    mapper.write_prg(0x8000, 2);
    mapper.write_prg(0x8001, 9);
    assert_eq!(mapper.read_chr(0x0000), 4);
    assert_eq!(mapper.read_chr(0x0400), 5);
    assert_eq!(mapper.read_chr(0x1000), 9);

    mapper.write_prg(0x8000, 0x80);
    assert_eq!(mapper.read_chr(0x1000), 4);
    assert_eq!(mapper.read_chr(0x0000), 9);
}

#[test]
fn test_mmc3_mirroring_and_ram_protect() {
    let mut mapper = board(4, 2, 1);
    mapper.write_prg(0xA000, 1);
    assert_eq!(mapper.mirroring(), Mirroring::Horizontal);
    mapper.write_prg(0xA000, 0);
    assert_eq!(mapper.mirroring(), Mirroring::Vertical);

    mapper.write_prg(0x6000, 0x11);
    mapper.write_prg(0xA001, 0xC0);
    mapper.write_prg(0x6000, 0x22);
    assert_eq!(mapper.read_prg(0x6000), Some(0x11));
    mapper.write_prg(0xA001, 0x00);
    assert_eq!(mapper.read_prg(0x6000), None);
}

#[test]
fn test_mmc3_scanline_irq() {
    let mut mapper = board(4, 2, 1);
    mapper.write_prg(0xC000, 2);
    mapper.write_prg(0xC001, 0);
    mapper.write_prg(0xE001, 0);

    mmc3_scanline(mapper.as_mut());
    mmc3_scanline(mapper.as_mut());
    assert!(!mapper.irq_pending());
    mmc3_scanline(mapper.as_mut());
    assert!(mapper.irq_pending());

    // $E000 disables and acknowledges
    mapper.write_prg(0xE000, 0);
    assert!(!mapper.irq_pending());
}

#[test]
fn test_mmc3_filters_short_a12_pulses() {
    let mut mapper = board(4, 2, 1);
    mapper.write_prg(0xC000, 0);
    mapper.write_prg(0xC001, 0);
    mapper.write_prg(0xE001, 0);

    mmc3_scanline(mapper.as_mut());
    assert!(mapper.irq_pending());
    mapper.write_prg(0xE000, 0);
    mapper.write_prg(0xE001, 0);

    // edges without a long enough low period are not counted
    for _ in 0..8 {
        mapper.on_ppu_address(0x0000);
        mapper.on_ppu_address(0x1000);
    }
    assert!(!mapper.irq_pending());
}

#[test]
fn test_axrom_single_screen_select() {
    let mut mapper = board(7, 4, 0);
    assert_eq!(mapper.mirroring(), Mirroring::SingleScreenLower);
    mapper.write_prg(0x8000, 0x11);
    assert_eq!(prg_banks(mapper.as_ref()), [4, 5, 6, 7]);
    assert_eq!(mapper.mirroring(), Mirroring::SingleScreenUpper);
    mapper.reset();
    assert_eq!(prg_banks(mapper.as_ref()), [0, 1, 2, 3]);
}

#[test]
fn test_gxrom_latch() {
    let mut mapper = board(66, 4, 4);
    mapper.write_prg(0x8000, 0x13);
    assert_eq!(prg_banks(mapper.as_ref()), [4, 5, 6, 7]);
    assert_eq!(mapper.read_chr(0x0000), 24);
}

#[test]
fn test_color_dreams_latch() {
    let mut mapper = board(11, 4, 4);
    mapper.write_prg(0x8000, 0x21);
    assert_eq!(prg_banks(mapper.as_ref()), [4, 5, 6, 7]);
    assert_eq!(mapper.read_chr(0x0000), 16);
}

#[test]
fn test_battery_flag_and_unsupported_board() {
    let cartridge = Cartridge::from_rom(&image(1, 2, 1, 0x02)).unwrap();
    assert!(cartridge.mapper().has_battery());
    assert_eq!(cartridge.mapper().prg_ram().map(<[u8]>::len), Some(0x2000));

    match Cartridge::from_rom(&image(5, 2, 1, 0)) {
        Err(CartridgeError::UnsupportedMapper { mapper }) => assert_eq!(mapper, 5),
        other => panic!("unexpected result: {other:?}"),
    }
}
