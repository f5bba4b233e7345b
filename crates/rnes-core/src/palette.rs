//! Master palette
//!
//! The PPU frame buffer holds 6-bit color indices; hosts turn them into RGB
//! with this table.

/// NTSC 2C02 colors as 0xRRGGBB
#[rustfmt::skip]
pub const NTSC_PALETTE: [u32; 64] = [
    0x626262, 0x001FB2, 0x2404C8, 0x5200B2, 0x730076, 0x800024, 0x730B00, 0x522800,
    0x244400, 0x005700, 0x005C00, 0x005324, 0x003C76, 0x000000, 0x000000, 0x000000,
    0xABABAB, 0x0D57FF, 0x4B30FF, 0x8A13FF, 0xBC08D6, 0xD21269, 0xC72E00, 0x9D5400,
    0x607B00, 0x209800, 0x00A300, 0x009942, 0x007DB4, 0x000000, 0x000000, 0x000000,
    0xFFFFFF, 0x53AEFF, 0x9085FF, 0xD365FF, 0xFF57FF, 0xFF5DCF, 0xFF7757, 0xFA9E00,
    0xBDC700, 0x7AE700, 0x43F611, 0x26EF7E, 0x2CD5F6, 0x4E4E4E, 0x000000, 0x000000,
    0xFFFFFF, 0xB6E1FF, 0xCED1FF, 0xE9C3FF, 0xFFBCFF, 0xFFBDF4, 0xFFC6C3, 0xFFD59A,
    0xE9E681, 0xCEF481, 0xB6FB9A, 0xA9FAC3, 0xA9F0F4, 0xB8B8B8, 0x000000, 0x000000,
];

/// RGB value of a palette index (upper bits ignored)
pub fn rgb(index: u8) -> u32 {
    NTSC_PALETTE[(index & 0x3F) as usize]
}

/// Whether a color is bright enough to trigger a light gun sensor
pub fn is_bright(index: u8) -> bool {
    let color = rgb(index);
    let sum = ((color >> 16) & 0xFF) + ((color >> 8) & 0xFF) + (color & 0xFF);
    sum >= 0x180
}

/// Convert a frame of palette indices into 0x00RRGGBB pixels
pub fn to_rgb_frame(indices: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(indices.iter().map(|&index| rgb(index)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brightness() {
        assert!(is_bright(0x30));
        assert!(is_bright(0x20));
        assert!(!is_bright(0x0F));
        assert!(!is_bright(0x01));
    }

    #[test]
    fn test_index_masks_upper_bits() {
        assert_eq!(rgb(0x70), rgb(0x30));
    }
}
