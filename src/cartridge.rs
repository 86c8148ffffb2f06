//! Cartridge loader.
//!
//! Reads a Game Boy ROM image from disk into a flat byte vector and parses
//! the header at `0100-014F`. Only the ROM bytes themselves drive the bus;
//! the header fields are retained for diagnostic logging.

use std::fs;
use std::path::Path;

use log::info;

use crate::error::EmulatorError;

/// Maximum ROM image size this loader accepts (2 MiB).
pub const MAX_ROM_SIZE: usize = 2 * 1024 * 1024;

/// Size of a single ROM bank (16 KiB), the unit the bus windows into
/// `0x4000-0x7FFF`.
pub const ROM_BANK_SIZE: usize = 0x4000;

const HEADER_END: usize = 0x0150;

/// The 256-byte I/O register reset pattern, applied to `0xFF00-0xFFFF`
/// at startup.
#[rustfmt::skip]
pub const IO_RESET_PATTERN: [u8; 256] = [
    0x0F, 0x00, 0x7C, 0xFF, 0x00, 0x00, 0x00, 0xF8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01,
    0x80, 0xBF, 0xF3, 0xFF, 0xBF, 0xFF, 0x3F, 0x00, 0xFF, 0xBF, 0x7F, 0xFF, 0x9F, 0xFF, 0xBF, 0xFF,
    0xFF, 0x00, 0x00, 0xBF, 0x77, 0xF3, 0xF1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF,
    0x91, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFC, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x7E, 0xFF, 0xFE,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x3E, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC0, 0xFF, 0xC1, 0x00, 0xFE, 0xFF, 0xFF, 0xFF,
    0xF8, 0xFF, 0x00, 0x00, 0x00, 0x8F, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00, 0x0D,
    0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD, 0xD9, 0x99,
    0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB, 0xB9, 0x33, 0x3E,
    0x45, 0xEC, 0x52, 0xFA, 0x08, 0xB7, 0x07, 0x5D, 0x01, 0xFD, 0xC0, 0xFF, 0x08, 0xFC, 0x00, 0xE5,
    0x0B, 0xF8, 0xC2, 0xCE, 0xF4, 0xF9, 0x0F, 0x7F, 0x45, 0x6D, 0x3D, 0xFE, 0x46, 0x97, 0x33, 0x5E,
    0x08, 0xEF, 0xF1, 0xFF, 0x86, 0x83, 0x24, 0x74, 0x12, 0xFC, 0x00, 0x9F, 0xB4, 0xB7, 0x06, 0xD5,
    0xD0, 0x7A, 0x00, 0x9E, 0x04, 0x5F, 0x41, 0x2F, 0x1D, 0x77, 0x36, 0x75, 0x81, 0xAA, 0x70, 0x3A,
    0x98, 0xD1, 0x71, 0x02, 0x4D, 0x01, 0xC1, 0xFF, 0x0D, 0x00, 0xD3, 0x05, 0xF9, 0x00, 0x0B, 0x00,
];

/// Parsed fields from the cartridge header (`0100-014F`), kept for
/// diagnostics only.
#[derive(Debug, Clone)]
pub struct CartridgeHeader {
    pub title: String,
    pub cartridge_type: u8,
    pub rom_size_code: u8,
    pub ram_size_code: u8,
    pub destination_code: u8,
    pub licensee_code: u8,
    pub version: u8,
    pub header_checksum: u8,
}

impl CartridgeHeader {
    fn parse(image: &[u8]) -> Self {
        let title_bytes = &image[0x0134..0x0144];
        let title = title_bytes
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();

        CartridgeHeader {
            title,
            cartridge_type: image[0x0147],
            rom_size_code: image[0x0148],
            ram_size_code: image[0x0149],
            destination_code: image[0x014A],
            licensee_code: image[0x014B],
            version: image[0x014C],
            header_checksum: image[0x014D],
        }
    }
}

/// A loaded Game Boy ROM image plus its parsed header.
pub struct Cartridge {
    /// The full ROM image, used to window whichever bank is selected into
    /// `0x4000-0x7FFF`.
    pub image: Vec<u8>,
    pub header: CartridgeHeader,
}

impl Cartridge {
    /// Load a ROM image from `path`. Accepts anything up to
    /// [`MAX_ROM_SIZE`]; rejects images too short to contain bank 0 plus a
    /// header.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EmulatorError> {
        let path = path.as_ref();
        let mut data = fs::read(path)?;

        if data.len() < HEADER_END {
            return Err(EmulatorError::RomTooShort {
                found: data.len(),
                needed: HEADER_END,
            });
        }
        if data.len() > MAX_ROM_SIZE {
            data.truncate(MAX_ROM_SIZE);
        }

        let header = CartridgeHeader::parse(&data);
        info!(
            "Loaded cartridge \"{}\" from {} ({} bytes) - type {:#04X}, rom_size {:#04X}, ram_size {:#04X}, version {}",
            header.title,
            path.display(),
            data.len(),
            header.cartridge_type,
            header.rom_size_code,
            header.ram_size_code,
            header.version,
        );

        Ok(Cartridge {
            image: data,
            header,
        })
    }

    /// Number of full 16 KiB banks available in the image.
    pub fn bank_count(&self) -> usize {
        (self.image.len() / ROM_BANK_SIZE).max(1)
    }

    /// Byte at `addr` within bank 0 (`0000-3FFF`).
    pub fn read_bank0(&self, addr: u16) -> u8 {
        *self.image.get(addr as usize).unwrap_or(&0)
    }

    /// Byte at offset `offset` (0..0x4000) within the given bank.
    pub fn read_banked(&self, bank: u8, offset: u16) -> u8 {
        let base = bank as usize * ROM_BANK_SIZE;
        self.image.get(base + offset as usize).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_test_rom(banks: usize) -> Vec<u8> {
        let mut rom = vec![0u8; banks * ROM_BANK_SIZE];
        let title = b"TESTROM";
        rom[0x0134..0x0134 + title.len()].copy_from_slice(title);
        rom[0x0147] = 0x01;
        rom[0x0148] = banks.trailing_zeros() as u8;
        for bank in 0..banks {
            rom[bank * ROM_BANK_SIZE] = bank as u8;
        }
        rom
    }

    #[test]
    fn parses_header_title() {
        let rom = make_test_rom(4);
        let header = CartridgeHeader::parse(&rom);
        assert_eq!(header.title, "TESTROM");
    }

    #[test]
    fn rejects_short_images() {
        let dir = std::env::temp_dir();
        let path = dir.join("rustyboy_test_short.gb");
        {
            let mut f = fs::File::create(&path).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        let result = Cartridge::load(&path);
        assert!(matches!(result, Err(EmulatorError::RomTooShort { .. })));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reads_bank0_and_banked_bytes() {
        let dir = std::env::temp_dir();
        let path = dir.join("rustyboy_test_ok.gb");
        {
            let mut f = fs::File::create(&path).unwrap();
            f.write_all(&make_test_rom(4)).unwrap();
        }
        let cart = Cartridge::load(&path).unwrap();
        assert_eq!(cart.read_bank0(0x0000), 0);
        assert_eq!(cart.read_banked(2, 0), 2);
        assert_eq!(cart.bank_count(), 4);
        let _ = fs::remove_file(&path);
    }
}
