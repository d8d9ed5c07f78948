//! On-disk layout constants and the entry record codec.
//!
//! All multi-byte fields are big-endian. Offsets and widths here are
//! bit-exact requirements of the disc format; none of them is tunable.

/// Magic word found at [`OFF_MAGIC`] on every valid image.
pub const DVD_MAGIC: u32 = 0xc233_9f3d;

/// Offset of the 4-byte game code.
pub const OFF_GAME_CODE: u64 = 0x0;
/// Offset of the 1-byte disc version.
pub const OFF_VERSION: u64 = 0x7;
/// Offset of the magic word.
pub const OFF_MAGIC: u64 = 0x1c;
/// Offset of the null-terminated game name.
pub const OFF_GAME_NAME: u64 = 0x20;
/// Maximum length of the game name in bytes.
pub const MAX_GAME_NAME: usize = 0x100;
/// Offset of the 4-byte main executable start offset.
pub const OFF_DOL_START: u64 = 0x420;
/// Offset of the 4-byte filesystem table start offset.
pub const OFF_FS_START: u64 = 0x424;
/// Offset of the 4-byte filesystem table size.
pub const OFF_FST_SIZE: u64 = 0x428;

/// Start of the apploader region; also where its version string lives.
pub const APPLOADER_START: u64 = 0x2440;
/// Length of the apploader version string.
pub const APPLOADER_VERSION_LEN: usize = 10;
/// Offset of the 4-byte apploader size field.
pub const OFF_APPLOADER_SIZE: u64 = 0x2454;

/// End of the `boot.bin` region (which starts at 0).
pub const BOOT_END: u64 = 0x440;
/// End of the `bi2.bin` region (which starts at [`BOOT_END`]).
pub const BI2_END: u64 = 0x2440;

/// Size of one entry record.
pub const ENTRY_SIZE: u64 = 0xc;
/// Maximum serialized name length accepted when reading the string table.
pub const MAX_NAME_LEN: usize = 0x200;

/// Sanity bound: lowest plausible `fs_start`.
pub const MIN_FS_START: u64 = 0x2440;
/// Sanity bound: highest plausible `fs_start`.
pub const MAX_FS_START: u64 = 0x400_0000;
/// Sanity bound: largest plausible table size.
pub const MAX_FST_SIZE: u64 = 0x40_0000;
/// Sanity bound: largest plausible entry count.
pub const MAX_ENTRIES: u32 = 100_000;

/// Standard single-layer image size, the target of decompression.
pub const FULL_IMAGE_SIZE: u64 = 1_459_978_240;

/// Banner field offsets within an `opening.bnr` file.
pub const BNR_IMG_START: u64 = 0x20;
/// Length of the raw banner image data.
pub const BNR_IMG_LEN: usize = 0x1800;
/// Offset/length of the short game name.
pub const BNR_NAME: (u64, usize) = (0x1820, 0x20);
/// Offset/length of the short developer name.
pub const BNR_DEVELOPER: (u64, usize) = (0x1840, 0x20);
/// Offset/length of the full game name.
pub const BNR_FULL_NAME: (u64, usize) = (0x1860, 0x40);
/// Offset/length of the full developer name.
pub const BNR_FULL_DEVELOPER: (u64, usize) = (0x18a0, 0x40);
/// Offset/length of the game description.
pub const BNR_DESCRIPTION: (u64, usize) = (0x18e0, 0x80);

/// Rounds up to the next 4-byte boundary.
pub fn align4(x: u64) -> u64 {
    (x + 3) & !3
}

/// One 12-byte record of the entry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Directory flag.
    pub is_dir: bool,
    /// Offset of the entry's name in the string table.
    pub name_offset: u32,
    /// File: data offset in the image. Directory: parent entry index.
    pub start: u32,
    /// File: data length. Directory: index of the first entry after the
    /// subtree.
    pub size: u32,
}

impl Entry {
    /// Decodes a 12-byte record.
    pub fn decode(raw: &[u8; 12]) -> Self {
        Self {
            is_dir: raw[0] != 0,
            name_offset: u32::from_be_bytes([0, raw[1], raw[2], raw[3]]),
            start: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
            size: u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]),
        }
    }

    /// Encodes to the 12-byte on-disk form.
    pub fn encode(&self) -> [u8; 12] {
        let mut raw = [0u8; 12];
        raw[0] = self.is_dir as u8;
        raw[1..4].copy_from_slice(&self.name_offset.to_be_bytes()[1..]);
        raw[4..8].copy_from_slice(&self.start.to_be_bytes());
        raw[8..12].copy_from_slice(&self.size.to_be_bytes());
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_roundtrip() {
        let e = Entry {
            is_dir: true,
            name_offset: 0x012345,
            start: 7,
            size: 42,
        };
        assert_eq!(Entry::decode(&e.encode()), e);
    }

    #[test]
    fn test_entry_decode_fields() {
        let raw = [
            0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x30, 0x00, 0x00, 0x00, 0x00, 0x0a,
        ];
        let e = Entry::decode(&raw);
        assert!(!e.is_dir);
        assert_eq!(e.name_offset, 0x10);
        assert_eq!(e.start, 0x3000);
        assert_eq!(e.size, 10);
    }

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(0x3001), 0x3004);
    }
}
