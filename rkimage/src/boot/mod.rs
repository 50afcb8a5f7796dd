//! Multi-entry boot container (`loader.bin`)
//!
//! Layout: a 102-byte [`BootHeader`], then 57-byte [`BootEntry`] records for
//! the DDR init (471), USB plug (472) and loader classes, then entry data
//! in the same order, and finally the CRC32 of everything before it.

mod builder;
mod header;
mod image;

pub use builder::{BootMerger, PlannedEntry};
pub use header::*;
pub use image::BootImage;

use crate::error::{RkImageError, Result};
use std::path::Path;

/// Alignment of every entry's data
pub const ENTRY_ALIGN: u32 = 2048;
/// Loader stages are rounded to this before [`ENTRY_ALIGN`]
pub const SMALL_PACKET: u32 = 512;

const LEGACY_CHIPS: &[(&str, u32)] = &[
    ("RK27", 0x10),
    ("RKCAYMAN", 0x11),
    ("RK28", 0x20),
    ("RK281X", 0x21),
    ("RKPANDA", 0x22),
    ("RKNANO", 0x30),
    ("RKSMART", 0x31),
    ("RKCROWN", 0x40),
    ("RK29", 0x50),
    ("RK292X", 0x51),
    ("RK30", 0x60),
    ("RK30B", 0x61),
    ("RK31", 0x70),
    ("RK32", 0x80),
];

/// Map a chip name to the id stored in the header.
///
/// Newer chips pack the four characters after `RK` big-endian, so
/// `RK3399` becomes `0x33333939`.
pub fn chip_type(chip: &str) -> Result<u32> {
    if let Some((_, id)) = LEGACY_CHIPS.iter().find(|(name, _)| *name == chip) {
        return Ok(*id);
    }
    let suffix = chip
        .strip_prefix("RK")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RkImageError::UnsupportedChip(chip.to_string()))?;

    let mut packed = [0u8; 4];
    for (dst, b) in packed.iter_mut().zip(suffix.bytes()) {
        *dst = b;
    }
    Ok(u32::from_be_bytes(packed))
}

/// Human readable form of a header chip id
pub fn chip_name(id: u32) -> String {
    if let Some((name, _)) = LEGACY_CHIPS.iter().find(|(_, v)| *v == id) {
        return name.to_string();
    }
    let tail: String = id
        .to_be_bytes()
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect();
    format!("RK{tail}")
}

/// Entry name for a 471/472 blob: file name without its last extension
pub fn entry_name_from_path(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => file,
    };
    stem.chars().take(ENTRY_NAME_LEN - 1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_chip_ids() {
        assert_eq!(chip_type("RK30B").unwrap(), 0x61);
        assert_eq!(chip_type("RKCAYMAN").unwrap(), 0x11);
        assert_eq!(chip_type("RK32").unwrap(), 0x80);
    }

    #[test]
    fn test_packed_chip_ids() {
        assert_eq!(chip_type("RK3399").unwrap(), 0x3333_3939);
        assert_eq!(chip_type("RK3568").unwrap(), 0x3335_3638);
        assert_eq!(chip_type("RK330A").unwrap(), 0x3333_3041);
        // fewer than four characters are zero filled
        assert_eq!(chip_type("RK33").unwrap(), 0x3333_0000);
        assert_eq!(chip_name(0x3333_3939), "RK3399");
        assert_eq!(chip_name(0x61), "RK30B");
    }

    #[test]
    fn test_unsupported_chip() {
        assert!(matches!(
            chip_type("RK"),
            Err(RkImageError::UnsupportedChip(_))
        ));
        assert!(matches!(
            chip_type("PX30"),
            Err(RkImageError::UnsupportedChip(_))
        ));
    }

    #[test]
    fn test_entry_names() {
        assert_eq!(
            entry_name_from_path(Path::new("bin/rk33/rk3399_ddr_800MHz_v1.24.bin")),
            "rk3399_ddr_800MHz_v"
        );
        assert_eq!(
            entry_name_from_path(Path::new("tools/rk3399_usbplug.bin")),
            "rk3399_usbplug"
        );
        assert_eq!(entry_name_from_path(Path::new("dir.d/blob")), "blob");
    }
}
