//! Small numeric helpers shared by the containers

use crate::error::{RkImageError, Result};
use std::path::{Component, Path};

/// Round `value` up to the next multiple of `align` (a power of two)
pub const fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Same as [`align_up`] for 64-bit sizes
pub const fn align_up_u64(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Encode the low two decimal digits of `value` as packed BCD
pub const fn bcd(value: u16) -> u8 {
    let v = value % 100;
    (((v / 10) << 4) | (v % 10)) as u8
}

/// Image version word: `bcd(major) << 8 | bcd(minor)`
pub const fn pack_version(major: u16, minor: u16) -> u32 {
    ((bcd(major) as u32) << 8) | bcd(minor) as u32
}

/// Split a packed version word back into display digits
pub fn unpack_version(version: u32) -> (u8, u8) {
    let hi = ((version >> 8) & 0xff) as u8;
    let lo = (version & 0xff) as u8;
    ((hi >> 4) * 10 + (hi & 0xf), (lo >> 4) * 10 + (lo & 0xf))
}

/// Convert a file length to `u32`, rejecting anything past 4 GiB
pub fn len_u32(len: u64, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| RkImageError::ComponentTooLarge {
        name: what.to_string(),
        size: len,
        max: u32::MAX as u64,
    })
}

/// Accept `name` only if it is a single plain file name.
///
/// Names read from an image end up joined onto an output directory, so
/// anything absolute, nested or `..` is refused.
pub fn plain_file_name(name: &str) -> Result<&str> {
    let mut parts = Path::new(name).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(RkImageError::invalid_image_data(format!(
            "refusing to unpack entry named {name:?}"
        ))),
    }
}

/// Caller-owned work area reused across payload reads.
///
/// Holds one payload at a time; asking for more than the configured
/// capacity fails instead of growing.
#[derive(Debug)]
pub struct ScratchBuffer {
    buf: Vec<u8>,
}

impl ScratchBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
        }
    }

    /// Borrow a zeroed region of `len` bytes
    pub fn zeroed(&mut self, len: usize) -> Result<&mut [u8]> {
        if len > self.buf.len() {
            return Err(RkImageError::ScratchTooSmall {
                needed: len,
                capacity: self.buf.len(),
            });
        }
        let region = &mut self.buf[..len];
        region.fill(0);
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 2048), 0);
        assert_eq!(align_up(1, 2048), 2048);
        assert_eq!(align_up(2048, 2048), 2048);
        assert_eq!(align_up(300_000, 512), 300_032);
        assert_eq!(align_up(300_032, 2048), 301_056);
        assert_eq!(align_up_u64(10_000, 2048), 10_240);
    }

    #[test]
    fn test_bcd() {
        assert_eq!(bcd(50), 0x50);
        assert_eq!(bcd(2), 0x02);
        assert_eq!(bcd(1234), 0x34);
        assert_eq!(pack_version(2, 50), 0x0250);
        assert_eq!(unpack_version(0x0250), (2, 50));
    }

    #[test]
    fn test_plain_file_name() {
        assert_eq!(plain_file_name("FlashBoot").unwrap(), "FlashBoot");
        assert_eq!(plain_file_name("BL31_1").unwrap(), "BL31_1");
        for bad in ["../x", "..", "/abs", "a/b", ".", ""] {
            assert!(
                matches!(plain_file_name(bad), Err(RkImageError::InvalidImageData(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_scratch_bounds() {
        let mut scratch = ScratchBuffer::with_capacity(16);
        scratch.zeroed(16).unwrap()[0] = 0xaa;
        assert_eq!(scratch.zeroed(4).unwrap(), &[0, 0, 0, 0]);
        assert!(matches!(
            scratch.zeroed(17),
            Err(RkImageError::ScratchTooSmall { needed: 17, capacity: 16 })
        ));
    }
}
