//! CRC32 used by the Rockchip boot ROM
//!
//! This is not the zlib CRC32. It runs MSB first over polynomial
//! `0x04c10db7` with a zero initial value and no final xor.

/// Generator polynomial
pub const RK_CRC_POLY: u32 = 0x04c1_0db7;

const CRC_TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 0x8000_0000 != 0 {
                (c << 1) ^ RK_CRC_POLY
            } else {
                c << 1
            };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// Incremental CRC32 hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32 {
    acc: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from a previously computed value
    pub fn with_initial(acc: u32) -> Self {
        Self { acc }
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut acc = self.acc;
        for &b in data {
            acc = (acc << 8) ^ CRC_TABLE[((acc >> 24) ^ b as u32) as usize];
        }
        self.acc = acc;
    }

    pub fn finalize(&self) -> u32 {
        self.acc
    }
}

/// Calculate the CRC32 of a buffer in one call
pub fn calculate_crc32(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(data);
    crc.finalize()
}
