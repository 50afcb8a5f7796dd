//! Fixed-key RC4 obfuscation applied to boot image entries.
//!
//! The key is public, so this only hides payloads from casual inspection.

/// Key burned into the boot ROM
pub const RC4_KEY: [u8; 16] = [
    124, 78, 3, 4, 85, 5, 9, 7, 45, 44, 123, 56, 23, 13, 23, 17,
];

/// Block size used for loader stages
pub const RC4_BLOCK_SIZE: usize = 512;

/// How a buffer is split before running the cipher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunking {
    /// One keystream over the whole buffer
    Whole,
    /// A fresh keystream for every 512-byte block; a short tail is its own block
    Blocks512,
}

fn key_schedule() -> [u8; 256] {
    let mut s = [0u8; 256];
    for (i, v) in s.iter_mut().enumerate() {
        *v = i as u8;
    }
    let mut j = 0u8;
    for i in 0..256 {
        j = j
            .wrapping_add(s[i])
            .wrapping_add(RC4_KEY[i % RC4_KEY.len()]);
        s.swap(i, j as usize);
    }
    s
}

fn apply_stream(data: &mut [u8]) {
    let mut s = key_schedule();
    let (mut i, mut j) = (0u8, 0u8);
    for b in data.iter_mut() {
        i = i.wrapping_add(1);
        j = j.wrapping_add(s[i as usize]);
        s.swap(i as usize, j as usize);
        let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
        *b ^= k;
    }
}

/// XOR `data` in place with the keystream. Running it twice restores the input.
pub fn apply(data: &mut [u8], chunking: Chunking) {
    match chunking {
        Chunking::Whole => apply_stream(data),
        Chunking::Blocks512 => {
            for block in data.chunks_mut(RC4_BLOCK_SIZE) {
                apply_stream(block);
            }
        }
    }
}
