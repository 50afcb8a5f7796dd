//! SHA-256 helpers for the trust and loader containers

use sha2::{Digest, Sha256};

/// Length of a SHA-256 digest
pub const SHA256_LEN: usize = 32;

const CHUNK: usize = 256 * 1024;

/// Header fields folded into the loader digest after the payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundFields {
    pub version: u32,
    pub reserved0: u32,
    pub load_addr: u32,
    pub load_size: u32,
    pub hash_len: u32,
}

fn feed(hasher: &mut Sha256, data: &[u8]) {
    for chunk in data.chunks(CHUNK) {
        hasher.update(chunk);
    }
}

/// Plain SHA-256
pub fn sha256(data: &[u8]) -> [u8; SHA256_LEN] {
    let mut hasher = Sha256::new();
    feed(&mut hasher, data);
    hasher.finalize().into()
}

/// SHA-256 of `data` followed by the bound header fields.
///
/// The version pair only takes part when `version` is non-zero, so images
/// built without anti-rollback keep the legacy digest.
pub fn sha256_bound(data: &[u8], fields: &BoundFields) -> [u8; SHA256_LEN] {
    let mut hasher = Sha256::new();
    feed(&mut hasher, data);
    if fields.version > 0 {
        hasher.update(fields.version.to_le_bytes());
        hasher.update(fields.reserved0.to_le_bytes());
    }
    hasher.update(fields.load_addr.to_le_bytes());
    hasher.update(fields.load_size.to_le_bytes());
    hasher.update(fields.hash_len.to_le_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_zeros() {
        let digest = sha256(&[0u8; 10240]);
        assert_eq!(
            hex::encode(digest),
            "84ff92691f909a05b224e1c56abb4864f01b4f8e3c854e4bb4c7baf1d3f6d652"
        );
    }

    #[test]
    fn test_chunked_feed_matches_single_update() {
        let data: Vec<u8> = (0..(CHUNK * 2 + 17)).map(|i| i as u8).collect();
        let expected: [u8; 32] = Sha256::digest(&data).into();
        assert_eq!(sha256(&data), expected);
    }

    #[test]
    fn test_version_zero_is_not_bound() {
        let data = b"u-boot payload";
        let fields = BoundFields {
            version: 0,
            reserved0: 0,
            load_addr: 0x0020_0000,
            load_size: 16,
            hash_len: 32,
        };

        let mut manual = data.to_vec();
        manual.extend_from_slice(&0x0020_0000u32.to_le_bytes());
        manual.extend_from_slice(&16u32.to_le_bytes());
        manual.extend_from_slice(&32u32.to_le_bytes());

        assert_eq!(sha256_bound(data, &fields), sha256(&manual));
    }

    #[test]
    fn test_version_changes_digest() {
        let data = b"u-boot payload";
        let base = BoundFields {
            load_addr: 0x0020_0000,
            load_size: 16,
            hash_len: 32,
            ..Default::default()
        };
        let versioned = BoundFields { version: 3, ..base };
        assert_ne!(sha256_bound(data, &base), sha256_bound(data, &versioned));
    }
}
