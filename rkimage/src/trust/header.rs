//! Trust header region codec
//!
//! The first 2048 bytes of a trust image hold, back to back: the 800-byte
//! [`TrustHeader`], one [`ComponentData`] per component, a 256-byte
//! signature area and one [`ComponentTableEntry`] per component.

use crate::digest::SHA256_LEN;
use crate::error::{RkImageError, Result};
use crate::options::{HashMode, SignMode};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

pub const TRUST_TAG: [u8; 4] = *b"BL3X";
pub const TRUST_HEADER_SIZE: usize = 800;
/// Region reserved for header and tables; payloads start here
pub const TRUST_HEADER_REGION: usize = 2048;
pub const COMPONENT_DATA_SIZE: usize = 48;
pub const COMPONENT_ENTRY_SIZE: usize = 16;
pub const SIGNATURE_SIZE: usize = 256;
const RSA_WORDS: usize = 64;

/// Offsets of the tables for a given component count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustLayout {
    pub count: usize,
}

impl TrustLayout {
    /// Largest count whose tables still fit in the header region
    pub const MAX_COMPONENTS: usize = (TRUST_HEADER_REGION - TRUST_HEADER_SIZE - SIGNATURE_SIZE)
        / (COMPONENT_DATA_SIZE + COMPONENT_ENTRY_SIZE);

    pub fn new(count: usize) -> Result<Self> {
        if count > Self::MAX_COMPONENTS {
            return Err(RkImageError::TooManyComponents {
                count,
                max: Self::MAX_COMPONENTS,
            });
        }
        Ok(Self { count })
    }

    pub fn component_data_offset(&self, index: usize) -> usize {
        TRUST_HEADER_SIZE + index * COMPONENT_DATA_SIZE
    }

    pub fn sign_offset(&self) -> usize {
        TRUST_HEADER_SIZE + self.count * COMPONENT_DATA_SIZE
    }

    pub fn table_offset(&self, index: usize) -> usize {
        self.sign_offset() + SIGNATURE_SIZE + index * COMPONENT_ENTRY_SIZE
    }

    /// `size` word of the header: count in the high half, signOffset / 4 below
    pub fn size_word(&self) -> u32 {
        ((self.count as u32) << 16) | ((self.sign_offset() as u32) >> 2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustHeader {
    pub version: u32,
    pub hash_mode: u32,
    pub sign_mode: u32,
    pub count: u32,
    pub sign_offset: u32,
}

impl TrustHeader {
    pub fn new(version: u32, hash: HashMode, sign: SignMode, layout: &TrustLayout) -> Self {
        Self {
            version,
            hash_mode: hash as u32,
            sign_mode: sign as u32,
            count: layout.count as u32,
            sign_offset: layout.sign_offset() as u32,
        }
    }

    pub fn flags(&self) -> u32 {
        (self.hash_mode & 0xf) | ((self.sign_mode & 0xf) << 4)
    }

    /// Encode the 800-byte header, RSA fields left zero
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&TRUST_TAG)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.flags())?;
        w.write_u32::<LittleEndian>((self.count << 16) | (self.sign_offset >> 2))?;
        // reserved words, then RSA N, E and C
        w.write_all(&[0u8; 4 * 4 + 3 * RSA_WORDS * 4])?;
        Ok(())
    }

    /// Decode the header, checking the `BL3X` tag
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < TRUST_HEADER_SIZE {
            return Err(RkImageError::truncated(
                "trust header",
                TRUST_HEADER_SIZE as u64,
                data.len() as u64,
            ));
        }
        if data[..4] != TRUST_TAG {
            return Err(RkImageError::invalid_magic(TRUST_TAG, &data[..4]));
        }
        let mut c = Cursor::new(&data[4..16]);
        let version = c.read_u32::<LittleEndian>()?;
        let flags = c.read_u32::<LittleEndian>()?;
        let size = c.read_u32::<LittleEndian>()?;
        Ok(Self {
            version,
            hash_mode: flags & 0xf,
            sign_mode: (flags >> 4) & 0xf,
            count: size >> 16,
            sign_offset: (size & 0xffff) << 2,
        })
    }
}

/// Per-component load address and digest
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComponentData {
    pub hash: [u8; SHA256_LEN],
    pub load_address: u32,
}

impl ComponentData {
    /// Encode as one 48-byte record, tail zeroed
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.hash)?;
        w.write_u32::<LittleEndian>(self.load_address)?;
        w.write_all(&[0u8; 12])?;
        Ok(())
    }

    /// Decode one 48-byte record
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < COMPONENT_DATA_SIZE {
            return Err(RkImageError::truncated(
                "component data",
                COMPONENT_DATA_SIZE as u64,
                data.len() as u64,
            ));
        }
        let mut hash = [0u8; SHA256_LEN];
        hash.copy_from_slice(&data[..SHA256_LEN]);
        let load_address = Cursor::new(&data[SHA256_LEN..]).read_u32::<LittleEndian>()?;
        Ok(Self { hash, load_address })
    }
}

/// Where a component sits in the image, in 512-byte units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentTableEntry {
    pub component_id: [u8; 4],
    pub storage_address: u32,
    pub image_size: u32,
}

impl ComponentTableEntry {
    pub fn storage_offset(&self) -> usize {
        (self.storage_address as usize) << 9
    }

    pub fn storage_len(&self) -> usize {
        (self.image_size as usize) << 9
    }

    pub fn id_str(&self) -> String {
        String::from_utf8_lossy(&self.component_id)
            .trim_end_matches('\0')
            .to_string()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.component_id)?;
        w.write_u32::<LittleEndian>(self.storage_address)?;
        w.write_u32::<LittleEndian>(self.image_size)?;
        w.write_u32::<LittleEndian>(0)?;
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < COMPONENT_ENTRY_SIZE {
            return Err(RkImageError::truncated(
                "component table entry",
                COMPONENT_ENTRY_SIZE as u64,
                data.len() as u64,
            ));
        }
        let mut component_id = [0u8; 4];
        component_id.copy_from_slice(&data[..4]);
        let mut c = Cursor::new(&data[4..]);
        Ok(Self {
            component_id,
            storage_address: c.read_u32::<LittleEndian>()?,
            image_size: c.read_u32::<LittleEndian>()?,
        })
    }
}
