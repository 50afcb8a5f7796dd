use crate::digest::{BoundFields, SHA256_LEN};
use crate::error::{RkImageError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

pub const LOADER_HEADER_SIZE: usize = 2048;
pub const LOADER_MAGIC_SIZE: usize = 8;
/// "SIGN" read as a little-endian word
pub const SIGN_TAG: u32 = 0x4E47_4953;
pub const RSA_HASH_SIZE: usize = 256;

const SIGN_AREA_OFFSET: usize = 1024;
const HASH_FIELDS_END: usize = 32 + 32;

/// The 2048-byte second loader header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderHeader {
    pub magic: [u8; LOADER_MAGIC_SIZE],
    /// Anti-rollback version, 0 when unused
    pub version: u32,
    pub reserved0: u32,
    pub load_addr: u32,
    pub load_size: u32,
    pub crc32: u32,
    pub hash_len: u32,
    pub hash: [u8; SHA256_LEN],
    pub sign_tag: u32,
    pub sign_len: u32,
    pub rsa_hash: [u8; RSA_HASH_SIZE],
}

impl Default for LoaderHeader {
    fn default() -> Self {
        Self {
            magic: [0; LOADER_MAGIC_SIZE],
            version: 0,
            reserved0: 0,
            load_addr: 0,
            load_size: 0,
            crc32: 0,
            hash_len: 0,
            hash: [0; SHA256_LEN],
            sign_tag: 0,
            sign_len: 0,
            rsa_hash: [0; RSA_HASH_SIZE],
        }
    }
}

impl LoaderHeader {
    /// Header fields that are folded into the payload digest
    pub fn bound_fields(&self) -> BoundFields {
        BoundFields {
            version: self.version,
            reserved0: self.reserved0,
            load_addr: self.load_addr,
            load_size: self.load_size,
            hash_len: self.hash_len,
        }
    }

    pub fn magic_str(&self) -> String {
        String::from_utf8_lossy(&self.magic).trim_end().to_string()
    }

    pub fn is_signed(&self) -> bool {
        self.sign_tag == SIGN_TAG
    }

    /// Encode the 2048-byte header, reserved space zeroed
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.magic)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.reserved0)?;
        w.write_u32::<LittleEndian>(self.load_addr)?;
        w.write_u32::<LittleEndian>(self.load_size)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.hash_len)?;
        w.write_all(&self.hash)?;
        w.write_all(&[0u8; SIGN_AREA_OFFSET - HASH_FIELDS_END])?;
        w.write_u32::<LittleEndian>(self.sign_tag)?;
        w.write_u32::<LittleEndian>(self.sign_len)?;
        w.write_all(&self.rsa_hash)?;
        w.write_all(&[0u8; LOADER_HEADER_SIZE - SIGN_AREA_OFFSET - 8 - RSA_HASH_SIZE])?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(LOADER_HEADER_SIZE);
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Decode without judging the magic; see [`super::LoaderImage`] for that
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LOADER_HEADER_SIZE {
            return Err(RkImageError::truncated(
                "loader header",
                LOADER_HEADER_SIZE as u64,
                data.len() as u64,
            ));
        }
        let mut c = Cursor::new(data);
        let mut hdr = Self::default();
        c.read_exact(&mut hdr.magic)?;
        hdr.version = c.read_u32::<LittleEndian>()?;
        hdr.reserved0 = c.read_u32::<LittleEndian>()?;
        hdr.load_addr = c.read_u32::<LittleEndian>()?;
        hdr.load_size = c.read_u32::<LittleEndian>()?;
        hdr.crc32 = c.read_u32::<LittleEndian>()?;
        hdr.hash_len = c.read_u32::<LittleEndian>()?;
        c.read_exact(&mut hdr.hash)?;

        c.set_position(SIGN_AREA_OFFSET as u64);
        hdr.sign_tag = c.read_u32::<LittleEndian>()?;
        hdr.sign_len = c.read_u32::<LittleEndian>()?;
        c.read_exact(&mut hdr.rsa_hash)?;
        Ok(hdr)
    }
}
