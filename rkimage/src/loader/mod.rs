//! Second-stage loader container (`uboot.img` / `trust.img`)
//!
//! One payload behind a 2048-byte [`LoaderHeader`], padded to `max_size`
//! and written `copies` times.

mod header;

pub use header::*;

use crate::crc::calculate_crc32;
use crate::digest::{SHA256_LEN, sha256_bound};
use crate::error::{IoResultExt, RkImageError, Result};
use crate::options::{LoaderOptions, LoaderRole};
use crate::util::{align_up, len_u32};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Overridden image sizes must be a multiple of this
pub const SIZE_GRANULE: u32 = 64 * 1024;

/// Identify the role from a header magic, tolerating trailing padding
pub fn role_from_magic(magic: &[u8]) -> Option<LoaderRole> {
    if magic.len() >= 5 && magic[..5] == LoaderRole::Uboot.magic()[..5] {
        Some(LoaderRole::Uboot)
    } else if magic.len() >= 3 && magic[..3] == LoaderRole::TrustOs.magic()[..3] {
        Some(LoaderRole::TrustOs)
    } else {
        None
    }
}

/// Fill a header for an already 4-byte padded payload
pub fn make_header(role: LoaderRole, payload: &[u8], load_addr: u32, version: u32) -> Result<LoaderHeader> {
    let mut hdr = LoaderHeader {
        magic: *role.magic(),
        version,
        load_addr,
        load_size: len_u32(payload.len() as u64, "loader payload")?,
        crc32: calculate_crc32(payload),
        hash_len: SHA256_LEN as u32,
        ..Default::default()
    };
    hdr.hash = sha256_bound(payload, &hdr.bound_fields());
    Ok(hdr)
}

fn check_options(opts: &LoaderOptions) -> Result<()> {
    if let Some(size) = opts.max_size {
        if size == 0 || size % SIZE_GRANULE != 0 {
            return Err(RkImageError::invalid_config(format!(
                "image size {size} is not a multiple of {} KiB",
                SIZE_GRANULE / 1024
            )));
        }
    }
    if opts.copies() == 0 {
        return Err(RkImageError::invalid_config("copies must be at least 1"));
    }
    Ok(())
}

/// One replica: header, payload and zero padding up to `max_size`
pub fn build_replica(opts: &LoaderOptions, payload: &[u8]) -> Result<Vec<u8>> {
    check_options(opts)?;
    let max_size = opts.max_size() as usize;
    let limit = max_size.saturating_sub(LOADER_HEADER_SIZE);
    if payload.len() > limit {
        return Err(RkImageError::ComponentTooLarge {
            name: opts.input.display().to_string(),
            size: payload.len() as u64,
            max: limit as u64,
        });
    }

    let padded_len = align_up(payload.len() as u32, 4) as usize;
    let mut image = vec![0u8; max_size];
    image[LOADER_HEADER_SIZE..LOADER_HEADER_SIZE + payload.len()].copy_from_slice(payload);

    let body = &image[LOADER_HEADER_SIZE..LOADER_HEADER_SIZE + padded_len];
    let hdr = make_header(opts.role, body, opts.load_address(), opts.version)?;
    debug!(
        "{}: load 0x{:08x} size {} crc 0x{:08x} version {}",
        opts.role, hdr.load_addr, hdr.load_size, hdr.crc32, hdr.version
    );
    image[..LOADER_HEADER_SIZE].copy_from_slice(&hdr.to_bytes()?);
    Ok(image)
}

/// Read `opts.input` and write the replicated image to `opts.output`
pub fn pack(opts: &LoaderOptions) -> Result<LoaderHeader> {
    let payload = std::fs::read(&opts.input).with_path(&opts.input)?;
    let replica = build_replica(opts, &payload)?;

    let mut out = File::create(&opts.output).with_path(&opts.output)?;
    for _ in 0..opts.copies() {
        out.write_all(&replica).with_path(&opts.output)?;
    }
    info!(
        "packed {} ({} bytes) into {} ({} x {} bytes)",
        opts.input.display(),
        payload.len(),
        opts.output.display(),
        opts.copies(),
        replica.len()
    );
    LoaderHeader::from_bytes(&replica)
}

/// Read only the header of an image and check its magic
pub fn read_info(path: impl AsRef<Path>) -> Result<(LoaderRole, LoaderHeader)> {
    let path = path.as_ref();
    let mut file = File::open(path).with_path(path)?;
    let mut buf = vec![0u8; LOADER_HEADER_SIZE];
    let mut got = 0;
    while got < buf.len() {
        let n = file.read(&mut buf[got..]).with_path(path)?;
        if n == 0 {
            break;
        }
        got += n;
    }
    let hdr = LoaderHeader::from_bytes(&buf[..got])?;
    let role = role_from_magic(&hdr.magic)
        .ok_or_else(|| RkImageError::invalid_magic(b"LOADER  | TOS     ", hdr.magic))?;
    Ok((role, hdr))
}

/// A loader image read back into memory
#[derive(Debug, Clone)]
pub struct LoaderImage {
    header: LoaderHeader,
    data: Vec<u8>,
}

impl LoaderImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).with_path(path)?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let header = LoaderHeader::from_bytes(&data)?;
        Ok(Self { header, data })
    }

    pub fn header(&self) -> &LoaderHeader {
        &self.header
    }

    pub fn role(&self) -> Option<LoaderRole> {
        role_from_magic(&self.header.magic)
    }

    /// Exactly `load_size` bytes following the header
    pub fn payload(&self) -> Result<&[u8]> {
        let end = LOADER_HEADER_SIZE + self.header.load_size as usize;
        self.data.get(LOADER_HEADER_SIZE..end).ok_or_else(|| {
            RkImageError::truncated("loader payload", end as u64, self.data.len() as u64)
        })
    }

    /// Write the payload verbatim, without checking CRC or hash
    pub fn unpack_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let payload = self.payload()?;
        std::fs::write(path, payload).with_path(path)?;
        info!("unpacked {} bytes to {}", payload.len(), path.display());
        Ok(())
    }

    /// Recompute CRC and digest
    pub fn verify(&self) -> Result<()> {
        if self.role().is_none() {
            return Err(RkImageError::invalid_magic(
                b"LOADER  | TOS     ",
                self.header.magic,
            ));
        }
        let payload = self.payload()?;
        let crc = calculate_crc32(payload);
        if crc != self.header.crc32 {
            return Err(RkImageError::crc_mismatch(self.header.crc32, crc));
        }
        let hash_len = (self.header.hash_len as usize).min(SHA256_LEN);
        let hash = sha256_bound(payload, &self.header.bound_fields());
        if hash[..hash_len] != self.header.hash[..hash_len] {
            return Err(RkImageError::hash_mismatch(
                &self.header.hash[..hash_len],
                &hash[..hash_len],
            ));
        }
        Ok(())
    }
}

/// Text for `info`: role, version and load address
pub fn summary(role: LoaderRole, hdr: &LoaderHeader) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "Image: {role} ({})", hdr.magic_str());
    let _ = writeln!(s, "Version: {}", hdr.version);
    let _ = writeln!(s, "Load address: 0x{:08x}", hdr.load_addr);
    let _ = writeln!(s, "Load size: {} bytes", hdr.load_size);
    let _ = writeln!(s, "CRC32: 0x{:08x}", hdr.crc32);
    let _ = writeln!(s, "Signed: {}", if hdr.is_signed() { "yes" } else { "no" });
    s
}
