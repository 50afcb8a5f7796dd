//! Multi-component trust container (`trust.img`)
//!
//! A 2048-byte header region is followed by the BL3x payloads, each padded
//! to 2048 bytes. The whole thing is padded to `max_size` and repeated
//! `copies` times.

mod builder;
mod header;
mod image;

pub use builder::TrustMerger;
pub use header::*;
pub use image::{TrustComponent, TrustImage};

use crate::elf::{self, FirmwareLayout};
use crate::error::{IoResultExt, RkImageError, Result};
use crate::options::{TrustOptions, TrustRole};
use crate::util::{align_up_u64, len_u32};
use std::path::{Path, PathBuf};

/// Payload alignment inside the image
pub const ENTRY_ALIGN: u32 = 2048;
/// Largest aligned payload a single segment may have
pub const BL3X_FILESIZE_MAX: u32 = 512 * 1024;

/// One placeable blob: a whole flat file or one ELF `PT_LOAD` segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlSegment {
    pub component_id: [u8; 4],
    pub source: PathBuf,
    pub file_offset: u32,
    pub size: u32,
    pub aligned_size: u32,
    pub load_address: u32,
}

impl BlSegment {
    fn new(
        role: TrustRole,
        source: &Path,
        file_offset: u64,
        size: u64,
        load_address: u64,
    ) -> Result<Self> {
        let aligned = align_up_u64(size, ENTRY_ALIGN as u64);
        if aligned > BL3X_FILESIZE_MAX as u64 {
            return Err(RkImageError::ComponentTooLarge {
                name: format!("{role} ({})", source.display()),
                size: aligned,
                max: BL3X_FILESIZE_MAX as u64,
            });
        }
        let what = source.display().to_string();
        Ok(Self {
            component_id: role.component_id(),
            source: source.to_path_buf(),
            file_offset: len_u32(file_offset, &what)?,
            size: len_u32(size, &what)?,
            aligned_size: aligned as u32,
            // segment addresses above 4 GiB do not fit the table
            load_address: load_address as u32,
        })
    }
}

/// Turn the enabled components of `opts` into segments, in role order.
///
/// Every ELF `PT_LOAD` header yields a segment, including ones with no file
/// bytes; those get a zero-size table entry.
pub fn collect_segments(opts: &TrustOptions) -> Result<Vec<BlSegment>> {
    let mut segments = Vec::new();
    for (role, desc) in opts.enabled() {
        let path = desc
            .path
            .as_deref()
            .ok_or_else(|| RkImageError::MissingComponent(format!("{role} path")))?;
        let data = std::fs::read(path).with_path(path)?;

        match elf::inspect(&data, path)? {
            FirmwareLayout::Flat => {
                let seg =
                    BlSegment::new(role, path, 0, data.len() as u64, desc.load_address as u64)?;
                debug!(
                    "{role}: {} flat, size {} aligned {} load 0x{:08x}",
                    path.display(),
                    seg.size,
                    seg.aligned_size,
                    seg.load_address
                );
                segments.push(seg);
            }
            FirmwareLayout::Elf(loads) => {
                for (i, load) in loads.iter().enumerate() {
                    let seg =
                        BlSegment::new(role, path, load.file_offset, load.file_size, load.vaddr)?;
                    debug!(
                        "{role}: segment {i} size {} aligned {} load 0x{:08x}",
                        seg.size, seg.aligned_size, seg.load_address
                    );
                    segments.push(seg);
                }
            }
        }
    }
    Ok(segments)
}
