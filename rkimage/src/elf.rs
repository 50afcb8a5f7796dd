//! Loadable segment enumeration for BL3x firmware files
//!
//! Only little-endian executables are accepted. Anything without the ELF
//! magic is reported as flat so the caller can place the whole file.

use crate::error::{RkImageError, Result};
use object::Endianness;
use object::elf::{ELFCLASS64, ELFDATA2LSB, ELFMAG, ET_EXEC, PT_LOAD};
use object::elf::{FileHeader32, FileHeader64};
use object::read::elf::{FileHeader, ProgramHeader};
use std::path::Path;

// e_ident indices
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;

/// One `PT_LOAD` program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    pub file_offset: u64,
    pub file_size: u64,
    pub vaddr: u64,
}

/// What a firmware file turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareLayout {
    /// Raw binary placed as one blob
    Flat,
    /// ELF executable split into its loadable segments
    Elf(Vec<LoadSegment>),
}

/// Inspect `data` (the full contents of `path`) and list what must be placed.
pub fn inspect(data: &[u8], path: &Path) -> Result<FirmwareLayout> {
    if data.len() < 4 || data[..4] != ELFMAG {
        return Ok(FirmwareLayout::Flat);
    }
    if data.len() <= EI_DATA || data[EI_DATA] != ELFDATA2LSB {
        return Err(RkImageError::unsupported_elf(path, "only little endian is supported"));
    }

    let segments = if data[EI_CLASS] == ELFCLASS64 {
        load_segments::<FileHeader64<Endianness>>(data, path)?
    } else {
        load_segments::<FileHeader32<Endianness>>(data, path)?
    };

    for seg in &segments {
        let end = seg.file_offset.saturating_add(seg.file_size);
        if end > data.len() as u64 {
            return Err(RkImageError::truncated(
                format!("segment of {}", path.display()),
                end,
                data.len() as u64,
            ));
        }
    }

    Ok(FirmwareLayout::Elf(segments))
}

fn load_segments<Elf>(data: &[u8], path: &Path) -> Result<Vec<LoadSegment>>
where
    Elf: FileHeader<Endian = Endianness>,
{
    let bad = |e: object::Error| RkImageError::unsupported_elf(path, e.to_string());

    let header = Elf::parse(data).map_err(bad)?;
    let endian = header.endian().map_err(bad)?;
    if header.e_type(endian) != ET_EXEC {
        return Err(RkImageError::unsupported_elf(
            path,
            "only executable files are supported",
        ));
    }

    let mut out = Vec::new();
    for (i, ph) in header
        .program_headers(endian, data)
        .map_err(bad)?
        .iter()
        .enumerate()
    {
        if ph.p_type(endian) != PT_LOAD {
            continue;
        }
        let seg = LoadSegment {
            file_offset: ph.p_offset(endian).into(),
            file_size: ph.p_filesz(endian).into(),
            vaddr: ph.p_vaddr(endian).into(),
        };
        debug!(
            "{}: segment {i} offset 0x{:x} size 0x{:x} vaddr 0x{:x}",
            path.display(),
            seg.file_offset,
            seg.file_size,
            seg.vaddr
        );
        out.push(seg);
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal little-endian ELF64 executable with the given PT_LOAD segments
    /// (vaddr, payload) plus one PT_NOTE that must be ignored.
    pub(crate) fn build_elf64(e_type: u16, segments: &[(u64, &[u8])]) -> Vec<u8> {
        let phnum = segments.len() + 1;
        let data_start = 64 + 56 * phnum;
        let mut out = vec![0u8; data_start];
        out[..4].copy_from_slice(b"\x7fELF");
        out[4] = 2;
        out[5] = 1;
        out[6] = 1;
        out[16..18].copy_from_slice(&e_type.to_le_bytes());
        out[18..20].copy_from_slice(&183u16.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[32..40].copy_from_slice(&64u64.to_le_bytes());
        out[52..54].copy_from_slice(&64u16.to_le_bytes());
        out[54..56].copy_from_slice(&56u16.to_le_bytes());
        out[56..58].copy_from_slice(&(phnum as u16).to_le_bytes());

        let mut ph_off = 64;
        // PT_NOTE
        out[ph_off..ph_off + 4].copy_from_slice(&4u32.to_le_bytes());
        ph_off += 56;

        for (vaddr, payload) in segments {
            let offset = out.len() as u64;
            out.extend_from_slice(payload);
            let ph = &mut out[ph_off..ph_off + 56];
            ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
            ph[8..16].copy_from_slice(&offset.to_le_bytes());
            ph[16..24].copy_from_slice(&vaddr.to_le_bytes());
            ph[24..32].copy_from_slice(&vaddr.to_le_bytes());
            ph[32..40].copy_from_slice(&(payload.len() as u64).to_le_bytes());
            ph[40..48].copy_from_slice(&(payload.len() as u64).to_le_bytes());
            ph_off += 56;
        }
        out
    }

    fn build_elf32(segments: &[(u32, &[u8])]) -> Vec<u8> {
        let data_start = 52 + 32 * segments.len();
        let mut out = vec![0u8; data_start];
        out[..4].copy_from_slice(b"\x7fELF");
        out[4] = 1;
        out[5] = 1;
        out[6] = 1;
        out[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        out[18..20].copy_from_slice(&40u16.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[28..32].copy_from_slice(&52u32.to_le_bytes());
        out[40..42].copy_from_slice(&52u16.to_le_bytes());
        out[42..44].copy_from_slice(&32u16.to_le_bytes());
        out[44..46].copy_from_slice(&(segments.len() as u16).to_le_bytes());

        let mut ph_off = 52;
        for (vaddr, payload) in segments {
            let offset = out.len() as u32;
            out.extend_from_slice(payload);
            let ph = &mut out[ph_off..ph_off + 32];
            ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
            ph[4..8].copy_from_slice(&offset.to_le_bytes());
            ph[8..12].copy_from_slice(&vaddr.to_le_bytes());
            ph[12..16].copy_from_slice(&vaddr.to_le_bytes());
            ph[16..20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            ph[20..24].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            ph_off += 32;
        }
        out
    }

    #[test]
    fn test_flat_binary() {
        let layout = inspect(&[0xaa; 100], Path::new("bl30.bin")).unwrap();
        assert_eq!(layout, FirmwareLayout::Flat);
        assert_eq!(inspect(&[], Path::new("empty.bin")).unwrap(), FirmwareLayout::Flat);
    }

    #[test]
    fn test_elf64_load_segments() {
        let elf = build_elf64(ET_EXEC, &[(0x4_0000, &[1; 300]), (0xff_8c_0000, &[2; 40])]);
        let FirmwareLayout::Elf(segs) = inspect(&elf, Path::new("bl31.elf")).unwrap() else {
            panic!("expected ELF layout");
        };
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].vaddr, 0x4_0000);
        assert_eq!(segs[0].file_size, 300);
        assert_eq!(segs[1].vaddr, 0xff_8c_0000);
        assert_eq!(segs[1].file_offset, segs[0].file_offset + 300);
        let s = &segs[1];
        assert_eq!(
            &elf[s.file_offset as usize..(s.file_offset + s.file_size) as usize],
            &[2; 40]
        );
    }

    #[test]
    fn test_elf32_load_segments() {
        let elf = build_elf32(&[(0x1000, &[7; 64])]);
        let FirmwareLayout::Elf(segs) = inspect(&elf, Path::new("bl32.elf")).unwrap() else {
            panic!("expected ELF layout");
        };
        assert_eq!(
            segs,
            vec![LoadSegment {
                file_offset: 84,
                file_size: 64,
                vaddr: 0x1000
            }]
        );
    }

    #[test]
    fn test_big_endian_rejected() {
        let mut elf = build_elf64(ET_EXEC, &[(0, &[0; 4])]);
        elf[5] = 2;
        assert!(matches!(
            inspect(&elf, Path::new("be.elf")),
            Err(RkImageError::UnsupportedElf { .. })
        ));
    }

    #[test]
    fn test_non_executable_rejected() {
        // ET_DYN
        let elf = build_elf64(3, &[(0, &[0; 4])]);
        assert!(matches!(
            inspect(&elf, Path::new("lib.so")),
            Err(RkImageError::UnsupportedElf { .. })
        ));
    }
}
