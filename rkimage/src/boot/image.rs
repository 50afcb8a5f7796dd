use super::{BOOT_HEADER_SIZE, BootEntry, BootHeader, EntryTable, EntryType, chip_name};
use crate::crc::calculate_crc32;
use crate::error::{IoResultExt, RkImageError, Result};
use crate::rc4::{self, Chunking};
use crate::util::{plain_file_name, unpack_version};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// A boot image read back into memory
#[derive(Debug, Clone)]
pub struct BootImage {
    header: BootHeader,
    entries: Vec<BootEntry>,
    data: Vec<u8>,
}

impl BootImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).with_path(path)?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let header = BootHeader::from_bytes(&data)?;
        if (header.size as usize) < BOOT_HEADER_SIZE {
            return Err(RkImageError::invalid_image_data(format!(
                "boot header size {} too small",
                header.size
            )));
        }

        let mut entries = Vec::with_capacity(header.entry_count());
        for table in [&header.code471, &header.code472, &header.loader] {
            read_table(&data, table, &mut entries)?;
        }
        Ok(Self {
            header,
            entries,
            data,
        })
    }

    pub fn header(&self) -> &BootHeader {
        &self.header
    }

    pub fn entries(&self) -> &[BootEntry] {
        &self.entries
    }

    /// Stored bytes of an entry with the cipher undone
    pub fn entry_data(&self, entry: &BootEntry) -> Result<Vec<u8>> {
        let start = entry.data_offset as usize;
        let end = start + entry.data_size as usize;
        if end > self.data.len() {
            return Err(RkImageError::truncated(
                format!("entry {}", entry.name),
                end as u64,
                self.data.len() as u64,
            ));
        }
        let mut buf = self.data[start..end].to_vec();
        if self.header.rc4_enabled() {
            let chunking = match entry.entry_type {
                EntryType::Loader => Chunking::Blocks512,
                _ => Chunking::Whole,
            };
            rc4::apply(&mut buf, chunking);
        }
        Ok(buf)
    }

    /// Offset of the trailing CRC, right after the last entry's data
    fn crc_offset(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.data_offset as usize + e.data_size as usize)
            .max()
            .unwrap_or(BOOT_HEADER_SIZE)
    }

    /// Check the trailing CRC and return it
    pub fn verify_crc(&self) -> Result<u32> {
        let at = self.crc_offset();
        let stored = self
            .data
            .get(at..at + 4)
            .ok_or_else(|| RkImageError::truncated("boot image crc", at as u64 + 4, self.data.len() as u64))?;
        let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        let calculated = calculate_crc32(&self.data[..at]);
        if stored != calculated {
            return Err(RkImageError::crc_mismatch(stored, calculated));
        }
        Ok(stored)
    }

    /// Write every entry to `out_dir/<entry name>`
    pub fn unpack_to(&self, out_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let out_dir = out_dir.as_ref();
        std::fs::create_dir_all(out_dir).with_path(out_dir)?;

        let mut written = Vec::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            let data = self.entry_data(entry)?;
            let name = if entry.name.is_empty() {
                format!("entry{i}")
            } else {
                entry.name.clone()
            };
            let path = out_dir.join(plain_file_name(&name)?);
            if written.contains(&path) {
                warn!("entry name {} repeats, overwriting", entry.name);
            }
            std::fs::write(&path, &data).with_path(&path)?;
            info!("unpacked {} entry {} ({} bytes)", entry.entry_type, path.display(), data.len());
            written.push(path);
        }
        Ok(written)
    }

    /// Multi-line description of the header and entries
    pub fn summary(&self) -> String {
        let h = &self.header;
        let (major, minor) = unpack_version(h.version);
        let mut s = String::new();
        let _ = writeln!(s, "Chip: {} (0x{:08x})", chip_name(h.chip_type), h.chip_type);
        let _ = writeln!(s, "Version: {major}.{minor:02}");
        let _ = writeln!(s, "Merger version: 0x{:08x}", h.merger_version);
        let _ = writeln!(s, "Release time: {}", h.release_time);
        let _ = writeln!(s, "RC4: {}", if h.rc4_enabled() { "on" } else { "off" });
        let _ = writeln!(
            s,
            "Entries: {} x 471, {} x 472, {} x loader",
            h.code471.num, h.code472.num, h.loader.num
        );
        for e in &self.entries {
            let _ = writeln!(
                s,
                "  {:<6} {:<20} offset 0x{:08x} size {:>8} delay {}",
                e.entry_type.to_string(),
                e.name,
                e.data_offset,
                e.data_size,
                e.data_delay
            );
        }
        s
    }

    pub fn print_info(&self) {
        print!("{}", self.summary());
    }
}

fn read_table(data: &[u8], table: &EntryTable, out: &mut Vec<BootEntry>) -> Result<()> {
    for i in 0..table.num as usize {
        let start = table.offset as usize + i * table.size as usize;
        let record = data.get(start..).unwrap_or_default();
        out.push(BootEntry::from_bytes(record)?);
    }
    Ok(())
}
