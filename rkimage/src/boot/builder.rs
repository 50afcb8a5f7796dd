use super::{
    BootEntry, BootHeader, ENTRY_ALIGN, EntryType, SMALL_PACKET, chip_type,
    entry_name_from_path,
};
use crate::crc::Crc32;
use crate::error::{IoResultExt, RkImageError, Result};
use crate::options::BootOptions;
use crate::rc4::{self, Chunking};
use crate::util::{ScratchBuffer, align_up, len_u32, pack_version};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// An entry record together with the file that fills it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub entry: BootEntry,
    pub source: PathBuf,
    /// Bytes taken from `source`; the rest of `entry.data_size` is padding
    pub file_size: u32,
}

impl PlannedEntry {
    fn chunking(&self) -> Chunking {
        match self.entry.entry_type {
            EntryType::Loader => Chunking::Blocks512,
            _ => Chunking::Whole,
        }
    }
}

/// Writer that keeps a running CRC of everything passed through it
struct CrcWriter<W> {
    inner: W,
    crc: Crc32,
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Lays out and writes a boot image.
///
/// [`BootMerger::plan`] checks every input before anything is written, so a
/// failed plan never leaves a partial output file behind.
#[derive(Debug)]
pub struct BootMerger {
    header: BootHeader,
    entries: Vec<PlannedEntry>,
    rc4: bool,
    max_size: u32,
    output: PathBuf,
}

impl BootMerger {
    /// Read entry sizes and lay out the header and tables
    pub fn plan(opts: &BootOptions) -> Result<Self> {
        if opts.loaders.is_empty() {
            return Err(RkImageError::MissingComponent("loader".into()));
        }
        let counts = [opts.code471.len(), opts.code472.len(), opts.loaders.len()];
        let mut counts_u8 = [0u8; 3];
        for (dst, n) in counts_u8.iter_mut().zip(counts) {
            *dst = u8::try_from(n).map_err(|_| RkImageError::TooManyComponents {
                count: n,
                max: u8::MAX as usize,
            })?;
        }

        let header = BootHeader::new(
            pack_version(opts.major, opts.minor),
            chip_type(&opts.chip)?,
            counts_u8,
            opts.rc4,
        );

        let sources = opts
            .code471
            .iter()
            .map(|p| (EntryType::DdrInit, entry_name_from_path(p), p, opts.code471_delay))
            .chain(
                opts.code472
                    .iter()
                    .map(|p| (EntryType::UsbPlug, entry_name_from_path(p), p, opts.code472_delay)),
            )
            .chain(
                opts.loaders
                    .iter()
                    .map(|l| (EntryType::Loader, l.name.clone(), &l.path, 0)),
            );

        let mut offset = header.data_start();
        let mut entries = Vec::with_capacity(header.entry_count());
        for (entry_type, name, path, delay) in sources {
            let file_size = file_len(path)?;
            let mut data_size = file_size;
            if entry_type == EntryType::Loader {
                data_size = align_up(data_size, SMALL_PACKET);
            }
            data_size = align_up(data_size, ENTRY_ALIGN);

            if data_size > opts.max_size {
                return Err(RkImageError::ComponentTooLarge {
                    name: path.display().to_string(),
                    size: data_size as u64,
                    max: opts.max_size as u64,
                });
            }

            debug!(
                "{entry_type} entry {name}: {} size {file_size} aligned {data_size} at 0x{offset:x}",
                path.display()
            );

            entries.push(PlannedEntry {
                entry: BootEntry {
                    entry_type,
                    name: name.chars().take(super::ENTRY_NAME_LEN - 1).collect(),
                    data_offset: offset,
                    data_size,
                    data_delay: delay,
                },
                source: path.clone(),
                file_size,
            });
            offset = offset.checked_add(data_size).ok_or_else(|| RkImageError::ImageTooLarge {
                size: offset as u64 + data_size as u64,
                max: u32::MAX as u64,
            })?;
        }

        Ok(Self {
            header,
            entries,
            rc4: opts.rc4,
            max_size: opts.max_size,
            output: opts.output.clone(),
        })
    }

    /// Header as it will be written
    pub fn header(&self) -> &BootHeader {
        &self.header
    }

    /// Entries in on-disk order
    pub fn entries(&self) -> &[PlannedEntry] {
        &self.entries
    }

    /// Total image size including the trailing CRC
    pub fn image_size(&self) -> u32 {
        let data: u32 = self.entries.iter().map(|e| e.entry.data_size).sum();
        self.header.data_start() + data + 4
    }

    /// Write the image and return the CRC appended to it
    pub fn write_to<W: Write>(&self, writer: &mut W, scratch: &mut ScratchBuffer) -> Result<u32> {
        let mut w = CrcWriter {
            inner: writer,
            crc: Crc32::new(),
        };

        self.header.write_to(&mut w)?;
        for planned in &self.entries {
            planned.entry.write_to(&mut w)?;
        }

        for planned in &self.entries {
            let buf = scratch.zeroed(planned.entry.data_size as usize)?;
            let mut file = File::open(&planned.source).with_path(&planned.source)?;
            file.read_exact(&mut buf[..planned.file_size as usize])
                .with_path(&planned.source)?;
            if self.rc4 {
                rc4::apply(buf, planned.chunking());
            }
            w.write_all(buf)?;
        }

        let crc = w.crc.finalize();
        w.inner.write_u32::<LittleEndian>(crc)?;
        Ok(crc)
    }

    /// Assemble the whole image in memory
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut scratch = ScratchBuffer::with_capacity(self.max_size as usize);
        let mut out = Vec::with_capacity(self.image_size() as usize);
        self.write_to(&mut out, &mut scratch)?;
        Ok(out)
    }

    /// Write the image to the configured output path
    pub fn build_to_file(&self) -> Result<PathBuf> {
        let mut scratch = ScratchBuffer::with_capacity(self.max_size as usize);
        let file = File::create(&self.output).with_path(&self.output)?;
        let mut w = BufWriter::new(file);
        let crc = self.write_to(&mut w, &mut scratch)?;
        w.flush().with_path(&self.output)?;

        info!(
            "merged {} entries into {} ({} bytes, crc 0x{crc:08x})",
            self.entries.len(),
            self.output.display(),
            self.image_size()
        );
        Ok(self.output.clone())
    }
}

fn file_len(path: &Path) -> Result<u32> {
    let meta = std::fs::metadata(path).with_path(path)?;
    len_u32(meta.len(), &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::BootImage;
    use crate::crc::calculate_crc32;
    use crate::options::NamedPath;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, len: usize, seed: u8) -> PathBuf {
        let path = dir.path().join(name);
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    fn scenario(dir: &TempDir, rc4: bool) -> BootOptions {
        BootOptions {
            chip: "RK3399".into(),
            major: 1,
            minor: 24,
            code471: vec![write_file(dir, "rk3399_ddr_800MHz_v1.24.bin", 2000, 1)],
            code472: vec![],
            loaders: vec![
                NamedPath::new("FlashData", write_file(dir, "ddr.bin", 300_000, 2)),
                NamedPath::new("FlashBoot", write_file(dir, "miniloader.bin", 250_000, 3)),
            ],
            output: dir.path().join("loader.bin"),
            rc4,
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_offsets_and_sizes() {
        let dir = TempDir::new().unwrap();
        let merger = BootMerger::plan(&scenario(&dir, true)).unwrap();
        let e = merger.entries();
        assert_eq!(e.len(), 3);
        assert_eq!(e[0].entry.data_offset, 102 + 57 * 3);
        assert_eq!(e[0].entry.data_size, 2048);
        assert_eq!(e[1].entry.data_size, 301_056);
        assert_eq!(e[2].entry.data_size, 251_904);
        for pair in e.windows(2) {
            assert_eq!(
                pair[1].entry.data_offset,
                pair[0].entry.data_offset + pair[0].entry.data_size
            );
        }
        assert_eq!(e[0].entry.name, "rk3399_ddr_800MHz_v");
        assert_eq!(e[2].entry.name, "FlashBoot");
    }

    #[test]
    fn test_build_appends_crc() {
        let dir = TempDir::new().unwrap();
        let merger = BootMerger::plan(&scenario(&dir, true)).unwrap();
        let image = merger.build().unwrap();
        assert_eq!(image.len() as u32, merger.image_size());
        let (body, tail) = image.split_at(image.len() - 4);
        assert_eq!(tail, &calculate_crc32(body).to_le_bytes());
    }

    #[test]
    fn test_plaintext_matches_padded_input() {
        let dir = TempDir::new().unwrap();
        let opts = scenario(&dir, false);
        let image = BootMerger::plan(&opts).unwrap().build().unwrap();
        let parsed = BootImage::from_bytes(image.clone()).unwrap();
        assert!(!parsed.header().rc4_enabled());

        let e = &parsed.entries()[1];
        let src = std::fs::read(&opts.loaders[0].path).unwrap();
        let start = e.data_offset as usize;
        assert_eq!(&image[start..start + src.len()], &src[..]);
        assert!(image[start + src.len()..start + e.data_size as usize]
            .iter()
            .all(|b| *b == 0));
    }

    #[test]
    fn test_missing_loader_rejected() {
        let dir = TempDir::new().unwrap();
        let mut opts = scenario(&dir, true);
        opts.loaders.clear();
        assert!(matches!(
            BootMerger::plan(&opts),
            Err(RkImageError::MissingComponent(_))
        ));
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let dir = TempDir::new().unwrap();
        let mut opts = scenario(&dir, true);
        opts.max_size = 256 * 1024;
        assert!(matches!(
            BootMerger::plan(&opts),
            Err(RkImageError::ComponentTooLarge { size: 301_056, .. })
        ));
        assert!(!opts.output.exists());
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = TempDir::new().unwrap();
        let mut opts = scenario(&dir, true);
        opts.code472 = vec![dir.path().join("nope.bin")];
        let err = BootMerger::plan(&opts).unwrap_err();
        assert!(err.to_string().contains("nope.bin"));
    }
}
