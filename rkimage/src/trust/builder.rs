use super::{
    BlSegment, ComponentData, ComponentTableEntry, TRUST_HEADER_REGION, TrustHeader,
    TrustLayout, collect_segments,
};
use crate::digest::sha256;
use crate::error::{IoResultExt, RkImageError, Result};
use crate::options::TrustOptions;
use crate::util::{ScratchBuffer, pack_version};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Lays out and writes a trust image
#[derive(Debug)]
pub struct TrustMerger {
    header: TrustHeader,
    layout: TrustLayout,
    segments: Vec<BlSegment>,
    copies: u32,
    max_size: u32,
    output: PathBuf,
}

impl TrustMerger {
    /// Collect the BL3x segments and check they fit in one replica
    pub fn plan(opts: &TrustOptions) -> Result<Self> {
        if opts.copies == 0 {
            return Err(RkImageError::invalid_config("trust copies must be at least 1"));
        }
        let segments = collect_segments(opts)?;
        if segments.is_empty() {
            return Err(RkImageError::MissingComponent("BL3x component".into()));
        }
        let layout = TrustLayout::new(segments.len())?;

        let total: u64 = TRUST_HEADER_REGION as u64
            + segments.iter().map(|s| s.aligned_size as u64).sum::<u64>();
        if total > opts.max_size as u64 {
            return Err(RkImageError::ImageTooLarge {
                size: total,
                max: opts.max_size as u64,
            });
        }

        let header = TrustHeader::new(
            pack_version(opts.major, opts.minor),
            opts.hash_mode,
            opts.sign_mode,
            &layout,
        );
        debug!(
            "trust: {} segments, sign offset {}",
            layout.count,
            layout.sign_offset()
        );

        Ok(Self {
            header,
            layout,
            segments,
            copies: opts.copies,
            max_size: opts.max_size,
            output: opts.output.clone(),
        })
    }

    pub fn segments(&self) -> &[BlSegment] {
        &self.segments
    }

    pub fn header(&self) -> &TrustHeader {
        &self.header
    }

    /// Assemble one replica, `max_size` bytes long
    pub fn build_replica(&self) -> Result<Vec<u8>> {
        let mut image = vec![0u8; self.max_size as usize];
        let mut scratch = ScratchBuffer::with_capacity(super::BL3X_FILESIZE_MAX as usize);

        let mut region = Vec::with_capacity(TRUST_HEADER_REGION);
        self.header.write_to(&mut region)?;

        let mut data = Vec::with_capacity(self.segments.len());
        let mut table = Vec::with_capacity(self.segments.len());
        let mut storage = TRUST_HEADER_REGION;
        for seg in &self.segments {
            let buf = scratch.zeroed(seg.aligned_size as usize)?;
            let mut file = File::open(&seg.source).with_path(&seg.source)?;
            file.seek(SeekFrom::Start(seg.file_offset as u64))
                .with_path(&seg.source)?;
            file.read_exact(&mut buf[..seg.size as usize])
                .with_path(&seg.source)?;

            let hash = sha256(buf);
            image[storage..storage + buf.len()].copy_from_slice(buf);

            let entry = ComponentTableEntry {
                component_id: seg.component_id,
                storage_address: (storage >> 9) as u32,
                image_size: seg.aligned_size >> 9,
            };
            debug!(
                "{}: load 0x{:08x} storage {} size {} sha256 {}",
                entry.id_str(),
                seg.load_address,
                entry.storage_address,
                entry.image_size,
                hex::encode(hash)
            );
            data.push(ComponentData {
                hash,
                load_address: seg.load_address,
            });
            table.push(entry);
            storage += seg.aligned_size as usize;
        }

        for d in &data {
            d.write_to(&mut region)?;
        }
        region.resize(self.layout.table_offset(0), 0);
        for t in &table {
            t.write_to(&mut region)?;
        }
        image[..region.len()].copy_from_slice(&region);
        Ok(image)
    }

    /// All replicas concatenated
    pub fn build(&self) -> Result<Vec<u8>> {
        let replica = self.build_replica()?;
        Ok(replica.repeat(self.copies as usize))
    }

    /// Write every replica to the configured output path
    pub fn build_to_file(&self) -> Result<PathBuf> {
        let replica = self.build_replica()?;
        let mut file = File::create(&self.output).with_path(&self.output)?;
        for _ in 0..self.copies {
            file.write_all(&replica).with_path(&self.output)?;
        }
        info!(
            "merged {} trust segments into {} ({} x {} bytes)",
            self.segments.len(),
            self.output.display(),
            self.copies,
            self.max_size
        );
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha256;
    use crate::options::{ComponentDescriptor, HashMode, TrustRole};
    use crate::trust::TrustImage;
    use tempfile::TempDir;

    fn options(dir: &TempDir, sizes: &[(TrustRole, usize)]) -> TrustOptions {
        let mut opts = TrustOptions {
            output: dir.path().join("trust.img"),
            ..Default::default()
        };
        for (role, size) in sizes {
            let path = dir.path().join(format!("{role}.bin"));
            std::fs::write(&path, vec![0x5au8; *size]).unwrap();
            opts.components.insert(
                *role,
                ComponentDescriptor {
                    enabled: true,
                    path: Some(path),
                    load_address: 0x1000 * (*role as u32 + 1),
                },
            );
        }
        opts
    }

    #[test]
    fn test_single_component_hash() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, &[(TrustRole::Bl30, 10_000)]);
        let replica = TrustMerger::plan(&opts).unwrap().build_replica().unwrap();
        assert_eq!(replica.len(), 2 * 1024 * 1024);

        let mut padded = vec![0x5au8; 10_000];
        padded.resize(10_240, 0);
        let image = TrustImage::from_bytes(replica).unwrap();
        let c = &image.components()[0];
        assert_eq!(c.entry.storage_address, 4);
        assert_eq!(c.entry.image_size, 20);
        assert_eq!(c.data.hash, sha256(&padded));
    }

    #[test]
    fn test_replicas_identical() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir, &[(TrustRole::Bl31, 3000), (TrustRole::Bl32, 5000)]);
        opts.copies = 3;
        opts.max_size = 64 * 1024;
        let image = TrustMerger::plan(&opts).unwrap().build().unwrap();
        assert_eq!(image.len(), 3 * 64 * 1024);
        let (a, rest) = image.split_at(64 * 1024);
        assert_eq!(a, &rest[..64 * 1024]);
        assert_eq!(a, &rest[64 * 1024..]);
    }

    #[test]
    fn test_image_too_large() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir, &[(TrustRole::Bl31, 100_000)]);
        opts.max_size = 64 * 1024;
        assert!(matches!(
            TrustMerger::plan(&opts),
            Err(RkImageError::ImageTooLarge { .. })
        ));
    }

    #[test]
    fn test_hash_mode_none_still_hashes() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir, &[(TrustRole::Bl31, 100)]);
        opts.hash_mode = HashMode::None;
        let image = TrustImage::from_bytes(TrustMerger::plan(&opts).unwrap().build_replica().unwrap())
            .unwrap();
        let mut padded = vec![0x5au8; 100];
        padded.resize(2048, 0);
        assert_eq!(image.components()[0].data.hash, sha256(&padded));
        assert_eq!(image.header().hash_mode, 0);
        image.verify().unwrap();
    }

    #[test]
    fn test_no_components() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, &[]);
        assert!(matches!(
            TrustMerger::plan(&opts),
            Err(RkImageError::MissingComponent(_))
        ));
    }
}
