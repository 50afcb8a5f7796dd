use super::{ComponentData, ComponentTableEntry, TRUST_HEADER_REGION, TrustHeader, TrustLayout};
use crate::digest::sha256;
use crate::error::{IoResultExt, RkImageError, Result};
use crate::options::{HashMode, SignMode};
use crate::util::{plain_file_name, unpack_version};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustComponent {
    pub data: ComponentData,
    pub entry: ComponentTableEntry,
}

/// A trust image read back into memory. Only the first replica is used.
#[derive(Debug, Clone)]
pub struct TrustImage {
    header: TrustHeader,
    components: Vec<TrustComponent>,
    data: Vec<u8>,
}

impl TrustImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).with_path(path)?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let header = TrustHeader::from_bytes(&data)?;
        let layout = TrustLayout::new(header.count as usize)?;
        if layout.sign_offset() != header.sign_offset as usize {
            return Err(RkImageError::invalid_image_data(format!(
                "sign offset {} does not match {} components",
                header.sign_offset, header.count
            )));
        }

        let region = data.get(..TRUST_HEADER_REGION).ok_or_else(|| {
            RkImageError::truncated(
                "trust header region",
                TRUST_HEADER_REGION as u64,
                data.len() as u64,
            )
        })?;

        let mut components = Vec::with_capacity(layout.count);
        for i in 0..layout.count {
            let cd = ComponentData::from_bytes(&region[layout.component_data_offset(i)..])?;
            let entry = ComponentTableEntry::from_bytes(&region[layout.table_offset(i)..])?;
            components.push(TrustComponent { data: cd, entry });
        }

        Ok(Self {
            header,
            components,
            data,
        })
    }

    pub fn header(&self) -> &TrustHeader {
        &self.header
    }

    pub fn components(&self) -> &[TrustComponent] {
        &self.components
    }

    /// Stored payload of a component, padding included
    pub fn component_bytes(&self, c: &TrustComponent) -> Result<&[u8]> {
        let start = c.entry.storage_offset();
        let end = start + c.entry.storage_len();
        self.data.get(start..end).ok_or_else(|| {
            RkImageError::truncated(
                format!("component {}", c.entry.id_str()),
                end as u64,
                self.data.len() as u64,
            )
        })
    }

    /// Recompute every component digest
    pub fn verify(&self) -> Result<()> {
        for c in &self.components {
            let calculated = sha256(self.component_bytes(c)?);
            if calculated != c.data.hash {
                return Err(RkImageError::hash_mismatch(&c.data.hash, &calculated));
            }
        }
        Ok(())
    }

    /// Write each component to `out_dir/<id>`; repeated ids get `_<n>` appended
    pub fn unpack_to(&self, out_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let out_dir = out_dir.as_ref();
        std::fs::create_dir_all(out_dir).with_path(out_dir)?;

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut written = Vec::with_capacity(self.components.len());
        for (i, c) in self.components.iter().enumerate() {
            let bytes = self.component_bytes(c)?;
            let mut id = c.entry.id_str();
            if id.is_empty() {
                id = format!("component{i}");
            }
            let n = seen.entry(id.clone()).or_insert(0);
            let name = if *n == 0 { id } else { format!("{id}_{n}") };
            *n += 1;

            let path = out_dir.join(plain_file_name(&name)?);
            std::fs::write(&path, bytes).with_path(&path)?;
            info!(
                "unpacked {} ({} bytes, load 0x{:08x})",
                path.display(),
                bytes.len(),
                c.data.load_address
            );
            written.push(path);
        }
        Ok(written)
    }

    pub fn summary(&self) -> String {
        let h = &self.header;
        let (major, minor) = unpack_version(h.version);
        let hash = HashMode::try_from(h.hash_mode)
            .map(|m| format!("{m:?}"))
            .unwrap_or_else(|v| format!("unknown({v})"));
        let sign = SignMode::try_from(h.sign_mode)
            .map(|m| format!("{m:?}"))
            .unwrap_or_else(|v| format!("unknown({v})"));

        let mut s = String::new();
        let _ = writeln!(s, "Version: {major}.{minor:02}");
        let _ = writeln!(s, "Hash: {hash}, sign: {sign}");
        let _ = writeln!(s, "Components: {} (sign offset {})", h.count, h.sign_offset);
        for c in &self.components {
            let _ = writeln!(
                s,
                "  {} load 0x{:08x} storage 0x{:x} size {} sha256 {}",
                c.entry.id_str(),
                c.data.load_address,
                c.entry.storage_offset(),
                c.entry.storage_len(),
                hex::encode(c.data.hash)
            );
        }
        s
    }

    pub fn print_info(&self) {
        print!("{}", self.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ComponentDescriptor, TrustOptions, TrustRole};
    use crate::trust::TrustMerger;
    use tempfile::TempDir;

    fn build(dir: &TempDir) -> Vec<u8> {
        let mut opts = TrustOptions {
            max_size: 128 * 1024,
            copies: 1,
            ..Default::default()
        };
        for (role, len) in [(TrustRole::Bl31, 7000usize), (TrustRole::Bl32, 300)] {
            let path = dir.path().join(format!("{role}.bin"));
            std::fs::write(&path, vec![role as u8 + 1; len]).unwrap();
            opts.components.insert(
                role,
                ComponentDescriptor {
                    enabled: true,
                    path: Some(path),
                    load_address: 0x4000_0000,
                },
            );
        }
        TrustMerger::plan(&opts).unwrap().build().unwrap()
    }

    #[test]
    fn test_verify_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let mut bytes = build(&dir);
        TrustImage::from_bytes(bytes.clone()).unwrap().verify().unwrap();
        bytes[2048 + 10] ^= 1;
        assert!(matches!(
            TrustImage::from_bytes(bytes).unwrap().verify(),
            Err(RkImageError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_out_of_range_storage() {
        let dir = TempDir::new().unwrap();
        let mut bytes = build(&dir);
        bytes.truncate(4096);
        let image = TrustImage::from_bytes(bytes).unwrap();
        let c = image.components()[0].clone();
        assert!(matches!(
            image.component_bytes(&c),
            Err(RkImageError::Truncated { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_get_suffix() {
        let dir = TempDir::new().unwrap();
        let mut bytes = build(&dir);
        // relabel the second component as another BL31
        let layout = TrustLayout::new(2).unwrap();
        let at = layout.table_offset(1);
        bytes[at..at + 4].copy_from_slice(b"BL31");

        let out = dir.path().join("out");
        let files = TrustImage::from_bytes(bytes).unwrap().unpack_to(&out).unwrap();
        assert_eq!(files, vec![out.join("BL31"), out.join("BL31_1")]);
    }

    #[test]
    fn test_unpack_rejects_escaping_id() {
        let dir = TempDir::new().unwrap();
        let mut bytes = build(&dir);
        let layout = TrustLayout::new(2).unwrap();
        let at = layout.table_offset(0);
        bytes[at..at + 4].copy_from_slice(b"../x");

        let out = dir.path().join("out");
        let image = TrustImage::from_bytes(bytes).unwrap();
        assert!(matches!(
            image.unpack_to(&out),
            Err(RkImageError::InvalidImageData(_))
        ));
        assert!(!dir.path().join("x").exists());
    }

    #[test]
    fn test_verify_checks_hashes_in_none_mode() {
        let dir = TempDir::new().unwrap();
        let mut bytes = build(&dir);
        // hash mode is the low nibble of the flags word
        bytes[8] &= !0xf;

        let image = TrustImage::from_bytes(bytes.clone()).unwrap();
        assert_eq!(image.header().hash_mode, HashMode::None as u32);
        image.verify().unwrap();

        bytes[2048 + 10] ^= 1;
        assert!(matches!(
            TrustImage::from_bytes(bytes).unwrap().verify(),
            Err(RkImageError::HashMismatch { .. })
        ));
    }
}
