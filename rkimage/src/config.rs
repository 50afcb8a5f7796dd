//! TOML configuration files for the boot and trust containers
//!
//! Boot:
//!
//! ```toml
//! rc4 = false
//!
//! [chip]
//! name = "RK3399"
//!
//! [version]
//! major = 1
//! minor = 24
//!
//! [code471]
//! path = ["bin/rk33/rk3399_ddr_800MHz_v1.24.bin"]
//! sleep = 1
//!
//! [code472]
//! path = ["bin/rk33/rk3399_usbplug_v1.26.bin"]
//! sleep = 1
//!
//! [[loader]]
//! name = "FlashData"
//! path = "bin/rk33/rk3399_ddr_800MHz_v1.24.bin"
//!
//! [[loader]]
//! name = "FlashBoot"
//! path = "bin/rk33/rk3399_miniloader_v1.26.bin"
//!
//! [output]
//! path = "rk3399_loader_v1.24.126.bin"
//! ```
//!
//! Trust:
//!
//! ```toml
//! [version]
//! major = 1
//! minor = 0
//!
//! [bl31]
//! enabled = true
//! path = "bin/rk33/rk3399_bl31_v1.35.elf"
//! address = 0x10000
//!
//! [bl32]
//! enabled = true
//! path = "bin/rk33/rk3399_bl32_v2.01.bin"
//! address = 0x8400000
//!
//! [output]
//! path = "trust.img"
//! ```

use crate::error::{IoResultExt, RkImageError, Result};
use crate::options::{
    BootOptions, ComponentDescriptor, DEFAULT_BOOT_MAX_SIZE, DEFAULT_TRUST_COPIES,
    DEFAULT_TRUST_MAX_SIZE, HashMode, NamedPath, SignMode, TrustOptions, TrustRole,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Input path adjustments applied before paths are resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathRewrite {
    /// Prefix put in front of input paths that do not start with it
    pub prepath: Option<String>,
    /// Replace the first occurrence of `.0` with `.1`; prepend `.1` when absent
    pub replace: Option<(String, String)>,
}

impl PathRewrite {
    pub fn apply(&self, path: &Path) -> PathBuf {
        let s = path.to_string_lossy().replace('\\', "/");
        if let Some((old, new)) = &self.replace {
            return match s.find(old.as_str()) {
                Some(_) => PathBuf::from(s.replacen(old.as_str(), new, 1)),
                None => PathBuf::from(format!("{new}{s}")),
            };
        }
        match &self.prepath {
            Some(pre) if !s.starts_with(pre.as_str()) => PathBuf::from(format!("{pre}{s}")),
            _ => PathBuf::from(s),
        }
    }
}

/// Resolves input paths read from a config file
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    base_dir: PathBuf,
    rewrite: PathRewrite,
}

impl PathResolver {
    pub fn new(base_dir: impl Into<PathBuf>, rewrite: PathRewrite) -> Self {
        Self {
            base_dir: base_dir.into(),
            rewrite,
        }
    }

    /// Resolver for paths that appear inside `config_path`
    pub fn for_config(config_path: &Path, rewrite: PathRewrite) -> Self {
        let base = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::new(base, rewrite)
    }

    pub fn input(&self, path: &Path) -> PathBuf {
        let p = self.rewrite.apply(path);
        if p.is_relative() {
            self.base_dir.join(p)
        } else {
            p
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChipSection {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VersionSection {
    #[serde(default)]
    major: u16,
    #[serde(default)]
    minor: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CodeSection {
    #[serde(default)]
    path: Vec<PathBuf>,
    /// Delay after running the blob, in ms
    #[serde(default)]
    sleep: u16,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputSection {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BootConfig {
    #[serde(default)]
    rc4: bool,
    /// Per-entry limit in KiB
    size: Option<u32>,
    chip: ChipSection,
    version: Option<VersionSection>,
    #[serde(default)]
    code471: CodeSection,
    #[serde(default)]
    code472: CodeSection,
    #[serde(default)]
    loader: Vec<NamedPath>,
    output: OutputSection,
}

/// Parse a boot config; relative inputs resolve through `resolver`
pub fn parse_boot_config(text: &str, resolver: &PathResolver) -> Result<BootOptions> {
    let cfg: BootConfig = toml::from_str(text)?;
    let defaults = BootOptions::default();
    let (major, minor) = cfg
        .version
        .map(|v| (v.major, v.minor))
        .unwrap_or((defaults.major, defaults.minor));

    let opts = BootOptions {
        chip: cfg.chip.name,
        major,
        minor,
        code471: cfg.code471.path.iter().map(|p| resolver.input(p)).collect(),
        code471_delay: cfg.code471.sleep,
        code472: cfg.code472.path.iter().map(|p| resolver.input(p)).collect(),
        code472_delay: cfg.code472.sleep,
        loaders: cfg
            .loader
            .into_iter()
            .map(|l| NamedPath {
                path: resolver.input(&l.path),
                name: l.name,
            })
            .collect(),
        output: cfg.output.path,
        rc4: cfg.rc4,
        max_size: match cfg.size {
            Some(kb) => kb_to_bytes(kb, 512)?,
            None => DEFAULT_BOOT_MAX_SIZE,
        },
    };
    if opts.loaders.is_empty() {
        return Err(RkImageError::MissingComponent("[[loader]]".into()));
    }
    Ok(opts)
}

pub fn load_boot_config(path: &Path, rewrite: PathRewrite) -> Result<BootOptions> {
    let text = std::fs::read_to_string(path).with_path(path)?;
    parse_boot_config(&text, &PathResolver::for_config(path, rewrite))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComponentSection {
    #[serde(default)]
    enabled: bool,
    path: Option<PathBuf>,
    #[serde(default)]
    address: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TrustOutputSection {
    path: PathBuf,
    copies: Option<u32>,
    /// Replica size in KiB
    size: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TrustConfig {
    hash: Option<HashMode>,
    sign: Option<SignMode>,
    version: Option<VersionSection>,
    bl30: Option<ComponentSection>,
    bl31: Option<ComponentSection>,
    bl32: Option<ComponentSection>,
    bl33: Option<ComponentSection>,
    output: TrustOutputSection,
}

pub fn parse_trust_config(text: &str, resolver: &PathResolver) -> Result<TrustOptions> {
    let cfg: TrustConfig = toml::from_str(text)?;
    let defaults = TrustOptions::default();
    let (major, minor) = cfg
        .version
        .map(|v| (v.major, v.minor))
        .unwrap_or((defaults.major, defaults.minor));

    let mut opts = TrustOptions {
        major,
        minor,
        output: cfg.output.path,
        copies: cfg.output.copies.unwrap_or(DEFAULT_TRUST_COPIES),
        max_size: match cfg.output.size {
            Some(kb) => kb_to_bytes(kb, 64)?,
            None => DEFAULT_TRUST_MAX_SIZE,
        },
        hash_mode: cfg.hash.unwrap_or_default(),
        sign_mode: cfg.sign.unwrap_or_default(),
        ..defaults
    };

    let sections = [cfg.bl30, cfg.bl31, cfg.bl32, cfg.bl33];
    for (role, section) in TrustRole::ALL.into_iter().zip(sections) {
        let Some(section) = section else { continue };
        if section.enabled && section.path.is_none() {
            return Err(RkImageError::MissingComponent(format!("{role} path")));
        }
        opts.components.insert(
            role,
            ComponentDescriptor {
                enabled: section.enabled,
                path: section.path.as_deref().map(|p| resolver.input(p)),
                load_address: section.address,
            },
        );
    }
    Ok(opts)
}

pub fn load_trust_config(path: &Path, rewrite: PathRewrite) -> Result<TrustOptions> {
    let text = std::fs::read_to_string(path).with_path(path)?;
    parse_trust_config(&text, &PathResolver::for_config(path, rewrite))
}

/// Convert a KiB count that must be a multiple of `granule_kb`
pub fn kb_to_bytes(kb: u32, granule_kb: u32) -> Result<u32> {
    if kb == 0 || kb % granule_kb != 0 {
        return Err(RkImageError::invalid_config(format!(
            "size {kb} KiB is not a multiple of {granule_kb} KiB"
        )));
    }
    kb.checked_mul(1024)
        .ok_or_else(|| RkImageError::invalid_config(format!("size {kb} KiB is too large")))
}

/// Swap a trailing `.bin` of `output` for `suffix`, or append it
pub fn with_subfix(output: &Path, suffix: &str) -> PathBuf {
    let s = output.to_string_lossy();
    let stem = s.strip_suffix(".bin").unwrap_or(&s);
    PathBuf::from(format!("{stem}{suffix}"))
}

/// Find `v<major>.<minor>` in a file name, e.g. `rk3399_miniloader_v1.26.bin`
pub fn version_from_file_name(path: &Path) -> Option<(u16, u16)> {
    let name = path.file_name()?.to_str()?;
    for (i, _) in name.match_indices('v') {
        let rest = &name[i + 1..];
        let Some((major, tail)) = rest.split_once('.') else {
            continue;
        };
        let minor: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let (Ok(major), Ok(minor)) = (major.parse(), minor.parse()) {
            return Some((major, minor));
        }
    }
    None
}

/// Boot options for the common four-file layout, without a config file.
///
/// The image version comes from the FlashBoot file name and the output is
/// named `<chip>_loader_v<data>.<boot>.bin` after both stage versions.
pub fn boot_options_from_stages(
    chip: &str,
    ddr: PathBuf,
    usbplug: PathBuf,
    flash_data: PathBuf,
    flash_boot: PathBuf,
) -> BootOptions {
    let (v0, v1) = version_from_file_name(&flash_data).unwrap_or_else(|| {
        warn!("no version in {}", flash_data.display());
        (0, 0)
    });
    let (v2, v3) = version_from_file_name(&flash_boot).unwrap_or_else(|| {
        warn!("no version in {}", flash_boot.display());
        (0, 0)
    });

    BootOptions {
        chip: chip.to_string(),
        major: v2,
        minor: v3,
        code471: vec![ddr],
        code472: vec![usbplug],
        loaders: vec![
            NamedPath::new("FlashData", flash_data),
            NamedPath::new("FlashBoot", flash_boot),
        ],
        output: PathBuf::from(format!("{chip}_loader_v{v0}.{v1:02}.{v2}{v3:02}.bin")),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOT: &str = r#"
rc4 = true

[chip]
name = "RK3399"

[version]
major = 1
minor = 24

[code471]
path = ["bin/rk3399_ddr.bin"]
sleep = 1

[[loader]]
name = "FlashData"
path = "bin/rk3399_ddr.bin"

[[loader]]
name = "FlashBoot"
path = "/abs/miniloader.bin"

[output]
path = "loader.bin"
"#;

    #[test]
    fn test_parse_boot() {
        let resolver = PathResolver::new("/cfg", PathRewrite::default());
        let opts = parse_boot_config(BOOT, &resolver).unwrap();
        assert_eq!(opts.chip, "RK3399");
        assert_eq!((opts.major, opts.minor), (1, 24));
        assert_eq!(opts.code471, vec![PathBuf::from("/cfg/bin/rk3399_ddr.bin")]);
        assert_eq!(opts.code471_delay, 1);
        assert!(opts.code472.is_empty());
        assert_eq!(opts.loaders[1].path, PathBuf::from("/abs/miniloader.bin"));
        assert_eq!(opts.output, PathBuf::from("loader.bin"));
        assert!(opts.rc4);
        assert_eq!(opts.max_size, DEFAULT_BOOT_MAX_SIZE);
    }

    #[test]
    fn test_boot_requires_loader() {
        let text = "[chip]\nname = \"RK3328\"\n[output]\npath = \"x.bin\"\n";
        assert!(matches!(
            parse_boot_config(text, &PathResolver::default()),
            Err(RkImageError::MissingComponent(_))
        ));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let text = "[chip]\nname = \"RK3328\"\ncolour = 1\n[output]\npath = \"x\"\n";
        assert!(matches!(
            parse_boot_config(text, &PathResolver::default()),
            Err(RkImageError::Config(_))
        ));
    }

    #[test]
    fn test_parse_trust() {
        let text = r#"
hash = "Sha256Rk"

[bl30]
enabled = false

[bl31]
enabled = true
path = "bl31.elf"
address = 0x10000

[bl32]
enabled = true
path = "bl32.bin"
address = 0x8400000

[output]
path = "trust.img"
size = 1024
copies = 4
"#;
        let opts = parse_trust_config(text, &PathResolver::new("rk", PathRewrite::default())).unwrap();
        assert_eq!(opts.hash_mode, HashMode::Sha256Rk);
        assert_eq!(opts.sign_mode, SignMode::Rsa2048);
        assert_eq!(opts.max_size, 1024 * 1024);
        assert_eq!(opts.copies, 4);
        let enabled: Vec<_> = opts.enabled().map(|(r, _)| r).collect();
        assert_eq!(enabled, vec![TrustRole::Bl31, TrustRole::Bl32]);
        let bl32 = &opts.components[&TrustRole::Bl32];
        assert_eq!(bl32.load_address, 0x0840_0000);
        assert_eq!(bl32.path.as_deref(), Some(Path::new("rk/bl32.bin")));
    }

    #[test]
    fn test_trust_enabled_needs_path() {
        let text = "[bl31]\nenabled = true\n[output]\npath = \"t.img\"\n";
        assert!(matches!(
            parse_trust_config(text, &PathResolver::default()),
            Err(RkImageError::MissingComponent(_))
        ));
    }

    #[test]
    fn test_path_rewrite() {
        let pre = PathRewrite {
            prepath: Some("tools/rkbin/".into()),
            replace: None,
        };
        assert_eq!(pre.apply(Path::new("bin/a.bin")), PathBuf::from("tools/rkbin/bin/a.bin"));
        assert_eq!(
            pre.apply(Path::new("tools/rkbin/bin/a.bin")),
            PathBuf::from("tools/rkbin/bin/a.bin")
        );

        let rep = PathRewrite {
            prepath: Some("ignored/".into()),
            replace: Some(("bin/rk33/".into(), "out/".into())),
        };
        assert_eq!(rep.apply(Path::new("bin\\rk33\\a.bin")), PathBuf::from("out/a.bin"));
        assert_eq!(rep.apply(Path::new("b.bin")), PathBuf::from("out/b.bin"));
    }

    #[test]
    fn test_kb_sizes() {
        assert_eq!(kb_to_bytes(512, 512).unwrap(), 512 * 1024);
        assert!(kb_to_bytes(100, 64).is_err());
        assert!(kb_to_bytes(0, 64).is_err());
    }

    #[test]
    fn test_subfix() {
        assert_eq!(
            with_subfix(Path::new("rk3399_loader_v1.24.bin"), "_spl.bin"),
            PathBuf::from("rk3399_loader_v1.24_spl.bin")
        );
        assert_eq!(with_subfix(Path::new("loader.img"), ".bak"), PathBuf::from("loader.img.bak"));
    }

    #[test]
    fn test_stage_file_versions() {
        assert_eq!(
            version_from_file_name(Path::new("bin/rk33/rk3399_miniloader_v1.26.bin")),
            Some((1, 26))
        );
        assert_eq!(
            version_from_file_name(Path::new("rk3399_ddr_800MHz_v1.24.bin")),
            Some((1, 24))
        );
        assert_eq!(version_from_file_name(Path::new("plain.bin")), None);

        let opts = boot_options_from_stages(
            "RK3399",
            "ddr.bin".into(),
            "usbplug.bin".into(),
            "rk3399_ddr_800MHz_v1.24.bin".into(),
            "rk3399_miniloader_v1.26.bin".into(),
        );
        assert_eq!((opts.major, opts.minor), (1, 26));
        assert_eq!(opts.output, PathBuf::from("RK3399_loader_v1.24.126.bin"));
        assert_eq!(opts.loaders[0].name, "FlashData");
    }
}
