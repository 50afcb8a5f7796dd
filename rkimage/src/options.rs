//! Plain option values handed to the container builders.
//!
//! Builders treat these as already resolved: paths point at real files and
//! sizes are in bytes. The CLI and the TOML loader in [`crate::config`]
//! produce them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Default scratch size for the boot container, also the per-entry limit
pub const DEFAULT_BOOT_MAX_SIZE: u32 = 1024 * 1024;

pub const DEFAULT_TRUST_COPIES: u32 = 2;
pub const DEFAULT_TRUST_MAX_SIZE: u32 = 2 * 1024 * 1024;

/// A loader stage stored under a fixed entry name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPath {
    pub name: String,
    pub path: PathBuf,
}

impl NamedPath {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOptions {
    pub chip: String,
    pub major: u16,
    pub minor: u16,
    /// DDR init blobs
    pub code471: Vec<PathBuf>,
    pub code471_delay: u16,
    /// USB plug blobs
    pub code472: Vec<PathBuf>,
    pub code472_delay: u16,
    pub loaders: Vec<NamedPath>,
    pub output: PathBuf,
    /// Obfuscate entry data with RC4
    pub rc4: bool,
    pub max_size: u32,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            chip: "RK3368".into(),
            major: 2,
            minor: 50,
            code471: Vec::new(),
            code471_delay: 0,
            code472: Vec::new(),
            code472_delay: 0,
            loaders: Vec::new(),
            output: PathBuf::from("rk3368_loader_v2.50.bin"),
            rc4: false,
            max_size: DEFAULT_BOOT_MAX_SIZE,
        }
    }
}

/// Trusted firmware stages, in placement order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TrustRole {
    Bl30,
    Bl31,
    Bl32,
    Bl33,
}

impl TrustRole {
    pub const ALL: [TrustRole; 4] = [Self::Bl30, Self::Bl31, Self::Bl32, Self::Bl33];

    /// Four-byte component id written into the trust tables
    pub fn component_id(self) -> [u8; 4] {
        match self {
            Self::Bl30 => *b"BL30",
            Self::Bl31 => *b"BL31",
            Self::Bl32 => *b"BL32",
            Self::Bl33 => *b"BL33",
        }
    }
}

impl fmt::Display for TrustRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bl30 => "BL30",
            Self::Bl31 => "BL31",
            Self::Bl32 => "BL32",
            Self::Bl33 => "BL33",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    /// Used for flat binaries; ELF segments carry their own address
    pub load_address: u32,
}

/// Digest selector recorded in the trust header flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum HashMode {
    None = 0,
    Sha160 = 1,
    Sha256Rk = 2,
    #[default]
    Sha256 = 3,
}

impl TryFrom<u32> for HashMode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Sha160),
            2 => Ok(Self::Sha256Rk),
            3 => Ok(Self::Sha256),
            other => Err(other),
        }
    }
}

/// Signature selector recorded in the trust header flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum SignMode {
    None = 0,
    Rsa1024 = 1,
    #[default]
    Rsa2048 = 2,
    Rsa2048Pss = 3,
}

impl TryFrom<u32> for SignMode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Rsa1024),
            2 => Ok(Self::Rsa2048),
            3 => Ok(Self::Rsa2048Pss),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustOptions {
    pub major: u16,
    pub minor: u16,
    pub components: BTreeMap<TrustRole, ComponentDescriptor>,
    pub output: PathBuf,
    pub copies: u32,
    /// Size of one replica in bytes
    pub max_size: u32,
    pub hash_mode: HashMode,
    pub sign_mode: SignMode,
}

impl Default for TrustOptions {
    fn default() -> Self {
        Self {
            major: 1,
            minor: 0,
            components: BTreeMap::new(),
            output: PathBuf::from("trust.img"),
            copies: DEFAULT_TRUST_COPIES,
            max_size: DEFAULT_TRUST_MAX_SIZE,
            hash_mode: HashMode::default(),
            sign_mode: SignMode::default(),
        }
    }
}

impl TrustOptions {
    /// Components that will actually be placed, in role order
    pub fn enabled(&self) -> impl Iterator<Item = (TrustRole, &ComponentDescriptor)> {
        self.components
            .iter()
            .filter(|(_, d)| d.enabled)
            .map(|(r, d)| (*r, d))
    }
}

/// Payload kind of a second-stage loader image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderRole {
    Uboot,
    TrustOs,
}

impl LoaderRole {
    pub fn magic(self) -> &'static [u8; 8] {
        match self {
            Self::Uboot => b"LOADER  ",
            Self::TrustOs => b"TOS     ",
        }
    }

    pub fn default_load_address(self) -> u32 {
        match self {
            Self::Uboot => 0x0020_0000,
            Self::TrustOs => 0x0020_0000 + 128 * 1024 * 1024 + 4 * 1024 * 1024,
        }
    }

    pub fn default_max_size(self) -> u32 {
        1024 * 1024
    }

    pub fn default_copies(self) -> u32 {
        4
    }
}

impl fmt::Display for LoaderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uboot => "uboot",
            Self::TrustOs => "trustos",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    pub role: LoaderRole,
    pub input: PathBuf,
    pub output: PathBuf,
    pub load_address: Option<u32>,
    /// Anti-rollback version, 0 disables it
    pub version: u32,
    pub max_size: Option<u32>,
    pub copies: Option<u32>,
}

impl LoaderOptions {
    pub fn new(role: LoaderRole, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            role,
            input: input.into(),
            output: output.into(),
            load_address: None,
            version: 0,
            max_size: None,
            copies: None,
        }
    }

    pub fn load_address(&self) -> u32 {
        self.load_address
            .unwrap_or_else(|| self.role.default_load_address())
    }

    pub fn max_size(&self) -> u32 {
        self.max_size.unwrap_or_else(|| self.role.default_max_size())
    }

    pub fn copies(&self) -> u32 {
        self.copies.unwrap_or_else(|| self.role.default_copies())
    }
}
