//! # rkimage
//!
//! Pack and unpack the firmware containers used by Rockchip boot ROMs and
//! first-stage loaders.
//!
//! Three formats are supported:
//!
//! - the multi-entry boot container (`loader.bin`), see [`boot`]
//! - the BL3x trust container (`trust.img`), see [`trust`]
//! - the second-stage loader container (`uboot.img`), see [`loader`]
//!
//! ## Example
//!
//! ```no_run
//! use rkimage::{BootMerger, BootOptions, NamedPath};
//!
//! let opts = BootOptions {
//!     chip: "RK3399".into(),
//!     code471: vec!["rk3399_ddr_800MHz_v1.24.bin".into()],
//!     code472: vec!["rk3399_usbplug_v1.26.bin".into()],
//!     loaders: vec![
//!         NamedPath::new("FlashData", "rk3399_ddr_800MHz_v1.24.bin"),
//!         NamedPath::new("FlashBoot", "rk3399_miniloader_v1.26.bin"),
//!     ],
//!     output: "loader.bin".into(),
//!     ..Default::default()
//! };
//! BootMerger::plan(&opts)?.build_to_file()?;
//! # Ok::<(), rkimage::RkImageError>(())
//! ```

#[macro_use]
extern crate log;

pub mod boot;
pub mod cli;
pub mod config;
pub mod crc;
pub mod digest;
pub mod elf;
pub mod error;
pub mod loader;
pub mod options;
pub mod rc4;
pub mod trust;
pub mod util;

pub use boot::{BootImage, BootMerger};
pub use crc::calculate_crc32;
pub use error::{RkImageError, Result};
pub use loader::LoaderImage;
pub use options::{
    BootOptions, ComponentDescriptor, HashMode, LoaderOptions, LoaderRole, NamedPath, SignMode,
    TrustOptions, TrustRole,
};
pub use trust::{TrustImage, TrustMerger};

/// Current version of rkimage
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
