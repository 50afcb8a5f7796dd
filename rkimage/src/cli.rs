//! Command line interface for rkimage

use crate::boot::{BootImage, BootMerger};
use crate::config::{self, PathRewrite};
use crate::loader::{self, LoaderImage};
use crate::options::{BootOptions, LoaderOptions, LoaderRole, TrustOptions, TrustRole};
use crate::trust::{TrustImage, TrustMerger};
use crate::{HashMode, SignMode, VERSION};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Command line arguments for rkimage
#[derive(Parser, Debug)]
#[command(name = "rkimage")]
#[command(version = VERSION)]
#[command(about = "Pack and unpack Rockchip loader, trust and uboot images", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - only output errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Multi-entry boot container (loader.bin)
    #[command(subcommand)]
    Boot(BootCommand),
    /// BL3x trust container (trust.img)
    #[command(subcommand)]
    Trust(TrustCommand),
    /// Second-stage loader container (uboot.img, tee trust.img)
    #[command(subcommand)]
    Loader(LoaderCommand),
}

#[derive(Subcommand, Debug)]
pub enum BootCommand {
    /// Merge boot stages into a loader image
    Pack(BootPackArgs),
    /// Extract every entry of a loader image
    Unpack(UnpackArgs),
    /// Print header and entry tables
    Info(ImageArg),
    /// Check the trailing CRC
    Verify(ImageArg),
}

#[derive(Subcommand, Debug)]
pub enum TrustCommand {
    /// Merge BL3x components into a trust image
    Pack(TrustPackArgs),
    /// Extract every component of a trust image
    Unpack(UnpackArgs),
    /// Print header and component tables
    Info(ImageArg),
    /// Recompute component digests
    Verify(ImageArg),
}

#[derive(Subcommand, Debug)]
pub enum LoaderCommand {
    /// Wrap a binary into a replicated loader image
    Pack(LoaderPackArgs),
    /// Extract the payload of a loader image
    Unpack(LoaderUnpackArgs),
    /// Print the loader header
    Info(ImageArg),
    /// Check CRC and digest of the payload
    Verify(ImageArg),
}

/// Shared input path adjustments
#[derive(Parser, Debug, Default)]
pub struct RewriteArgs {
    /// Prefix prepended to relative input paths
    #[arg(long)]
    pub prepath: Option<String>,

    /// Replace the first occurrence of OLD in input paths with NEW
    #[arg(long, num_args = 2, value_names = ["OLD", "NEW"])]
    pub replace: Option<Vec<String>>,
}

impl RewriteArgs {
    fn to_rewrite(&self) -> PathRewrite {
        PathRewrite {
            prepath: self.prepath.clone(),
            replace: self
                .replace
                .as_ref()
                .and_then(|r| Some((r.first()?.clone(), r.get(1)?.clone()))),
        }
    }
}

#[derive(Parser, Debug)]
pub struct BootPackArgs {
    /// TOML config describing the entries
    pub config: Option<PathBuf>,

    /// Chip name, used with the stage files below instead of a config
    #[arg(long, requires_all = ["ddr", "usbplug", "flash_data", "flash_boot"])]
    pub chip: Option<String>,

    /// DDR init blob (471)
    #[arg(long)]
    pub ddr: Option<PathBuf>,

    /// USB plug blob (472)
    #[arg(long)]
    pub usbplug: Option<PathBuf>,

    /// FlashData loader stage
    #[arg(long)]
    pub flash_data: Option<PathBuf>,

    /// FlashBoot loader stage
    #[arg(long)]
    pub flash_boot: Option<PathBuf>,

    /// Output image, overrides the config
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Replace a trailing `.bin` of the output name with this suffix
    #[arg(long)]
    pub subfix: Option<String>,

    /// Obfuscate entry data with RC4
    #[arg(long)]
    pub rc4: bool,

    /// Per-entry size limit in KiB, 512 KiB aligned
    #[arg(long)]
    pub size: Option<u32>,

    #[command(flatten)]
    pub rewrite: RewriteArgs,
}

#[derive(Parser, Debug)]
pub struct TrustPackArgs {
    /// TOML config describing the components
    pub config: PathBuf,

    /// Output image, overrides the config
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Signature mode: 0 none, 1 rsa1024, 2 rsa2048, 3 rsa2048 pss
    #[arg(long)]
    pub rsa: Option<u32>,

    /// Hash mode: 0 none, 1 sha160, 2 sha256 rk, 3 sha256
    #[arg(long)]
    pub sha: Option<u32>,

    /// Replica size in KiB, 64 KiB aligned
    #[arg(long)]
    pub size: Option<u32>,

    /// Number of replicas
    #[arg(long)]
    pub copies: Option<u32>,

    /// Leave BL32 out even if the config enables it
    #[arg(long, conflicts_with = "force_bl32")]
    pub ignore_bl32: bool,

    /// Place BL32 even if the config disables it
    #[arg(long)]
    pub force_bl32: bool,

    #[command(flatten)]
    pub rewrite: RewriteArgs,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderRoleArg {
    Uboot,
    Trustos,
}

impl From<LoaderRoleArg> for LoaderRole {
    fn from(arg: LoaderRoleArg) -> Self {
        match arg {
            LoaderRoleArg::Uboot => Self::Uboot,
            LoaderRoleArg::Trustos => Self::TrustOs,
        }
    }
}

#[derive(Parser, Debug)]
pub struct LoaderPackArgs {
    /// Payload kind
    #[arg(value_enum)]
    pub role: LoaderRoleArg,

    /// Raw binary, e.g. u-boot.bin
    pub input: PathBuf,

    /// Output image, e.g. uboot.img
    pub output: PathBuf,

    /// Load address (hexadecimal)
    #[arg(short = 'a', long, value_parser = parse_hex_u32)]
    pub load_addr: Option<u32>,

    /// Replica size in KiB, 64 KiB aligned
    #[arg(long)]
    pub size: Option<u32>,

    /// Number of replicas
    #[arg(long)]
    pub copies: Option<u32>,

    /// Anti-rollback version
    #[arg(long = "version", default_value_t = 0)]
    pub rollback_version: u32,

    /// Prefix prepended to the input path
    #[arg(long)]
    pub prepath: Option<String>,
}

#[derive(Parser, Debug)]
pub struct LoaderUnpackArgs {
    /// Loader image
    pub image: PathBuf,

    /// Where to write the payload
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct UnpackArgs {
    /// Image file to unpack
    pub image: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,
}

#[derive(Parser, Debug)]
pub struct ImageArg {
    /// Image file to examine
    pub image: PathBuf,
}

/// Parse hexadecimal string to u32
fn parse_hex_u32(s: &str) -> std::result::Result<u32, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    }
}

/// Main CLI handler
pub fn run_cli(args: Args) -> anyhow::Result<()> {
    let quiet = args.quiet;
    match args.command {
        Commands::Boot(cmd) => match cmd {
            BootCommand::Pack(a) => handle_boot_pack(a, quiet),
            BootCommand::Unpack(a) => handle_boot_unpack(a, quiet),
            BootCommand::Info(a) => {
                BootImage::open(&a.image)?.print_info();
                Ok(())
            }
            BootCommand::Verify(a) => {
                let crc = BootImage::open(&a.image)?
                    .verify_crc()
                    .with_context(|| format!("verify {}", a.image.display()))?;
                status(quiet, format!("CRC32 0x{crc:08x} OK"));
                Ok(())
            }
        },
        Commands::Trust(cmd) => match cmd {
            TrustCommand::Pack(a) => handle_trust_pack(a, quiet),
            TrustCommand::Unpack(a) => {
                let files = TrustImage::open(&a.image)?.unpack_to(&a.out)?;
                status(quiet, format!("unpacked {} components to {}", files.len(), a.out.display()));
                Ok(())
            }
            TrustCommand::Info(a) => {
                TrustImage::open(&a.image)?.print_info();
                Ok(())
            }
            TrustCommand::Verify(a) => {
                let image = TrustImage::open(&a.image)?;
                image
                    .verify()
                    .with_context(|| format!("verify {}", a.image.display()))?;
                status(quiet, format!("{} component hashes OK", image.components().len()));
                Ok(())
            }
        },
        Commands::Loader(cmd) => match cmd {
            LoaderCommand::Pack(a) => handle_loader_pack(a, quiet),
            LoaderCommand::Unpack(a) => {
                LoaderImage::open(&a.image)?.unpack_to(&a.output)?;
                status(quiet, format!("unpacked {}", a.output.display()));
                Ok(())
            }
            LoaderCommand::Info(a) => {
                let (role, hdr) = loader::read_info(&a.image)?;
                print!("{}", loader::summary(role, &hdr));
                Ok(())
            }
            LoaderCommand::Verify(a) => {
                LoaderImage::open(&a.image)?
                    .verify()
                    .with_context(|| format!("verify {}", a.image.display()))?;
                status(quiet, "CRC32 and hash OK".to_string());
                Ok(())
            }
        },
    }
}

fn status(quiet: bool, msg: String) {
    if !quiet {
        eprintln!("{}", msg.green());
    }
}

fn boot_options(args: &BootPackArgs) -> anyhow::Result<BootOptions> {
    let rewrite = args.rewrite.to_rewrite();
    if let Some(chip) = &args.chip {
        if args.config.is_some() {
            bail!("give either a config file or --chip with stage files, not both");
        }
        // clap enforces the stage files together with --chip
        let stage = |p: &Option<PathBuf>| rewrite.apply(p.as_deref().unwrap_or(Path::new("")));
        return Ok(config::boot_options_from_stages(
            chip,
            stage(&args.ddr),
            stage(&args.usbplug),
            stage(&args.flash_data),
            stage(&args.flash_boot),
        ));
    }
    let Some(path) = &args.config else {
        bail!("a boot config file or --chip with stage files is required");
    };
    config::load_boot_config(path, rewrite)
        .with_context(|| format!("load boot config {}", path.display()))
}

fn handle_boot_pack(args: BootPackArgs, quiet: bool) -> anyhow::Result<()> {
    let mut opts = boot_options(&args)?;
    if let Some(out) = &args.out {
        opts.output = out.clone();
    }
    if let Some(suffix) = &args.subfix {
        opts.output = config::with_subfix(&opts.output, suffix);
    }
    if args.rc4 {
        opts.rc4 = true;
    }
    if let Some(kb) = args.size {
        opts.max_size = config::kb_to_bytes(kb, 512)?;
    }

    let merger = BootMerger::plan(&opts)?;
    let out = merger.build_to_file()?;
    status(
        quiet,
        format!(
            "merged {} entries into {} ({} bytes)",
            merger.entries().len(),
            out.display(),
            merger.image_size()
        ),
    );
    Ok(())
}

fn handle_boot_unpack(args: UnpackArgs, quiet: bool) -> anyhow::Result<()> {
    let image = BootImage::open(&args.image)?;
    if let Err(e) = image.verify_crc() {
        warn!("{}: {e}", args.image.display());
    }
    let files = image.unpack_to(&args.out)?;
    status(quiet, format!("unpacked {} entries to {}", files.len(), args.out.display()));
    Ok(())
}

fn set_enabled(opts: &mut TrustOptions, role: TrustRole, enabled: bool) {
    if let Some(desc) = opts.components.get_mut(&role) {
        if desc.enabled != enabled {
            info!("{role} adjusted to enabled={enabled}");
            desc.enabled = enabled;
        }
    } else if enabled {
        warn!("{role} is not described in the config");
    }
}

fn handle_trust_pack(args: TrustPackArgs, quiet: bool) -> anyhow::Result<()> {
    let mut opts = config::load_trust_config(&args.config, args.rewrite.to_rewrite())
        .with_context(|| format!("load trust config {}", args.config.display()))?;
    if let Some(out) = &args.out {
        opts.output = out.clone();
    }
    if let Some(mode) = args.rsa {
        opts.sign_mode =
            SignMode::try_from(mode).map_err(|m| anyhow::anyhow!("unknown rsa mode {m}"))?;
    }
    if let Some(mode) = args.sha {
        opts.hash_mode =
            HashMode::try_from(mode).map_err(|m| anyhow::anyhow!("unknown sha mode {m}"))?;
    }
    if let Some(kb) = args.size {
        opts.max_size = config::kb_to_bytes(kb, 64)?;
    }
    if let Some(copies) = args.copies {
        opts.copies = copies;
    }
    if args.ignore_bl32 {
        set_enabled(&mut opts, TrustRole::Bl32, false);
    }
    if args.force_bl32 {
        set_enabled(&mut opts, TrustRole::Bl32, true);
    }

    let merger = TrustMerger::plan(&opts)?;
    let out = merger.build_to_file()?;
    status(
        quiet,
        format!(
            "merged {} segments into {} ({} x {} bytes)",
            merger.segments().len(),
            out.display(),
            opts.copies,
            opts.max_size
        ),
    );
    Ok(())
}

fn handle_loader_pack(args: LoaderPackArgs, quiet: bool) -> anyhow::Result<()> {
    let rewrite = PathRewrite {
        prepath: args.prepath.clone(),
        replace: None,
    };
    let mut opts = LoaderOptions::new(args.role.into(), rewrite.apply(&args.input), &args.output);
    opts.load_address = args.load_addr;
    opts.version = args.rollback_version;
    opts.copies = args.copies;
    if let Some(kb) = args.size {
        opts.max_size = Some(config::kb_to_bytes(kb, loader::SIZE_GRANULE / 1024)?);
    }

    let hdr = loader::pack(&opts)?;
    status(
        quiet,
        format!(
            "packed {} into {} (load 0x{:08x}, {} bytes)",
            opts.role,
            opts.output.display(),
            hdr.load_addr,
            hdr.load_size
        ),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x200000").unwrap(), 0x20_0000);
        assert_eq!(parse_hex_u32("0X1000").unwrap(), 4096);
        assert_eq!(parse_hex_u32("1000").unwrap(), 1000);
        assert!(parse_hex_u32("0xzz").is_err());
    }

    #[test]
    fn test_loader_pack_args() {
        let args = Args::try_parse_from([
            "rkimage", "loader", "pack", "trustos", "tee.bin", "trust.img", "-a", "0x8400000",
            "--version", "3",
        ])
        .unwrap();
        let Commands::Loader(LoaderCommand::Pack(a)) = args.command else {
            panic!("Expected loader pack");
        };
        assert_eq!(a.role, LoaderRoleArg::Trustos);
        assert_eq!(a.load_addr, Some(0x0840_0000));
        assert_eq!(a.rollback_version, 3);
        assert_eq!(LoaderRole::from(a.role), LoaderRole::TrustOs);
    }

    #[test]
    fn test_boot_chip_requires_stages() {
        assert!(Args::try_parse_from(["rkimage", "boot", "pack", "--chip", "RK3399"]).is_err());
        let args = Args::try_parse_from([
            "rkimage", "-v", "boot", "pack", "--chip", "RK3399", "--ddr", "d.bin", "--usbplug",
            "u.bin", "--flash-data", "fd.bin", "--flash-boot", "fb.bin",
        ])
        .unwrap();
        assert!(args.verbose);
    }

    #[test]
    fn test_replace_takes_two_values() {
        let args = Args::try_parse_from([
            "rkimage", "trust", "pack", "trust.toml", "--replace", "bin/", "out/", "--ignore-bl32",
        ])
        .unwrap();
        let Commands::Trust(TrustCommand::Pack(a)) = args.command else {
            panic!("Expected trust pack");
        };
        assert!(a.ignore_bl32);
        assert_eq!(
            a.rewrite.to_rewrite().replace,
            Some(("bin/".to_string(), "out/".to_string()))
        );
    }

    #[test]
    fn test_ignore_and_force_conflict() {
        assert!(
            Args::try_parse_from([
                "rkimage", "trust", "pack", "t.toml", "--ignore-bl32", "--force-bl32"
            ])
            .is_err()
        );
    }
}
