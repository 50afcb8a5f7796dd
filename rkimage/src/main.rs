//! Main entry point for the rkimage CLI tool

use clap::Parser;
use env_logger::Env;
use rkimage::cli::{Args, run_cli};

fn main() {
    let args = Args::parse();

    let filter = if args.quiet {
        "rkimage=error"
    } else if args.verbose {
        "rkimage=debug"
    } else {
        "rkimage=info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .init();

    if let Err(e) = run_cli(args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
