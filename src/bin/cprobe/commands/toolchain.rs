//! `cprobe toolchain` command

use anyhow::Result;

use crate::cli::{ToolchainArgs, ToolchainCommands, ToolchainShowArgs};
use cprobe::ops;
use cprobe::util::GlobalContext;

pub fn execute(args: ToolchainArgs) -> Result<()> {
    match args.command {
        ToolchainCommands::Show(show_args) => show_toolchain(show_args),
    }
}

fn show_toolchain(args: ToolchainShowArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let settings = ops::toolchain_settings(&ctx, args.target.as_deref());
    let (toolchain, fingerprint) = ops::open_toolchain(&settings)?;

    println!("Toolchain:");
    println!();
    println!("  CC:      {}", fingerprint.compiler);
    println!("           {}", fingerprint.version);
    println!("  AR:      {}", toolchain.archiver_path().display());
    println!("  Family:  {}", fingerprint.family);
    println!("  Target:  {}", fingerprint.target);
    if fingerprint.cross_compiling {
        if fingerprint.emulator.is_empty() {
            println!("  Cross:   yes (probe binaries are not executed)");
        } else {
            println!("  Cross:   yes (runs via {})", fingerprint.emulator.join(" "));
        }
    }
    if !fingerprint.cflags.is_empty() {
        println!("  CFLAGS:  {}", fingerprint.cflags.join(" "));
    }
    if !fingerprint.ldflags.is_empty() {
        println!("  LDFLAGS: {}", fingerprint.ldflags.join(" "));
    }
    println!();
    println!("Fingerprint: {}", fingerprint.hash());

    Ok(())
}
