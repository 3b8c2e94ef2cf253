//! `cprobe cache` command
//!
//! Manage persisted facts.

use anyhow::Result;

use crate::cli::{CacheArgs, CacheCleanArgs, CacheCommands, GlobalFlags};
use cprobe::ops;
use cprobe::util::fs::format_size;
use cprobe::util::{GlobalContext, Shell, Status};

pub fn execute(args: CacheArgs, global: &GlobalFlags) -> Result<()> {
    let ctx = GlobalContext::new()?;
    match args.command {
        CacheCommands::Path => {
            println!("{}", ops::cache::facts_dir(&ctx).display());
            Ok(())
        }
        CacheCommands::List => list(&ctx),
        CacheCommands::Clean(clean_args) => clean(&ctx, clean_args, global),
    }
}

fn list(ctx: &GlobalContext) -> Result<()> {
    let records = ops::cache::list(ctx)?;
    if records.is_empty() {
        println!("(no cached facts)");
        return Ok(());
    }

    let count = records.len();
    for record in records {
        let fingerprint = record.fingerprint.get(..12).unwrap_or(&record.fingerprint);
        println!(
            "{:<32} {:<24} {:<13} {} {}",
            record.fact.probe(),
            record.fact.value.to_string(),
            record.fact.provenance.origin.as_str(),
            fingerprint,
            record.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!(
        "{} cached fact(s), {}",
        count,
        format_size(ops::cache::size(ctx))
    );
    Ok(())
}

fn clean(ctx: &GlobalContext, args: CacheCleanArgs, global: &GlobalFlags) -> Result<()> {
    let shell = Shell::from_flags(global.quiet, global.verbose, global.color, false);
    let result = ops::cache::clean(ctx, args.all)?;

    shell.status(Status::Removed, format!("{} cached fact(s)", result.records));
    if result.build_dir_removed {
        shell.status(Status::Removed, ctx.build_dir().display());
    }
    Ok(())
}
