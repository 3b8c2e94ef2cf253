//! `cprobe show` command

use anyhow::Result;

use crate::cli::ShowArgs;
use cprobe::ops;
use cprobe::util::GlobalContext;

pub fn execute(args: ShowArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let descriptions = ops::show(&ctx, args.manifest.as_deref(), &args.probes)?;

    for (i, desc) in descriptions.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let probe = &desc.probe;
        println!("{}", probe.id());
        println!("  policy:   {}", probe.policy().as_str());
        println!("  language: {}", probe.language().as_str());
        if let Some(std) = probe.std() {
            println!("  std:      {}", std);
        }
        if !probe.libraries().is_empty() {
            println!("  link:     {}", probe.libraries().join(", "));
        }
        if !probe.search_libraries().is_empty() {
            println!("  search:   {}", probe.search_libraries().join(", "));
        }
        if !probe.requires().is_empty() {
            println!("  requires: {}", probe.requires().join(", "));
        }
        if let Some(grammar) = probe.grammar() {
            println!("  grammar:  {}", grammar);
        }
        if let Some(default) = probe.cross_compile() {
            println!("  cross:    {}", default.value());
        }
        if let Some(fallback) = probe.fallback() {
            println!("  fallback: {}", fallback);
        }
        println!("  payload:  {}", desc.payload_hash);

        if args.source {
            println!();
            for line in desc.source.lines() {
                println!("    {}", line);
            }
        }
    }

    Ok(())
}
