//! Published snapshot listing.

use crate::commands::types::ExportsArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_training::discover_snapshots;
use serde_json::json;

pub fn execute(args: &ExportsArgs) -> Result<()> {
    let snapshots = discover_snapshots(&args.export_dir, &args.prefix)
        .with_context(|| format!("Failed to scan export directory {}", args.export_dir.display()))?;

    if args.json {
        let out: Vec<_> = snapshots
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "path": s.path,
                    "total_samples": s.identity.total_samples,
                    "row_watermark": s.identity.row_watermark,
                    "averaged": s.has_averaged,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Published Snapshots ({})", snapshots.len()).bold().cyan());
    println!();

    if snapshots.is_empty() {
        println!("  {}", format!("No snapshots named {}-s*-d* found.", args.prefix).dimmed());
        return Ok(());
    }

    println!("{:<40} {:>14} {:>14} {}", "Name", "Samples", "Rows", "SWA");
    println!("{}", "─".repeat(76));
    for s in &snapshots {
        let swa = if s.has_averaged { "yes".green() } else { "no".dimmed() };
        println!(
            "{:<40} {:>14} {:>14} {}",
            s.name.cyan(),
            s.identity.total_samples,
            s.identity.row_watermark,
            swa
        );
    }
    println!();
    Ok(())
}
