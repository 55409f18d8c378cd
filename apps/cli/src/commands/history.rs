//! Training history summary.

use crate::commands::types::HistoryArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_training::{read_history, HistoryEvent, RunLayout};
use serde_json::json;

pub fn execute(args: &HistoryArgs) -> Result<()> {
    let path = RunLayout::new(args.run_dir.clone()).history_path();
    let history = read_history(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    let dataset_loads = history
        .history
        .iter()
        .filter(|entry| matches!(entry.event, HistoryEvent::NewData { .. }))
        .count();
    let latest_range = history.latest_range();

    if args.json {
        let mut out = json!({
            "path": path,
            "events": history.history.len(),
            "dataset_loads": dataset_loads,
            "total_samples": history.total_samples(),
            "latest_range": latest_range,
            "files": history.files.len(),
        });
        if args.events {
            out["history"] = serde_json::to_value(&history.history)?;
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Training History".bold().cyan());
    println!("  File:          {}", path.display().to_string().dimmed());
    println!("  Samples:       {}", history.total_samples().to_string().green());
    println!("  Dataset loads: {dataset_loads}");
    match latest_range {
        Some(range) => println!("  Latest rows:   {}..{}", range.start, range.end),
        None => println!("  Latest rows:   {}", "none".dimmed()),
    }
    println!("  Files:         {}", history.files.len());

    if args.events {
        println!();
        for entry in &history.history {
            let description = match &entry.event {
                HistoryEvent::Initialized { .. } => "initialized".to_string(),
                HistoryEvent::NewData { range } => format!("new data {}..{}", range.start, range.end),
                HistoryEvent::SamplesProcessed { count } => format!("{count} samples"),
            };
            println!("  {}  {}", entry.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(), description);
        }
    }
    println!();
    Ok(())
}
