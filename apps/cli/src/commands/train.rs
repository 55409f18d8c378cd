//! Training command implementation.

use crate::commands::types::TrainArgs;
use crate::{config, logging};
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_training::{Orchestrator, RunLayout, SimulatedBackend, SimulatedModel};
use tracing::error;

pub async fn execute(args: TrainArgs, log_level: &str) -> Result<()> {
    let config = config::resolve(&args)?;

    let layout = RunLayout::new(config.run_dir.clone());
    layout.ensure_dirs().context("Failed to create run directory")?;
    logging::init(log_level, config.verbose, Some(&layout.log_path()))?;

    println!();
    println!("{}", "Kiln training".bold().cyan());
    println!("  Run:     {}", config.run_dir.display().to_string().dimmed());
    println!("  Data:    {}", config.data_dir.display().to_string().dimmed());
    if config.no_export {
        println!("  Exports: {}", "disabled".yellow());
    } else {
        println!(
            "  Exports: {}",
            config.export_dir.join(format!("{}-s<samples>-d<rows>", config.export_prefix)).display().to_string().dimmed()
        );
    }
    println!();

    let backend = SimulatedBackend::new(config.run_dir.clone(), SimulatedModel::default())
        .context("Failed to initialize training backend")?;
    let mut orchestrator = Orchestrator::new(config, backend).context("Failed to start orchestrator")?;

    match orchestrator.run().await {
        Ok(never) => match never {},
        Err(e) => {
            error!(error = %e, epoch = orchestrator.epoch(), "Training loop stopped");
            Err(e).context("Training loop failed")
        }
    }
}
