//! Kiln CLI - command-line interface for the kiln training orchestrator
//!
//! This CLI provides a `kiln` command that runs the training loop and
//! inspects the exports and history it produces.

mod commands;
mod config;
mod logging;

use clap::{CommandFactory, Parser, Subcommand};

use commands::types::{ExportsArgs, HistoryArgs, TrainArgs};
use commands::{exports, history, train};

/// Kiln - training-data lifecycle and checkpoint publication
///
/// Kiln trains a model on a dataset that an external producer keeps
/// replacing, and publishes a snapshot of the model after every epoch.
#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    author,
    version,
    about = "Kiln - continuous training and snapshot publication",
    long_about = "Kiln runs an endless epoch loop: reload the dataset when it changes, train on a \
                  sampled subset, publish a snapshot, validate, and back up checkpoints."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the training loop until it fails or is interrupted
    ///
    /// Options given on the command line override the `--config` file.
    Train(TrainArgs),

    /// List snapshots published in an export directory
    Exports(ExportsArgs),

    /// Summarize a run's training history
    History(HistoryArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // If no command provided, show help
    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Train(train_args) => train::execute(train_args, &args.log_level).await?,
        Command::Exports(exports_args) => {
            logging::init(&args.log_level, false, None)?;
            exports::execute(&exports_args)?;
        }
        Command::History(history_args) => {
            logging::init(&args.log_level, false, None)?;
            history::execute(&history_args)?;
        }
    }

    Ok(())
}
