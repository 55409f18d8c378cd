use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Streaming events a backend reports while a train or evaluate call runs.
///
/// Metric values are for logging only; the orchestrator never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Message { message: String },
    TrainMetrics { global_step: u64, metrics: BTreeMap<String, f64> },
    EvalMetrics { global_step: u64, metrics: BTreeMap<String, f64> },
    CheckpointSaved { global_step: u64 },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

fn format_metrics(metrics: &BTreeMap<String, f64>) -> String {
    metrics
        .iter()
        .map(|(name, value)| format!("{name} = {value:.6}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Message { message } => info!("{message}"),
            ProgressEvent::TrainMetrics { global_step, metrics } => {
                info!(global_step, "train: {}", format_metrics(&metrics));
            }
            ProgressEvent::EvalMetrics { global_step, metrics } => {
                info!(global_step, "eval: {}", format_metrics(&metrics));
            }
            ProgressEvent::CheckpointSaved { global_step } => info!(global_step, "checkpoint saved"),
        }
    }
}
