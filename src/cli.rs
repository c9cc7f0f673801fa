use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::services::layers::{LayerKind, DEFAULT_HISTORY_DAYS};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "leakwatch",
    version,
    about = "Cell-day leak risk scoring, cost pricing and pressure-management recommendations"
)]
pub struct Args {
    /// JSON setup file; overrides built-in defaults, overridden by LEAKWATCH_* env vars.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root for tables and the model artifact (overrides config and env).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Replace the raw event table from a CSV of point observations.
    ImportEvents {
        #[arg(long)]
        input: PathBuf,
    },
    /// Replace the raw weather table from a CSV of daily records.
    ImportWeather {
        #[arg(long)]
        input: PathBuf,
    },
    /// Build and persist the cell-day feature table.
    Features {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Train on the persisted features and save the model artifact.
    Train,
    /// Score and price the persisted features with the saved model.
    Predict,
    /// Build cluster recommendations from the persisted predictions.
    Recommend,
    /// Run every stage end to end.
    Run {
        /// Defaults to `train_days` before `end`.
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long, default_value_t = false)]
        retrain: bool,
    },
    /// Held-out metrics for the saved model.
    Evaluate {
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Print a GeoJSON layer for one date.
    Layer {
        #[arg(long, value_enum)]
        kind: LayerKind,
        #[arg(long)]
        date: NaiveDate,
        /// One feature per high-risk cell instead of per cluster.
        #[arg(long, default_value_t = false)]
        per_cell: bool,
    },
    /// Print the prediction history of one cell.
    History {
        #[arg(long)]
        cell: String,
        #[arg(long, default_value_t = DEFAULT_HISTORY_DAYS)]
        days: u32,
    },
}
