use anyhow::{Context, Result};
use clap::Parser;
use leakwatch::cli::{Args, Command};
use leakwatch::config::PipelineConfig;
use leakwatch::ids::CellId;
use leakwatch::services::layers::{self, LayerKind};
use leakwatch::services::pipeline::{self, RunOptions};
use leakwatch::services::pricing::PredictionRow;
use leakwatch::services::recommendations::RecommendationRow;
use leakwatch::services::risk_model::ModelArtifact;
use leakwatch::store::{CsvTableStore, TableName, TableStore};
use serde::Serialize;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn saved_model(config: &PipelineConfig) -> Result<ModelArtifact> {
    let path = config.storage.model_path();
    ModelArtifact::load_optional(&path)?
        .with_context(|| format!("no saved model at {}; run `leakwatch train` first", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    let index = config.spatial.lattice();
    let mut store = CsvTableStore::new(config.storage.tables_dir());

    match args.command {
        Command::ImportEvents { input } => {
            let rows = pipeline::import_event_points(&mut store, &input, &index)?;
            print_json(&serde_json::json!({ "events": rows }))?;
        }
        Command::ImportWeather { input } => {
            let rows = pipeline::import_weather(&mut store, &input)?;
            print_json(&serde_json::json!({ "weather_days": rows }))?;
        }
        Command::Features { start, end } => {
            let rows = pipeline::build_features(&mut store, &config, start, end)?;
            print_json(&serde_json::json!({ "feature_rows": rows.len() }))?;
        }
        Command::Train => match pipeline::train_model(&store, &config)? {
            Some(artifact) => print_json(&artifact.metadata)?,
            None => print_json(&serde_json::json!({ "trained": false }))?,
        },
        Command::Predict => {
            let artifact = saved_model(&config)?;
            let rows = pipeline::predict_and_price(&mut store, &artifact, &config)?;
            print_json(&serde_json::json!({ "prediction_rows": rows.len() }))?;
        }
        Command::Recommend => {
            let recs = pipeline::recommend(&mut store, &index, &config)?;
            print_json(&serde_json::json!({ "recommendation_rows": recs.len() }))?;
        }
        Command::Run {
            start,
            end,
            retrain,
        } => {
            let start = start.unwrap_or_else(|| {
                end - chrono::Duration::days(i64::from(config.model.train_days) - 1)
            });
            let output = pipeline::run(
                &mut store,
                &index,
                &config,
                start,
                end,
                RunOptions { retrain },
            )?;
            print_json(&output)?;
        }
        Command::Evaluate { threshold } => {
            let artifact = saved_model(&config)?;
            let threshold = threshold.unwrap_or(config.model.evaluation_threshold);
            let metrics = pipeline::evaluate_saved_model(&store, &artifact, &config, threshold)?;
            print_json(&metrics)?;
        }
        Command::Layer {
            kind,
            date,
            per_cell,
        } => {
            let collection = match kind {
                LayerKind::Risk => {
                    let predictions: Vec<PredictionRow> = store.get(TableName::Predictions)?;
                    layers::risk_layer(&predictions, date, &index)?
                }
                LayerKind::Cost => {
                    let predictions: Vec<PredictionRow> = store.get(TableName::Predictions)?;
                    layers::cost_layer(&predictions, date, &index)?
                }
                LayerKind::Recommendations if per_cell => {
                    let predictions: Vec<PredictionRow> = store.get(TableName::Predictions)?;
                    layers::per_cell_recommendation_layer(
                        &predictions,
                        date,
                        &config.recommendations,
                        &index,
                    )?
                }
                LayerKind::Recommendations => {
                    let recs: Vec<RecommendationRow> = store.get(TableName::Recommendations)?;
                    layers::recommendation_layer(&recs, date)
                }
            };
            tracing::debug!(kind = kind.as_str(), features = collection.features.len(), "layer rendered");
            print_json(&collection)?;
        }
        Command::History { cell, days } => {
            let predictions: Vec<PredictionRow> = store.get(TableName::Predictions)?;
            print_json(&layers::cell_history(&predictions, &CellId::new(cell.trim()), days))?;
        }
    }
    Ok(())
}
