use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::spatial::HexLattice;

const CONFIG_PATH_ENV: &str = "LEAKWATCH_CONFIG_PATH";

fn default_horizon_days() -> u32 {
    7
}

fn default_decay_half_life_days() -> f64 {
    7.0
}

fn default_heavy_rain_mm() -> f64 {
    25.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GridConfig {
    /// Label horizon `H`: an event in `(t, t + H]` marks date `t` positive.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    #[serde(default = "default_decay_half_life_days")]
    pub decay_half_life_days: f64,
    #[serde(default = "default_heavy_rain_mm")]
    pub heavy_rain_mm: f64,
    /// Accepted event categories (case-insensitive); empty accepts everything.
    #[serde(default)]
    pub categories: Vec<String>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            decay_half_life_days: default_decay_half_life_days(),
            heavy_rain_mm: default_heavy_rain_mm(),
            categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Trailing share of the labeled rows held out for calibration.
    pub validation_fraction: f64,
    pub regularization_c: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub calibrate: bool,
    /// Days of history (ending at the run's end date) used for training.
    pub train_days: u32,
    pub evaluation_threshold: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            regularization_c: 1.0,
            max_iterations: 100,
            tolerance: 1e-8,
            calibrate: true,
            train_days: 6 * 31,
            evaluation_threshold: 0.5,
        }
    }
}

/// Probability cut points: `< low_upper` is low, `< medium_upper` medium, else high.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskBands {
    pub low_upper: f64,
    pub medium_upper: f64,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            low_upper: 0.2,
            medium_upper: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Leak volume per severity class (minor, moderate, major), m³.
    pub volumes_m3: [f64; 3],
    pub head_m: f64,
    pub pump_efficiency: f64,
    pub water_density_kg_m3: f64,
    pub gravity_m_s2: f64,
    pub water_usd_per_m3: f64,
    pub usd_per_kwh: f64,
    pub tail_volume_multiplier: f64,
    pub derive_severity_from_durations: bool,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            volumes_m3: [5.0, 25.0, 100.0],
            head_m: 50.0,
            pump_efficiency: 0.7,
            water_density_kg_m3: 1000.0,
            gravity_m_s2: 9.81,
            water_usd_per_m3: 0.5,
            usd_per_kwh: 0.14,
            tail_volume_multiplier: 1.5,
            derive_severity_from_durations: false,
        }
    }
}

fn default_risk_threshold() -> f64 {
    0.3
}

fn default_base_pressure_psi() -> f64 {
    60.0
}

fn default_min_pressure_psi() -> f64 {
    20.0
}

fn default_candidate_reductions_psi() -> Vec<f64> {
    vec![3.0, 5.0, 8.0]
}

fn default_elasticity() -> f64 {
    1.0
}

fn default_time_window() -> String {
    "01:00-05:00".to_string()
}

fn default_action_type() -> String {
    "Pressure reduction test".to_string()
}

fn default_rationale() -> String {
    "high recent leak activity + weather stress".to_string()
}

fn default_per_cell_reduction_psi() -> f64 {
    5.0
}

fn default_per_cell_savings_fraction() -> f64 {
    0.1
}

fn default_adjacency_ring() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: f64,
    #[serde(default = "default_base_pressure_psi")]
    pub base_pressure_psi: f64,
    /// Reductions that would take pressure below this floor save nothing.
    #[serde(default = "default_min_pressure_psi")]
    pub min_pressure_psi: f64,
    #[serde(default = "default_candidate_reductions_psi")]
    pub candidate_reductions_psi: Vec<f64>,
    #[serde(default = "default_elasticity")]
    pub elasticity: f64,
    #[serde(default = "default_time_window")]
    pub time_window: String,
    #[serde(default = "default_action_type")]
    pub action_type: String,
    #[serde(default = "default_rationale")]
    pub rationale: String,
    #[serde(default = "default_per_cell_reduction_psi")]
    pub per_cell_reduction_psi: f64,
    #[serde(default = "default_per_cell_savings_fraction")]
    pub per_cell_savings_fraction: f64,
    #[serde(default = "default_adjacency_ring")]
    pub adjacency_ring: u32,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            risk_threshold: default_risk_threshold(),
            base_pressure_psi: default_base_pressure_psi(),
            min_pressure_psi: default_min_pressure_psi(),
            candidate_reductions_psi: default_candidate_reductions_psi(),
            elasticity: default_elasticity(),
            time_window: default_time_window(),
            action_type: default_action_type(),
            rationale: default_rationale(),
            per_cell_reduction_psi: default_per_cell_reduction_psi(),
            per_cell_savings_fraction: default_per_cell_savings_fraction(),
            adjacency_ring: default_adjacency_ring(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir.join("tables")
    }

    pub fn model_path(&self) -> PathBuf {
        self.data_dir.join("models").join("risk_model.json")
    }
}

/// Hexagon lattice used when no external spatial index is wired in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub hex_size_m: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            origin_lat: 41.8781,
            origin_lon: -87.6298,
            hex_size_m: 174.0,
        }
    }
}

impl SpatialConfig {
    pub fn lattice(&self) -> HexLattice {
        HexLattice::new(self.origin_lat, self.origin_lon, self.hex_size_m)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub grid: GridConfig,
    pub model: ModelConfig,
    pub bands: RiskBands,
    pub pricing: PricingConfig,
    pub recommendations: RecommendationConfig,
    pub storage: StorageConfig,
    pub spatial: SpatialConfig,
}

impl PipelineConfig {
    /// Defaults, then the JSON setup file, then `LEAKWATCH_*` environment overrides.
    ///
    /// An explicitly requested file must load; the env-provided path only warns.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match env_optional_string(CONFIG_PATH_ENV).map(PathBuf::from) {
                Some(path) => match Self::from_file(&path) {
                    Ok(config) => config,
                    Err(err) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %err,
                            "failed to load setup config; using defaults"
                        );
                        Self::default()
                    }
                },
                None => Self::default(),
            },
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_optional_string("LEAKWATCH_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        self.grid.horizon_days = env_u32("LEAKWATCH_HORIZON_DAYS", self.grid.horizon_days);
        self.grid.decay_half_life_days = env_f64(
            "LEAKWATCH_DECAY_HALF_LIFE_DAYS",
            self.grid.decay_half_life_days,
        );
        self.model.validation_fraction = env_f64(
            "LEAKWATCH_VALIDATION_FRACTION",
            self.model.validation_fraction,
        );
        self.model.train_days = env_u32("LEAKWATCH_TRAIN_DAYS", self.model.train_days);
        self.pricing.usd_per_kwh = env_f64("LEAKWATCH_USD_PER_KWH", self.pricing.usd_per_kwh);
        self.recommendations.risk_threshold = env_f64(
            "LEAKWATCH_RISK_THRESHOLD",
            self.recommendations.risk_threshold,
        );
        self.pricing.derive_severity_from_durations = env_bool(
            "LEAKWATCH_DERIVE_SEVERITY",
            self.pricing.derive_severity_from_durations,
        );
    }

    pub fn validate(&self) -> Result<()> {
        let grid = &self.grid;
        if grid.horizon_days == 0 {
            anyhow::bail!("grid.horizon_days must be at least 1");
        }
        if !finite_positive(grid.decay_half_life_days) {
            anyhow::bail!("grid.decay_half_life_days must be positive");
        }

        let model = &self.model;
        if !(0.0..1.0).contains(&model.validation_fraction) {
            anyhow::bail!(
                "model.validation_fraction must be in [0, 1), got {}",
                model.validation_fraction
            );
        }
        if !finite_positive(model.regularization_c) {
            anyhow::bail!("model.regularization_c must be positive");
        }
        if model.max_iterations == 0 || model.train_days == 0 {
            anyhow::bail!("model.max_iterations and model.train_days must be at least 1");
        }
        if !(0.0..=1.0).contains(&model.evaluation_threshold) {
            anyhow::bail!("model.evaluation_threshold must be in [0, 1]");
        }

        let bands = &self.bands;
        if !finite_positive(bands.low_upper)
            || bands.medium_upper.is_nan()
            || bands.low_upper > bands.medium_upper
            || bands.medium_upper > 1.0
        {
            anyhow::bail!(
                "risk bands must satisfy 0 < low_upper <= medium_upper <= 1 (got {} / {})",
                bands.low_upper,
                bands.medium_upper
            );
        }

        let pricing = &self.pricing;
        if !finite_positive(pricing.pump_efficiency) || pricing.pump_efficiency > 1.0 {
            anyhow::bail!("pricing.pump_efficiency must be in (0, 1]");
        }
        if pricing.usd_per_kwh < 0.0 || pricing.water_usd_per_m3 < 0.0 {
            anyhow::bail!("pricing rates must be non-negative");
        }
        if pricing.volumes_m3.iter().any(|v| !v.is_finite() || *v < 0.0) {
            anyhow::bail!("pricing.volumes_m3 must be finite and non-negative");
        }
        if pricing.tail_volume_multiplier.is_nan() || pricing.tail_volume_multiplier < 1.0 {
            anyhow::bail!("pricing.tail_volume_multiplier must be at least 1");
        }

        let recs = &self.recommendations;
        if !(0.0..=1.0).contains(&recs.risk_threshold) {
            anyhow::bail!("recommendations.risk_threshold must be in [0, 1]");
        }
        if recs.min_pressure_psi >= recs.base_pressure_psi {
            anyhow::bail!("recommendations.min_pressure_psi must be below base_pressure_psi");
        }
        if recs.candidate_reductions_psi.is_empty() {
            anyhow::bail!("recommendations.candidate_reductions_psi must not be empty");
        }
        if !(0.0..=1.0).contains(&recs.per_cell_savings_fraction) {
            anyhow::bail!("recommendations.per_cell_savings_fraction must be in [0, 1]");
        }

        if !finite_positive(self.spatial.hex_size_m) {
            anyhow::bail!("spatial.hex_size_m must be positive");
        }
        if self.storage.data_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.data_dir resolved to an empty path");
        }
        Ok(())
    }
}

fn finite_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key)
        .ok()
        .map(|value| value.trim().to_lowercase())
    {
        Some(value) if value == "1" || value == "true" || value == "yes" => true,
        Some(value) if value == "0" || value == "false" || value == "no" => false,
        _ => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}
