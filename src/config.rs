use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::ml::MlConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub forecast: ForecastConfig,
    pub recommendation: RecommendationConfig,
    pub schedule: ScheduleConfig,
    pub face: FaceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the record CSV files
    pub data_dir: PathBuf,
    /// Directory holding trained model artifacts
    pub model_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            model_dir: PathBuf::from("data/models"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecastConfig {
    pub random_seed: u64,
    pub boosted_estimators: usize,
    pub learning_rate: f64,
    pub boosted_max_depth: usize,
    pub bagged_estimators: usize,
    pub validation_fraction: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            random_seed: 42,
            boosted_estimators: 100,
            learning_rate: 0.1,
            boosted_max_depth: 3,
            bagged_estimators: 50,
            validation_fraction: 0.2,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RecommendationConfig {
    /// Extra share cooked on top of the forecast
    pub buffer_fraction: f64,
    /// Quantities are rounded to a multiple of this many kilograms
    pub rounding_step_kg: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            buffer_fraction: 0.1,
            rounding_step_kg: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ScheduleConfig {
    pub lunch_start_hour: u32,
    pub dinner_start_hour: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lunch_start_hour: 11,
            dinner_start_hour: 16,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FaceConfig {
    pub gallery_dir: PathBuf,
    /// Matches scoring above this mean squared pixel difference are rejected
    pub max_mean_squared_error: f64,
    /// Side length faces are resized to before comparison
    pub comparison_size: u32,
    /// Smallest frame accepted as a face
    pub min_face_size: u32,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("data/faces"),
            max_mean_squared_error: 6000.0,
            comparison_size: 100,
            min_face_size: 30,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file (silently ignore if not present)
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cafeteria-monitor");

        let builder = Config::builder()
            // 1. Load default values
            // Storage
            .set_default("storage.data_dir", "data")?
            .set_default("storage.model_dir", "data/models")?
            // Forecast
            .set_default("forecast.random_seed", 42)?
            .set_default("forecast.boosted_estimators", 100)?
            .set_default("forecast.learning_rate", 0.1)?
            .set_default("forecast.boosted_max_depth", 3)?
            .set_default("forecast.bagged_estimators", 50)?
            .set_default("forecast.validation_fraction", 0.2)?
            // Recommendation
            .set_default("recommendation.buffer_fraction", 0.1)?
            .set_default("recommendation.rounding_step_kg", 0.5)?
            // Schedule
            .set_default("schedule.lunch_start_hour", 11)?
            .set_default("schedule.dinner_start_hour", 16)?
            // Face
            .set_default("face.gallery_dir", "data/faces")?
            .set_default("face.max_mean_squared_error", 6000.0)?
            .set_default("face.comparison_size", 100)?
            .set_default("face.min_face_size", 30)?
            // 2. Load from local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))
            // 3. Load from user config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))
            // 4. Load from Environment variables (CAFETERIA__STORAGE__DATA_DIR=...)
            .add_source(Environment::with_prefix("CAFETERIA").separator("__"));

        let s = builder.build().context("Failed to assemble configuration")?;
        s.try_deserialize().context("Invalid configuration")
    }

    /// Model settings for the forecasters
    pub fn ml_config(&self) -> MlConfig {
        MlConfig {
            model_dir: self.storage.model_dir.clone(),
            random_seed: self.forecast.random_seed,
            boosted_estimators: self.forecast.boosted_estimators,
            learning_rate: self.forecast.learning_rate,
            boosted_max_depth: self.forecast.boosted_max_depth,
            bagged_estimators: self.forecast.bagged_estimators,
            validation_fraction: self.forecast.validation_fraction,
        }
    }
}
