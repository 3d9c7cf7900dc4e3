//! Forecasting for cafeteria attendance and food quantities
//!
//! Each forecaster tries its learned models first and drops to the
//! historical-average estimator in [`fallback`] for any meal or segment the
//! models cannot cover.

pub mod attendance;
pub mod ensemble;
pub mod fallback;
pub mod features;
pub mod food;
pub mod model;
pub mod persistence;
pub mod prediction;
pub mod training;
pub mod tree;

use std::path::PathBuf;

pub use attendance::{AttendanceForecaster, AttendanceModels};
pub use features::{FeatureVector, MealType, meal_type_of};
pub use food::{FoodForecaster, FoodHistory, FoodModels, Segment};
pub use model::{ModelBuilder, ModelKind, TrainedModel, TrainingError};
pub use persistence::{ModelArtifact, PersistenceError};
pub use prediction::{AttendancePrediction, PredictionMethod, WeeklyForecast};
pub use training::TrainingSummary;

/// Distinct observations a training pass needs before it fits anything.
pub const MIN_TRAINING_OBSERVATIONS: usize = 14;

/// Samples a segment needs before it gets a model of its own.
pub const MIN_SEGMENT_SAMPLES: usize = 5;

/// Samples at which a segment switches to boosting with a validation split.
pub const VALIDATION_MIN_SAMPLES: usize = 10;

pub const ATTENDANCE_MODEL_FILE: &str = "attendance_model.bin";
pub const FOOD_MODEL_FILE: &str = "food_model.bin";

/// Configuration for the forecasting models
#[derive(Debug, Clone, PartialEq)]
pub struct MlConfig {
    /// Directory holding the model artifacts
    pub model_dir: PathBuf,
    /// Seed for bootstrap sampling and validation shuffling
    pub random_seed: u64,
    pub boosted_estimators: usize,
    pub learning_rate: f64,
    pub boosted_max_depth: usize,
    pub bagged_estimators: usize,
    /// Held-out share for boosted segments
    pub validation_fraction: f64,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("data/models"),
            random_seed: 42,
            boosted_estimators: 100,
            learning_rate: 0.1,
            boosted_max_depth: 3,
            bagged_estimators: 50,
            validation_fraction: 0.2,
        }
    }
}

impl MlConfig {
    pub fn attendance_model_path(&self) -> PathBuf {
        self.model_dir.join(ATTENDANCE_MODEL_FILE)
    }

    pub fn food_model_path(&self) -> PathBuf {
        self.model_dir.join(FOOD_MODEL_FILE)
    }
}
