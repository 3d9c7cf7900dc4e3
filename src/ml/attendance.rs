//! Attendance forecasting: expected headcount per meal for a date

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fallback;
use super::features::{FeatureMatrix, FeatureVector, MealType, day_of_week};
use super::model::{ModelBuilder, TrainedModel, TrainingError};
use super::persistence::{ModelArtifact, PersistenceError};
use super::prediction::{AttendancePrediction, MealAttendance, PredictionMethod};
use super::training::{SegmentReport, TrainingSummary, daily_attendance_counts};
use super::{MIN_SEGMENT_SAMPLES, MIN_TRAINING_OBSERVATIONS, MlConfig};
use crate::db::AttendanceRecord;

/// One model per meal type over one-hot day-of-week features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceModels {
    pub feature_names: Vec<String>,
    pub models: BTreeMap<MealType, TrainedModel>,
}

impl AttendanceModels {
    /// Model prediction for a meal on a weekday, if a model covers it
    pub fn predict(&self, meal_type: MealType, day: u32) -> Option<(f64, &TrainedModel)> {
        let model = self.models.get(&meal_type)?;
        let features = attendance_features(day).reindex(&self.feature_names);
        model.predict(&features).map(|value| (value, model))
    }
}

fn attendance_features(day: u32) -> FeatureVector {
    FeatureVector::new().with_day_of_week(day)
}

pub struct AttendanceForecaster {
    config: MlConfig,
}

impl AttendanceForecaster {
    pub fn new(config: MlConfig) -> Self {
        Self { config }
    }

    pub fn model_path(&self) -> PathBuf {
        self.config.attendance_model_path()
    }

    /// Fit per-meal models from raw attendance and persist them.
    ///
    /// Needs [`MIN_TRAINING_OBSERVATIONS`] distinct (date, served meal) counts;
    /// rows with an unknown meal type are ignored. Meals with fewer than
    /// [`MIN_SEGMENT_SAMPLES`] days are left without a model.
    pub fn train(&self, records: &[AttendanceRecord]) -> Result<TrainingSummary, TrainingError> {
        let counts: Vec<_> = daily_attendance_counts(records)
            .into_iter()
            .filter(|c| c.meal_type.is_served())
            .collect();
        if counts.len() < MIN_TRAINING_OBSERVATIONS {
            return Err(TrainingError::InsufficientData {
                found: counts.len(),
                required: MIN_TRAINING_OBSERVATIONS,
            });
        }

        let rows: Vec<FeatureVector> = counts
            .iter()
            .map(|c| attendance_features(day_of_week(c.date)))
            .collect();
        let matrix = FeatureMatrix::from_vectors(&rows);
        let created_at = Utc::now();
        let builder = ModelBuilder::from_config(&self.config).created_at(created_at);

        let mut summary = TrainingSummary {
            observations: counts.len(),
            ..TrainingSummary::default()
        };
        let mut models = BTreeMap::new();

        for meal_type in MealType::SERVED {
            let positions: Vec<usize> = counts
                .iter()
                .enumerate()
                .filter(|(_, c)| c.meal_type == meal_type)
                .map(|(i, _)| i)
                .collect();

            if positions.len() < MIN_SEGMENT_SAMPLES {
                debug!(meal = %meal_type, samples = positions.len(), "too few days for an attendance model");
                summary.skipped.push(meal_type.to_string());
                continue;
            }

            let x = matrix.select(&positions);
            let y = Array1::from_iter(positions.iter().map(|&i| f64::from(counts[i].count)));
            let model = builder.train_segment(x.view(), y.view())?;

            if let Some(mae) = model.validation_mae {
                info!(meal = %meal_type, mae, "attendance model validated");
            }
            debug!(meal = %meal_type, "{}", model.info());
            summary.trained.push(SegmentReport::new(meal_type.to_string(), &model));
            models.insert(meal_type, model);
        }

        let payload = AttendanceModels {
            feature_names: matrix.columns().to_vec(),
            models,
        };
        ModelArtifact::new(counts.len(), payload, created_at).save(&self.model_path())?;

        info!(
            observations = counts.len(),
            models = summary.trained.len(),
            "attendance models trained"
        );
        Ok(summary)
    }

    pub fn load(&self) -> Result<ModelArtifact<AttendanceModels>, PersistenceError> {
        ModelArtifact::load(&self.model_path())
    }

    /// Predicted headcount for every served meal on `date`.
    ///
    /// With no model file a training pass runs first. If that fails the
    /// prediction is flagged unavailable and carries historical averages. An
    /// unreadable file means historical averages for every meal.
    pub fn predict(&self, date: NaiveDate, records: &[AttendanceRecord]) -> AttendancePrediction {
        let mut unavailable_reason = None;

        let models = match self.load() {
            Ok(artifact) => Some(artifact.payload),
            Err(e) if e.is_missing() => match self.train(records) {
                Ok(_) => self
                    .load()
                    .inspect_err(|e| warn!(error = %e, "attendance model unreadable after training"))
                    .ok()
                    .map(|artifact| artifact.payload),
                Err(e) => {
                    warn!(error = %e, "attendance predictions unavailable");
                    unavailable_reason = Some(e.to_string());
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "attendance model unavailable, using historical averages");
                None
            }
        };

        let mut prediction = self.predict_with(date, models.as_ref(), records);
        prediction.unavailable_reason = unavailable_reason;
        prediction
    }

    /// Prediction from already loaded models; missing meals fall back.
    pub fn predict_with(
        &self,
        date: NaiveDate,
        models: Option<&AttendanceModels>,
        records: &[AttendanceRecord],
    ) -> AttendancePrediction {
        let day = day_of_week(date);

        let meals = MealType::SERVED
            .into_iter()
            .map(|meal_type| {
                let meal = match models.and_then(|m| m.predict(meal_type, day)) {
                    Some((value, model)) => MealAttendance {
                        count: fallback::clamp_count(value),
                        method: PredictionMethod::Model {
                            kind: model.kind(),
                            validation_mae: model.validation_mae,
                        },
                    },
                    None => MealAttendance {
                        count: fallback::average_attendance(records, day, meal_type),
                        method: PredictionMethod::HistoricalAverage,
                    },
                };
                (meal_type, meal)
            })
            .collect();

        AttendancePrediction {
            date,
            meals,
            unavailable_reason: None,
        }
    }
}
