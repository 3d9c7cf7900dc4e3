//! Caller-facing forecasting surface
//!
//! [`MealPlanner`] reads history from an injected [`RecordStore`], hands it to
//! the forecasters and turns attendance forecasts into preparation
//! recommendations. Missing data never surfaces as an error here; only store
//! failures do.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RecommendationConfig;
use crate::db::{AttendanceRecord, MealPreparationRecord, MenuItem, RecordStore, StoreError};
use crate::ml::fallback::meal_consumption_per_student;
use crate::ml::features::{MealType, day_of_week, weekday_index, weekday_name};
use crate::ml::food::STANDARD_MEAL;
use crate::ml::{
    AttendanceForecaster, AttendancePrediction, FoodForecaster, FoodHistory, MlConfig,
    TrainingError, TrainingSummary, WeeklyForecast,
};
use crate::traits::Clock;

/// Result of a training request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    Trained(TrainingSummary),
    NotTrained { reason: String },
}

impl TrainingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TrainingOutcome::Trained(_))
    }

    fn from_result(model: &str, result: Result<TrainingSummary, TrainingError>) -> Self {
        match result {
            Ok(summary) => {
                info!(
                    model,
                    observations = summary.observations,
                    trained = summary.trained.len(),
                    "training finished"
                );
                TrainingOutcome::Trained(summary)
            }
            Err(e) => {
                warn!(model, error = %e, "training skipped");
                TrainingOutcome::NotTrained {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// What to cook for one meal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealRecommendation {
    pub menu_name: String,
    pub menu_description: String,
    pub predicted_attendance: u32,
    /// Kilograms, a multiple of the configured rounding step
    pub recommended_quantity: f64,
    /// Kilograms eaten per student historically
    pub consumption_per_student: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayRecommendation {
    pub date: NaiveDate,
    pub day_name: String,
    pub meals: BTreeMap<MealType, MealRecommendation>,
}

impl DayRecommendation {
    pub fn meal(&self, meal_type: MealType) -> Option<&MealRecommendation> {
        self.meals.get(&meal_type)
    }
}

/// Round to the nearest multiple of `step`. A non-positive step leaves the
/// value unchanged.
pub fn round_to_step(value: f64, step: f64) -> f64 {
    if step > 0.0 && step.is_finite() {
        (value / step).round() * step
    } else {
        value
    }
}

/// Preparation recommendation for every served meal of the predicted date.
///
/// None when the attendance forecast is flagged unavailable.
pub fn compose_recommendations(
    prediction: &AttendancePrediction,
    preparations: &[MealPreparationRecord],
    menu: &[MenuItem],
    config: RecommendationConfig,
) -> Option<DayRecommendation> {
    if !prediction.is_available() {
        return None;
    }

    let day = day_of_week(prediction.date);
    let day_name = weekday_name(day);

    let meals = MealType::SERVED
        .into_iter()
        .map(|meal_type| {
            let item = menu
                .iter()
                .find(|m| m.meal_type == meal_type && weekday_index(&m.day) == Some(day));
            let (menu_name, menu_description) = match item {
                Some(item) => (item.meal_name.clone(), item.description.clone()),
                None => (format!("{day_name}_{meal_type}"), STANDARD_MEAL.to_string()),
            };

            let predicted_attendance = prediction.count(meal_type);
            let consumption_per_student = meal_consumption_per_student(preparations, meal_type);
            let raw = f64::from(predicted_attendance) * consumption_per_student * (1.0 + config.buffer_fraction);

            let recommendation = MealRecommendation {
                menu_name,
                menu_description,
                predicted_attendance,
                recommended_quantity: round_to_step(raw.max(0.0), config.rounding_step_kg),
                consumption_per_student,
            };
            (meal_type, recommendation)
        })
        .collect();

    Some(DayRecommendation {
        date: prediction.date,
        day_name: day_name.to_string(),
        meals,
    })
}

pub struct MealPlanner<S, C> {
    store: S,
    clock: C,
    attendance: AttendanceForecaster,
    food: FoodForecaster,
    recommendation: RecommendationConfig,
}

impl<S: RecordStore, C: Clock> MealPlanner<S, C> {
    pub fn new(store: S, clock: C, ml: MlConfig, recommendation: RecommendationConfig) -> Self {
        Self {
            store,
            clock,
            attendance: AttendanceForecaster::new(ml.clone()),
            food: FoodForecaster::new(ml),
            recommendation,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn train_attendance_model(&self) -> Result<TrainingOutcome, StoreError> {
        let records = self.store.read_all::<AttendanceRecord>()?;
        Ok(TrainingOutcome::from_result(
            "attendance",
            self.attendance.train(&records),
        ))
    }

    pub fn predict_attendance(&self, date: NaiveDate) -> Result<AttendancePrediction, StoreError> {
        let records = self.store.read_all::<AttendanceRecord>()?;
        Ok(self.attendance.predict(date, &records))
    }

    pub fn train_food_model(&self) -> Result<TrainingOutcome, StoreError> {
        let (preparations, menu, attendance) = self.food_records()?;
        let history = FoodHistory {
            preparations: &preparations,
            menu: &menu,
            attendance: &attendance,
        };
        Ok(TrainingOutcome::from_result("food", self.food.train(&history)))
    }

    /// Food forecast for the week starting next Monday.
    pub fn predict_food_week(&self) -> Result<WeeklyForecast, StoreError> {
        let (preparations, menu, attendance) = self.food_records()?;
        let history = FoodHistory {
            preparations: &preparations,
            menu: &menu,
            attendance: &attendance,
        };
        Ok(self.food.predict_week(self.clock.today(), &history))
    }

    pub fn recommend(&self, date: NaiveDate) -> Result<Option<DayRecommendation>, StoreError> {
        let prediction = self.predict_attendance(date)?;
        let preparations = self.store.read_all::<MealPreparationRecord>()?;
        let menu = self.store.read_all::<MenuItem>()?;
        Ok(compose_recommendations(
            &prediction,
            &preparations,
            &menu,
            self.recommendation,
        ))
    }

    fn food_records(
        &self,
    ) -> Result<(Vec<MealPreparationRecord>, Vec<MenuItem>, Vec<AttendanceRecord>), StoreError> {
        Ok((
            self.store.read_all()?,
            self.store.read_all()?,
            self.store.read_all()?,
        ))
    }
}
