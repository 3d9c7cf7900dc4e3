//! Forecast result types

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::features::MealType;
use super::model::ModelKind;

/// How a forecast value was produced
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PredictionMethod {
    /// A trained segment model
    Model {
        kind: ModelKind,
        /// Held-out error at training time, when a split was made
        validation_mae: Option<f64>,
    },
    /// Historical averages, used when no model covers the meal
    HistoricalAverage,
}

impl PredictionMethod {
    pub fn is_model(&self) -> bool {
        matches!(self, PredictionMethod::Model { .. })
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PredictionMethod::HistoricalAverage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealAttendance {
    pub count: u32,
    pub method: PredictionMethod,
}

/// Expected headcount per meal for one date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendancePrediction {
    pub date: NaiveDate,
    pub meals: BTreeMap<MealType, MealAttendance>,
    /// Set when no model could be trained; counts are then historical averages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
}

impl AttendancePrediction {
    pub fn is_available(&self) -> bool {
        self.unavailable_reason.is_none()
    }

    /// Predicted headcount, 0 for a meal type with no entry
    pub fn count(&self, meal_type: MealType) -> u32 {
        self.meals.get(&meal_type).map_or(0, |meal| meal.count)
    }
}

/// Forecast for one meal of one day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealQuantityForecast {
    /// Kilograms, two decimals
    pub predicted_quantity: f64,
    pub expected_students: u32,
    pub menu_description: String,
    pub method: PredictionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl MealQuantityForecast {
    pub fn fallback_used(&self) -> bool {
        self.method.is_fallback()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayForecast {
    pub day_name: String,
    pub meals: BTreeMap<MealType, MealQuantityForecast>,
}

/// Seven consecutive days of food forecasts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyForecast {
    pub starting_monday: NaiveDate,
    pub days: BTreeMap<NaiveDate, DayForecast>,
}

impl WeeklyForecast {
    pub fn day(&self, date: NaiveDate) -> Option<&DayForecast> {
        self.days.get(&date)
    }
}
