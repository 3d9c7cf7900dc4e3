//! Feature extraction for the forecasting models
//!
//! Converts raw cafeteria records into named feature vectors. Column names are
//! stable so a vector built at prediction time can be reindexed against the
//! exact column list stored with a trained model.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Weekday names, Monday first.
pub const DAYS_OF_WEEK: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Prefix of the one-hot day-of-week columns.
const DAY_COLUMN_PREFIX: &str = "dow_";

/// Category of a meal service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    /// A meal name that carries no recognizable meal token
    Unknown,
}

impl MealType {
    /// The meal types the cafeteria actually serves, in service order.
    pub const SERVED: [MealType; 3] = [MealType::Breakfast, MealType::Lunch, MealType::Dinner];

    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "Breakfast",
            MealType::Lunch => "Lunch",
            MealType::Dinner => "Dinner",
            MealType::Unknown => "Unknown",
        }
    }

    /// Token used when generating menu slugs.
    ///
    /// Each token is a substring that [`meal_type_of`] recognizes, so a
    /// generated slug always maps back to its meal type.
    pub fn slug_token(&self) -> &'static str {
        match self {
            MealType::Breakfast => "Break",
            MealType::Lunch => "Lunch",
            MealType::Dinner => "Dinner",
            MealType::Unknown => "Unknown",
        }
    }

    pub fn is_served(&self) -> bool {
        !matches!(self, MealType::Unknown)
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown meal type: {0}")]
pub struct ParseMealTypeError(pub String);

impl FromStr for MealType {
    type Err = ParseMealTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MealType::SERVED
            .into_iter()
            .find(|meal| meal.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseMealTypeError(s.to_string()))
    }
}

/// Derive the meal type from a free-text meal name.
///
/// Substring rule, first match wins: "Break", then "Lunch", then "Dinner".
pub fn meal_type_of(meal_name: &str) -> MealType {
    if meal_name.contains("Break") {
        MealType::Breakfast
    } else if meal_name.contains("Lunch") {
        MealType::Lunch
    } else if meal_name.contains("Dinner") {
        MealType::Dinner
    } else {
        MealType::Unknown
    }
}

/// Day of the week, 0=Monday through 6=Sunday.
pub fn day_of_week(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_monday()
}

/// Full weekday name for a day index (wraps modulo 7).
pub fn weekday_name(day: u32) -> &'static str {
    DAYS_OF_WEEK[(day % 7) as usize]
}

/// Day index for a full weekday name, case-insensitive.
pub fn weekday_index(name: &str) -> Option<u32> {
    let name = name.trim();
    DAYS_OF_WEEK
        .iter()
        .position(|day| day.eq_ignore_ascii_case(name))
        .map(|i| i as u32)
}

/// Parse the day encoded in the leading token of a meal slug.
///
/// `"Mon_Lunch_2"` yields Monday. The token must be a non-empty prefix of a
/// weekday name.
pub fn weekday_from_meal_name(meal_name: &str) -> Option<u32> {
    let token = meal_name.split('_').next()?.trim().to_ascii_lowercase();
    if token.is_empty() {
        return None;
    }
    DAYS_OF_WEEK
        .iter()
        .position(|day| day.to_ascii_lowercase().starts_with(&token))
        .map(|i| i as u32)
}

/// Column name of the one-hot indicator for a day.
pub fn day_column(day: u32) -> String {
    format!("{DAY_COLUMN_PREFIX}{day}")
}

/// Seven-wide one-hot encoding of a day of the week.
pub fn one_hot(day: u32) -> [f64; 7] {
    let mut encoded = [0.0; 7];
    encoded[(day % 7) as usize] = 1.0;
    encoded
}

/// A feature vector with named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a named feature, replacing any earlier value under the same name.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        let name = name.into();
        match self.names.iter().position(|n| *n == name) {
            Some(i) => self.values[i] = value,
            None => {
                self.names.push(name);
                self.values.push(value);
            }
        }
        self
    }

    /// Append the `dow_0`..`dow_6` indicator columns.
    pub fn with_day_of_week(self, day: u32) -> Self {
        one_hot(day)
            .into_iter()
            .enumerate()
            .fold(self, |acc, (i, value)| acc.with(day_column(i as u32), value))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    /// Values laid out in the order of `columns`, missing columns filled with 0.
    pub fn reindex(&self, columns: &[String]) -> Vec<f64> {
        columns
            .iter()
            .map(|column| self.get(column).unwrap_or(0.0))
            .collect()
    }
}

/// Training design matrix with its column order.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    records: Array2<f64>,
}

impl FeatureMatrix {
    /// Stack feature vectors into a matrix.
    ///
    /// Columns are the union of all names in first-seen order; a row missing
    /// a column gets 0 there.
    pub fn from_vectors(rows: &[FeatureVector]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            for name in row.names() {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }

        let aligned: Vec<Vec<f64>> = rows.iter().map(|row| row.reindex(&columns)).collect();
        let records = Array2::from_shape_fn((rows.len(), columns.len()), |(i, j)| aligned[i][j]);

        Self { columns, records }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &Array2<f64> {
        &self.records
    }

    pub fn nrows(&self) -> usize {
        self.records.nrows()
    }

    /// Rows at the given positions, in that order.
    pub fn select(&self, indices: &[usize]) -> Array2<f64> {
        self.records.select(Axis(0), indices)
    }
}
