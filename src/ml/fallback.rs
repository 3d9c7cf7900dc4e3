//! Historical-average estimates used when no trained model applies
//!
//! Everything here is a pure function over record slices. Empty inputs and
//! zero denominators give fixed defaults, never NaN.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::features::{MealType, day_of_week};
use super::food::Segment;
use super::training::FoodObservation;
use crate::db::{AttendanceRecord, MealPreparationRecord};

/// Segment attendance assumed when the segment has no history.
pub const DEFAULT_SEGMENT_ATTENDANCE: f64 = 50.0;

/// Segment headcount assumed when the segment has no preparation history.
pub const DEFAULT_SEGMENT_EXPECTED: f64 = 60.0;

/// Kilograms per student assumed by the weekly forecast.
pub const DEFAULT_WEEKLY_KG_PER_STUDENT: f64 = 0.4;

/// Kilograms per student assumed by the preparation recommendation.
pub fn default_kg_per_student(meal_type: MealType) -> f64 {
    match meal_type {
        MealType::Breakfast => 0.3,
        MealType::Lunch | MealType::Dinner => 0.5,
        MealType::Unknown => DEFAULT_WEEKLY_KG_PER_STUDENT,
    }
}

/// Arithmetic mean, None for empty input or a non-finite result.
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), value| (sum + value, n + 1));
    if n == 0 {
        return None;
    }
    let mean = sum / n as f64;
    mean.is_finite().then_some(mean)
}

/// Round to a number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Mean per-date headcount for a weekday and meal.
pub fn segment_mean_attendance(
    records: &[AttendanceRecord],
    day: u32,
    meal_type: MealType,
) -> Option<f64> {
    let mut per_date: BTreeMap<NaiveDate, u32> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.meal_type == meal_type && day_of_week(r.date) == day)
    {
        *per_date.entry(record.date).or_default() += 1;
    }
    mean(per_date.values().map(|&count| f64::from(count)))
}

/// Rounded historical headcount for a weekday and meal, 0 without history.
pub fn average_attendance(records: &[AttendanceRecord], day: u32, meal_type: MealType) -> u32 {
    segment_mean_attendance(records, day, meal_type).map_or(0, clamp_count)
}

/// Round to a non-negative whole count.
pub fn clamp_count(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round() as u32
    } else {
        0
    }
}

/// Mean expected headcount recorded for a segment.
pub fn segment_mean_expected(observations: &[FoodObservation], segment: Segment) -> Option<f64> {
    mean(
        observations
            .iter()
            .filter(|o| segment.matches(o.day, o.meal_type))
            .map(|o| o.expected_students),
    )
}

/// Mean kilograms eaten per expected student in a segment.
///
/// Only rows with a recorded leftover and a positive headcount count.
pub fn segment_consumption_per_student(
    observations: &[FoodObservation],
    segment: Segment,
) -> Option<f64> {
    mean(
        observations
            .iter()
            .filter(|o| segment.matches(o.day, o.meal_type))
            .filter(|o| o.leftover_recorded && o.expected_students > 0.0)
            .map(|o| o.consumption / o.expected_students),
    )
}

/// Mean kilograms eaten per expected student for a meal type, over every
/// preparation with a recorded leftover. Defaults per meal type.
pub fn meal_consumption_per_student(
    preparations: &[MealPreparationRecord],
    meal_type: MealType,
) -> f64 {
    mean(
        preparations
            .iter()
            .filter(|p| p.meal_type() == meal_type && p.expected_students > 0)
            .filter_map(|p| {
                p.actual_consumption()
                    .map(|consumed| consumed / f64::from(p.expected_students))
            }),
    )
    .unwrap_or_else(|| default_kg_per_student(meal_type))
}

/// Kilograms for a headcount at a per-student rate, clamped and rounded to 2
/// decimals.
pub fn estimate_quantity(expected_students: f64, kg_per_student: f64) -> f64 {
    let quantity = expected_students * kg_per_student;
    if quantity.is_finite() {
        round_to(quantity.max(0.0), 2)
    } else {
        0.0
    }
}
