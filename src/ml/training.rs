//! Training data preparation and training reports

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use super::features::{MealType, weekday_from_meal_name, weekday_index};
use super::model::{ModelKind, TrainedModel};
use crate::db::{AttendanceRecord, MealPreparationRecord, MenuItem};

/// Headcount for one meal on one date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub meal_type: MealType,
    pub count: u32,
}

/// Aggregate attendance rows into one count per (date, meal type), ordered by
/// date then meal type.
pub fn daily_attendance_counts(records: &[AttendanceRecord]) -> Vec<DailyCount> {
    let mut counts: BTreeMap<(NaiveDate, MealType), u32> = BTreeMap::new();
    for record in records {
        *counts.entry((record.date, record.meal_type)).or_default() += 1;
    }

    counts
        .into_iter()
        .map(|((date, meal_type), count)| DailyCount {
            date,
            meal_type,
            count,
        })
        .collect()
}

/// One preparation record joined with its menu day and headcount
#[derive(Debug, Clone, PartialEq)]
pub struct FoodObservation {
    pub date: NaiveDate,
    /// Menu weekday the meal belongs to, which may differ from the date's
    pub day: u32,
    pub meal_type: MealType,
    pub attendance_count: f64,
    pub expected_students: f64,
    /// Kilograms eaten; the prepared quantity when no leftover was recorded
    pub consumption: f64,
    pub leftover_recorded: bool,
}

/// Weekday a meal slug belongs to: the menu entry's day, else the slug prefix.
pub fn segment_day(meal_name: &str, menu: &[MenuItem]) -> Option<u32> {
    menu.iter()
        .find(|item| item.meal_name == meal_name)
        .and_then(|item| weekday_index(&item.day))
        .or_else(|| weekday_from_meal_name(meal_name))
}

/// Join preparation records with the menu and attendance.
///
/// Rows whose weekday cannot be determined are dropped. When no attendance was
/// recorded for the date and meal, the expected headcount stands in for it.
pub fn food_observations(
    preparations: &[MealPreparationRecord],
    menu: &[MenuItem],
    attendance: &[AttendanceRecord],
) -> Vec<FoodObservation> {
    let headcounts: HashMap<(NaiveDate, MealType), u32> = daily_attendance_counts(attendance)
        .into_iter()
        .map(|c| ((c.date, c.meal_type), c.count))
        .collect();

    preparations
        .iter()
        .filter_map(|prep| {
            let Some(day) = segment_day(&prep.meal_name, menu) else {
                debug!(meal_name = %prep.meal_name, "no weekday for meal, skipping row");
                return None;
            };
            let meal_type = prep.meal_type();
            let expected_students = f64::from(prep.expected_students);
            let attendance_count = headcounts
                .get(&(prep.date, meal_type))
                .map_or(expected_students, |&count| f64::from(count));

            Some(FoodObservation {
                date: prep.date,
                day,
                meal_type,
                attendance_count,
                expected_students,
                consumption: prep.actual_consumption().unwrap_or(prep.quantity_prepared),
                leftover_recorded: prep.leftover_weight.is_some(),
            })
        })
        .collect()
}

/// Outcome of fitting one segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentReport {
    pub segment: String,
    pub kind: ModelKind,
    pub samples: usize,
    pub validation_mae: Option<f64>,
}

impl SegmentReport {
    pub fn new(segment: impl Into<String>, model: &TrainedModel) -> Self {
        Self {
            segment: segment.into(),
            kind: model.kind(),
            samples: model.training_samples,
            validation_mae: model.validation_mae,
        }
    }
}

/// Result of a training pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingSummary {
    pub observations: usize,
    pub trained: Vec<SegmentReport>,
    /// Segments left to the fallback estimator for lack of samples
    pub skipped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn attendance(day: u32, meal_type: MealType, student_id: u32) -> AttendanceRecord {
        AttendanceRecord {
            id: 0,
            student_id,
            date: date(day),
            time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            meal_type,
            leftover_weight: 0.0,
        }
    }

    fn prep(meal_name: &str, day: u32, quantity: f64, leftover: Option<f64>) -> MealPreparationRecord {
        MealPreparationRecord {
            id: 0,
            meal_name: meal_name.to_string(),
            date: date(day),
            quantity_prepared: quantity,
            expected_students: 40,
            leftover_weight: leftover,
        }
    }

    fn menu_item(day: &str, meal_type: MealType, meal_name: &str) -> MenuItem {
        MenuItem {
            id: 1,
            day: day.to_string(),
            meal_type,
            meal_name: meal_name.to_string(),
            description: "Rice".to_string(),
        }
    }

    #[test]
    fn test_daily_counts_group_by_date_and_meal() {
        let records = vec![
            attendance(17, MealType::Lunch, 1),
            attendance(17, MealType::Lunch, 2),
            attendance(17, MealType::Dinner, 1),
            attendance(18, MealType::Lunch, 1),
        ];
        let counts = daily_attendance_counts(&records);

        assert_eq!(counts.len(), 3);
        assert_eq!(counts[0].meal_type, MealType::Lunch);
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].meal_type, MealType::Dinner);
        assert_eq!(counts[2].date, date(18));
    }

    #[test]
    fn test_segment_day_prefers_menu() {
        let menu = vec![menu_item("Friday", MealType::Lunch, "Mon_Lunch_1")];
        assert_eq!(segment_day("Mon_Lunch_1", &menu), Some(4));
        assert_eq!(segment_day("Tue_Lunch_2", &menu), Some(1));
        assert_eq!(segment_day("special", &menu), None);
    }

    #[test]
    fn test_observation_uses_headcount_when_present() {
        let attendance = vec![
            attendance(17, MealType::Lunch, 1),
            attendance(17, MealType::Lunch, 2),
        ];
        let observations = food_observations(&[prep("Mon_Lunch_1", 17, 10.0, Some(2.0))], &[], &attendance);

        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].attendance_count, 2.0);
        assert_eq!(observations[0].consumption, 8.0);
        assert!(observations[0].leftover_recorded);
    }

    #[test]
    fn test_observation_falls_back_to_expected_and_prepared() {
        let observations = food_observations(&[prep("Tue_Dinner_5", 18, 9.0, None)], &[], &[]);

        assert_eq!(observations[0].day, 1);
        assert_eq!(observations[0].meal_type, MealType::Dinner);
        assert_eq!(observations[0].attendance_count, 40.0);
        assert_eq!(observations[0].consumption, 9.0);
        assert!(!observations[0].leftover_recorded);
    }

    #[test]
    fn test_observation_clamps_negative_consumption() {
        let observations = food_observations(&[prep("Wed_Lunch_1", 19, 5.0, Some(7.0))], &[], &[]);
        assert_eq!(observations[0].consumption, 0.0);
    }

    #[test]
    fn test_unparseable_rows_dropped() {
        let observations = food_observations(&[prep("special", 17, 5.0, None)], &[], &[]);
        assert!(observations.is_empty());
    }
}
