use std::collections::{BTreeMap, HashMap};

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Serialize;

use crate::db::{AttendanceRecord, MealPreparationRecord, MenuItem, Student};
use crate::ml::features::{DAYS_OF_WEEK, MealType, day_of_week};
use crate::ml::fallback::{mean, round_to};
use crate::ml::training::segment_day;
use crate::traits::Clock;

// ==================== Wastage Types ====================

/// Plate waste against food prepared for one meal on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealWastage {
    pub date: NaiveDate,
    pub meal_type: MealType,
    /// Sum of every attendee's leftover, kg
    pub leftover_weight: f64,
    pub quantity_prepared: f64,
    pub expected_students: u32,
    pub wastage_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WastageSummary {
    pub total_wastage: f64,
    pub total_prepared: f64,
    /// 0 when nothing was prepared
    pub wastage_percentage: f64,
    pub by_meal: Vec<MealWastage>,
    /// Leftover per meal type across all attendance
    pub by_meal_type: BTreeMap<MealType, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentWastage {
    pub student_id: u32,
    pub name: String,
    pub roll_number: String,
    pub total_leftover: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyWastage {
    pub date: NaiveDate,
    pub leftover_weight: f64,
}

/// Consumed share of prepared food, weekday rows by meal type columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EfficiencyGrid {
    pub days: Vec<String>,
    pub meal_types: Vec<MealType>,
    /// Percentages rounded to one decimal, 0 where there is no data
    pub cells: Vec<Vec<f64>>,
}

impl EfficiencyGrid {
    pub fn cell(&self, day: u32, meal_type: MealType) -> Option<f64> {
        let column = self.meal_types.iter().position(|m| *m == meal_type)?;
        self.cells.get(day as usize)?.get(column).copied()
    }
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole * 100.0 } else { 0.0 }
}

// ==================== Wastage Functions ====================

/// Join attendance leftovers with the food prepared for the same date and meal.
///
/// Meals with attendance but no preparation record (or the reverse) are left
/// out of the per-meal rows and the totals.
pub fn wastage_summary(
    attendance: &[AttendanceRecord],
    preparations: &[MealPreparationRecord],
) -> WastageSummary {
    let mut leftovers: BTreeMap<(NaiveDate, MealType), f64> = BTreeMap::new();
    let mut by_meal_type: BTreeMap<MealType, f64> = BTreeMap::new();
    for record in attendance {
        *leftovers.entry((record.date, record.meal_type)).or_default() += record.leftover_weight;
        *by_meal_type.entry(record.meal_type).or_default() += record.leftover_weight;
    }

    let mut prepared: HashMap<(NaiveDate, MealType), &MealPreparationRecord> = HashMap::new();
    for prep in preparations {
        prepared.entry((prep.date, prep.meal_type())).or_insert(prep);
    }

    let by_meal: Vec<MealWastage> = leftovers
        .into_iter()
        .filter_map(|((date, meal_type), leftover_weight)| {
            let prep = prepared.get(&(date, meal_type))?;
            Some(MealWastage {
                date,
                meal_type,
                leftover_weight,
                quantity_prepared: prep.quantity_prepared,
                expected_students: prep.expected_students,
                wastage_percentage: percentage(leftover_weight, prep.quantity_prepared),
            })
        })
        .collect();

    let total_wastage: f64 = by_meal.iter().map(|m| m.leftover_weight).sum();
    let total_prepared: f64 = by_meal.iter().map(|m| m.quantity_prepared).sum();

    WastageSummary {
        total_wastage,
        total_prepared,
        wastage_percentage: percentage(total_wastage, total_prepared),
        by_meal,
        by_meal_type,
    }
}

/// Students ordered by total leftover, highest first.
pub fn student_wastage_ranking(
    attendance: &[AttendanceRecord],
    students: &[Student],
    top_n: usize,
) -> Vec<StudentWastage> {
    let mut totals: HashMap<u32, f64> = HashMap::new();
    for record in attendance {
        *totals.entry(record.student_id).or_default() += record.leftover_weight;
    }

    let mut ranking: Vec<StudentWastage> = students
        .iter()
        .filter_map(|student| {
            totals.get(&student.id).map(|&total| StudentWastage {
                student_id: student.id,
                name: student.name.clone(),
                roll_number: student.roll_number.clone(),
                total_leftover: total,
            })
        })
        .collect();

    ranking.sort_by(|a, b| {
        b.total_leftover
            .total_cmp(&a.total_leftover)
            .then(a.student_id.cmp(&b.student_id))
    });
    ranking.truncate(top_n);
    ranking
}

/// Leftover per calendar day for the `days` days ending at `end`.
pub fn daily_wastage(attendance: &[AttendanceRecord], end: NaiveDate, days: u32) -> Vec<DailyWastage> {
    let mut per_date: HashMap<NaiveDate, f64> = HashMap::new();
    for record in attendance {
        *per_date.entry(record.date).or_default() += record.leftover_weight;
    }

    (0..i64::from(days))
        .rev()
        .map(|back| {
            let date = end - ChronoDuration::days(back);
            DailyWastage {
                date,
                leftover_weight: per_date.get(&date).copied().unwrap_or(0.0),
            }
        })
        .collect()
}

/// [`daily_wastage`] ending today.
pub fn daily_wastage_with_clock<C: Clock>(
    attendance: &[AttendanceRecord],
    clock: &C,
    days: u32,
) -> Vec<DailyWastage> {
    daily_wastage(attendance, clock.today(), days)
}

/// Mean consumed over mean prepared, per weekday and meal type.
///
/// The weekday comes from the menu entry (or slug) a preparation belongs to,
/// falling back to the preparation date. Rows without a leftover count as
/// fully eaten.
pub fn consumption_efficiency(
    preparations: &[MealPreparationRecord],
    menu: &[MenuItem],
) -> EfficiencyGrid {
    let mut cells: HashMap<(u32, MealType), Vec<&MealPreparationRecord>> = HashMap::new();
    for prep in preparations {
        let day = segment_day(&prep.meal_name, menu).unwrap_or_else(|| day_of_week(prep.date));
        cells
            .entry((day, prep.meal_type()))
            .or_default()
            .push(prep);
    }

    let grid = (0..DAYS_OF_WEEK.len() as u32)
        .map(|day| {
            MealType::SERVED
                .iter()
                .map(|&meal_type| {
                    let Some(rows) = cells.get(&(day, meal_type)) else {
                        return 0.0;
                    };
                    let consumed = mean(rows.iter().map(|p| {
                        p.actual_consumption().unwrap_or(p.quantity_prepared)
                    }));
                    let prepared = mean(rows.iter().map(|p| p.quantity_prepared));
                    match (consumed, prepared) {
                        (Some(c), Some(p)) => round_to(percentage(c, p), 1),
                        _ => 0.0,
                    }
                })
                .collect()
        })
        .collect();

    EfficiencyGrid {
        days: DAYS_OF_WEEK.iter().map(|d| d.to_string()).collect(),
        meal_types: MealType::SERVED.to_vec(),
        cells: grid,
    }
}
