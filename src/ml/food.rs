//! Food quantity forecasting per (weekday, meal) segment

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{Duration, NaiveDate, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fallback::{self, DEFAULT_SEGMENT_ATTENDANCE, DEFAULT_SEGMENT_EXPECTED, DEFAULT_WEEKLY_KG_PER_STUDENT};
use super::features::{DAYS_OF_WEEK, FeatureMatrix, FeatureVector, MealType, day_of_week, weekday_index, weekday_name};
use super::model::{ModelBuilder, TrainedModel, TrainingError};
use super::persistence::{ModelArtifact, PersistenceError};
use super::prediction::{DayForecast, MealQuantityForecast, PredictionMethod, WeeklyForecast};
use super::training::{FoodObservation, SegmentReport, TrainingSummary, food_observations};
use super::{MIN_SEGMENT_SAMPLES, MIN_TRAINING_OBSERVATIONS, MlConfig};
use crate::db::{AttendanceRecord, MealPreparationRecord, MenuItem};

/// Description used when the menu has no entry for a meal.
pub const STANDARD_MEAL: &str = "Standard meal";

const FALLBACK_NOTE: &str = "Estimate based on average consumption (no model available)";

/// A (weekday, meal type) pairing, the unit of food model granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub day: u32,
    pub meal_type: MealType,
}

impl Segment {
    pub fn new(day: u32, meal_type: MealType) -> Self {
        Self { day, meal_type }
    }

    pub fn matches(&self, day: u32, meal_type: MealType) -> bool {
        self.day == day && self.meal_type == meal_type
    }

    /// All 21 served segments, Monday Breakfast first
    pub fn all() -> impl Iterator<Item = Segment> {
        (0..DAYS_OF_WEEK.len() as u32)
            .flat_map(|day| MealType::SERVED.into_iter().map(move |meal| Segment::new(day, meal)))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", weekday_name(self.day), self.meal_type)
    }
}

/// The record slices food forecasting reads
#[derive(Debug, Clone, Copy)]
pub struct FoodHistory<'a> {
    pub preparations: &'a [MealPreparationRecord],
    pub menu: &'a [MenuItem],
    pub attendance: &'a [AttendanceRecord],
}

/// One model per segment plus the column order it was fitted with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodModels {
    pub feature_names: Vec<String>,
    pub models: BTreeMap<Segment, TrainedModel>,
}

impl FoodModels {
    pub fn predict(
        &self,
        segment: Segment,
        attendance_count: f64,
        expected_students: f64,
    ) -> Option<(f64, &TrainedModel)> {
        let model = self.models.get(&segment)?;
        let features = food_features(segment.day, attendance_count, expected_students)
            .reindex(&self.feature_names);
        model.predict(&features).map(|value| (value, model))
    }
}

fn food_features(day: u32, attendance_count: f64, expected_students: f64) -> FeatureVector {
    FeatureVector::new()
        .with("attendance_count", attendance_count)
        .with("expected_students", expected_students)
        .with_day_of_week(day)
}

/// First Monday strictly after `today`.
pub fn next_monday(today: NaiveDate) -> NaiveDate {
    let days_ahead = match (7 - day_of_week(today)) % 7 {
        0 => 7,
        n => n,
    };
    today + Duration::days(i64::from(days_ahead))
}

/// Menu description for a weekday and meal, or [`STANDARD_MEAL`].
pub fn menu_description(menu: &[MenuItem], day: u32, meal_type: MealType) -> String {
    menu.iter()
        .find(|item| item.meal_type == meal_type && weekday_index(&item.day) == Some(day))
        .map_or_else(|| STANDARD_MEAL.to_string(), |item| item.description.clone())
}

pub struct FoodForecaster {
    config: MlConfig,
}

impl FoodForecaster {
    pub fn new(config: MlConfig) -> Self {
        Self { config }
    }

    pub fn model_path(&self) -> PathBuf {
        self.config.food_model_path()
    }

    /// Fit one consumption model per segment and persist them.
    pub fn train(&self, history: &FoodHistory<'_>) -> Result<TrainingSummary, TrainingError> {
        if history.preparations.len() < MIN_TRAINING_OBSERVATIONS {
            return Err(TrainingError::InsufficientData {
                found: history.preparations.len(),
                required: MIN_TRAINING_OBSERVATIONS,
            });
        }

        let observations = food_observations(history.preparations, history.menu, history.attendance);
        let rows: Vec<FeatureVector> = observations
            .iter()
            .map(|o| food_features(o.day, o.attendance_count, o.expected_students))
            .collect();
        let matrix = FeatureMatrix::from_vectors(&rows);
        let created_at = Utc::now();
        let builder = ModelBuilder::from_config(&self.config).created_at(created_at);

        let mut summary = TrainingSummary {
            observations: observations.len(),
            ..TrainingSummary::default()
        };
        let mut models = BTreeMap::new();

        for segment in Segment::all() {
            let positions: Vec<usize> = observations
                .iter()
                .enumerate()
                .filter(|(_, o)| segment.matches(o.day, o.meal_type))
                .map(|(i, _)| i)
                .collect();

            if positions.len() < MIN_SEGMENT_SAMPLES {
                debug!(%segment, samples = positions.len(), "too few samples for a food model");
                summary.skipped.push(segment.to_string());
                continue;
            }

            let x = matrix.select(&positions);
            let y = Array1::from_iter(positions.iter().map(|&i| observations[i].consumption));
            let model = builder.train_segment(x.view(), y.view())?;

            if let Some(mae) = model.validation_mae {
                info!(%segment, mae, "food model validated");
            }
            summary.trained.push(SegmentReport::new(segment.to_string(), &model));
            models.insert(segment, model);
        }

        let payload = FoodModels {
            feature_names: matrix.columns().to_vec(),
            models,
        };
        ModelArtifact::new(observations.len(), payload, created_at).save(&self.model_path())?;

        info!(
            observations = observations.len(),
            models = summary.trained.len(),
            "food models trained"
        );
        Ok(summary)
    }

    pub fn load(&self) -> Result<ModelArtifact<FoodModels>, PersistenceError> {
        ModelArtifact::load(&self.model_path())
    }

    /// Forecast the seven days starting at the Monday after `today`.
    ///
    /// Trains once if no model file exists. Any segment without a usable
    /// model gets the per-student average estimate.
    pub fn predict_week(&self, today: NaiveDate, history: &FoodHistory<'_>) -> WeeklyForecast {
        let models = match self.load() {
            Ok(artifact) => Some(artifact.payload),
            Err(e) if e.is_missing() => match self.train(history) {
                Ok(_) => self
                    .load()
                    .inspect_err(|e| warn!(error = %e, "food model unreadable after training"))
                    .ok()
                    .map(|artifact| artifact.payload),
                Err(e) => {
                    warn!(error = %e, "no food model, using average consumption");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "food model unavailable, using average consumption");
                None
            }
        };

        self.predict_week_with(next_monday(today), models.as_ref(), history)
    }

    /// Forecast from already loaded models.
    pub fn predict_week_with(
        &self,
        starting_monday: NaiveDate,
        models: Option<&FoodModels>,
        history: &FoodHistory<'_>,
    ) -> WeeklyForecast {
        let observations = food_observations(history.preparations, history.menu, history.attendance);

        let days = (0..7)
            .map(|offset| {
                let date = starting_monday + Duration::days(offset);
                let day = day_of_week(date);
                let meals = MealType::SERVED
                    .into_iter()
                    .map(|meal_type| {
                        let segment = Segment::new(day, meal_type);
                        (meal_type, forecast_meal(segment, models, history, &observations))
                    })
                    .collect();
                let forecast = DayForecast {
                    day_name: weekday_name(day).to_string(),
                    meals,
                };
                (date, forecast)
            })
            .collect();

        WeeklyForecast {
            starting_monday,
            days,
        }
    }
}

fn forecast_meal(
    segment: Segment,
    models: Option<&FoodModels>,
    history: &FoodHistory<'_>,
    observations: &[FoodObservation],
) -> MealQuantityForecast {
    let attendance_count = fallback::segment_mean_attendance(history.attendance, segment.day, segment.meal_type)
        .unwrap_or(DEFAULT_SEGMENT_ATTENDANCE);
    let expected_students =
        fallback::segment_mean_expected(observations, segment).unwrap_or(DEFAULT_SEGMENT_EXPECTED);
    let menu_description = menu_description(history.menu, segment.day, segment.meal_type);

    match models.and_then(|m| m.predict(segment, attendance_count, expected_students)) {
        Some((value, model)) => MealQuantityForecast {
            predicted_quantity: fallback::round_to(value.max(0.0), 2),
            expected_students: fallback::clamp_count(expected_students),
            menu_description,
            method: PredictionMethod::Model {
                kind: model.kind(),
                validation_mae: model.validation_mae,
            },
            note: None,
        },
        None => {
            let kg_per_student = fallback::segment_consumption_per_student(observations, segment)
                .unwrap_or(DEFAULT_WEEKLY_KG_PER_STUDENT);
            MealQuantityForecast {
                predicted_quantity: fallback::estimate_quantity(expected_students, kg_per_student),
                expected_students: fallback::clamp_count(expected_students),
                menu_description,
                method: PredictionMethod::HistoricalAverage,
                note: Some(FALLBACK_NOTE.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::ModelKind;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    // 2024-06-17 was a Monday
    fn monday_plus(days: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 17).unwrap() + Duration::days(days)
    }

    fn config_in(dir: &std::path::Path) -> MlConfig {
        MlConfig {
            model_dir: dir.to_path_buf(),
            ..MlConfig::default()
        }
    }

    fn empty_history() -> FoodHistory<'static> {
        FoodHistory {
            preparations: &[],
            menu: &[],
            attendance: &[],
        }
    }

    fn weekly_preps(weeks: i64) -> Vec<MealPreparationRecord> {
        let mut preps = Vec::new();
        for week in 0..weeks {
            for day in 0..7 {
                for meal in MealType::SERVED {
                    let prefix = &DAYS_OF_WEEK[day as usize][..3];
                    preps.push(MealPreparationRecord {
                        id: 0,
                        meal_name: format!("{prefix}_{}_{}", meal.slug_token(), day + 1),
                        date: monday_plus(week * 7 + day),
                        quantity_prepared: 25.0,
                        expected_students: 50,
                        leftover_weight: Some(5.0),
                    });
                }
            }
        }
        preps
    }

    #[test]
    fn test_next_monday() {
        assert_eq!(next_monday(monday_plus(0)), monday_plus(7));
        assert_eq!(next_monday(monday_plus(1)), monday_plus(7));
        assert_eq!(next_monday(monday_plus(6)), monday_plus(7));
    }

    #[test]
    fn test_segments_cover_week() {
        let segments: Vec<Segment> = Segment::all().collect();
        assert_eq!(segments.len(), 21);
        assert_eq!(segments[0], Segment::new(0, MealType::Breakfast));
        assert_eq!(segments[20].to_string(), "Sunday Dinner");
    }

    #[test]
    fn test_menu_description_lookup() {
        let menu = vec![MenuItem {
            id: 1,
            day: "Tuesday".to_string(),
            meal_type: MealType::Lunch,
            meal_name: "Tue_Lunch_1".to_string(),
            description: "Rice and dal".to_string(),
        }];
        assert_eq!(menu_description(&menu, 1, MealType::Lunch), "Rice and dal");
        assert_eq!(menu_description(&menu, 1, MealType::Dinner), STANDARD_MEAL);
    }

    #[test]
    fn test_train_requires_fourteen_preparations() {
        let dir = tempdir().unwrap();
        let forecaster = FoodForecaster::new(config_in(dir.path()));
        let preps: Vec<_> = weekly_preps(1).into_iter().take(13).collect();
        let history = FoodHistory {
            preparations: &preps,
            ..empty_history()
        };

        assert!(matches!(
            forecaster.train(&history),
            Err(TrainingError::InsufficientData { found: 13, .. })
        ));
    }

    #[test]
    fn test_sparse_segments_are_skipped() {
        let dir = tempdir().unwrap();
        let forecaster = FoodForecaster::new(config_in(dir.path()));
        let preps = weekly_preps(1);
        let history = FoodHistory {
            preparations: &preps,
            ..empty_history()
        };

        let summary = forecaster.train(&history).unwrap();
        assert!(summary.trained.is_empty());
        assert_eq!(summary.skipped.len(), 21);
    }

    #[test]
    fn test_empty_history_week_uses_defaults() {
        let dir = tempdir().unwrap();
        let forecaster = FoodForecaster::new(config_in(dir.path()));
        let week = forecaster.predict_week(monday_plus(0), &empty_history());

        assert_eq!(week.starting_monday, monday_plus(7));
        assert_eq!(week.days.len(), 7);
        for day in week.days.values() {
            for meal in day.meals.values() {
                assert!(meal.fallback_used());
                assert_eq!(meal.expected_students, 60);
                assert_relative_eq!(meal.predicted_quantity, 24.0);
                assert_eq!(meal.menu_description, STANDARD_MEAL);
                assert!(meal.note.is_some());
            }
        }
    }

    #[test]
    fn test_trained_segments_use_models() {
        let dir = tempdir().unwrap();
        let forecaster = FoodForecaster::new(config_in(dir.path()));
        let preps = weekly_preps(5);
        let history = FoodHistory {
            preparations: &preps,
            ..empty_history()
        };

        let summary = forecaster.train(&history).unwrap();
        assert_eq!(summary.trained.len(), 21);

        let week = forecaster.predict_week(monday_plus(35), &history);
        let monday = week.day(monday_plus(42)).unwrap();
        let lunch = &monday.meals[&MealType::Lunch];

        assert_eq!(monday.day_name, "Monday");
        assert!(lunch.method.is_model());
        assert_eq!(lunch.expected_students, 50);
        assert!((lunch.predicted_quantity - 20.0).abs() < 0.5);
    }

    #[test]
    fn test_corrupt_model_falls_back() {
        let dir = tempdir().unwrap();
        let forecaster = FoodForecaster::new(config_in(dir.path()));
        std::fs::write(forecaster.model_path(), b"garbage").unwrap();

        let week = forecaster.predict_week(monday_plus(0), &empty_history());
        assert_eq!(week.days.len(), 7);
        for day in week.days.values() {
            assert_eq!(day.meals.len(), 3);
            assert!(day.meals.values().all(MealQuantityForecast::fallback_used));
        }
    }

    #[test]
    fn test_boosted_segments_retrain_identically() {
        let dir = tempdir().unwrap();
        let forecaster = FoodForecaster::new(config_in(dir.path()));
        let mut preps = Vec::new();
        for week in 0..12 {
            for (day, meal_name) in [(0, "Mon_Lunch_1"), (1, "Tue_Lunch_2")] {
                preps.push(MealPreparationRecord {
                    id: 0,
                    meal_name: meal_name.to_string(),
                    date: monday_plus(week * 7 + day),
                    quantity_prepared: 30.0,
                    expected_students: 40 + (week % 3) as u32 * 5,
                    leftover_weight: Some(2.0 + (week % 4) as f64),
                });
            }
        }
        let history = FoodHistory {
            preparations: &preps,
            ..empty_history()
        };

        let summary = forecaster.train(&history).unwrap();
        assert_eq!(summary.trained.len(), 2);
        for report in &summary.trained {
            assert_eq!(report.kind, ModelKind::BoostedTrees);
            assert_eq!(report.samples, 12);
            assert!(report.validation_mae.is_some_and(f64::is_finite));
        }
        let first = forecaster.predict_week(monday_plus(84), &history);

        forecaster.train(&history).unwrap();
        let second = forecaster.predict_week(monday_plus(84), &history);

        assert_eq!(first, second);
        let monday = &first.days[&monday_plus(91)];
        assert!(monday.meals[&MealType::Lunch].method.is_model());
        assert!(monday.meals[&MealType::Dinner].fallback_used());
    }

    #[test]
    fn test_fallback_uses_segment_rate() {
        let forecaster = FoodForecaster::new(MlConfig::default());
        let preps = weekly_preps(1);
        let history = FoodHistory {
            preparations: &preps,
            ..empty_history()
        };

        let week = forecaster.predict_week_with(monday_plus(7), None, &history);
        let dinner = &week.days[&monday_plus(9)].meals[&MealType::Dinner];

        // 20 kg eaten by 50 expected students
        assert_relative_eq!(dinner.predicted_quantity, 20.0);
        assert_eq!(dinner.expected_students, 50);
    }
}
