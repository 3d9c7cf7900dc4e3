use chrono::{DateTime, Local, NaiveTime, Timelike};

use crate::config::ScheduleConfig;
use crate::ml::MealType;

/// Cafeteria meal service windows with configurable boundaries.
#[derive(Debug, Clone)]
pub struct MealSchedule {
    lunch_start: u32,
    dinner_start: u32,
}

impl MealSchedule {
    pub fn new(config: &ScheduleConfig) -> Self {
        Self {
            lunch_start: config.lunch_start_hour,
            dinner_start: config.dinner_start_hour,
        }
    }

    /// Meal being served at a wall-clock time.
    pub fn meal_type_at(&self, time: NaiveTime) -> MealType {
        let hour = time.hour();
        if hour < self.lunch_start {
            MealType::Breakfast
        } else if hour < self.dinner_start {
            MealType::Lunch
        } else {
            MealType::Dinner
        }
    }

    /// Meal being served right now.
    pub fn current_meal(&self, now: &DateTime<Local>) -> MealType {
        self.meal_type_at(now.time())
    }
}

impl Default for MealSchedule {
    fn default() -> Self {
        Self::new(&ScheduleConfig::default())
    }
}
