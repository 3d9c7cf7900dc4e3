//! Cafeteria Monitor Library
//!
//! Attendance and food-quantity forecasting for a cafeteria, plus the record
//! keeping, face matching and wastage analytics around it.

pub mod analytics;
pub mod config;
pub mod db;
pub mod face;
pub mod ml;
pub mod planner;
pub mod records;
pub mod schedule;
pub mod traits;

// Re-export commonly used types
pub use analytics::{
    DailyWastage, EfficiencyGrid, MealWastage, StudentWastage, WastageSummary,
    consumption_efficiency, daily_wastage, daily_wastage_with_clock, student_wastage_ranking,
    wastage_summary,
};
pub use config::AppConfig;
pub use db::{
    AttendanceRecord, CsvStore, MealPreparationRecord, MemoryStore, MenuItem, RecordStore,
    StoreError, Student,
};
pub use face::{FaceDetector, FaceMatcher, GalleryMatcher, PrecroppedDetector};
pub use ml::{MealType, MlConfig, meal_type_of};
pub use planner::{DayRecommendation, MealPlanner, MealRecommendation, TrainingOutcome};
pub use records::{RecordError, Upsert};
pub use schedule::MealSchedule;
pub use traits::{Clock, MockClock, SystemClock};
