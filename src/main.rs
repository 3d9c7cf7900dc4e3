use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cafeteria_monitor::db::{AttendanceRecord, CsvStore, MealPreparationRecord, MenuItem, RecordStore, Student};
use cafeteria_monitor::face::{self, FaceDetector, FaceMatcher, GalleryMatcher, PrecroppedDetector};
use cafeteria_monitor::records::{self, AttendanceInput, PreparationInput};
use cafeteria_monitor::{AppConfig, Clock, MealPlanner, MealSchedule, MealType, SystemClock, analytics};
use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "cafeteria-monitor")]
#[command(about = "Cafeteria attendance and food preparation forecasting")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the per-meal attendance models
    TrainAttendance,
    /// Predict headcount per meal (defaults to tomorrow)
    PredictAttendance {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Train the per-segment food quantity models
    TrainFood,
    /// Forecast food quantities for the week starting next Monday
    PredictWeek,
    /// Recommend preparation quantities (defaults to tomorrow)
    Recommend {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Wastage summary, worst offenders and daily leftovers
    Wastage {
        #[arg(long, default_value_t = 31)]
        days: u32,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Register a student from a face photo
    RegisterStudent {
        name: String,
        roll_number: String,
        photo: PathBuf,
    },
    /// Identify a student from a photo and record them at the current meal
    MarkAttendance {
        photo: PathBuf,
        #[arg(long, default_value_t = 0.0)]
        leftover: f64,
    },
    /// Add a menu item for a weekday and meal
    AddMenu {
        day: String,
        meal_type: MealType,
        description: String,
    },
    /// Record food prepared for a meal
    RecordPrep {
        meal_name: String,
        quantity: f64,
        expected_students: u32,
        #[arg(long, default_value_t = 0.0)]
        leftover: f64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("cafeteria_monitor=debug");

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let store = CsvStore::new(config.storage.data_dir.clone());
    let planner = MealPlanner::new(store, SystemClock, config.ml_config(), config.recommendation);

    run(args.command, &planner, &config)
}

fn run(command: Command, planner: &MealPlanner<CsvStore, SystemClock>, config: &AppConfig) -> Result<()> {
    let today = planner.clock().today();
    let tomorrow = today + Duration::days(1);

    match command {
        Command::TrainAttendance => print_json(&planner.train_attendance_model()?),
        Command::PredictAttendance { date } => {
            print_json(&planner.predict_attendance(date.unwrap_or(tomorrow))?)
        }
        Command::TrainFood => print_json(&planner.train_food_model()?),
        Command::PredictWeek => print_json(&planner.predict_food_week()?),
        Command::Recommend { date } => {
            let date = date.unwrap_or(tomorrow);
            match planner.recommend(date)? {
                Some(recommendation) => print_json(&recommendation),
                None => print_json(&json!({
                    "date": date,
                    "recommendation": null,
                    "reason": "not enough attendance history to forecast",
                })),
            }
        }
        Command::Wastage { days, top } => {
            let store = planner.store();
            let attendance: Vec<AttendanceRecord> = store.read_all()?;
            let preparations: Vec<MealPreparationRecord> = store.read_all()?;
            let students: Vec<Student> = store.read_all()?;
            let menu: Vec<MenuItem> = store.read_all()?;
            print_json(&json!({
                "summary": analytics::wastage_summary(&attendance, &preparations),
                "students": analytics::student_wastage_ranking(&attendance, &students, top),
                "daily": analytics::daily_wastage(&attendance, today, days),
                "efficiency": analytics::consumption_efficiency(&preparations, &menu),
            }))
        }
        Command::RegisterStudent {
            name,
            roll_number,
            photo,
        } => {
            let face = detect_face(&photo, config)?;
            let student = records::register_student_with_face(
                planner.store(),
                &name,
                &roll_number,
                &face,
                &config.face.gallery_dir,
                today,
            )?;
            print_json(&student)
        }
        Command::MarkAttendance { photo, leftover } => {
            let face = detect_face(&photo, config)?;
            let matcher = GalleryMatcher::from_config(&config.face);
            let Some(found) = matcher
                .identify(&face, &config.face.gallery_dir)
                .context("Failed to search face gallery")?
            else {
                bail!("No registered student matches {}", photo.display());
            };

            let now = planner.clock().now_local();
            let meal_type = MealSchedule::new(&config.schedule).current_meal(&now);
            let outcome = records::record_attendance(
                planner.store(),
                AttendanceInput {
                    student_id: found.student_id,
                    date: now.date_naive(),
                    time: truncate_seconds(now.time()),
                    meal_type,
                    leftover_weight: leftover,
                },
            )?;
            print_json(&json!({
                "student_id": found.student_id,
                "mean_squared_error": found.mean_squared_error,
                "attendance": outcome,
            }))
        }
        Command::AddMenu {
            day,
            meal_type,
            description,
        } => print_json(&records::add_menu_item(planner.store(), &day, meal_type, &description)?),
        Command::RecordPrep {
            meal_name,
            quantity,
            expected_students,
            leftover,
            date,
        } => print_json(&records::record_meal_preparation(
            planner.store(),
            PreparationInput {
                meal_name,
                date: date.unwrap_or(today),
                quantity_prepared: quantity,
                expected_students,
                leftover_weight: leftover,
            },
        )?),
    }
}

fn detect_face(photo: &Path, config: &AppConfig) -> Result<face::FaceRegion> {
    let frame: DynamicImage =
        image::open(photo).with_context(|| format!("Failed to open {}", photo.display()))?;
    PrecroppedDetector::new(config.face.min_face_size)
        .detect(&frame)
        .with_context(|| format!("No face found in {}", photo.display()))
}

fn truncate_seconds(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_num_seconds_from_midnight_opt(time.num_seconds_from_midnight(), 0).unwrap_or(time)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
