//! Validated writes for students, attendance, menu and meal preparation
//!
//! Everything that reaches the forecasting core goes through these checks
//! first, so the core can assume positive quantities and known meal types.

use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{AttendanceRecord, MealPreparationRecord, MenuItem, RecordStore, StoreError, Student};
use crate::face::{FaceError, FaceRegion, gallery_path, save_face};
use crate::ml::features::{DAYS_OF_WEEK, MealType, weekday_index};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Face(#[from] FaceError),
}

fn invalid(message: impl Into<String>) -> RecordError {
    RecordError::InvalidInput(message.into())
}

/// Whether a keyed write inserted a new row or changed an existing one
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum Upsert<R> {
    Created(R),
    Updated(R),
}

impl<R> Upsert<R> {
    pub fn record(&self) -> &R {
        match self {
            Upsert::Created(r) | Upsert::Updated(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Upsert::Created(_))
    }
}

fn require_text(field: &str, value: &str) -> Result<String, RecordError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn require_served(meal_type: MealType) -> Result<MealType, RecordError> {
    if meal_type.is_served() {
        Ok(meal_type)
    } else {
        Err(invalid("meal type must be Breakfast, Lunch or Dinner"))
    }
}

fn canonical_day(day: &str) -> Result<&'static str, RecordError> {
    weekday_index(day)
        .map(|i| DAYS_OF_WEEK[i as usize])
        .ok_or_else(|| invalid(format!("unknown weekday: {day}")))
}

// ==================== Students ====================

pub fn register_student<S: RecordStore>(
    store: &S,
    name: &str,
    roll_number: &str,
    image_path: &str,
    registration_date: NaiveDate,
) -> Result<Student, RecordError> {
    let (name, roll_number) = new_student_fields(store, name, roll_number)?;
    let image_path = require_text("image path", image_path)?;

    let student = store.append(Student {
        id: 0,
        name,
        roll_number,
        image_path,
        registration_date,
    })?;
    info!(id = student.id, roll_number = %student.roll_number, "student registered");
    Ok(student)
}

fn new_student_fields<S: RecordStore>(
    store: &S,
    name: &str,
    roll_number: &str,
) -> Result<(String, String), RecordError> {
    let name = require_text("name", name)?;
    let roll_number = require_text("roll number", roll_number)?;

    let students = store.read_all::<Student>()?;
    if students.iter().any(|s| s.roll_number == roll_number) {
        return Err(RecordError::Duplicate(format!(
            "a student with roll number {roll_number} already exists"
        )));
    }
    Ok((name, roll_number))
}

/// Register a student whose gallery image is `face`.
///
/// The student row is removed again if the image cannot be written.
pub fn register_student_with_face<S: RecordStore>(
    store: &S,
    name: &str,
    roll_number: &str,
    face: &FaceRegion,
    gallery_dir: &Path,
    registration_date: NaiveDate,
) -> Result<Student, RecordError> {
    let (name, roll_number) = new_student_fields(store, name, roll_number)?;

    let student = store.insert_with(|id| Student {
        id,
        name,
        roll_number,
        image_path: gallery_path(gallery_dir, id).to_string_lossy().into_owned(),
        registration_date,
    })?;

    if let Err(e) = save_face(face, student.id, gallery_dir) {
        store.delete::<Student>(student.id)?;
        warn!(id = student.id, error = %e, "face not stored, registration rolled back");
        return Err(e.into());
    }

    info!(id = student.id, image_path = %student.image_path, "student registered with face");
    Ok(student)
}

/// Remove a student, returning the removed record.
pub fn delete_student<S: RecordStore>(store: &S, id: u32) -> Result<Student, RecordError> {
    let student = store
        .find::<Student>(id)?
        .ok_or(RecordError::NotFound { entity: "student", id })?;
    store.delete::<Student>(id)?;
    Ok(student)
}

// ==================== Attendance ====================

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceInput {
    pub student_id: u32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub meal_type: MealType,
    pub leftover_weight: f64,
}

/// Record a student at a meal. A repeat for the same student, date and meal
/// only updates the leftover weight.
pub fn record_attendance<S: RecordStore>(
    store: &S,
    input: AttendanceInput,
) -> Result<Upsert<AttendanceRecord>, RecordError> {
    if !input.leftover_weight.is_finite() || input.leftover_weight < 0.0 {
        return Err(invalid("leftover weight must be a non-negative number"));
    }
    let meal_type = require_served(input.meal_type)?;

    if store.find::<Student>(input.student_id)?.is_none() {
        return Err(RecordError::NotFound {
            entity: "student",
            id: input.student_id,
        });
    }

    let existing = store.read_all::<AttendanceRecord>()?.into_iter().find(|r| {
        r.student_id == input.student_id && r.date == input.date && r.meal_type == meal_type
    });

    if let Some(existing) = existing {
        let updated = store
            .update::<AttendanceRecord, _>(existing.id, |r| r.leftover_weight = input.leftover_weight)?
            .ok_or(RecordError::NotFound {
                entity: "attendance record",
                id: existing.id,
            })?;
        info!(student_id = input.student_id, meal = %meal_type, "attendance already recorded, leftover updated");
        return Ok(Upsert::Updated(updated));
    }

    let record = store.append(AttendanceRecord {
        id: 0,
        student_id: input.student_id,
        date: input.date,
        time: input.time,
        meal_type,
        leftover_weight: input.leftover_weight,
    })?;
    Ok(Upsert::Created(record))
}

// ==================== Menu ====================

/// Menu slug: three-letter day, meal token, id. `Mon_Break_1`.
pub fn menu_slug(day: &str, meal_type: MealType, id: u32) -> String {
    let prefix: String = day.chars().take(3).collect();
    format!("{prefix}_{}_{id}", meal_type.slug_token())
}

pub fn add_menu_item<S: RecordStore>(
    store: &S,
    day: &str,
    meal_type: MealType,
    description: &str,
) -> Result<MenuItem, RecordError> {
    let day = canonical_day(day)?;
    let meal_type = require_served(meal_type)?;
    let description = require_text("description", description)?;

    let menu = store.read_all::<MenuItem>()?;
    if menu.iter().any(|m| m.day == day && m.meal_type == meal_type) {
        return Err(RecordError::Duplicate(format!(
            "a menu item already exists for {day} {meal_type}"
        )));
    }

    let item = store.insert_with(|id| MenuItem {
        id,
        day: day.to_string(),
        meal_type,
        meal_name: menu_slug(day, meal_type, id),
        description,
    })?;
    info!(meal_name = %item.meal_name, "menu item added");
    Ok(item)
}

/// Change a menu item. The slug is regenerated when day or meal type change.
pub fn update_menu_item<S: RecordStore>(
    store: &S,
    id: u32,
    day: &str,
    meal_type: MealType,
    description: &str,
) -> Result<MenuItem, RecordError> {
    let day = canonical_day(day)?;
    let meal_type = require_served(meal_type)?;
    let description = require_text("description", description)?;

    let menu = store.read_all::<MenuItem>()?;
    if !menu.iter().any(|m| m.id == id) {
        return Err(RecordError::NotFound { entity: "menu item", id });
    }
    if menu
        .iter()
        .any(|m| m.id != id && m.day == day && m.meal_type == meal_type)
    {
        return Err(RecordError::Duplicate(format!(
            "another menu item already exists for {day} {meal_type}"
        )));
    }

    store
        .update::<MenuItem, _>(id, |item| {
            if item.day != day || item.meal_type != meal_type {
                item.meal_name = menu_slug(day, meal_type, id);
            }
            item.day = day.to_string();
            item.meal_type = meal_type;
            item.description = description;
        })?
        .ok_or(RecordError::NotFound { entity: "menu item", id })
}

pub fn delete_menu_item<S: RecordStore>(store: &S, id: u32) -> Result<(), RecordError> {
    if store.delete::<MenuItem>(id)? {
        Ok(())
    } else {
        Err(RecordError::NotFound { entity: "menu item", id })
    }
}

// ==================== Meal preparation ====================

#[derive(Debug, Clone, PartialEq)]
pub struct PreparationInput {
    pub meal_name: String,
    pub date: NaiveDate,
    pub quantity_prepared: f64,
    pub expected_students: u32,
    pub leftover_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparationOutcome {
    pub record: Upsert<MealPreparationRecord>,
    /// Leftover exceeded the prepared quantity; consumption reads as 0
    pub consumption_clamped: bool,
}

/// Record food prepared for a meal, replacing an earlier submission for the
/// same meal and date.
pub fn record_meal_preparation<S: RecordStore>(
    store: &S,
    input: PreparationInput,
) -> Result<PreparationOutcome, RecordError> {
    let meal_name = require_text("meal name", &input.meal_name)?;
    if !input.quantity_prepared.is_finite() || input.quantity_prepared <= 0.0 {
        return Err(invalid("quantity prepared must be greater than zero"));
    }
    if input.expected_students == 0 {
        return Err(invalid("expected students must be greater than zero"));
    }
    if !input.leftover_weight.is_finite() || input.leftover_weight < 0.0 {
        return Err(invalid("leftover weight must be a non-negative number"));
    }

    let consumption_clamped = input.leftover_weight > input.quantity_prepared;
    if consumption_clamped {
        warn!(
            meal_name = %meal_name,
            prepared = input.quantity_prepared,
            leftover = input.leftover_weight,
            "leftover exceeds quantity prepared, consumption clamped to zero"
        );
    }

    let existing = store
        .read_all::<MealPreparationRecord>()?
        .into_iter()
        .find(|p| p.meal_name == meal_name && p.date == input.date);

    let record = match existing {
        Some(existing) => {
            let updated = store
                .update::<MealPreparationRecord, _>(existing.id, |p| {
                    p.quantity_prepared = input.quantity_prepared;
                    p.expected_students = input.expected_students;
                    p.leftover_weight = Some(input.leftover_weight);
                })?
                .ok_or(RecordError::NotFound {
                    entity: "meal preparation",
                    id: existing.id,
                })?;
            Upsert::Updated(updated)
        }
        None => Upsert::Created(store.append(MealPreparationRecord {
            id: 0,
            meal_name,
            date: input.date,
            quantity_prepared: input.quantity_prepared,
            expected_students: input.expected_students,
            leftover_weight: Some(input.leftover_weight),
        })?),
    };

    Ok(PreparationOutcome {
        record,
        consumption_clamped,
    })
}
