use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{NaiveDate, NaiveTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::ml::features::{MealType, meal_type_of};

/// A registered student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: u32,
    pub name: String,
    pub roll_number: String,
    /// Gallery image captured at registration
    pub image_path: String,
    pub registration_date: NaiveDate,
}

/// One student's presence at one meal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: u32,
    pub student_id: u32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub meal_type: MealType,
    /// Uneaten food on the student's plate, kg
    pub leftover_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: u32,
    /// Full weekday name
    pub day: String,
    pub meal_type: MealType,
    /// Slug such as `Mon_Lunch_3`
    pub meal_name: String,
    pub description: String,
}

/// Food prepared for one meal on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPreparationRecord {
    pub id: u32,
    pub meal_name: String,
    pub date: NaiveDate,
    /// Kilograms cooked
    pub quantity_prepared: f64,
    pub expected_students: u32,
    /// Kilograms left over; absent on legacy rows
    pub leftover_weight: Option<f64>,
}

impl MealPreparationRecord {
    pub fn meal_type(&self) -> MealType {
        meal_type_of(&self.meal_name)
    }

    /// Prepared minus leftover, never negative. None when no leftover was recorded.
    pub fn actual_consumption(&self) -> Option<f64> {
        self.leftover_weight
            .map(|leftover| (self.quantity_prepared - leftover).max(0.0))
    }
}

/// The record collections the store keeps apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Students,
    Attendance,
    Menu,
    MealPreparation,
}

impl Entity {
    pub fn file_name(&self) -> &'static str {
        match self {
            Entity::Students => "students.csv",
            Entity::Attendance => "attendance.csv",
            Entity::Menu => "menu.csv",
            Entity::MealPreparation => "meal_preparation.csv",
        }
    }
}

/// A row type held by a [`RecordStore`], keyed by an integer id.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const ENTITY: Entity;

    fn id(&self) -> u32;
    fn set_id(&mut self, id: u32);
}

macro_rules! impl_record {
    ($ty:ty, $entity:expr) => {
        impl Record for $ty {
            const ENTITY: Entity = $entity;

            fn id(&self) -> u32 {
                self.id
            }

            fn set_id(&mut self, id: u32) {
                self.id = id;
            }
        }
    };
}

impl_record!(Student, Entity::Students);
impl_record!(AttendanceRecord, Entity::Attendance);
impl_record!(MenuItem, Entity::Menu);
impl_record!(MealPreparationRecord, Entity::MealPreparation);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed csv data: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed stored row: {0}")]
    Json(#[from] serde_json::Error),
}

/// Keyed persistence for every record collection.
///
/// Implementors provide whole-collection reads and writes; the keyed
/// operations are built on top of them. Callers are expected to be
/// single-threaded, as every keyed operation is a read-modify-write.
pub trait RecordStore {
    fn read_all<R: Record>(&self) -> Result<Vec<R>, StoreError>;

    fn write_all<R: Record>(&self, records: &[R]) -> Result<(), StoreError>;

    /// Insert with the next id (max existing + 1, or 1 when empty).
    fn append<R: Record>(&self, record: R) -> Result<R, StoreError> {
        self.insert_with(|_| record)
    }

    /// Insert a record built from the id it is about to receive.
    fn insert_with<R, F>(&self, build: F) -> Result<R, StoreError>
    where
        R: Record,
        F: FnOnce(u32) -> R,
    {
        let mut records = self.read_all::<R>()?;
        let id = records.iter().map(Record::id).max().map_or(1, |max| max + 1);
        let mut record = build(id);
        record.set_id(id);
        records.push(record.clone());
        self.write_all(&records)?;
        Ok(record)
    }

    fn find<R: Record>(&self, id: u32) -> Result<Option<R>, StoreError> {
        Ok(self.read_all::<R>()?.into_iter().find(|r| r.id() == id))
    }

    /// Apply `mutate` to the record with `id`. Returns the updated record, or
    /// None when there is no such id.
    fn update<R, F>(&self, id: u32, mutate: F) -> Result<Option<R>, StoreError>
    where
        R: Record,
        F: FnOnce(&mut R),
    {
        let mut records = self.read_all::<R>()?;
        let Some(record) = records.iter_mut().find(|r| r.id() == id) else {
            return Ok(None);
        };
        mutate(record);
        let updated = record.clone();
        self.write_all(&records)?;
        Ok(Some(updated))
    }

    /// Remove the record with `id`. Returns whether anything was removed.
    fn delete<R: Record>(&self, id: u32) -> Result<bool, StoreError> {
        let mut records = self.read_all::<R>()?;
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(&records)?;
        Ok(true)
    }
}

/// One CSV file per entity under a data directory.
#[derive(Debug, Clone)]
pub struct CsvStore {
    data_dir: PathBuf,
}

impl CsvStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_for(&self, entity: Entity) -> PathBuf {
        self.data_dir.join(entity.file_name())
    }
}

impl RecordStore for CsvStore {
    fn read_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let path = self.path_for(R::ENTITY);
        if !path.exists() || fs::metadata(&path)?.len() == 0 {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let records = reader.deserialize().collect::<Result<Vec<R>, _>>()?;
        Ok(records)
    }

    fn write_all<R: Record>(&self, records: &[R]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)?;

        let mut staged = NamedTempFile::new_in(&self.data_dir)?;
        {
            let mut writer = csv::Writer::from_writer(staged.as_file_mut());
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        staged
            .persist(self.path_for(R::ENTITY))
            .map_err(|e| StoreError::Io(e.error))?;

        Ok(())
    }
}

/// Process-local store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Entity, Vec<serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn read_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = tables.get(&R::ENTITY) else {
            return Ok(Vec::new());
        };
        let records = rows
            .iter()
            .cloned()
            .map(serde_json::from_value)
            .collect::<Result<Vec<R>, _>>()?;
        Ok(records)
    }

    fn write_all<R: Record>(&self, records: &[R]) -> Result<(), StoreError> {
        let rows = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(R::ENTITY, rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn make_prep(meal_name: &str, quantity: f64, leftover: Option<f64>) -> MealPreparationRecord {
        MealPreparationRecord {
            id: 0,
            meal_name: meal_name.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 17).unwrap(),
            quantity_prepared: quantity,
            expected_students: 40,
            leftover_weight: leftover,
        }
    }

    fn make_attendance(student_id: u32) -> AttendanceRecord {
        AttendanceRecord {
            id: 0,
            student_id,
            date: NaiveDate::from_ymd_opt(2024, 6, 17).unwrap(),
            time: NaiveTime::from_hms_opt(12, 30, 0).unwrap(),
            meal_type: MealType::Lunch,
            leftover_weight: 0.15,
        }
    }

    #[test]
    fn test_actual_consumption_clamped() {
        assert_relative_eq!(make_prep("Mon_Lunch_1", 10.0, Some(2.5)).actual_consumption().unwrap(), 7.5);
        assert_relative_eq!(make_prep("Mon_Lunch_1", 10.0, Some(12.0)).actual_consumption().unwrap(), 0.0);
        assert!(make_prep("Mon_Lunch_1", 10.0, None).actual_consumption().is_none());
    }

    #[test]
    fn test_prep_meal_type_from_name() {
        assert_eq!(make_prep("Tue_Break_4", 1.0, None).meal_type(), MealType::Breakfast);
        assert_eq!(make_prep("special", 1.0, None).meal_type(), MealType::Unknown);
    }

    #[test]
    fn test_csv_missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        let records: Vec<Student> = store.read_all().unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_csv_append_assigns_sequential_ids() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path());

        let first = store.append(make_attendance(1)).unwrap();
        let second = store.append(make_attendance(2)).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let all: Vec<AttendanceRecord> = store.read_all().unwrap();
        assert_eq!(all, vec![first, second]);
    }

    #[test]
    fn test_csv_optional_leftover_round_trips() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        store.append(make_prep("Mon_Lunch_1", 10.0, None)).unwrap();
        store.append(make_prep("Mon_Dinner_2", 8.0, Some(1.0))).unwrap();

        let all: Vec<MealPreparationRecord> = store.read_all().unwrap();
        assert_eq!(all[0].leftover_weight, None);
        assert_eq!(all[1].leftover_weight, Some(1.0));
    }

    #[test]
    fn test_csv_reads_legacy_file() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        fs::write(
            store.path_for(Entity::MealPreparation),
            "id,meal_name,date,quantity_prepared,expected_students,leftover_weight\n\
             3,Wed_Lunch_3,2024-06-19,12.5,50,\n",
        )
        .unwrap();

        let all: Vec<MealPreparationRecord> = store.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, 3);
        assert!(all[0].leftover_weight.is_none());
    }

    #[test]
    fn test_update_and_delete() {
        let store = MemoryStore::new();
        let record = store.append(make_attendance(7)).unwrap();

        let updated = store
            .update::<AttendanceRecord, _>(record.id, |r| r.leftover_weight = 0.4)
            .unwrap()
            .unwrap();
        assert_relative_eq!(updated.leftover_weight, 0.4);

        assert!(store.update::<AttendanceRecord, _>(99, |_| {}).unwrap().is_none());
        assert!(store.delete::<AttendanceRecord>(record.id).unwrap());
        assert!(!store.delete::<AttendanceRecord>(record.id).unwrap());
        assert!(store.read_all::<AttendanceRecord>().unwrap().is_empty());
    }

    #[test]
    fn test_append_after_delete_uses_max_plus_one() {
        let store = MemoryStore::new();
        store.append(make_attendance(1)).unwrap();
        store.append(make_attendance(2)).unwrap();
        store.delete::<AttendanceRecord>(1).unwrap();

        let next = store.append(make_attendance(3)).unwrap();
        assert_eq!(next.id, 3);
    }

    #[test]
    fn test_memory_store_keeps_entities_apart() {
        let store = MemoryStore::new();
        store.append(make_attendance(1)).unwrap();

        assert!(store.read_all::<MenuItem>().unwrap().is_empty());
        assert!(store.find::<AttendanceRecord>(1).unwrap().is_some());
    }
}
