use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::{json, Value};

use rollcall_core::{load_as, save_as, EventBus, Module, ModuleError, PersistencePort};

use super::{normalize_name, notify_unsaved, read, write};
use crate::error::DomainError;
use crate::events::{STUDENT_ADDED, STUDENT_REMOVED, STUDENT_UPDATED};
use crate::models::Student;

/// Port key the roster is stored under.
pub const STUDENTS_KEY: &str = "students";
/// Port key of the next student id. Ids are never reused.
pub const STUDENTS_NEXT_ID_KEY: &str = "students.nextId";

/// Owns the roster. Every mutation is written through to storage and
/// announced on the bus.
pub struct StudentManager {
    port: Arc<dyn PersistencePort>,
    bus: Arc<EventBus>,
    students: RwLock<Vec<Student>>,
    next_id: AtomicU32,
}

impl StudentManager {
    pub fn new(port: Arc<dyn PersistencePort>, bus: Arc<EventBus>) -> Self {
        Self {
            port,
            bus,
            students: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Students ordered by roster number.
    pub fn list(&self) -> Vec<Student> {
        let mut students = read(&self.students).clone();
        students.sort_by_key(|s| s.number);
        students
    }

    pub fn get(&self, id: u32) -> Option<Student> {
        read(&self.students).iter().find(|s| s.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.students).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a student. `number` defaults to the next free roster position.
    pub fn add(&self, name: &str, number: Option<u32>) -> Result<Student, DomainError> {
        let name = normalize_name(name)?;

        let (student, saved) = {
            let mut students = write(&self.students);
            let number = match number {
                Some(n) if students.iter().any(|s| s.number == n) => {
                    return Err(DomainError::DuplicateNumber(n));
                }
                Some(n) => n,
                None => students.iter().map(|s| s.number).max().unwrap_or(0) + 1,
            };
            let student = Student {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                name,
                number,
                created_at: Utc::now(),
            };
            students.push(student.clone());
            (student, self.save(&students))
        };

        self.report_unsaved(saved);
        tracing::info!(id = student.id, "Student added");
        self.emit(STUDENT_ADDED, json!(student));
        Ok(student)
    }

    pub fn rename(&self, id: u32, name: &str) -> Result<Student, DomainError> {
        let name = normalize_name(name)?;

        let (student, saved) = {
            let mut students = write(&self.students);
            let student = students
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(DomainError::StudentNotFound(id))?;
            student.name = name;
            let student = student.clone();
            (student, self.save(&students))
        };

        self.report_unsaved(saved);
        self.emit(STUDENT_UPDATED, json!(student));
        Ok(student)
    }

    pub fn remove(&self, id: u32) -> Result<Student, DomainError> {
        let (student, saved) = {
            let mut students = write(&self.students);
            let pos = students
                .iter()
                .position(|s| s.id == id)
                .ok_or(DomainError::StudentNotFound(id))?;
            let student = students.remove(pos);
            (student, self.save(&students))
        };

        self.report_unsaved(saved);
        tracing::info!(id, "Student removed");
        self.emit(STUDENT_REMOVED, json!(student));
        Ok(student)
    }

    /// Write the roster and id counter. Called with the roster lock held so
    /// saves land in the order the roster changed; returns whether both landed.
    fn save(&self, students: &[Student]) -> bool {
        let next_id = self.next_id.load(Ordering::SeqCst);
        let result = save_as(self.port.as_ref(), STUDENTS_KEY, &students)
            .and_then(|()| save_as(self.port.as_ref(), STUDENTS_NEXT_ID_KEY, &next_id));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save students: {}", e);
                false
            }
        }
    }

    /// Must run after the roster lock is released; listeners may read it.
    fn report_unsaved(&self, saved: bool) {
        if !saved {
            notify_unsaved(&self.bus, "students");
        }
    }

    fn emit(&self, event: &str, payload: Value) {
        if let Err(e) = self.bus.emit(event, payload) {
            tracing::warn!(event, "Failed to emit: {}", e);
        }
    }
}

impl Module for StudentManager {
    fn init(&self) -> Result<(), ModuleError> {
        let students: Vec<Student> = load_as(self.port.as_ref(), STUDENTS_KEY)?.unwrap_or_default();
        let stored_next: u32 = load_as(self.port.as_ref(), STUDENTS_NEXT_ID_KEY)?.unwrap_or(1);
        let next_id = students
            .iter()
            .map(|s| s.id + 1)
            .max()
            .unwrap_or(1)
            .max(stored_next);
        tracing::info!("Loaded {} students", students.len());

        let mut guard = write(&self.students);
        *guard = students;
        self.next_id.store(next_id, Ordering::SeqCst);
        Ok(())
    }
}
