//! In-memory store implementation.
//!
//! Useful for testing and throwaway sessions.

use super::{
    normalize_course_code, normalize_email, Course, CourseSummary, Event, LmsStore, NewCourse,
    NewEvent, NewSection, NewUser, Role, Section, User,
};
use crate::error::{LmsError, Result};
use async_trait::async_trait;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    courses: Vec<Course>,
    sections: Vec<Section>,
    events: Vec<Event>,
    tokens: Vec<(Uuid, String)>,
}

/// In-memory LMS store.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| LmsError::Store(format!("Failed to acquire lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| LmsError::Store(format!("Failed to acquire lock: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LmsStore for MemoryStore {
    async fn count_courses(&self) -> Result<usize> {
        Ok(self.read()?.courses.len())
    }

    async fn count_users(&self, role: Option<Role>) -> Result<usize> {
        let tables = self.read()?;
        Ok(tables
            .users
            .iter()
            .filter(|u| role.map_or(true, |r| u.role == r))
            .count())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email);
        Ok(self.read()?.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        let tables = self.read()?;
        let user_id = tables
            .tokens
            .iter()
            .find(|(_, hash)| hash == token_hash)
            .map(|(id, _)| *id);
        Ok(user_id.and_then(|id| tables.users.iter().find(|u| u.id == id).cloned()))
    }

    async fn create_user(&self, new: NewUser) -> Result<User> {
        let mut tables = self.write()?;
        let user = User::from_new(new);

        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(LmsError::Conflict(format!("user {}", user.email)));
        }

        // Validate the section before touching anything.
        let section_index = match user.section_id {
            Some(section_id) => Some(
                tables
                    .sections
                    .iter()
                    .position(|s| s.id == section_id)
                    .ok_or_else(|| LmsError::NotFound(format!("section {}", section_id)))?,
            ),
            None => None,
        };

        if let Some(index) = section_index {
            tables.sections[index].students.push(user.id);
        }
        tables.users.push(user.clone());

        Ok(user)
    }

    async fn set_api_token(&self, user_id: Uuid, token_hash: &str) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.users.iter().any(|u| u.id == user_id) {
            return Err(LmsError::NotFound(format!("user {}", user_id)));
        }
        tables.tokens.retain(|(id, _)| *id != user_id);
        tables.tokens.push((user_id, token_hash.to_string()));
        Ok(())
    }

    async fn create_course(&self, new: NewCourse) -> Result<Course> {
        let mut tables = self.write()?;
        let course = Course::from_new(new);

        if tables
            .courses
            .iter()
            .any(|c| c.course_code == course.course_code)
        {
            return Err(LmsError::Conflict(format!("course {}", course.course_code)));
        }

        let instructor_index = tables
            .users
            .iter()
            .position(|u| u.id == course.instructor_id)
            .ok_or_else(|| LmsError::NotFound(format!("instructor {}", course.instructor_id)))?;

        tables.users[instructor_index].assigned_courses.push(course.id);
        tables.courses.push(course.clone());

        Ok(course)
    }

    async fn find_course_by_code(&self, code: &str) -> Result<Option<Course>> {
        let code = normalize_course_code(code);
        Ok(self
            .read()?
            .courses
            .iter()
            .find(|c| c.course_code == code)
            .cloned())
    }

    async fn list_courses(&self, limit: usize) -> Result<Vec<CourseSummary>> {
        let tables = self.read()?;
        Ok(tables
            .courses
            .iter()
            .take(limit)
            .map(|course| CourseSummary {
                instructor_name: tables
                    .users
                    .iter()
                    .find(|u| u.id == course.instructor_id)
                    .map(|u| u.name.clone()),
                section_name: course.target_section.and_then(|sid| {
                    tables
                        .sections
                        .iter()
                        .find(|s| s.id == sid)
                        .map(|s| s.name.clone())
                }),
                course: course.clone(),
            })
            .collect())
    }

    async fn create_section(&self, new: NewSection) -> Result<Section> {
        let mut tables = self.write()?;
        let section = Section::from_new(new);

        if tables.sections.iter().any(|s| {
            s.name == section.name && s.program == section.program && s.batch == section.batch
        }) {
            return Err(LmsError::Conflict(format!(
                "section {} ({} {})",
                section.name, section.program, section.batch
            )));
        }

        tables.sections.push(section.clone());
        Ok(section)
    }

    async fn list_sections(&self) -> Result<Vec<Section>> {
        Ok(self.read()?.sections.clone())
    }

    async fn find_section(&self, id_or_name: &str) -> Result<Option<Section>> {
        let tables = self.read()?;
        let key = id_or_name.trim();
        if let Ok(id) = Uuid::parse_str(key) {
            if let Some(section) = tables.sections.iter().find(|s| s.id == id) {
                return Ok(Some(section.clone()));
            }
        }
        Ok(tables.sections.iter().find(|s| s.name == key).cloned())
    }

    async fn create_event(&self, new: NewEvent) -> Result<Event> {
        let event = Event::from_new(new);
        self.write()?.events.push(event.clone());
        Ok(event)
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        let mut events = self.read()?.events.clone();
        events.sort_by_key(|e| e.start);
        Ok(events)
    }
}
