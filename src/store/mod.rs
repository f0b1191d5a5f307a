//! Domain store for the LMS entities the agent touches.
//!
//! Provides a trait-based interface over users, courses, sections and
//! calendar events, with an in-memory and a SQLite backend.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::Settings;
use crate::error::{LmsError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Professor,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Professor => "professor",
            Role::Student => "student",
        }
    }

    /// Whether this role may drive the AI assistant.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Professor)
    }
}

impl std::str::FromStr for Role {
    type Err = LmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "professor" => Ok(Role::Professor),
            "student" => Ok(Role::Student),
            _ => Err(LmsError::InvalidInput(format!("Unknown role: {}", s))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    /// Always stored lower-cased.
    pub email: String,
    pub role: Role,
    /// Section a student belongs to.
    pub section_id: Option<Uuid>,
    /// Courses a professor teaches.
    pub assigned_courses: Vec<Uuid>,
    /// SHA-256 hex digest of the account password.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    /// Always stored upper-cased.
    pub course_code: String,
    pub description: String,
    pub color_identifier: String,
    pub instructor_id: Uuid,
    pub target_section: Option<Uuid>,
    pub students: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A course together with the display names of what it references.
#[derive(Debug, Clone)]
pub struct CourseSummary {
    pub course: Course,
    pub instructor_name: Option<String>,
    pub section_name: Option<String>,
}

/// A section (class) grouping students of one program and batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: Uuid,
    pub name: String,
    pub program: String,
    pub batch: String,
    pub students: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Visibility scope of a calendar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    Global,
    Course,
    Personal,
}

impl EventScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventScope::Global => "global",
            EventScope::Course => "course",
            EventScope::Personal => "personal",
        }
    }
}

impl std::str::FromStr for EventScope {
    type Err = LmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "global" => Ok(EventScope::Global),
            "course" => Ok(EventScope::Course),
            "personal" => Ok(EventScope::Personal),
            _ => Err(LmsError::InvalidInput(format!("Unknown event type: {}", s))),
        }
    }
}

/// A calendar event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub scope: EventScope,
    /// Course id for course events.
    pub scope_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub section_id: Option<Uuid>,
    pub password_hash: String,
}

/// Fields for a new course.
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub title: String,
    pub course_code: String,
    pub description: String,
    pub color_identifier: String,
    pub instructor_id: Uuid,
    pub target_section: Option<Uuid>,
}

/// Fields for a new section.
#[derive(Debug, Clone)]
pub struct NewSection {
    pub name: String,
    pub program: String,
    pub batch: String,
}

/// Fields for a new event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub scope: EventScope,
    pub scope_id: Option<Uuid>,
}

impl User {
    fn from_new(new: NewUser) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: new.name.trim().to_string(),
            email: normalize_email(&new.email),
            role: new.role,
            section_id: new.section_id,
            assigned_courses: Vec::new(),
            password_hash: new.password_hash,
            created_at: Utc::now(),
        }
    }
}

impl Course {
    fn from_new(new: NewCourse) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: new.title.trim().to_string(),
            course_code: normalize_course_code(&new.course_code),
            description: new.description,
            color_identifier: new.color_identifier,
            instructor_id: new.instructor_id,
            target_section: new.target_section,
            students: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

impl Section {
    fn from_new(new: NewSection) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: new.name.trim().to_string(),
            program: new.program.trim().to_string(),
            batch: new.batch.trim().to_string(),
            students: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

impl Event {
    fn from_new(new: NewEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: new.title.trim().to_string(),
            start: new.start,
            end: new.end,
            all_day: new.all_day,
            scope: new.scope,
            scope_id: new.scope_id,
            created_at: Utc::now(),
        }
    }
}

/// Trait for LMS store implementations.
///
/// Multi-record mutations (`create_user` with a section, `create_course`)
/// are applied completely or not at all.
#[async_trait]
pub trait LmsStore: Send + Sync {
    /// Total number of courses.
    async fn count_courses(&self) -> Result<usize>;

    /// Number of users, optionally restricted to one role.
    async fn count_users(&self, role: Option<Role>) -> Result<usize>;

    /// Find a user by email (case-insensitive).
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Resolve an API token digest to its user.
    async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>>;

    /// Create a user; a student with a section is also added to that section.
    async fn create_user(&self, new: NewUser) -> Result<User>;

    /// Replace the API token digest of a user.
    async fn set_api_token(&self, user_id: Uuid, token_hash: &str) -> Result<()>;

    /// Create a course and link it into its instructor's assigned courses.
    async fn create_course(&self, new: NewCourse) -> Result<Course>;

    /// Find a course by code (case-insensitive).
    async fn find_course_by_code(&self, code: &str) -> Result<Option<Course>>;

    /// List up to `limit` courses, oldest first.
    async fn list_courses(&self, limit: usize) -> Result<Vec<CourseSummary>>;

    /// Create a section; `(program, batch, name)` is unique.
    async fn create_section(&self, new: NewSection) -> Result<Section>;

    /// List all sections, oldest first.
    async fn list_sections(&self) -> Result<Vec<Section>>;

    /// Find a section by id or, failing that, by exact name.
    async fn find_section(&self, id_or_name: &str) -> Result<Option<Section>>;

    /// Create a calendar event.
    async fn create_event(&self, new: NewEvent) -> Result<Event>;

    /// List all events ordered by start.
    async fn list_events(&self) -> Result<Vec<Event>>;
}

/// Open the store configured in settings.
pub fn open(settings: &Settings) -> Result<Arc<dyn LmsStore>> {
    match settings.store.provider.as_str() {
        "sqlite" => Ok(Arc::new(SqliteStore::new(&settings.sqlite_path())?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(LmsError::Config(format!("Unknown store provider: {}", other))),
    }
}

/// SHA-256 hex digest used for passwords and API tokens.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn normalize_course_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("Professor".parse::<Role>().unwrap(), Role::Professor);
        assert_eq!(Role::Student.to_string(), "student");
        assert!("janitor".parse::<Role>().is_err());
        assert!(Role::Admin.is_staff());
        assert!(!Role::Student.is_staff());
    }

    #[test]
    fn test_hash_secret_is_stable_hex() {
        let a = hash_secret("s3cret");
        assert_eq!(a.len(), 64);
        assert_eq!(a, hash_secret("s3cret"));
        assert_ne!(a, hash_secret("other"));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
        assert_eq!(normalize_course_code("cs301 "), "CS301");
    }
}
