//! SQLite-based store implementation.
//!
//! Cross-references (section membership, a professor's assigned courses) live
//! in link tables written in the same transaction as the record they belong to.

use super::{
    normalize_course_code, normalize_email, Course, CourseSummary, Event, EventScope, LmsStore,
    NewCourse, NewEvent, NewSection, NewUser, Role, Section, User,
};
use crate::error::{LmsError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL,
        section_id TEXT,
        password_hash TEXT NOT NULL,
        api_token_hash TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
    CREATE INDEX IF NOT EXISTS idx_users_token ON users(api_token_hash);

    CREATE TABLE IF NOT EXISTS sections (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        program TEXT NOT NULL,
        batch TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (program, batch, name)
    );

    CREATE TABLE IF NOT EXISTS section_students (
        section_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        PRIMARY KEY (section_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS courses (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        course_code TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        color_identifier TEXT NOT NULL,
        instructor_id TEXT NOT NULL,
        target_section TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS course_students (
        course_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        PRIMARY KEY (course_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS assigned_courses (
        user_id TEXT NOT NULL,
        course_id TEXT NOT NULL,
        PRIMARY KEY (user_id, course_id)
    );

    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        start_at TEXT NOT NULL,
        end_at TEXT NOT NULL,
        all_day INTEGER NOT NULL,
        scope TEXT NOT NULL,
        scope_id TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_start ON events(start_at);
"#;

/// SQLite-based LMS store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LmsError::Store(format!("Failed to acquire lock: {}", e)))
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| LmsError::Store(format!("Corrupt id {:?}: {}", value, e)))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LmsError::Store(format!("Corrupt timestamp {:?}: {}", value, e)))
}

fn id_list(conn: &Connection, sql: &str, key: &Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params![key.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.iter().map(|s| parse_uuid(s)).collect()
}

const USER_COLUMNS: &str = "id, name, email, role, section_id, password_hash, created_at";

struct UserRow {
    id: String,
    name: String,
    email: String,
    role: String,
    section_id: Option<String>,
    password_hash: String,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            section_id: row.get(4)?,
            password_hash: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_user(self, conn: &Connection) -> Result<User> {
        let id = parse_uuid(&self.id)?;
        Ok(User {
            assigned_courses: id_list(
                conn,
                "SELECT course_id FROM assigned_courses WHERE user_id = ?1 ORDER BY rowid",
                &id,
            )?,
            id,
            name: self.name,
            email: self.email,
            role: self.role.parse::<Role>()?,
            section_id: self.section_id.as_deref().map(parse_uuid).transpose()?,
            password_hash: self.password_hash,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

struct SectionRow {
    id: String,
    name: String,
    program: String,
    batch: String,
    created_at: String,
}

impl SectionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            program: row.get(2)?,
            batch: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_section(self, conn: &Connection) -> Result<Section> {
        let id = parse_uuid(&self.id)?;
        Ok(Section {
            students: id_list(
                conn,
                "SELECT user_id FROM section_students WHERE section_id = ?1 ORDER BY rowid",
                &id,
            )?,
            id,
            name: self.name,
            program: self.program,
            batch: self.batch,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

fn find_user_where(conn: &Connection, clause: &str, value: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, clause);
    let row = conn
        .query_row(&sql, params![value], UserRow::from_row)
        .optional()?;
    row.map(|r| r.into_user(conn)).transpose()
}

#[async_trait]
impl LmsStore for SqliteStore {
    async fn count_courses(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM courses", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn count_users(&self, role: Option<Role>) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = match role {
            Some(role) => conn.query_row(
                "SELECT COUNT(*) FROM users WHERE role = ?1",
                params![role.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        find_user_where(&conn, "email", &normalize_email(email))
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        find_user_where(&conn, "api_token_hash", token_hash)
    }

    #[instrument(skip(self, new), fields(email = %new.email))]
    async fn create_user(&self, new: NewUser) -> Result<User> {
        let conn = self.lock()?;
        let user = User::from_new(new);

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            params![user.email],
            |row| row.get(0),
        )?;
        if exists {
            return Err(LmsError::Conflict(format!("user {}", user.email)));
        }

        let tx = conn.unchecked_transaction()?;

        if let Some(section_id) = user.section_id {
            let found: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM sections WHERE id = ?1)",
                params![section_id.to_string()],
                |row| row.get(0),
            )?;
            if !found {
                return Err(LmsError::NotFound(format!("section {}", section_id)));
            }
            tx.execute(
                "INSERT INTO section_students (section_id, user_id) VALUES (?1, ?2)",
                params![section_id.to_string(), user.id.to_string()],
            )?;
        }

        tx.execute(
            r#"
            INSERT INTO users (id, name, email, role, section_id, password_hash, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                user.id.to_string(),
                user.name,
                user.email,
                user.role.as_str(),
                user.section_id.map(|id| id.to_string()),
                user.password_hash,
                user.created_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        debug!("Created {} {}", user.role, user.id);
        Ok(user)
    }

    async fn set_api_token(&self, user_id: Uuid, token_hash: &str) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE users SET api_token_hash = ?1 WHERE id = ?2",
            params![token_hash, user_id.to_string()],
        )?;
        if updated == 0 {
            return Err(LmsError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    #[instrument(skip(self, new), fields(code = %new.course_code))]
    async fn create_course(&self, new: NewCourse) -> Result<Course> {
        let conn = self.lock()?;
        let course = Course::from_new(new);

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM courses WHERE course_code = ?1)",
            params![course.course_code],
            |row| row.get(0),
        )?;
        if exists {
            return Err(LmsError::Conflict(format!("course {}", course.course_code)));
        }

        let tx = conn.unchecked_transaction()?;

        let linked = tx.execute(
            r#"
            INSERT INTO assigned_courses (user_id, course_id)
            SELECT id, ?2 FROM users WHERE id = ?1
            "#,
            params![course.instructor_id.to_string(), course.id.to_string()],
        )?;
        if linked == 0 {
            return Err(LmsError::NotFound(format!(
                "instructor {}",
                course.instructor_id
            )));
        }

        tx.execute(
            r#"
            INSERT INTO courses
            (id, title, course_code, description, color_identifier, instructor_id,
             target_section, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                course.id.to_string(),
                course.title,
                course.course_code,
                course.description,
                course.color_identifier,
                course.instructor_id.to_string(),
                course.target_section.map(|id| id.to_string()),
                course.created_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        debug!("Created course {}", course.course_code);
        Ok(course)
    }

    async fn find_course_by_code(&self, code: &str) -> Result<Option<Course>> {
        let conn = self.lock()?;
        let code = normalize_course_code(code);
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM courses WHERE course_code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => Ok(load_courses(&conn, "WHERE c.id = ?1", &[&id as &dyn rusqlite::ToSql], 1)?
                .into_iter()
                .next()
                .map(|s| s.course)),
            None => Ok(None),
        }
    }

    async fn list_courses(&self, limit: usize) -> Result<Vec<CourseSummary>> {
        let conn = self.lock()?;
        load_courses(&conn, "", &[], limit)
    }

    #[instrument(skip(self, new), fields(name = %new.name))]
    async fn create_section(&self, new: NewSection) -> Result<Section> {
        let conn = self.lock()?;
        let section = Section::from_new(new);

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sections WHERE program = ?1 AND batch = ?2 AND name = ?3)",
            params![section.program, section.batch, section.name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(LmsError::Conflict(format!(
                "section {} ({} {})",
                section.name, section.program, section.batch
            )));
        }

        conn.execute(
            "INSERT INTO sections (id, name, program, batch, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                section.id.to_string(),
                section.name,
                section.program,
                section.batch,
                section.created_at.to_rfc3339(),
            ],
        )?;

        Ok(section)
    }

    async fn list_sections(&self) -> Result<Vec<Section>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, program, batch, created_at FROM sections ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map([], SectionRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|r| r.into_section(&conn)).collect()
    }

    async fn find_section(&self, id_or_name: &str) -> Result<Option<Section>> {
        let conn = self.lock()?;
        let key = id_or_name.trim();
        let row = conn
            .query_row(
                r#"
                SELECT id, name, program, batch, created_at FROM sections
                WHERE id = ?1 OR name = ?1
                ORDER BY (id = ?1) DESC, rowid
                LIMIT 1
                "#,
                params![key],
                SectionRow::from_row,
            )
            .optional()?;
        row.map(|r| r.into_section(&conn)).transpose()
    }

    async fn create_event(&self, new: NewEvent) -> Result<Event> {
        let conn = self.lock()?;
        let event = Event::from_new(new);

        conn.execute(
            r#"
            INSERT INTO events (id, title, start_at, end_at, all_day, scope, scope_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.id.to_string(),
                event.title,
                event.start.to_rfc3339(),
                event.end.to_rfc3339(),
                event.all_day,
                event.scope.as_str(),
                event.scope_id.map(|id| id.to_string()),
                event.created_at.to_rfc3339(),
            ],
        )?;

        Ok(event)
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, title, start_at, end_at, all_day, scope, scope_id, created_at
            FROM events ORDER BY start_at
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, title, start, end, all_day, scope, scope_id, created_at)| {
                    Ok(Event {
                        id: parse_uuid(&id)?,
                        title,
                        start: parse_time(&start)?,
                        end: parse_time(&end)?,
                        all_day,
                        scope: scope.parse::<EventScope>()?,
                        scope_id: scope_id.as_deref().map(parse_uuid).transpose()?,
                        created_at: parse_time(&created_at)?,
                    })
                },
            )
            .collect()
    }
}

fn load_courses(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
    limit: usize,
) -> Result<Vec<CourseSummary>> {
    let sql = format!(
        r#"
        SELECT c.id, c.title, c.course_code, c.description, c.color_identifier,
               c.instructor_id, c.target_section, c.created_at, u.name, s.name
        FROM courses c
        LEFT JOIN users u ON u.id = c.instructor_id
        LEFT JOIN sections s ON s.id = c.target_section
        {}
        ORDER BY c.created_at, c.rowid
        LIMIT {}
        "#,
        filter, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(args, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(
            |(
                id,
                title,
                course_code,
                description,
                color_identifier,
                instructor_id,
                target_section,
                created_at,
                instructor_name,
                section_name,
            )| {
                let id = parse_uuid(&id)?;
                Ok(CourseSummary {
                    course: Course {
                        students: id_list(
                            conn,
                            "SELECT user_id FROM course_students WHERE course_id = ?1 ORDER BY rowid",
                            &id,
                        )?,
                        id,
                        title,
                        course_code,
                        description,
                        color_identifier,
                        instructor_id: parse_uuid(&instructor_id)?,
                        target_section: target_section.as_deref().map(parse_uuid).transpose()?,
                        created_at: parse_time(&created_at)?,
                    },
                    instructor_name,
                    section_name,
                })
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::hash_secret;
    use chrono::TimeZone;

    fn new_user(email: &str, role: Role, section_id: Option<Uuid>) -> NewUser {
        NewUser {
            name: "Test User".to_string(),
            email: email.to_string(),
            role,
            section_id,
            password_hash: hash_secret("pw"),
        }
    }

    #[tokio::test]
    async fn test_sqlite_course_and_section_flow() {
        let store = SqliteStore::in_memory().unwrap();

        let section = store
            .create_section(NewSection {
                name: "Section A".to_string(),
                program: "B.Tech CSE".to_string(),
                batch: "2024-2028".to_string(),
            })
            .await
            .unwrap();

        let student = store
            .create_user(new_user("s@uni.edu", Role::Student, Some(section.id)))
            .await
            .unwrap();
        let prof = store
            .create_user(new_user("p@uni.edu", Role::Professor, None))
            .await
            .unwrap();

        let course = store
            .create_course(NewCourse {
                title: "Databases".to_string(),
                course_code: "cs220".to_string(),
                description: String::new(),
                color_identifier: "#3B82F6".to_string(),
                instructor_id: prof.id,
                target_section: Some(section.id),
            })
            .await
            .unwrap();

        let sections = store.list_sections().await.unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].students, vec![student.id]);

        let prof = store.find_user_by_email("P@UNI.EDU").await.unwrap().unwrap();
        assert_eq!(prof.assigned_courses, vec![course.id]);

        let courses = store.list_courses(10).await.unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].course.course_code, "CS220");
        assert_eq!(courses[0].instructor_name.as_deref(), Some("Test User"));
        assert_eq!(courses[0].section_name.as_deref(), Some("Section A"));

        assert_eq!(store.count_courses().await.unwrap(), 1);
        assert_eq!(store.count_users(Some(Role::Student)).await.unwrap(), 1);
        assert_eq!(store.count_users(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_course_without_instructor_is_rolled_back() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .create_course(NewCourse {
                title: "Ghost".to_string(),
                course_code: "GH100".to_string(),
                description: String::new(),
                color_identifier: "#3B82F6".to_string(),
                instructor_id: Uuid::new_v4(),
                target_section: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LmsError::NotFound(_)));
        assert_eq!(store.count_courses().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_duplicate_course_code() {
        let store = SqliteStore::in_memory().unwrap();
        let prof = store
            .create_user(new_user("p@uni.edu", Role::Professor, None))
            .await
            .unwrap();
        let new = NewCourse {
            title: "Algorithms".to_string(),
            course_code: "CS101".to_string(),
            description: String::new(),
            color_identifier: "#3B82F6".to_string(),
            instructor_id: prof.id,
            target_section: None,
        };
        store.create_course(new.clone()).await.unwrap();
        let err = store.create_course(new).await.unwrap_err();
        assert!(matches!(err, LmsError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_sqlite_events_and_tokens() {
        let store = SqliteStore::in_memory().unwrap();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        store
            .create_event(NewEvent {
                title: "Midterms".to_string(),
                start,
                end: start,
                all_day: true,
                scope: EventScope::Global,
                scope_id: None,
            })
            .await
            .unwrap();

        let events = store.list_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, start);
        assert_eq!(events[0].scope, EventScope::Global);

        let admin = store
            .create_user(new_user("root@uni.edu", Role::Admin, None))
            .await
            .unwrap();
        store.set_api_token(admin.id, &hash_secret("t0k")).await.unwrap();
        let found = store
            .find_user_by_token_hash(&hash_secret("t0k"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_sqlite_find_section_by_name_or_id() {
        let store = SqliteStore::in_memory().unwrap();
        let section = store
            .create_section(NewSection {
                name: "Section B".to_string(),
                program: "B.Tech ECE".to_string(),
                batch: "2023-2027".to_string(),
            })
            .await
            .unwrap();

        let by_name = store.find_section("Section B").await.unwrap().unwrap();
        let by_id = store
            .find_section(&section.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, section.id);
        assert_eq!(by_id.id, section.id);
        assert!(store.find_section("Section Z").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lms.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store
                .create_user(new_user("p@uni.edu", Role::Professor, None))
                .await
                .unwrap();
        }
        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(reopened.count_users(Some(Role::Professor)).await.unwrap(), 1);
    }
}
