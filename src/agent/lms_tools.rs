//! LMS tool catalog.
//!
//! Every tool answers in plain text meant for the model. Business-rule
//! refusals come back as `"Error: ..."` strings; only store failures are `Err`.

use super::schema::SchemaNode;
use super::tools::{ToolDefinition, ToolHandler, ToolRegistry, ValidatedArgs};
use crate::error::{LmsError, Result};
use crate::store::{hash_secret, EventScope, LmsStore, NewCourse, NewEvent, NewSection, NewUser, Role};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_COURSE_COLOR: &str = "#3B82F6";
const PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LmsTool {
    GetCourseCount,
    CreateCourse,
    ListCourses,
    CreateSection,
    ListSections,
    CreateUser,
    GetStudentCount,
    CreateEvent,
}

impl LmsTool {
    const ALL: [LmsTool; 8] = [
        LmsTool::GetCourseCount,
        LmsTool::CreateCourse,
        LmsTool::ListCourses,
        LmsTool::CreateSection,
        LmsTool::ListSections,
        LmsTool::CreateUser,
        LmsTool::GetStudentCount,
        LmsTool::CreateEvent,
    ];

    fn name(&self) -> &'static str {
        match self {
            LmsTool::GetCourseCount => "getCourseCount",
            LmsTool::CreateCourse => "createCourse",
            LmsTool::ListCourses => "listCourses",
            LmsTool::CreateSection => "createSection",
            LmsTool::ListSections => "listSections",
            LmsTool::CreateUser => "createUser",
            LmsTool::GetStudentCount => "getStudentCount",
            LmsTool::CreateEvent => "createEvent",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            LmsTool::GetCourseCount => "Get the total number of courses in the system",
            LmsTool::CreateCourse => {
                "Create a new course with title, code, description, instructor, and optional section"
            }
            LmsTool::ListCourses => "List all courses with basic information",
            LmsTool::CreateSection => "Create a new section/class for organizing students",
            LmsTool::ListSections => "List all sections in the system",
            LmsTool::CreateUser => "Create a new user account (student or professor)",
            LmsTool::GetStudentCount => "Get the total number of students in the system",
            LmsTool::CreateEvent => {
                "Create a calendar event (global, course-specific, or personal)"
            }
        }
    }

    fn parameters(&self) -> SchemaNode {
        match self {
            LmsTool::GetCourseCount | LmsTool::ListSections | LmsTool::GetStudentCount => {
                SchemaNode::empty()
            }
            LmsTool::CreateCourse => SchemaNode::object([
                (
                    "title",
                    SchemaNode::string()
                        .describe("The course title (e.g., \"Advanced Java Programming\")"),
                ),
                (
                    "courseCode",
                    SchemaNode::string().describe("The course code (e.g., \"CS301\")"),
                ),
                (
                    "description",
                    SchemaNode::string().optional().describe("Course description"),
                ),
                (
                    "instructorEmail",
                    SchemaNode::email().describe("Email of the instructor/professor"),
                ),
                (
                    "sectionId",
                    SchemaNode::string()
                        .optional()
                        .describe("Section ID or section name to assign this course to"),
                ),
                (
                    "colorIdentifier",
                    SchemaNode::string()
                        .default_value(json!(DEFAULT_COURSE_COLOR))
                        .describe("Color for the course card"),
                ),
            ]),
            LmsTool::ListCourses => SchemaNode::object([(
                "limit",
                SchemaNode::integer()
                    .default_value(json!(10))
                    .describe("Maximum number of courses to return"),
            )]),
            LmsTool::CreateSection => SchemaNode::object([
                (
                    "name",
                    SchemaNode::string().describe("Section name (e.g., \"Section A\", \"Section B\")"),
                ),
                (
                    "program",
                    SchemaNode::string()
                        .describe("Program name (e.g., \"B.Tech CSE\", \"B.Tech ECE\")"),
                ),
                (
                    "batch",
                    SchemaNode::string().describe("Batch year range (e.g., \"2024-2028\")"),
                ),
            ]),
            LmsTool::CreateUser => SchemaNode::object([
                ("name", SchemaNode::string().describe("User full name")),
                ("email", SchemaNode::email().describe("User email address")),
                (
                    "role",
                    SchemaNode::enumeration(&["student", "professor"])
                        .describe("User role: \"student\" or \"professor\""),
                ),
                (
                    "sectionName",
                    SchemaNode::string()
                        .optional()
                        .describe("Section name to enroll student in (only for students)"),
                ),
            ]),
            LmsTool::CreateEvent => SchemaNode::object([
                ("title", SchemaNode::string().describe("Event title")),
                (
                    "date",
                    SchemaNode::string()
                        .describe("Event date in ISO format (YYYY-MM-DD) or a specific date like \"March 1, 2025\""),
                ),
                (
                    "type",
                    SchemaNode::enumeration(&["global", "course", "personal"])
                        .describe("Event type"),
                ),
                (
                    "courseCode",
                    SchemaNode::string()
                        .optional()
                        .describe("Course code if type is \"course\""),
                ),
                (
                    "allDay",
                    SchemaNode::boolean()
                        .default_value(json!(true))
                        .describe("Whether event is all-day"),
                ),
            ]),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCourseArgs {
    title: String,
    course_code: String,
    description: Option<String>,
    instructor_email: String,
    section_id: Option<String>,
    color_identifier: String,
}

#[derive(Debug, Deserialize)]
struct ListCoursesArgs {
    limit: i64,
}

#[derive(Debug, Deserialize)]
struct CreateSectionArgs {
    name: String,
    program: String,
    batch: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserArgs {
    name: String,
    email: String,
    role: Role,
    section_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEventArgs {
    title: String,
    date: String,
    #[serde(rename = "type")]
    scope: EventScope,
    course_code: Option<String>,
    all_day: bool,
}

/// Tool execution context with access to the LMS store.
pub struct LmsToolContext {
    store: Arc<dyn LmsStore>,
}

struct LmsToolHandler {
    tool: LmsTool,
    context: Arc<LmsToolContext>,
}

#[async_trait]
impl ToolHandler for LmsToolHandler {
    async fn execute(&self, args: ValidatedArgs) -> Result<String> {
        let ctx = &self.context;
        match self.tool {
            LmsTool::GetCourseCount => ctx.course_count().await,
            LmsTool::CreateCourse => ctx.create_course(args.parse()?).await,
            LmsTool::ListCourses => ctx.list_courses(args.parse()?).await,
            LmsTool::CreateSection => ctx.create_section(args.parse()?).await,
            LmsTool::ListSections => ctx.list_sections().await,
            LmsTool::CreateUser => ctx.create_user(args.parse()?).await,
            LmsTool::GetStudentCount => ctx.student_count().await,
            LmsTool::CreateEvent => ctx.create_event(args.parse()?).await,
        }
    }
}

/// Build the registry of LMS tools over `store`.
pub fn lms_registry(store: Arc<dyn LmsStore>) -> Result<ToolRegistry> {
    let context = Arc::new(LmsToolContext { store });
    let mut registry = ToolRegistry::new();
    for tool in LmsTool::ALL {
        registry.register(ToolDefinition::new(
            tool.name(),
            tool.description(),
            tool.parameters(),
            Arc::new(LmsToolHandler {
                tool,
                context: Arc::clone(&context),
            }),
        ))?;
    }
    Ok(registry)
}

pub(crate) fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Parse the date formats people and models tend to write.
pub(crate) fn parse_event_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Some(dt.and_utc());
        }
    }

    const DATE_FORMATS: [&str; 8] = [
        "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y", "%B %d %Y", "%d %B %Y",
        "%d %b %Y",
    ];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    None
}

impl LmsToolContext {
    async fn course_count(&self) -> Result<String> {
        let count = self.store.count_courses().await?;
        Ok(format!("There are currently {} courses in the system.", count))
    }

    async fn student_count(&self) -> Result<String> {
        let count = self.store.count_users(Some(Role::Student)).await?;
        Ok(format!("There are currently {} students in the system.", count))
    }

    async fn create_course(&self, args: CreateCourseArgs) -> Result<String> {
        let instructor = match self.store.find_user_by_email(&args.instructor_email).await? {
            Some(user) if user.role == Role::Professor => user,
            _ => {
                return Ok(format!(
                    "Error: No professor found with email {}",
                    args.instructor_email
                ))
            }
        };

        let section = match args.section_id.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(key) => match self.store.find_section(key).await? {
                Some(section) => Some(section),
                None => return Ok(format!("Error: Section \"{}\" not found.", key)),
            },
            None => None,
        };

        let duplicate = format!(
            "Error: A course with code {} already exists.",
            args.course_code.trim().to_uppercase()
        );
        if self.store.find_course_by_code(&args.course_code).await?.is_some() {
            return Ok(duplicate);
        }

        let created = self
            .store
            .create_course(NewCourse {
                title: args.title,
                course_code: args.course_code,
                description: args.description.unwrap_or_default(),
                color_identifier: args.color_identifier,
                instructor_id: instructor.id,
                target_section: section.as_ref().map(|s| s.id),
            })
            .await;

        let course = match created {
            Ok(course) => course,
            Err(LmsError::Conflict(_)) => return Ok(duplicate),
            Err(e) => return Err(e),
        };

        debug!("Course {} linked to {}", course.course_code, instructor.email);
        Ok(format!(
            "Success: Created course \"{}\" ({}) taught by {}{}.",
            course.title,
            course.course_code,
            instructor.name,
            section
                .map(|s| format!(" for section {}", s.name))
                .unwrap_or_default()
        ))
    }

    async fn list_courses(&self, args: ListCoursesArgs) -> Result<String> {
        let limit = args.limit.max(0) as usize;
        let courses = self.store.list_courses(limit).await?;

        if courses.is_empty() {
            return Ok("No courses found in the system.".to_string());
        }

        let lines = courses
            .iter()
            .map(|c| {
                format!(
                    "{}: {} (Instructor: {}, Students: {}{})",
                    c.course.course_code,
                    c.course.title,
                    c.instructor_name.as_deref().unwrap_or("Unassigned"),
                    c.course.students.len(),
                    c.section_name
                        .as_ref()
                        .map(|s| format!(", Section: {}", s))
                        .unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(format!("Found {} course(s):\n{}", courses.len(), lines))
    }

    async fn create_section(&self, args: CreateSectionArgs) -> Result<String> {
        let new = NewSection {
            name: args.name,
            program: args.program,
            batch: args.batch,
        };

        match self.store.create_section(new.clone()).await {
            Ok(section) => Ok(format!(
                "Success: Created section \"{}\" for {} (Batch: {})",
                section.name, section.program, section.batch
            )),
            Err(LmsError::Conflict(_)) => Ok(format!(
                "Error: Section \"{}\" already exists for {} (Batch: {}).",
                new.name.trim(),
                new.program.trim(),
                new.batch.trim()
            )),
            Err(e) => Err(e),
        }
    }

    async fn list_sections(&self) -> Result<String> {
        let sections = self.store.list_sections().await?;

        if sections.is_empty() {
            return Ok("No sections found in the system.".to_string());
        }

        let lines = sections
            .iter()
            .map(|s| {
                format!(
                    "{}: {} (Batch: {}, Students: {}, ID: {})",
                    s.name,
                    s.program,
                    s.batch,
                    s.students.len(),
                    s.id
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(format!("Found {} section(s):\n{}", sections.len(), lines))
    }

    async fn create_user(&self, args: CreateUserArgs) -> Result<String> {
        let exists_msg = format!("Error: A user with email {} already exists.", args.email.trim());
        if self.store.find_user_by_email(&args.email).await?.is_some() {
            return Ok(exists_msg);
        }

        let section_name = args
            .section_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && args.role == Role::Student);

        let section = match section_name {
            Some(name) => match self.store.find_section(name).await? {
                Some(section) => Some(section),
                None => return Ok(format!("Error: Section \"{}\" not found.", name)),
            },
            None => None,
        };

        let password = generate_password();
        let created = self
            .store
            .create_user(NewUser {
                name: args.name,
                email: args.email,
                role: args.role,
                section_id: section.as_ref().map(|s| s.id),
                password_hash: hash_secret(&password),
            })
            .await;

        let user = match created {
            Ok(user) => user,
            Err(LmsError::Conflict(_)) => return Ok(exists_msg),
            Err(LmsError::NotFound(_)) => {
                return Ok(format!(
                    "Error: Section \"{}\" not found.",
                    section_name.unwrap_or_default()
                ))
            }
            Err(e) => return Err(e),
        };

        Ok(format!(
            "Success: Created {} account for {} ({}){}. Temporary password: {}",
            user.role,
            user.name,
            user.email,
            section
                .map(|s| format!(" in {}", s.name))
                .unwrap_or_default(),
            password
        ))
    }

    async fn create_event(&self, args: CreateEventArgs) -> Result<String> {
        let Some(date) = parse_event_date(&args.date) else {
            return Ok(format!(
                "Error: Invalid date format \"{}\". Please use ISO format (YYYY-MM-DD) or specific date.",
                args.date
            ));
        };

        let scope_id = if args.scope == EventScope::Course {
            let Some(code) = args.course_code.as_deref().filter(|c| !c.trim().is_empty()) else {
                return Ok("Error: Course code is required for course events.".to_string());
            };
            match self.store.find_course_by_code(code).await? {
                Some(course) => Some(course.id),
                None => return Ok(format!("Error: Course \"{}\" not found.", code)),
            }
        } else {
            None
        };

        let event = self
            .store
            .create_event(NewEvent {
                title: args.title,
                start: date,
                end: date,
                all_day: args.all_day,
                scope: args.scope,
                scope_id,
            })
            .await?;

        Ok(format!(
            "Success: Created {} event \"{}\" on {}.",
            event.scope.as_str(),
            event.title,
            event.start.format("%a %b %d %Y")
        ))
    }
}
