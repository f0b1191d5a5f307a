//! Tool parameter schemas.
//!
//! A [`SchemaNode`] describes the arguments a tool accepts. The same tree is
//! rendered to JSON Schema for the model and used to validate and coerce
//! whatever arguments the model sends back.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::OnceLock;

/// Known string formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Email,
}

impl StringFormat {
    fn as_str(&self) -> &'static str {
        match self {
            StringFormat::Email => "email",
        }
    }
}

/// Structural description of a tool parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String {
        description: Option<String>,
        format: Option<StringFormat>,
    },
    Number {
        description: Option<String>,
        integer: bool,
    },
    Boolean {
        description: Option<String>,
    },
    /// Closed set of string values.
    Enum {
        values: Vec<String>,
        description: Option<String>,
    },
    /// Properties keep their declaration order.
    Object {
        properties: Vec<(String, SchemaNode)>,
        description: Option<String>,
    },
    /// May be omitted or null.
    Optional(Box<SchemaNode>),
    /// Filled with `value` when omitted or null.
    Default { inner: Box<SchemaNode>, value: Value },
}

/// One problem found while validating arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path to the offending field, empty for the root.
    pub path: String,
    pub message: String,
}

/// Arguments did not match the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid arguments: ")?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            if issue.path.is_empty() {
                write!(f, "{}", issue.message)?;
            } else {
                write!(f, "{}: {}", issue.path, issue.message)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid regex"))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn reject(issues: &mut Vec<ValidationIssue>, path: &str, message: String) -> Option<Value> {
    issues.push(ValidationIssue {
        path: path.to_string(),
        message,
    });
    None
}

fn mismatch(
    issues: &mut Vec<ValidationIssue>,
    path: &str,
    expected: &str,
    received: &Value,
) -> Option<Value> {
    let message = format!("Expected {}, received {}", expected, type_name(received));
    reject(issues, path, message)
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

impl SchemaNode {
    pub fn string() -> Self {
        SchemaNode::String {
            description: None,
            format: None,
        }
    }

    pub fn email() -> Self {
        SchemaNode::String {
            description: None,
            format: Some(StringFormat::Email),
        }
    }

    pub fn number() -> Self {
        SchemaNode::Number {
            description: None,
            integer: false,
        }
    }

    pub fn integer() -> Self {
        SchemaNode::Number {
            description: None,
            integer: true,
        }
    }

    pub fn boolean() -> Self {
        SchemaNode::Boolean { description: None }
    }

    pub fn enumeration<S: AsRef<str>>(values: &[S]) -> Self {
        SchemaNode::Enum {
            values: values.iter().map(|v| v.as_ref().to_string()).collect(),
            description: None,
        }
    }

    pub fn object<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, SchemaNode)>,
        K: Into<String>,
    {
        SchemaNode::Object {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
            description: None,
        }
    }

    /// An object with no properties.
    pub fn empty() -> Self {
        Self::object(Vec::<(String, SchemaNode)>::new())
    }

    /// Attach a description, passing through wrappers.
    pub fn describe(self, text: impl Into<String>) -> Self {
        let text = Some(text.into());
        match self {
            SchemaNode::String { format, .. } => SchemaNode::String {
                description: text,
                format,
            },
            SchemaNode::Number { integer, .. } => SchemaNode::Number {
                description: text,
                integer,
            },
            SchemaNode::Boolean { .. } => SchemaNode::Boolean { description: text },
            SchemaNode::Enum { values, .. } => SchemaNode::Enum {
                values,
                description: text,
            },
            SchemaNode::Object { properties, .. } => SchemaNode::Object {
                properties,
                description: text,
            },
            SchemaNode::Optional(inner) => {
                SchemaNode::Optional(Box::new(inner.describe_opt(text)))
            }
            SchemaNode::Default { inner, value } => SchemaNode::Default {
                inner: Box::new(inner.describe_opt(text)),
                value,
            },
        }
    }

    fn describe_opt(self, text: Option<String>) -> Self {
        match text {
            Some(text) => self.describe(text),
            None => self,
        }
    }

    pub fn optional(self) -> Self {
        SchemaNode::Optional(Box::new(self))
    }

    pub fn default_value(self, value: Value) -> Self {
        SchemaNode::Default {
            inner: Box::new(self),
            value,
        }
    }

    /// Whether a parent object may omit this field.
    pub fn is_omittable(&self) -> bool {
        matches!(self, SchemaNode::Optional(_) | SchemaNode::Default { .. })
    }

    /// Render as an inline JSON Schema (no `$ref`s).
    pub fn to_json_schema(&self) -> Value {
        let (mut schema, description) = match self {
            SchemaNode::String {
                description,
                format,
            } => {
                let mut schema = json!({ "type": "string" });
                if let Some(format) = format {
                    schema["format"] = json!(format.as_str());
                }
                (schema, description)
            }
            SchemaNode::Number {
                description,
                integer,
            } => {
                let ty = if *integer { "integer" } else { "number" };
                (json!({ "type": ty }), description)
            }
            SchemaNode::Boolean { description } => (json!({ "type": "boolean" }), description),
            SchemaNode::Enum {
                values,
                description,
            } => (json!({ "type": "string", "enum": values }), description),
            SchemaNode::Object {
                properties,
                description,
            } => {
                let mut props = Map::new();
                let mut required = Vec::new();
                for (name, node) in properties {
                    props.insert(name.clone(), node.to_json_schema());
                    if !node.is_omittable() {
                        required.push(json!(name));
                    }
                }
                let mut schema = json!({
                    "type": "object",
                    "properties": props,
                    "additionalProperties": false,
                });
                if !required.is_empty() {
                    schema["required"] = Value::Array(required);
                }
                (schema, description)
            }
            SchemaNode::Optional(inner) => return inner.to_json_schema(),
            SchemaNode::Default { inner, value } => {
                let mut schema = inner.to_json_schema();
                schema["default"] = value.clone();
                return schema;
            }
        };

        if let Some(description) = description {
            schema["description"] = json!(description);
        }
        schema
    }

    /// Validate and coerce tool arguments.
    ///
    /// A JSON-encoded string is decoded first, and null or an empty string
    /// counts as an empty argument object.
    pub fn validate_arguments(&self, raw: &Value) -> Result<Value, ValidationError> {
        let decoded;
        let value = match raw {
            Value::Null => {
                decoded = json!({});
                &decoded
            }
            Value::String(text) if text.trim().is_empty() => {
                decoded = json!({});
                &decoded
            }
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(parsed) => {
                    decoded = parsed;
                    &decoded
                }
                Err(_) => raw,
            },
            _ => raw,
        };
        self.validate(value)
    }

    /// Validate a value, filling defaults and stripping unknown keys.
    pub fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        let mut issues = Vec::new();
        let out = self.check(Some(value), "", &mut issues);
        match (issues.is_empty(), out) {
            (true, Some(out)) => Ok(out),
            (true, None) => Ok(Value::Null),
            (false, _) => Err(ValidationError { issues }),
        }
    }

    fn check(
        &self,
        value: Option<&Value>,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<Value> {
        let present = value.filter(|v| !v.is_null());

        match self {
            SchemaNode::Optional(inner) => {
                return present.and_then(|v| inner.check(Some(v), path, issues));
            }
            SchemaNode::Default { inner, value } => {
                return match present {
                    Some(v) => inner.check(Some(v), path, issues),
                    None => Some(value.clone()),
                };
            }
            _ => {}
        }

        let Some(value) = present else {
            return reject(issues, path, "Required".to_string());
        };

        match self {
            SchemaNode::String { format, .. } => match value {
                Value::String(s) => {
                    if *format == Some(StringFormat::Email) && !email_regex().is_match(s.trim()) {
                        return reject(issues, path, "Invalid email".to_string());
                    }
                    Some(Value::String(s.clone()))
                }
                other => mismatch(issues, path, "string", other),
            },
            SchemaNode::Number { integer, .. } => {
                let number = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                match number {
                    None => mismatch(issues, path, "number", value),
                    Some(n) if !n.is_finite() => {
                        reject(issues, path, "Expected a finite number".to_string())
                    }
                    Some(n) if *integer && n.fract() != 0.0 => {
                        reject(issues, path, "Expected integer, received float".to_string())
                    }
                    Some(n) if *integer => Some(json!(n as i64)),
                    Some(n) => match value {
                        Value::Number(original) => Some(Value::Number(original.clone())),
                        _ => Some(json!(n)),
                    },
                }
            }
            SchemaNode::Boolean { .. } => match value {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Some(json!(true)),
                Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Some(json!(false)),
                other => mismatch(issues, path, "boolean", other),
            },
            SchemaNode::Enum { values, .. } => match value {
                Value::String(s) if values.iter().any(|v| v == s) => Some(value.clone()),
                Value::String(s) => {
                    let expected = values
                        .iter()
                        .map(|v| format!("'{}'", v))
                        .collect::<Vec<_>>()
                        .join(" | ");
                    reject(
                        issues,
                        path,
                        format!("Invalid enum value. Expected {}, received '{}'", expected, s),
                    )
                }
                other => mismatch(issues, path, "string", other),
            },
            SchemaNode::Object { properties, .. } => match value {
                Value::Object(map) => {
                    let mut out = Map::new();
                    for (name, node) in properties {
                        let child_path = join_path(path, name);
                        if let Some(v) = node.check(map.get(name), &child_path, issues) {
                            out.insert(name.clone(), v);
                        }
                    }
                    Some(Value::Object(out))
                }
                other => mismatch(issues, path, "object", other),
            },
            SchemaNode::Optional(_) | SchemaNode::Default { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course_schema() -> SchemaNode {
        SchemaNode::object([
            ("title", SchemaNode::string().describe("The course title")),
            ("description", SchemaNode::string().optional().describe("Course description")),
            ("instructorEmail", SchemaNode::email().describe("Instructor email")),
            (
                "colorIdentifier",
                SchemaNode::string()
                    .default_value(json!("#3B82F6"))
                    .describe("Card color"),
            ),
        ])
    }

    #[test]
    fn test_json_schema_encodes_required_optional_and_defaults() {
        let schema = course_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"], json!(["title", "instructorEmail"]));
        assert_eq!(schema["properties"]["instructorEmail"]["format"], "email");
        assert_eq!(schema["properties"]["colorIdentifier"]["default"], "#3B82F6");
        assert_eq!(
            schema["properties"]["colorIdentifier"]["description"],
            "Card color"
        );
        assert_eq!(
            schema["properties"]["description"],
            json!({"type": "string", "description": "Course description"})
        );
    }

    #[test]
    fn test_json_schema_enum_and_empty_object() {
        let role = SchemaNode::enumeration(&["student", "professor"]).describe("Role");
        assert_eq!(
            role.to_json_schema(),
            json!({"type": "string", "enum": ["student", "professor"], "description": "Role"})
        );

        let empty = SchemaNode::empty().to_json_schema();
        assert_eq!(
            empty,
            json!({"type": "object", "properties": {}, "additionalProperties": false})
        );
    }

    #[test]
    fn test_json_schema_is_deterministic() {
        assert_eq!(
            course_schema().to_json_schema(),
            course_schema().to_json_schema()
        );
    }

    #[test]
    fn test_validate_fills_defaults_and_strips_unknown() {
        let out = course_schema()
            .validate(&json!({
                "title": "Compilers",
                "instructorEmail": "grace@uni.edu",
                "description": null,
                "bogus": 1
            }))
            .unwrap();

        assert_eq!(
            out,
            json!({
                "title": "Compilers",
                "instructorEmail": "grace@uni.edu",
                "colorIdentifier": "#3B82F6"
            })
        );
    }

    #[test]
    fn test_validate_collects_every_issue() {
        let err = course_schema()
            .validate(&json!({ "instructorEmail": "not-an-email" }))
            .unwrap_err();

        assert_eq!(
            err.issues,
            vec![
                ValidationIssue {
                    path: "title".to_string(),
                    message: "Required".to_string()
                },
                ValidationIssue {
                    path: "instructorEmail".to_string(),
                    message: "Invalid email".to_string()
                },
            ]
        );
        assert_eq!(
            err.to_string(),
            "Invalid arguments: title: Required; instructorEmail: Invalid email"
        );
    }

    #[test]
    fn test_validate_coerces_numeric_and_boolean_strings() {
        let schema = SchemaNode::object([
            ("limit", SchemaNode::integer().default_value(json!(10))),
            ("allDay", SchemaNode::boolean().default_value(json!(true))),
        ]);

        let out = schema
            .validate(&json!({ "limit": "5", "allDay": "False" }))
            .unwrap();
        assert_eq!(out, json!({ "limit": 5, "allDay": false }));

        let out = schema.validate(&json!({})).unwrap();
        assert_eq!(out, json!({ "limit": 10, "allDay": true }));

        let err = schema.validate(&json!({ "limit": 2.5 })).unwrap_err();
        assert_eq!(err.issues[0].path, "limit");
    }

    #[test]
    fn test_validate_enum_membership() {
        let schema = SchemaNode::object([(
            "type",
            SchemaNode::enumeration(&["global", "course", "personal"]),
        )]);
        let err = schema.validate(&json!({ "type": "weekly" })).unwrap_err();
        assert_eq!(
            err.issues[0].message,
            "Invalid enum value. Expected 'global' | 'course' | 'personal', received 'weekly'"
        );
    }

    #[test]
    fn test_validate_arguments_decodes_strings() {
        let schema = SchemaNode::object([("name", SchemaNode::string())]);
        let out = schema
            .validate_arguments(&json!("{\"name\": \"Section A\"}"))
            .unwrap();
        assert_eq!(out, json!({ "name": "Section A" }));

        let empty = SchemaNode::empty();
        assert_eq!(empty.validate_arguments(&Value::Null).unwrap(), json!({}));
        assert_eq!(empty.validate_arguments(&json!("")).unwrap(), json!({}));

        let err = schema.validate_arguments(&json!("not json")).unwrap_err();
        assert_eq!(err.issues[0].message, "Expected object, received string");
    }
}
