//! Requester identity (student or lecturer)

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Kind of requester, used in URLs and request bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequesterKind {
    Student,
    Lecturer,
}

/// A borrower, resolved once at the API boundary.
///
/// Serialized as `{"kind": "student", "id": "2201001"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Requester {
    Student(String),
    Lecturer(String),
}

impl Requester {
    pub fn new(kind: RequesterKind, id: impl Into<String>) -> Self {
        match kind {
            RequesterKind::Student => Requester::Student(id.into()),
            RequesterKind::Lecturer => Requester::Lecturer(id.into()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Requester::Student(id) | Requester::Lecturer(id) => id,
        }
    }

    pub fn kind(&self) -> RequesterKind {
        match self {
            Requester::Student(_) => RequesterKind::Student,
            Requester::Lecturer(_) => RequesterKind::Lecturer,
        }
    }

    /// Key unique across both kinds, used for per-requester locking
    pub fn key(&self) -> String {
        match self {
            Requester::Student(id) => format!("student:{}", id),
            Requester::Lecturer(id) => format!("lecturer:{}", id),
        }
    }

    /// Rebuild from the two mutually exclusive storage columns
    pub fn from_columns(student_id: Option<String>, lecturer_id: Option<String>) -> AppResult<Self> {
        match (student_id, lecturer_id) {
            (Some(id), None) => Ok(Requester::Student(id)),
            (None, Some(id)) => Ok(Requester::Lecturer(id)),
            (Some(_), Some(_)) => Err(AppError::Internal(
                "transaction references both a student and a lecturer".to_string(),
            )),
            (None, None) => Err(AppError::Internal(
                "transaction references no requester".to_string(),
            )),
        }
    }

    /// Split into the (student_id, lecturer_id) storage columns
    pub fn to_columns(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Requester::Student(id) => (Some(id.as_str()), None),
            Requester::Lecturer(id) => (None, Some(id.as_str())),
        }
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Stored requester profile with its program affiliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterProfile {
    pub requester: Requester,
    pub name: String,
    pub program: String,
}

/// Requester as submitted by API clients
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RequesterInfo {
    pub kind: RequesterKind,
    /// Student number or lecturer staff number
    #[validate(length(min = 5, max = 50, message = "Requester id must be 5-50 characters"))]
    pub id: String,
    /// Full name, used to register the requester on first borrow
    #[validate(length(min = 2, max = 255, message = "Name must be 2-255 characters"))]
    pub name: Option<String>,
    /// Program of study / department
    #[validate(length(min = 2, max = 100, message = "Program must be 2-100 characters"))]
    pub program: Option<String>,
}

impl RequesterInfo {
    pub fn requester(&self) -> Requester {
        Requester::new(self.kind, self.id.trim())
    }

    /// Profile to register, only when both name and program are supplied
    pub fn profile(&self) -> Option<RequesterProfile> {
        match (&self.name, &self.program) {
            (Some(name), Some(program)) => Some(RequesterProfile {
                requester: self.requester(),
                name: name.trim().to_string(),
                program: program.trim().to_string(),
            }),
            _ => None,
        }
    }
}
