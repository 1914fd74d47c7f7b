//! Schedule slot model (read-only from the borrow flow)

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// A class session binding program, room and time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ScheduleSlot {
    pub id: i32,
    /// Program of study the class belongs to
    pub program: String,
    pub class_name: String,
    pub lecturer_name: Option<String>,
    pub room: Option<String>,
    /// Day of week (0=Monday, 6=Sunday)
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}
