//! Requester and schedule lookups on Repository

use sqlx::{PgConnection, Row};

use super::Repository;
use crate::{
    error::{AppError, AppResult},
    models::{
        requester::{Requester, RequesterProfile},
        schedule::ScheduleSlot,
    },
};

fn requester_table(requester: &Requester) -> &'static str {
    match requester {
        Requester::Student(_) => "students",
        Requester::Lecturer(_) => "lecturers",
    }
}

impl Repository {
    /// Get a requester profile
    pub async fn requesters_find(&self, requester: &Requester) -> AppResult<Option<RequesterProfile>> {
        let query = format!(
            "SELECT name, program FROM {} WHERE id = $1",
            requester_table(requester)
        );

        let row = sqlx::query(&query)
            .bind(requester.id())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| RequesterProfile {
            requester: requester.clone(),
            name: r.get("name"),
            program: r.get("program"),
        }))
    }

    /// Get a schedule slot by ID
    pub async fn schedules_get_slot(&self, id: i32) -> AppResult<Option<ScheduleSlot>> {
        let slot = sqlx::query_as::<_, ScheduleSlot>("SELECT * FROM schedule_slots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(slot)
    }
}

/// Lock the requester row for the rest of the database transaction.
///
/// Concurrent submissions by the same requester queue up here, so the
/// open-request check that follows sees every committed insert.
pub(crate) async fn lock_requester(conn: &mut PgConnection, requester: &Requester) -> AppResult<()> {
    let query = format!(
        "SELECT id FROM {} WHERE id = $1 FOR UPDATE",
        requester_table(requester)
    );

    sqlx::query_scalar::<_, String>(&query)
        .bind(requester.id())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::RequesterNotFound(requester.key()))?;
    Ok(())
}

/// Register a requester on first reference; an existing row is never overwritten
pub(crate) async fn insert_requester(conn: &mut PgConnection, profile: &RequesterProfile) -> AppResult<()> {
    let query = format!(
        "INSERT INTO {} (id, name, program) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
        requester_table(&profile.requester)
    );

    sqlx::query(&query)
        .bind(profile.requester.id())
        .bind(&profile.name)
        .bind(&profile.program)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
