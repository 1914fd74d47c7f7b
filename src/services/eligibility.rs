//! Borrow eligibility checks

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    models::{
        requester::{Requester, RequesterProfile},
        schedule::ScheduleSlot,
    },
    repository::BorrowStore,
};

/// What a successful check resolved
#[derive(Debug, Clone)]
pub struct Eligibility {
    pub slot: ScheduleSlot,
    pub profile: RequesterProfile,
}

#[derive(Clone)]
pub struct EligibilityValidator {
    store: Arc<dyn BorrowStore>,
}

impl EligibilityValidator {
    pub fn new(store: Arc<dyn BorrowStore>) -> Self {
        Self { store }
    }

    /// Check a requester may borrow against a schedule slot. Read-only.
    ///
    /// A stored profile wins over `supplied`, which only stands in for a
    /// requester the store has not seen yet.
    pub async fn validate(
        &self,
        requester: &Requester,
        supplied: Option<&RequesterProfile>,
        schedule_id: i32,
        promised_return: DateTime<Utc>,
    ) -> AppResult<Eligibility> {
        self.validate_at(requester, supplied, schedule_id, promised_return, Utc::now())
            .await
    }

    pub async fn validate_at(
        &self,
        requester: &Requester,
        supplied: Option<&RequesterProfile>,
        schedule_id: i32,
        promised_return: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Eligibility> {
        let profile = self.resolve(requester, supplied).await?;

        let slot = self
            .store
            .find_schedule_slot(schedule_id)
            .await?
            .ok_or(AppError::ScheduleNotFound(schedule_id))?;

        if !same_program(&slot.program, &profile.program) {
            return Err(AppError::ProgramMismatch {
                slot: slot.program.clone(),
                requester: profile.program.clone(),
            });
        }

        ensure_future(promised_return, now)?;

        Ok(Eligibility { slot, profile })
    }

    /// Stored profile, else the supplied one when it names the same requester
    pub async fn resolve(
        &self,
        requester: &Requester,
        supplied: Option<&RequesterProfile>,
    ) -> AppResult<RequesterProfile> {
        if let Some(stored) = self.store.find_requester(requester).await? {
            return Ok(stored);
        }
        supplied
            .filter(|p| &p.requester == requester)
            .cloned()
            .ok_or_else(|| AppError::RequesterNotFound(requester.key()))
    }
}

pub(crate) fn ensure_future(promised_return: DateTime<Utc>, now: DateTime<Utc>) -> AppResult<()> {
    if promised_return <= now {
        return Err(AppError::InvalidReturnTime);
    }
    Ok(())
}

fn same_program(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
