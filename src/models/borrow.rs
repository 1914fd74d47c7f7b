//! Borrow transaction model, typed metadata and guarded transitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

use super::requester::{Requester, RequesterProfile};
use crate::error::{AppError, AppResult};

/// Metadata layout written by this server
pub const METADATA_VERSION: u16 = 1;

/// Lifecycle status of a borrow transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BorrowStatus {
    /// Submitted, waiting for an administrator
    Pending,
    /// Accepted, waiting for the barcode scan
    Accepted,
    /// Checked out
    Active,
    /// Checked out past the promised return time
    Overdue,
    Returned,
    Rejected,
}

impl BorrowStatus {
    /// Statuses of a request that has not reached checkout
    pub const OPEN_REQUEST: [BorrowStatus; 2] = [BorrowStatus::Pending, BorrowStatus::Accepted];
    /// Statuses of a transaction that holds its item
    pub const ON_LOAN: [BorrowStatus; 2] = [BorrowStatus::Active, BorrowStatus::Overdue];
    /// Every non-terminal status
    pub const OPEN: [BorrowStatus; 4] = [
        BorrowStatus::Pending,
        BorrowStatus::Accepted,
        BorrowStatus::Active,
        BorrowStatus::Overdue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowStatus::Pending => "pending",
            BorrowStatus::Accepted => "accepted",
            BorrowStatus::Active => "active",
            BorrowStatus::Overdue => "overdue",
            BorrowStatus::Returned => "returned",
            BorrowStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BorrowStatus::Returned | BorrowStatus::Rejected)
    }

    pub fn holds_item(&self) -> bool {
        Self::ON_LOAN.contains(self)
    }
}

impl FromStr for BorrowStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BorrowStatus::Pending),
            "accepted" => Ok(BorrowStatus::Accepted),
            "active" => Ok(BorrowStatus::Active),
            "overdue" => Ok(BorrowStatus::Overdue),
            "returned" => Ok(BorrowStatus::Returned),
            "rejected" => Ok(BorrowStatus::Rejected),
            other => Err(AppError::Internal(format!("Unknown borrow status '{}'", other))),
        }
    }
}

impl fmt::Display for BorrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured metadata attached to each transaction.
///
/// Every key is optional. `accepted_at`, `accepted_by` and `rejected_by` keep
/// the difference between a key that was never written (legacy records,
/// outer `None`) and one written as `null` (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BorrowMetadata {
    /// Absent on legacy records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecturer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub accepted_at: Option<Option<DateTime<Utc>>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    #[schema(value_type = Option<i32>)]
    pub accepted_by: Option<Option<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    /// `null` when the system rejected the request
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    #[schema(value_type = Option<i32>)]
    pub rejected_by: Option<Option<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_rejected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_lending: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lending_admin: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_note: Option<String>,
}

impl BorrowMetadata {
    /// Fresh metadata for a record written by this server
    pub fn current() -> Self {
        Self {
            version: Some(METADATA_VERSION),
            ..Default::default()
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.version.is_none()
    }

    /// Key-wise merge; keys present in `patch` win
    pub fn merged(self, patch: &BorrowMetadata) -> Self {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                Self { $($field: patch.$field.clone().or(self.$field),)* }
            };
        }
        take!(
            version,
            requester_name,
            program,
            lecturer_name,
            class_name,
            room,
            accepted_at,
            accepted_by,
            completed_at,
            rejection_reason,
            rejected_at,
            rejected_by,
            auto_rejected,
            direct_lending,
            lending_admin,
            return_note,
        )
    }

    pub fn accepted_at(&self) -> Option<DateTime<Utc>> {
        self.accepted_at.flatten()
    }

    pub fn accepted_by(&self) -> Option<i32> {
        self.accepted_by.flatten()
    }

    /// Checks the keys a given status requires
    pub fn validate_for(&self, status: BorrowStatus) -> AppResult<()> {
        match status {
            BorrowStatus::Rejected => {
                let has_reason = self
                    .rejection_reason
                    .as_deref()
                    .map(|r| !r.trim().is_empty())
                    .unwrap_or(false);
                if !has_reason {
                    return Err(AppError::Validation(
                        "A rejected transaction requires a rejection reason".to_string(),
                    ));
                }
            }
            BorrowStatus::Accepted => {
                if self.accepted_at().is_none() {
                    return Err(AppError::Validation(
                        "An accepted transaction requires an acceptance timestamp".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Borrow transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BorrowTransaction {
    pub id: Uuid,
    #[schema(value_type = Object)]
    pub requester: Requester,
    pub schedule_id: Option<i32>,
    /// Assigned at request time or at checkout
    pub item_id: Option<i32>,
    pub promised_return: DateTime<Utc>,
    pub status: BorrowStatus,
    /// End of the acceptance window for submitted requests
    pub acceptance_deadline: Option<DateTime<Utc>>,
    pub metadata: BorrowMetadata,
    pub created_at: DateTime<Utc>,
    pub checkout_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub checkout_admin_id: Option<i32>,
    pub checkin_admin_id: Option<i32>,
    pub checkin_note: Option<String>,
}

impl BorrowTransaction {
    /// Whole seconds left in the acceptance window, never negative
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        self.acceptance_deadline
            .map(|deadline| (deadline - now).num_seconds().max(0))
            .unwrap_or(0)
    }
}

/// Data for a transaction about to be inserted
#[derive(Debug, Clone)]
pub struct NewBorrow {
    pub id: Uuid,
    pub requester: Requester,
    pub schedule_id: Option<i32>,
    pub item_id: Option<i32>,
    pub promised_return: DateTime<Utc>,
    /// `Pending` for submissions, `Active` for direct lending
    pub status: BorrowStatus,
    pub acceptance_deadline: Option<DateTime<Utc>>,
    pub metadata: BorrowMetadata,
    pub created_at: DateTime<Utc>,
    pub checkout_at: Option<DateTime<Utc>>,
    pub checkout_admin_id: Option<i32>,
    /// Registered in the same unit when the requester is not known yet
    pub profile: Option<RequesterProfile>,
    /// Applied first to the requester's open requests it admits, so a request
    /// that is already due never blocks a new one. Its item effect is ignored.
    pub expire_stale: Option<Transition>,
}

/// Outcome of an insert
#[derive(Debug, Clone)]
pub struct Inserted {
    pub transaction: BorrowTransaction,
    /// Stale requests closed by `expire_stale` in the same unit
    pub expired: Vec<BorrowTransaction>,
}

impl NewBorrow {
    pub fn into_transaction(self) -> BorrowTransaction {
        BorrowTransaction {
            id: self.id,
            requester: self.requester,
            schedule_id: self.schedule_id,
            item_id: self.item_id,
            promised_return: self.promised_return,
            status: self.status,
            acceptance_deadline: self.acceptance_deadline,
            metadata: self.metadata,
            created_at: self.created_at,
            checkout_at: self.checkout_at,
            returned_at: None,
            checkout_admin_id: self.checkout_admin_id,
            checkin_admin_id: None,
            checkin_note: None,
        }
    }
}

/// Time condition attached to a status guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    /// Acceptance window closed at or before this instant
    AcceptanceDeadline(DateTime<Utc>),
    /// Promised return time at or before this instant
    PromisedReturn(DateTime<Utc>),
    /// Acceptance window still open at this instant
    AcceptanceOpen(DateTime<Utc>),
}

/// One status a transition may start from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusGuard {
    pub status: BorrowStatus,
    pub due: Option<Due>,
}

impl StatusGuard {
    pub fn when(status: BorrowStatus) -> Self {
        Self { status, due: None }
    }

    pub fn when_due(status: BorrowStatus, due: Due) -> Self {
        Self { status, due: Some(due) }
    }

    fn admits(&self, tx: &BorrowTransaction) -> bool {
        if tx.status != self.status {
            return false;
        }
        match self.due {
            None => true,
            Some(Due::AcceptanceDeadline(now)) => {
                tx.acceptance_deadline.map(|d| d <= now).unwrap_or(false)
            }
            Some(Due::PromisedReturn(now)) => tx.promised_return <= now,
            Some(Due::AcceptanceOpen(now)) => {
                tx.acceptance_deadline.map(|d| d > now).unwrap_or(true)
            }
        }
    }
}

/// Effect of a transition on the inventory ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEffect {
    None,
    /// `available -> on_loan` for this item, in the same atomic unit
    Reserve(i32),
    /// `on_loan -> available` for the transaction's item
    Release,
}

/// Column updates carried by a transition
#[derive(Debug, Clone, Default)]
pub struct TransactionChanges {
    pub item_id: Option<i32>,
    pub promised_return: Option<DateTime<Utc>>,
    pub checkout_at: Option<DateTime<Utc>>,
    pub checkout_admin_id: Option<i32>,
    pub returned_at: Option<DateTime<Utc>>,
    pub checkin_admin_id: Option<i32>,
    pub checkin_note: Option<String>,
    /// Merged into the existing metadata
    pub metadata: BorrowMetadata,
}

/// A status-guarded state change.
///
/// Stores apply it against the current row inside one atomic unit; if no
/// guard admits the current row the store reports `TransactionNotFound`.
#[derive(Debug, Clone)]
pub struct Transition {
    pub allowed: Vec<StatusGuard>,
    pub to: BorrowStatus,
    pub changes: TransactionChanges,
    pub item: ItemEffect,
}

impl Transition {
    pub fn permits(&self, tx: &BorrowTransaction) -> bool {
        self.allowed.iter().any(|guard| guard.admits(tx))
    }

    /// Produce the updated transaction, validating metadata at write time
    pub fn apply(&self, mut tx: BorrowTransaction) -> AppResult<BorrowTransaction> {
        let changes = &self.changes;
        if let ItemEffect::Reserve(item_id) = self.item {
            tx.item_id = Some(item_id);
        }
        if changes.item_id.is_some() {
            tx.item_id = changes.item_id;
        }
        if let Some(promised_return) = changes.promised_return {
            tx.promised_return = promised_return;
        }
        if changes.checkout_at.is_some() {
            tx.checkout_at = changes.checkout_at;
        }
        if changes.checkout_admin_id.is_some() {
            tx.checkout_admin_id = changes.checkout_admin_id;
        }
        if changes.returned_at.is_some() {
            tx.returned_at = changes.returned_at;
        }
        if changes.checkin_admin_id.is_some() {
            tx.checkin_admin_id = changes.checkin_admin_id;
        }
        if changes.checkin_note.is_some() {
            tx.checkin_note = changes.checkin_note.clone();
        }
        tx.metadata = tx.metadata.merged(&changes.metadata);
        tx.metadata.validate_for(self.to)?;
        tx.status = self.to;
        Ok(tx)
    }
}

/// Input of a borrow request submission
#[derive(Debug, Clone)]
pub struct SubmitBorrow {
    pub requester: Requester,
    /// Registered on first borrow when supplied
    pub profile: Option<RequesterProfile>,
    pub schedule_id: i32,
    pub item_id: Option<i32>,
    pub promised_return: DateTime<Utc>,
}

/// Input of an administrator direct lending
#[derive(Debug, Clone)]
pub struct DirectLend {
    pub requester: Requester,
    pub profile: Option<RequesterProfile>,
    pub item_id: i32,
    pub admin_id: i32,
    pub promised_return: DateTime<Utc>,
    pub schedule_id: Option<i32>,
}

/// Result of a successful submission
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmitOutcome {
    pub transaction_id: Uuid,
    pub status: BorrowStatus,
    pub acceptance_deadline: DateTime<Utc>,
    pub promised_return: DateTime<Utc>,
}

/// Transaction annotated with its acceptance window
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: BorrowTransaction,
    /// Seconds left to accept; only set while pending
    pub seconds_remaining: Option<i64>,
    /// The requester reached the desk and was accepted
    pub student_arrived: bool,
}

impl TransactionView {
    pub fn at(transaction: BorrowTransaction, now: DateTime<Utc>) -> Self {
        let seconds_remaining = (transaction.status == BorrowStatus::Pending)
            .then(|| transaction.seconds_remaining(now));
        let student_arrived = transaction.metadata.accepted_at().is_some();
        Self {
            transaction,
            seconds_remaining,
            student_arrived,
        }
    }
}
