//! Borrow lifecycle service

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    eligibility::{ensure_future, Eligibility, EligibilityValidator},
    expiry::ExpiryScheduler,
    notifications::{BorrowEvent, Notifier},
};
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{
            BorrowMetadata, BorrowStatus, BorrowTransaction, DirectLend, Due, ItemEffect, NewBorrow,
            StatusGuard, SubmitBorrow, SubmitOutcome, TransactionChanges, TransactionView, Transition,
        },
        requester::Requester,
    },
    repository::BorrowStore,
};

const EXPIRED_REASON: &str = "Request expired before checkout";

/// Borrow state machine.
///
/// Every transition is a status-guarded update applied by the store in one
/// atomic unit. Events are published only after that unit committed.
#[derive(Clone)]
pub struct BorrowService {
    pub(crate) store: Arc<dyn BorrowStore>,
    pub(crate) eligibility: EligibilityValidator,
    pub(crate) notifier: Notifier,
    pub(crate) scheduler: ExpiryScheduler,
    pub(crate) window: Duration,
    pub(crate) per_request_timers: bool,
}

/// Metadata describing who borrows and for which class
fn request_metadata(eligibility: &Eligibility) -> BorrowMetadata {
    BorrowMetadata {
        requester_name: Some(eligibility.profile.name.clone()),
        program: Some(eligibility.profile.program.clone()),
        lecturer_name: eligibility.slot.lecturer_name.clone(),
        class_name: Some(eligibility.slot.class_name.clone()),
        room: eligibility.slot.room.clone(),
        ..BorrowMetadata::current()
    }
}

/// Auto-rejection of a pending request whose window closed or an accepted
/// request whose item was never collected
fn expiry(now: DateTime<Utc>) -> Transition {
    Transition {
        allowed: vec![
            StatusGuard::when_due(BorrowStatus::Pending, Due::AcceptanceDeadline(now)),
            StatusGuard::when_due(BorrowStatus::Accepted, Due::PromisedReturn(now)),
        ],
        to: BorrowStatus::Rejected,
        changes: TransactionChanges {
            checkin_note: Some(EXPIRED_REASON.to_string()),
            metadata: BorrowMetadata {
                rejection_reason: Some(EXPIRED_REASON.to_string()),
                rejected_at: Some(now),
                rejected_by: Some(None),
                auto_rejected: Some(true),
                ..Default::default()
            },
            ..Default::default()
        },
        item: ItemEffect::None,
    }
}

impl BorrowService {
    pub fn new(
        store: Arc<dyn BorrowStore>,
        notifier: Notifier,
        scheduler: ExpiryScheduler,
        window: Duration,
        per_request_timers: bool,
    ) -> Self {
        Self {
            eligibility: EligibilityValidator::new(store.clone()),
            store,
            notifier,
            scheduler,
            window,
            per_request_timers,
        }
    }

    /// Get a transaction by ID
    pub async fn get(&self, id: Uuid) -> AppResult<BorrowTransaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or(AppError::TransactionNotFound(id))
    }

    /// Submit a borrow request
    pub async fn submit(&self, input: SubmitBorrow) -> AppResult<SubmitOutcome> {
        self.submit_at(input, Utc::now()).await
    }

    pub async fn submit_at(&self, input: SubmitBorrow, now: DateTime<Utc>) -> AppResult<SubmitOutcome> {
        let eligibility = self
            .eligibility
            .validate_at(
                &input.requester,
                input.profile.as_ref(),
                input.schedule_id,
                input.promised_return,
                now,
            )
            .await?;

        if let Some(item_id) = input.item_id {
            self.store
                .get_item(item_id)
                .await?
                .ok_or_else(|| AppError::ItemNotFound(item_id.to_string()))?;
        }

        let deadline = now + self.window;
        let inserted = self
            .store
            .insert_transaction(NewBorrow {
                id: Uuid::new_v4(),
                requester: input.requester.clone(),
                schedule_id: Some(input.schedule_id),
                item_id: input.item_id,
                promised_return: input.promised_return,
                status: BorrowStatus::Pending,
                acceptance_deadline: Some(deadline),
                metadata: request_metadata(&eligibility),
                created_at: now,
                checkout_at: None,
                checkout_admin_id: None,
                profile: input.profile,
                expire_stale: Some(expiry(now)),
            })
            .await?;

        for expired in &inserted.expired {
            tracing::info!(transaction_id = %expired.id, "Borrow request expired");
            self.announce_expiry(expired);
        }

        let transaction = inserted.transaction;
        tracing::info!(
            transaction_id = %transaction.id,
            requester = %transaction.requester,
            "Borrow request submitted"
        );

        if self.per_request_timers {
            self.arm_expiry(transaction.id, deadline);
        }

        self.notifier
            .publish_to_admins(&BorrowEvent::NewBorrowRequest {
                transaction_id: transaction.id,
                requester: transaction.requester.clone(),
                requester_name: transaction.metadata.requester_name.clone(),
                class_name: transaction.metadata.class_name.clone(),
                acceptance_deadline: deadline,
                promised_return: transaction.promised_return,
            });

        Ok(SubmitOutcome {
            transaction_id: transaction.id,
            status: transaction.status,
            acceptance_deadline: deadline,
            promised_return: transaction.promised_return,
        })
    }

    /// Accept a pending request while its window is open
    pub async fn accept(&self, id: Uuid, admin_id: i32) -> AppResult<BorrowTransaction> {
        self.accept_at(id, admin_id, Utc::now()).await
    }

    pub async fn accept_at(&self, id: Uuid, admin_id: i32, now: DateTime<Utc>) -> AppResult<BorrowTransaction> {
        let transition = Transition {
            allowed: vec![StatusGuard::when_due(
                BorrowStatus::Pending,
                Due::AcceptanceOpen(now),
            )],
            to: BorrowStatus::Accepted,
            changes: TransactionChanges {
                metadata: BorrowMetadata {
                    accepted_at: Some(Some(now)),
                    accepted_by: Some(Some(admin_id)),
                    ..Default::default()
                },
                ..Default::default()
            },
            item: ItemEffect::None,
        };

        let transaction = self.store.apply_transition(id, &transition).await?;
        tracing::info!(transaction_id = %id, admin_id, "Borrow request accepted");

        self.notifier
            .publish_to_requester(
                &transaction.requester,
                &BorrowEvent::BorrowAccepted {
                    transaction_id: id,
                    accepted_at: now,
                },
            );
        self.notifier
            .publish_to_admins(&BorrowEvent::StudentArrived {
                transaction_id: id,
                requester: transaction.requester.clone(),
            });

        Ok(transaction)
    }

    /// Check out an accepted request, reserving the scanned item
    pub async fn scan_and_checkout(
        &self,
        id: Uuid,
        admin_id: i32,
        item_id: i32,
        promised_return: DateTime<Utc>,
    ) -> AppResult<BorrowTransaction> {
        self.scan_and_checkout_at(id, admin_id, item_id, promised_return, Utc::now())
            .await
    }

    pub async fn scan_and_checkout_at(
        &self,
        id: Uuid,
        admin_id: i32,
        item_id: i32,
        promised_return: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<BorrowTransaction> {
        ensure_future(promised_return, now)?;

        let transition = Transition {
            allowed: vec![StatusGuard::when(BorrowStatus::Accepted)],
            to: BorrowStatus::Active,
            changes: TransactionChanges {
                promised_return: Some(promised_return),
                checkout_at: Some(now),
                checkout_admin_id: Some(admin_id),
                metadata: BorrowMetadata {
                    completed_at: Some(now),
                    ..Default::default()
                },
                ..Default::default()
            },
            item: ItemEffect::Reserve(item_id),
        };

        let transaction = self.store.apply_transition(id, &transition).await?;
        tracing::info!(transaction_id = %id, item_id, admin_id, "Item checked out");

        let item_name = self.item_name(item_id).await;
        self.notifier
            .publish_to_requester(
                &transaction.requester,
                &BorrowEvent::BorrowCompleted {
                    transaction_id: id,
                    item_id,
                    item_name,
                    promised_return,
                },
            );
        self.notifier
            .publish_to_admins(&BorrowEvent::RequestProcessed {
                transaction_id: id,
                status: transaction.status,
            });

        Ok(transaction)
    }

    /// Reject a request that has not been checked out
    pub async fn reject(&self, id: Uuid, admin_id: i32, reason: &str) -> AppResult<BorrowTransaction> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation("A rejection reason is required".to_string()));
        }

        let now = Utc::now();
        let transition = Transition {
            allowed: BorrowStatus::OPEN_REQUEST
                .iter()
                .map(|s| StatusGuard::when(*s))
                .collect(),
            to: BorrowStatus::Rejected,
            changes: TransactionChanges {
                checkin_admin_id: Some(admin_id),
                checkin_note: Some(reason.to_string()),
                metadata: BorrowMetadata {
                    rejection_reason: Some(reason.to_string()),
                    rejected_at: Some(now),
                    rejected_by: Some(Some(admin_id)),
                    ..Default::default()
                },
                ..Default::default()
            },
            item: ItemEffect::None,
        };

        let transaction = self.store.apply_transition(id, &transition).await?;
        tracing::info!(transaction_id = %id, admin_id, "Borrow request rejected");

        self.notifier
            .publish_to_requester(
                &transaction.requester,
                &BorrowEvent::BorrowRejected {
                    transaction_id: id,
                    reason: reason.to_string(),
                },
            );

        Ok(transaction)
    }

    /// Auto-reject a request whose window elapsed or whose accepted item was
    /// never collected before the promised return time
    pub async fn expire(&self, id: Uuid) -> AppResult<BorrowTransaction> {
        self.expire_at(id, Utc::now()).await
    }

    pub async fn expire_at(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<BorrowTransaction> {
        let transaction = self.store.apply_transition(id, &expiry(now)).await?;
        tracing::info!(transaction_id = %id, "Borrow request expired");

        self.announce_expiry(&transaction);
        Ok(transaction)
    }

    fn announce_expiry(&self, transaction: &BorrowTransaction) {
        self.notifier.publish_to_requester(
            &transaction.requester,
            &BorrowEvent::BorrowAutoRejected {
                transaction_id: transaction.id,
                reason: EXPIRED_REASON.to_string(),
            },
        );
        self.notifier.publish_to_admins(&BorrowEvent::RequestAutoRejected {
            transaction_id: transaction.id,
            requester: transaction.requester.clone(),
        });
    }

    /// Flag an active loan past its promised return time
    pub async fn mark_overdue(&self, id: Uuid) -> AppResult<BorrowTransaction> {
        self.mark_overdue_at(id, Utc::now()).await
    }

    pub async fn mark_overdue_at(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<BorrowTransaction> {
        let transition = Transition {
            allowed: vec![StatusGuard::when_due(
                BorrowStatus::Active,
                Due::PromisedReturn(now),
            )],
            to: BorrowStatus::Overdue,
            changes: TransactionChanges::default(),
            item: ItemEffect::None,
        };

        let transaction = self.store.apply_transition(id, &transition).await?;
        tracing::info!(transaction_id = %id, "Loan is overdue");

        let event = BorrowEvent::ItemOverdue {
            transaction_id: id,
            requester: transaction.requester.clone(),
            item_id: transaction.item_id,
            promised_return: transaction.promised_return,
        };
        self.notifier.publish_to_requester(&transaction.requester, &event);
        self.notifier.publish_to_admins(&event);

        Ok(transaction)
    }

    /// Lend an item on the spot, skipping the request negotiation
    pub async fn direct_lend(&self, input: DirectLend) -> AppResult<BorrowTransaction> {
        self.direct_lend_at(input, Utc::now()).await
    }

    pub async fn direct_lend_at(&self, input: DirectLend, now: DateTime<Utc>) -> AppResult<BorrowTransaction> {
        let supplied = input.profile.as_ref();
        let base = match input.schedule_id {
            Some(schedule_id) => {
                let eligibility = self
                    .eligibility
                    .validate_at(&input.requester, supplied, schedule_id, input.promised_return, now)
                    .await?;
                request_metadata(&eligibility)
            }
            None => {
                let profile = self.eligibility.resolve(&input.requester, supplied).await?;
                ensure_future(input.promised_return, now)?;
                BorrowMetadata {
                    requester_name: Some(profile.name),
                    program: Some(profile.program),
                    ..BorrowMetadata::current()
                }
            }
        };

        let item = self
            .store
            .get_item(input.item_id)
            .await?
            .ok_or_else(|| AppError::ItemNotFound(input.item_id.to_string()))?;

        let metadata = BorrowMetadata {
            direct_lending: Some(true),
            lending_admin: Some(input.admin_id),
            completed_at: Some(now),
            ..base
        };

        let transaction = self
            .store
            .insert_transaction(NewBorrow {
                id: Uuid::new_v4(),
                requester: input.requester.clone(),
                schedule_id: input.schedule_id,
                item_id: Some(item.id),
                promised_return: input.promised_return,
                status: BorrowStatus::Active,
                acceptance_deadline: None,
                metadata,
                created_at: now,
                checkout_at: Some(now),
                checkout_admin_id: Some(input.admin_id),
                profile: input.profile,
                expire_stale: None,
            })
            .await?
            .transaction;

        tracing::info!(
            transaction_id = %transaction.id,
            item_id = item.id,
            admin_id = input.admin_id,
            "Item lent directly"
        );

        let event = BorrowEvent::DirectLendingCompleted {
            transaction_id: transaction.id,
            requester: transaction.requester.clone(),
            item_id: item.id,
            item_name: item.display_name(),
            promised_return: transaction.promised_return,
        };
        self.notifier.publish_to_requester(&transaction.requester, &event);
        self.notifier.publish_to_admins(&event);

        Ok(transaction)
    }

    /// Check an item back in
    pub async fn return_item(&self, id: Uuid, admin_id: i32, note: Option<String>) -> AppResult<BorrowTransaction> {
        self.return_item_at(id, admin_id, note, Utc::now()).await
    }

    pub async fn return_item_at(
        &self,
        id: Uuid,
        admin_id: i32,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<BorrowTransaction> {
        let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let transition = Transition {
            allowed: BorrowStatus::ON_LOAN
                .iter()
                .map(|s| StatusGuard::when(*s))
                .collect(),
            to: BorrowStatus::Returned,
            changes: TransactionChanges {
                returned_at: Some(now),
                checkin_admin_id: Some(admin_id),
                checkin_note: note.clone(),
                metadata: BorrowMetadata {
                    return_note: note,
                    ..Default::default()
                },
                ..Default::default()
            },
            item: ItemEffect::Release,
        };

        let transaction = self.store.apply_transition(id, &transition).await?;
        tracing::info!(transaction_id = %id, admin_id, "Item returned");

        self.announce_return(&transaction, now).await;
        Ok(transaction)
    }

    /// Check an item back in by its barcode
    pub async fn return_by_barcode(
        &self,
        barcode: &str,
        admin_id: i32,
        note: Option<String>,
    ) -> AppResult<BorrowTransaction> {
        let item = self
            .store
            .find_item_by_barcode(barcode)
            .await?
            .ok_or_else(|| AppError::ItemNotFound(barcode.to_string()))?;

        let loan = self
            .store
            .find_open_loan(item.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item {} is not on loan", barcode)))?;

        self.return_item(loan.id, admin_id, note).await
    }

    pub(crate) async fn announce_return(&self, transaction: &BorrowTransaction, now: DateTime<Utc>) {
        let event = BorrowEvent::ItemReturned {
            transaction_id: transaction.id,
            requester: transaction.requester.clone(),
            item_id: transaction.item_id,
            returned_at: transaction.returned_at.unwrap_or(now),
        };
        self.notifier.publish_to_requester(&transaction.requester, &event);
        self.notifier.publish_to_admins(&event);
    }

    /// Open transactions of a requester, newest first
    pub async fn requester_status(&self, requester: &Requester) -> AppResult<Vec<TransactionView>> {
        let now = Utc::now();
        let transactions = self
            .store
            .list_for_requester(requester, &BorrowStatus::OPEN)
            .await?;
        Ok(transactions
            .into_iter()
            .map(|t| TransactionView::at(t, now))
            .collect())
    }

    /// Requests waiting on an administrator, oldest first
    pub async fn pending_requests(&self) -> AppResult<Vec<TransactionView>> {
        self.pending_requests_at(Utc::now()).await
    }

    pub async fn pending_requests_at(&self, now: DateTime<Utc>) -> AppResult<Vec<TransactionView>> {
        let transactions = self
            .store
            .list_by_status(&BorrowStatus::OPEN_REQUEST)
            .await?;
        Ok(transactions
            .into_iter()
            .map(|t| TransactionView::at(t, now))
            // A pending request whose window closed is waiting for the sweep
            .filter(|v| v.seconds_remaining.map(|s| s > 0).unwrap_or(true))
            .collect())
    }

    /// Items currently out, oldest checkout first
    pub async fn current_loans(&self) -> AppResult<Vec<TransactionView>> {
        let now = Utc::now();
        let transactions = self.store.list_by_status(&BorrowStatus::ON_LOAN).await?;
        Ok(transactions
            .into_iter()
            .map(|t| TransactionView::at(t, now))
            .collect())
    }

    async fn item_name(&self, item_id: i32) -> String {
        match self.store.get_item(item_id).await {
            Ok(Some(item)) => item.display_name(),
            _ => format!("Item #{}", item_id),
        }
    }

    fn arm_expiry(&self, id: Uuid, deadline: DateTime<Utc>) {
        let service = self.clone();
        self.scheduler
            .schedule(deadline, async move { service.expire_due(id).await });
    }
}
