//! In-process store backing tests and database-less runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::BorrowStore;
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowStatus, BorrowTransaction, Inserted, ItemEffect, NewBorrow, Transition},
        inventory::{CreateItem, InventoryItem, InventoryListEntry, ItemStatus, UpdateItem},
        requester::{Requester, RequesterProfile},
        schedule::ScheduleSlot,
    },
};

#[derive(Default)]
struct State {
    requesters: HashMap<Requester, RequesterProfile>,
    slots: HashMap<i32, ScheduleSlot>,
    items: BTreeMap<i32, InventoryItem>,
    next_item_id: i32,
    transactions: HashMap<Uuid, BorrowTransaction>,
}

impl State {
    fn open_loan(&self, item_id: i32) -> Option<&BorrowTransaction> {
        self.transactions
            .values()
            .find(|t| t.item_id == Some(item_id) && t.status.holds_item())
    }

    fn check_available(&self, item_id: i32) -> AppResult<()> {
        let item = self
            .items
            .get(&item_id)
            .ok_or_else(|| AppError::ItemNotFound(item_id.to_string()))?;
        if item.status != ItemStatus::Available {
            return Err(AppError::ItemUnavailable(item.barcode.clone()));
        }
        Ok(())
    }

    fn reserve(&mut self, item_id: i32) -> AppResult<()> {
        self.check_available(item_id)?;
        if let Some(item) = self.items.get_mut(&item_id) {
            item.status = ItemStatus::OnLoan;
        }
        Ok(())
    }

    fn release(&mut self, item_id: i32) {
        if let Some(item) = self.items.get_mut(&item_id) {
            if item.status == ItemStatus::OnLoan {
                item.status = ItemStatus::Available;
            }
        }
    }

    fn barcode_taken(&self, barcode: &str, except: Option<i32>) -> bool {
        self.items
            .values()
            .any(|i| i.barcode == barcode && Some(i.id) != except)
    }

    fn sorted(&self, mut txs: Vec<BorrowTransaction>) -> Vec<BorrowTransaction> {
        txs.sort_by_key(|t| t.created_at);
        txs
    }
}

/// Store keeping every table in one mutex-guarded state.
///
/// Each trait method holds the lock for its whole body, which gives the same
/// all-or-nothing behavior as a database transaction.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_requester(&self, profile: RequesterProfile) {
        let mut state = self.state.lock().await;
        state.requesters.insert(profile.requester.clone(), profile);
    }

    pub async fn add_schedule_slot(&self, slot: ScheduleSlot) {
        let mut state = self.state.lock().await;
        state.slots.insert(slot.id, slot);
    }

    /// Insert a transaction as-is, e.g. a record written by an older server
    pub async fn put_transaction(&self, transaction: BorrowTransaction) {
        let mut state = self.state.lock().await;
        state.transactions.insert(transaction.id, transaction);
    }
}

#[async_trait]
impl BorrowStore for MemoryStore {
    async fn find_requester(&self, requester: &Requester) -> AppResult<Option<RequesterProfile>> {
        Ok(self.state.lock().await.requesters.get(requester).cloned())
    }

    async fn find_schedule_slot(&self, id: i32) -> AppResult<Option<ScheduleSlot>> {
        Ok(self.state.lock().await.slots.get(&id).cloned())
    }

    async fn get_item(&self, id: i32) -> AppResult<Option<InventoryItem>> {
        Ok(self.state.lock().await.items.get(&id).cloned())
    }

    async fn find_item_by_barcode(&self, barcode: &str) -> AppResult<Option<InventoryItem>> {
        let state = self.state.lock().await;
        Ok(state.items.values().find(|i| i.barcode == barcode).cloned())
    }

    async fn list_items(&self, limit: i64, offset: i64) -> AppResult<(Vec<InventoryListEntry>, i64)> {
        let state = self.state.lock().await;
        let total = state.items.len() as i64;
        let entries = state
            .items
            .values()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|item| {
                let loan = state.open_loan(item.id);
                InventoryListEntry {
                    item: item.clone(),
                    borrowed_by: loan.and_then(|t| t.metadata.requester_name.clone()),
                    due_date: loan.map(|t| t.promised_return),
                }
            })
            .collect();
        Ok((entries, total))
    }

    async fn list_available_items(&self) -> AppResult<Vec<InventoryItem>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| i.status == ItemStatus::Available)
            .cloned()
            .collect())
    }

    async fn create_item(&self, data: &CreateItem) -> AppResult<InventoryItem> {
        let mut state = self.state.lock().await;
        if state.barcode_taken(&data.barcode, None) {
            return Err(AppError::Conflict(format!(
                "Barcode {} is already used",
                data.barcode
            )));
        }

        state.next_item_id += 1;
        let item = InventoryItem {
            id: state.next_item_id,
            barcode: data.barcode.clone(),
            item_type: data.item_type.clone(),
            brand: data.brand.clone(),
            model: data.model.clone(),
            serial_number: data.serial_number.clone(),
            description: data.description.clone(),
            location: data.location.clone(),
            purchase_date: data.purchase_date,
            status: data.status.unwrap_or(ItemStatus::Available),
            created_at: Utc::now(),
        };
        state.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn update_item(
        &self,
        id: i32,
        update: &UpdateItem,
        release: &Transition,
    ) -> AppResult<(InventoryItem, Option<BorrowTransaction>)> {
        let mut state = self.state.lock().await;
        let current = state
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::ItemNotFound(id.to_string()))?;

        let mut next = current.clone();
        update.apply_to(&mut next);
        if next.status == ItemStatus::OnLoan && current.status != ItemStatus::OnLoan {
            return Err(AppError::Validation(
                "Items are put on loan by checkout, not by a status change".to_string(),
            ));
        }
        if state.barcode_taken(&next.barcode, Some(id)) {
            return Err(AppError::Conflict(format!(
                "Barcode {} is already used",
                next.barcode
            )));
        }

        let mut closed = None;
        if current.status == ItemStatus::OnLoan && next.status != ItemStatus::OnLoan {
            if let Some(loan) = state.open_loan(id).cloned() {
                if release.permits(&loan) {
                    let returned = release.apply(loan)?;
                    state.transactions.insert(returned.id, returned.clone());
                    closed = Some(returned);
                }
            }
        }

        state.items.insert(id, next.clone());
        Ok((next, closed))
    }

    async fn delete_item(&self, id: i32) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get(&id)
            .ok_or_else(|| AppError::ItemNotFound(id.to_string()))?;

        if item.status == ItemStatus::OnLoan {
            return Err(AppError::Conflict(format!("Item {} is on loan and cannot be deleted", id)));
        }
        if state.transactions.values().any(|t| t.item_id == Some(id)) {
            return Err(AppError::Conflict(format!(
                "Item {} has borrow history and cannot be deleted",
                id
            )));
        }

        state.items.remove(&id);
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<BorrowTransaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn insert_transaction(&self, mut new: NewBorrow) -> AppResult<Inserted> {
        let mut state = self.state.lock().await;

        // Every check runs before the first write so a failure leaves no trace
        let profile = new.profile.take().filter(|p| p.requester == new.requester);
        if profile.is_none() && !state.requesters.contains_key(&new.requester) {
            return Err(AppError::RequesterNotFound(new.requester.key()));
        }
        if let Some(schedule_id) = new.schedule_id {
            if !state.slots.contains_key(&schedule_id) {
                return Err(AppError::ScheduleNotFound(schedule_id));
            }
        }

        let open: Vec<&BorrowTransaction> = state
            .transactions
            .values()
            .filter(|t| t.requester == new.requester && BorrowStatus::OPEN_REQUEST.contains(&t.status))
            .collect();

        let mut expired = Vec::new();
        let mut still_open = false;
        for current in open {
            match &new.expire_stale {
                Some(transition) if transition.permits(current) => {
                    expired.push(transition.apply(current.clone())?);
                }
                _ => still_open = true,
            }
        }

        if new.status == BorrowStatus::Pending && still_open {
            return Err(AppError::DuplicatePendingRequest(new.requester.key()));
        }

        let reserve = if new.status.holds_item() {
            let item_id = new.item_id.ok_or_else(|| {
                AppError::Validation("A loan must reference an inventory item".to_string())
            })?;
            state.check_available(item_id)?;
            Some(item_id)
        } else {
            None
        };

        if let Some(profile) = profile {
            state.requesters.entry(profile.requester.clone()).or_insert(profile);
        }
        for t in &expired {
            state.transactions.insert(t.id, t.clone());
        }
        if let Some(item_id) = reserve {
            state.reserve(item_id)?;
        }

        let transaction = new.into_transaction();
        state.transactions.insert(transaction.id, transaction.clone());
        Ok(Inserted { transaction, expired })
    }

    async fn apply_transition(&self, id: Uuid, transition: &Transition) -> AppResult<BorrowTransaction> {
        let mut state = self.state.lock().await;
        let current = state
            .transactions
            .get(&id)
            .cloned()
            .ok_or(AppError::TransactionNotFound(id))?;

        if !transition.permits(&current) {
            return Err(AppError::TransactionNotFound(id));
        }

        // Validate before touching the ledger so a failure leaves no trace
        let next = transition.apply(current.clone())?;

        match transition.item {
            ItemEffect::Reserve(item_id) => state.reserve(item_id)?,
            ItemEffect::Release => {
                if let Some(item_id) = current.item_id {
                    state.release(item_id);
                }
            }
            ItemEffect::None => {}
        }

        state.transactions.insert(id, next.clone());
        Ok(next)
    }

    async fn find_open_loan(&self, item_id: i32) -> AppResult<Option<BorrowTransaction>> {
        Ok(self.state.lock().await.open_loan(item_id).cloned())
    }

    async fn list_for_requester(
        &self,
        requester: &Requester,
        statuses: &[BorrowStatus],
    ) -> AppResult<Vec<BorrowTransaction>> {
        let state = self.state.lock().await;
        let txs = state
            .transactions
            .values()
            .filter(|t| &t.requester == requester && statuses.contains(&t.status))
            .cloned()
            .collect();
        let mut txs = state.sorted(txs);
        txs.reverse();
        Ok(txs)
    }

    async fn list_by_status(&self, statuses: &[BorrowStatus]) -> AppResult<Vec<BorrowTransaction>> {
        let state = self.state.lock().await;
        let txs = state
            .transactions
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect();
        Ok(state.sorted(txs))
    }

    async fn due_for_expiry(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let txs = state
            .transactions
            .values()
            .filter(|t| match t.status {
                BorrowStatus::Pending => t.acceptance_deadline.map(|d| d <= now).unwrap_or(false),
                BorrowStatus::Accepted => t.promised_return <= now,
                _ => false,
            })
            .cloned()
            .collect();
        Ok(state.sorted(txs).into_iter().map(|t| t.id).collect())
    }

    async fn due_for_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut txs: Vec<_> = state
            .transactions
            .values()
            .filter(|t| t.status == BorrowStatus::Active && t.promised_return <= now)
            .cloned()
            .collect();
        txs.sort_by_key(|t| t.promised_return);
        Ok(txs.into_iter().map(|t| t.id).collect())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::borrow::{BorrowMetadata, Due, StatusGuard, TransactionChanges};
    use chrono::{Duration, NaiveTime};

    fn student() -> RequesterProfile {
        RequesterProfile {
            requester: Requester::Student("2201001".into()),
            name: "Ayu Lestari".into(),
            program: "Informatics".into(),
        }
    }

    fn new_item(barcode: &str) -> CreateItem {
        CreateItem {
            barcode: barcode.into(),
            item_type: "Projector".into(),
            brand: None,
            model: None,
            serial_number: None,
            description: None,
            location: None,
            purchase_date: None,
            status: None,
        }
    }

    fn pending(requester: Requester, now: DateTime<Utc>) -> NewBorrow {
        NewBorrow {
            id: Uuid::new_v4(),
            requester,
            schedule_id: Some(1),
            item_id: None,
            promised_return: now + Duration::hours(2),
            status: BorrowStatus::Pending,
            acceptance_deadline: Some(now + Duration::minutes(15)),
            metadata: BorrowMetadata::current(),
            created_at: now,
            checkout_at: None,
            checkout_admin_id: None,
            profile: None,
            expire_stale: None,
        }
    }

    fn expire(now: DateTime<Utc>) -> Transition {
        Transition {
            allowed: vec![StatusGuard::when_due(BorrowStatus::Pending, Due::AcceptanceDeadline(now))],
            to: BorrowStatus::Rejected,
            changes: TransactionChanges::default(),
            item: ItemEffect::None,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_requester(student()).await;
        store
            .add_schedule_slot(ScheduleSlot {
                id: 1,
                program: "Informatics".into(),
                class_name: "Networks".into(),
                lecturer_name: None,
                room: None,
                day_of_week: 1,
                start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            })
            .await;
        store
    }

    #[tokio::test]
    async fn test_second_open_request_is_refused() {
        let store = seeded().await;
        let now = Utc::now();
        store.insert_transaction(pending(student().requester, now)).await.unwrap();

        let err = store
            .insert_transaction(pending(student().requester, now))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicatePendingRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_requester_is_refused() {
        let store = seeded().await;
        let err = store
            .insert_transaction(pending(Requester::Lecturer("99999".into()), Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RequesterNotFound(_)));
    }

    #[tokio::test]
    async fn test_supplied_profile_never_overwrites() {
        let store = seeded().await;
        let mut renamed = student();
        renamed.program = "Physics".into();
        let mut new = pending(student().requester, Utc::now());
        new.profile = Some(renamed);
        store.insert_transaction(new).await.unwrap();

        let found = store.find_requester(&student().requester).await.unwrap().unwrap();
        assert_eq!(found.program, "Informatics");
    }

    #[tokio::test]
    async fn test_new_requester_is_registered_with_the_insert() {
        let store = seeded().await;
        let profile = RequesterProfile {
            requester: Requester::Student("2201009".into()),
            name: "Sari Dewi".into(),
            program: "Informatics".into(),
        };
        let mut new = pending(profile.requester.clone(), Utc::now());
        new.profile = Some(profile.clone());

        store.insert_transaction(new).await.unwrap();
        assert_eq!(store.find_requester(&profile.requester).await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn test_failed_insert_registers_nobody() {
        let store = seeded().await;
        let profile = RequesterProfile {
            requester: Requester::Lecturer("1987030".into()),
            name: "Rudi Hartono".into(),
            program: "Informatics".into(),
        };
        let mut new = pending(profile.requester.clone(), Utc::now());
        new.schedule_id = Some(42);
        new.profile = Some(profile.clone());

        let err = store.insert_transaction(new).await.unwrap_err();
        assert!(matches!(err, AppError::ScheduleNotFound(42)));
        assert_eq!(store.find_requester(&profile.requester).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_due_request_is_closed_before_duplicate_check() {
        let store = seeded().await;
        let now = Utc::now();
        let first = store
            .insert_transaction(pending(student().requester, now))
            .await
            .unwrap()
            .transaction;

        // Still inside the window: the first request blocks
        let mut early = pending(student().requester, now + Duration::minutes(5));
        early.expire_stale = Some(expire(now + Duration::minutes(5)));
        let err = store.insert_transaction(early).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicatePendingRequest(_)));

        let later = now + Duration::minutes(16);
        let mut retry = pending(student().requester, later);
        retry.expire_stale = Some(expire(later));
        let inserted = store.insert_transaction(retry).await.unwrap();

        assert_eq!(inserted.expired.len(), 1);
        assert_eq!(inserted.expired[0].id, first.id);
        let closed = store.get_transaction(first.id).await.unwrap().unwrap();
        assert_eq!(closed.status, BorrowStatus::Rejected);
        assert_eq!(inserted.transaction.status, BorrowStatus::Pending);
    }

    #[tokio::test]
    async fn test_refused_insert_keeps_stale_request_open() {
        let store = seeded().await;
        let now = Utc::now();
        let item = store.create_item(&new_item("LAB-0002")).await.unwrap();
        store.state.lock().await.items.get_mut(&item.id).unwrap().status = ItemStatus::InRepair;
        let first = store
            .insert_transaction(pending(student().requester, now))
            .await
            .unwrap()
            .transaction;

        let later = now + Duration::minutes(16);
        let mut loan = pending(student().requester, later);
        loan.status = BorrowStatus::Active;
        loan.acceptance_deadline = None;
        loan.item_id = Some(item.id);
        loan.expire_stale = Some(expire(later));

        let err = store.insert_transaction(loan).await.unwrap_err();
        assert!(matches!(err, AppError::ItemUnavailable(_)));
        let untouched = store.get_transaction(first.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, BorrowStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_reserve_leaves_transaction_untouched() {
        let store = seeded().await;
        let item = store.create_item(&new_item("LAB-0001")).await.unwrap();
        store.state.lock().await.items.get_mut(&item.id).unwrap().status = ItemStatus::InRepair;

        let tx = store
            .insert_transaction(pending(student().requester, Utc::now()))
            .await
            .unwrap()
            .transaction;
        let checkout = Transition {
            allowed: vec![StatusGuard::when(BorrowStatus::Pending)],
            to: BorrowStatus::Active,
            changes: TransactionChanges::default(),
            item: ItemEffect::Reserve(item.id),
        };

        let err = store.apply_transition(tx.id, &checkout).await.unwrap_err();
        assert!(matches!(err, AppError::ItemUnavailable(_)));
        let unchanged = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, BorrowStatus::Pending);
    }

    #[tokio::test]
    async fn test_guard_miss_reports_not_found() {
        let store = seeded().await;
        let tx = store
            .insert_transaction(pending(student().requester, Utc::now()))
            .await
            .unwrap()
            .transaction;
        let accept = Transition {
            allowed: vec![StatusGuard::when(BorrowStatus::Accepted)],
            to: BorrowStatus::Rejected,
            changes: TransactionChanges::default(),
            item: ItemEffect::None,
        };

        let err = store.apply_transition(tx.id, &accept).await.unwrap_err();
        assert!(matches!(err, AppError::TransactionNotFound(id) if id == tx.id));
    }

    #[tokio::test]
    async fn test_duplicate_barcode_is_a_conflict() {
        let store = seeded().await;
        store.create_item(&new_item("LAB-0001")).await.unwrap();
        let err = store.create_item(&new_item("LAB-0001")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
