//! Repository layer for database operations

pub mod borrow;
pub mod inventory;
pub mod memory;
pub mod requesters;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        borrow::{BorrowStatus, BorrowTransaction, Inserted, NewBorrow, Transition},
        inventory::{CreateItem, InventoryItem, InventoryListEntry, UpdateItem},
        requester::{Requester, RequesterProfile},
        schedule::ScheduleSlot,
    },
};

pub use memory::MemoryStore;

/// Persistence seam of the borrow lifecycle.
///
/// Every method is one atomic unit: either all of its writes are visible
/// afterwards or none are.
#[async_trait]
pub trait BorrowStore: Send + Sync {
    async fn find_requester(&self, requester: &Requester) -> AppResult<Option<RequesterProfile>>;

    async fn find_schedule_slot(&self, id: i32) -> AppResult<Option<ScheduleSlot>>;

    async fn get_item(&self, id: i32) -> AppResult<Option<InventoryItem>>;

    async fn find_item_by_barcode(&self, barcode: &str) -> AppResult<Option<InventoryItem>>;

    async fn list_items(&self, limit: i64, offset: i64) -> AppResult<(Vec<InventoryListEntry>, i64)>;

    async fn list_available_items(&self) -> AppResult<Vec<InventoryItem>>;

    async fn create_item(&self, item: &CreateItem) -> AppResult<InventoryItem>;

    /// Update an item. When an `on_loan` item is moved to another status,
    /// `release` is applied to the loan holding it in the same unit and the
    /// closed loan is returned alongside the item.
    async fn update_item(
        &self,
        id: i32,
        update: &UpdateItem,
        release: &Transition,
    ) -> AppResult<(InventoryItem, Option<BorrowTransaction>)>;

    async fn delete_item(&self, id: i32) -> AppResult<()>;

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<BorrowTransaction>>;

    /// Insert a transaction.
    ///
    /// Inserts are serialized per requester. A supplied profile is registered
    /// unless the requester already exists, and `expire_stale` closes the
    /// requester's due requests before anything else is checked. `Pending`
    /// inserts then fail with `DuplicatePendingRequest` while another request
    /// is open. `Active` inserts reserve their item in the same unit. A failed
    /// insert leaves no trace, the profile included.
    async fn insert_transaction(&self, new: NewBorrow) -> AppResult<Inserted>;

    /// Apply a guarded transition; `TransactionNotFound` when no guard admits
    /// the current row.
    async fn apply_transition(&self, id: Uuid, transition: &Transition) -> AppResult<BorrowTransaction>;

    /// The `active`/`overdue` transaction holding an item
    async fn find_open_loan(&self, item_id: i32) -> AppResult<Option<BorrowTransaction>>;

    async fn list_for_requester(
        &self,
        requester: &Requester,
        statuses: &[BorrowStatus],
    ) -> AppResult<Vec<BorrowTransaction>>;

    /// Transactions in the given statuses, oldest first
    async fn list_by_status(&self, statuses: &[BorrowStatus]) -> AppResult<Vec<BorrowTransaction>>;

    /// Pending requests past their deadline and accepted requests past their
    /// promised return time
    async fn due_for_expiry(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>>;

    /// Active loans past their promised return time
    async fn due_for_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>>;

    async fn ping(&self) -> AppResult<()>;
}

/// PostgreSQL store
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn status_texts(statuses: &[BorrowStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl BorrowStore for Repository {
    async fn find_requester(&self, requester: &Requester) -> AppResult<Option<RequesterProfile>> {
        self.requesters_find(requester).await
    }

    async fn find_schedule_slot(&self, id: i32) -> AppResult<Option<ScheduleSlot>> {
        self.schedules_get_slot(id).await
    }

    async fn get_item(&self, id: i32) -> AppResult<Option<InventoryItem>> {
        self.inventory_get(id).await
    }

    async fn find_item_by_barcode(&self, barcode: &str) -> AppResult<Option<InventoryItem>> {
        self.inventory_find_by_barcode(barcode).await
    }

    async fn list_items(&self, limit: i64, offset: i64) -> AppResult<(Vec<InventoryListEntry>, i64)> {
        self.inventory_list(limit, offset).await
    }

    async fn list_available_items(&self) -> AppResult<Vec<InventoryItem>> {
        self.inventory_list_available().await
    }

    async fn create_item(&self, item: &CreateItem) -> AppResult<InventoryItem> {
        self.inventory_create(item).await
    }

    async fn update_item(
        &self,
        id: i32,
        update: &UpdateItem,
        release: &Transition,
    ) -> AppResult<(InventoryItem, Option<BorrowTransaction>)> {
        self.inventory_update(id, update, release).await
    }

    async fn delete_item(&self, id: i32) -> AppResult<()> {
        self.inventory_delete(id).await
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<BorrowTransaction>> {
        self.borrow_get(id).await
    }

    async fn insert_transaction(&self, new: NewBorrow) -> AppResult<Inserted> {
        self.borrow_insert(new).await
    }

    async fn apply_transition(&self, id: Uuid, transition: &Transition) -> AppResult<BorrowTransaction> {
        self.borrow_apply(id, transition).await
    }

    async fn find_open_loan(&self, item_id: i32) -> AppResult<Option<BorrowTransaction>> {
        self.borrow_find_open_loan(item_id).await
    }

    async fn list_for_requester(
        &self,
        requester: &Requester,
        statuses: &[BorrowStatus],
    ) -> AppResult<Vec<BorrowTransaction>> {
        self.borrow_list_for_requester(requester, statuses).await
    }

    async fn list_by_status(&self, statuses: &[BorrowStatus]) -> AppResult<Vec<BorrowTransaction>> {
        self.borrow_list_by_status(statuses).await
    }

    async fn due_for_expiry(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        self.borrow_due_for_expiry(now).await
    }

    async fn due_for_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        self.borrow_due_for_overdue(now).await
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
