//! Inventory ledger service

use chrono::Utc;
use std::sync::Arc;

use super::borrow::BorrowService;
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowMetadata, BorrowStatus, ItemEffect, StatusGuard, TransactionChanges, Transition},
        inventory::{CreateItem, InventoryItem, ItemPage, ItemQuery, ItemStatus, UpdateItem},
    },
    repository::BorrowStore,
};

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 200;

#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn BorrowStore>,
    borrow: BorrowService,
}

impl InventoryService {
    pub fn new(store: Arc<dyn BorrowStore>, borrow: BorrowService) -> Self {
        Self { store, borrow }
    }

    pub async fn get(&self, id: i32) -> AppResult<InventoryItem> {
        self.store
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::ItemNotFound(id.to_string()))
    }

    /// True iff the item can be reserved right now
    pub async fn check_available(&self, id: i32) -> AppResult<bool> {
        Ok(self.get(id).await?.status == ItemStatus::Available)
    }

    pub async fn list(&self, query: &ItemQuery) -> AppResult<ItemPage> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
        let (items, total) = self.store.list_items(per_page, (page - 1) * per_page).await?;
        Ok(ItemPage {
            items,
            total,
            page,
            per_page,
        })
    }

    pub async fn list_available(&self) -> AppResult<Vec<InventoryItem>> {
        self.store.list_available_items().await
    }

    /// Look up a scanned barcode for checkout
    pub async fn scan_barcode(&self, barcode: &str) -> AppResult<InventoryItem> {
        let item = self
            .store
            .find_item_by_barcode(barcode.trim())
            .await?
            .ok_or_else(|| AppError::ItemNotFound(barcode.to_string()))?;

        if item.status != ItemStatus::Available {
            return Err(AppError::ItemUnavailable(item.barcode));
        }
        Ok(item)
    }

    pub async fn create(&self, data: CreateItem) -> AppResult<InventoryItem> {
        if data.status == Some(ItemStatus::OnLoan) {
            return Err(AppError::Validation(
                "Items cannot be created on loan".to_string(),
            ));
        }
        let item = self.store.create_item(&data).await?;
        tracing::info!(item_id = item.id, barcode = %item.barcode, "Inventory item created");
        Ok(item)
    }

    /// Update an item. Taking an item off loan closes the loan holding it.
    pub async fn update(&self, id: i32, data: UpdateItem, admin_id: i32) -> AppResult<InventoryItem> {
        let now = Utc::now();
        let status = data.status.map(|s| s.to_string()).unwrap_or_default();
        let note = format!("Returned automatically: item status set to {} by an administrator", status);

        let release = Transition {
            allowed: BorrowStatus::ON_LOAN
                .iter()
                .map(|s| StatusGuard::when(*s))
                .collect(),
            to: BorrowStatus::Returned,
            changes: TransactionChanges {
                returned_at: Some(now),
                checkin_admin_id: Some(admin_id),
                checkin_note: Some(note.clone()),
                metadata: BorrowMetadata {
                    return_note: Some(note),
                    ..Default::default()
                },
                ..Default::default()
            },
            // The item row itself carries the new status
            item: ItemEffect::None,
        };

        let (item, closed) = self.store.update_item(id, &data, &release).await?;
        tracing::info!(item_id = id, status = %item.status, "Inventory item updated");

        if let Some(loan) = closed {
            tracing::info!(
                transaction_id = %loan.id,
                item_id = id,
                "Loan closed by status override"
            );
            self.borrow.announce_return(&loan, now).await;
        }
        Ok(item)
    }

    pub async fn delete(&self, id: i32) -> AppResult<()> {
        self.store.delete_item(id).await?;
        tracing::info!(item_id = id, "Inventory item deleted");
        Ok(())
    }
}
