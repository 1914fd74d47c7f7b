//! Inventory ledger methods on Repository

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgConnection};

use super::{borrow, Repository};
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowTransaction, Transition},
        inventory::{CreateItem, InventoryItem, InventoryListEntry, ItemStatus, UpdateItem},
    },
};

#[derive(Debug, FromRow)]
pub(crate) struct InventoryRow {
    id: i32,
    barcode: String,
    item_type: String,
    brand: Option<String>,
    model: Option<String>,
    serial_number: Option<String>,
    description: Option<String>,
    location: Option<String>,
    purchase_date: Option<NaiveDate>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<InventoryRow> for InventoryItem {
    type Error = AppError;

    fn try_from(row: InventoryRow) -> Result<Self, Self::Error> {
        Ok(InventoryItem {
            id: row.id,
            barcode: row.barcode,
            item_type: row.item_type,
            brand: row.brand,
            model: row.model,
            serial_number: row.serial_number,
            description: row.description,
            location: row.location,
            purchase_date: row.purchase_date,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct InventoryListRow {
    #[sqlx(flatten)]
    item: InventoryRow,
    borrowed_by: Option<String>,
    due_date: Option<DateTime<Utc>>,
}

const BARCODE_UNIQUE: &str = "inventory_items_barcode_key";

fn map_write_error(e: sqlx::Error, barcode: Option<&str>) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.constraint() == Some(BARCODE_UNIQUE) => AppError::Conflict(
            format!("Barcode {} is already used", barcode.unwrap_or_default()),
        ),
        _ => AppError::Database(e),
    }
}

impl Repository {
    /// Get item by ID
    pub async fn inventory_get(&self, id: i32) -> AppResult<Option<InventoryItem>> {
        sqlx::query_as::<_, InventoryRow>("SELECT * FROM inventory_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(InventoryItem::try_from)
            .transpose()
    }

    /// Get item by barcode
    pub async fn inventory_find_by_barcode(&self, barcode: &str) -> AppResult<Option<InventoryItem>> {
        sqlx::query_as::<_, InventoryRow>("SELECT * FROM inventory_items WHERE barcode = $1")
            .bind(barcode)
            .fetch_optional(&self.pool)
            .await?
            .map(InventoryItem::try_from)
            .transpose()
    }

    /// List items with their current borrower
    pub async fn inventory_list(&self, limit: i64, offset: i64) -> AppResult<(Vec<InventoryListEntry>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory_items")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, InventoryListRow>(
            r#"
            SELECT i.*,
                   t.metadata->>'requester_name' AS borrowed_by,
                   t.promised_return AS due_date
            FROM inventory_items i
            LEFT JOIN borrow_transactions t
                   ON t.item_id = i.id AND t.status IN ('active', 'overdue')
            ORDER BY i.created_at DESC, i.id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(|row| {
                Ok(InventoryListEntry {
                    item: row.item.try_into()?,
                    borrowed_by: row.borrowed_by,
                    due_date: row.due_date,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok((entries, total))
    }

    /// List allocatable items
    pub async fn inventory_list_available(&self) -> AppResult<Vec<InventoryItem>> {
        sqlx::query_as::<_, InventoryRow>(
            "SELECT * FROM inventory_items WHERE status = 'available' ORDER BY item_type, brand, model",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(InventoryItem::try_from)
        .collect()
    }

    /// Create item
    pub async fn inventory_create(&self, data: &CreateItem) -> AppResult<InventoryItem> {
        let status = data.status.unwrap_or(ItemStatus::Available);

        let row = sqlx::query_as::<_, InventoryRow>(
            r#"
            INSERT INTO inventory_items
                (barcode, item_type, brand, model, serial_number, description, location, purchase_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&data.barcode)
        .bind(&data.item_type)
        .bind(&data.brand)
        .bind(&data.model)
        .bind(&data.serial_number)
        .bind(&data.description)
        .bind(&data.location)
        .bind(data.purchase_date)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, Some(&data.barcode)))?;

        row.try_into()
    }

    /// Update item, closing the loan that holds it when it leaves `on_loan`
    pub async fn inventory_update(
        &self,
        id: i32,
        data: &UpdateItem,
        release: &Transition,
    ) -> AppResult<(InventoryItem, Option<BorrowTransaction>)> {
        let mut tx = self.pool.begin().await?;

        let current: InventoryItem =
            sqlx::query_as::<_, InventoryRow>("SELECT * FROM inventory_items WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::ItemNotFound(id.to_string()))?
                .try_into()?;

        let mut next = current.clone();
        data.apply_to(&mut next);
        if next.status == ItemStatus::OnLoan && current.status != ItemStatus::OnLoan {
            return Err(AppError::Validation(
                "Items are put on loan by checkout, not by a status change".to_string(),
            ));
        }

        let closed = if current.status == ItemStatus::OnLoan && next.status != ItemStatus::OnLoan {
            match borrow::lock_open_loan(&mut tx, id).await? {
                Some(loan) if release.permits(&loan) => {
                    let returned = release.apply(loan)?;
                    borrow::write_transaction(&mut tx, &returned).await?;
                    Some(returned)
                }
                _ => None,
            }
        } else {
            None
        };

        let row = sqlx::query_as::<_, InventoryRow>(
            r#"
            UPDATE inventory_items
            SET barcode = $2, item_type = $3, brand = $4, model = $5, serial_number = $6,
                description = $7, location = $8, purchase_date = $9, status = $10
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&next.barcode)
        .bind(&next.item_type)
        .bind(&next.brand)
        .bind(&next.model)
        .bind(&next.serial_number)
        .bind(&next.description)
        .bind(&next.location)
        .bind(next.purchase_date)
        .bind(next.status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, Some(&next.barcode)))?;

        tx.commit().await?;
        Ok((row.try_into()?, closed))
    }

    /// Delete item; refused while on loan or once it has borrow history
    pub async fn inventory_delete(&self, id: i32) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let status: String =
            sqlx::query_scalar("SELECT status FROM inventory_items WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::ItemNotFound(id.to_string()))?;

        if status.parse::<ItemStatus>()? == ItemStatus::OnLoan {
            return Err(AppError::Conflict(format!("Item {} is on loan and cannot be deleted", id)));
        }

        let referenced: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM borrow_transactions WHERE item_id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if referenced {
            return Err(AppError::Conflict(format!(
                "Item {} has borrow history and cannot be deleted",
                id
            )));
        }

        sqlx::query("DELETE FROM inventory_items WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Conditional `available -> on_loan`; the only writer of `on_loan`
pub(crate) async fn reserve_item(conn: &mut PgConnection, item_id: i32) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE inventory_items SET status = 'on_loan' WHERE id = $1 AND status = 'available'",
    )
    .bind(item_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let barcode: Option<String> = sqlx::query_scalar("SELECT barcode FROM inventory_items WHERE id = $1")
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?;

    Err(match barcode {
        Some(barcode) => AppError::ItemUnavailable(barcode),
        None => AppError::ItemNotFound(item_id.to_string()),
    })
}

/// `on_loan -> available`
pub(crate) async fn release_item(conn: &mut PgConnection, item_id: i32) -> AppResult<()> {
    sqlx::query("UPDATE inventory_items SET status = 'available' WHERE id = $1 AND status = 'on_loan'")
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
