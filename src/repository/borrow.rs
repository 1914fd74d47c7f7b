//! Borrow transaction methods on Repository

use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgConnection};
use uuid::Uuid;

use super::{
    inventory::{release_item, reserve_item},
    requesters::{insert_requester, lock_requester},
    status_texts, Repository,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowMetadata, BorrowStatus, BorrowTransaction, Inserted, ItemEffect, NewBorrow, Transition},
        requester::Requester,
    },
};

const ONE_OPEN_REQUEST: &str = "borrow_transactions_one_open_request";
const ONE_OPEN_LOAN: &str = "borrow_transactions_one_open_loan";

#[derive(Debug, FromRow)]
struct BorrowRow {
    id: Uuid,
    student_id: Option<String>,
    lecturer_id: Option<String>,
    schedule_id: Option<i32>,
    item_id: Option<i32>,
    promised_return: DateTime<Utc>,
    status: String,
    acceptance_deadline: Option<DateTime<Utc>>,
    metadata: Json<BorrowMetadata>,
    created_at: DateTime<Utc>,
    checkout_at: Option<DateTime<Utc>>,
    returned_at: Option<DateTime<Utc>>,
    checkout_admin_id: Option<i32>,
    checkin_admin_id: Option<i32>,
    checkin_note: Option<String>,
}

impl TryFrom<BorrowRow> for BorrowTransaction {
    type Error = AppError;

    fn try_from(row: BorrowRow) -> Result<Self, Self::Error> {
        Ok(BorrowTransaction {
            id: row.id,
            requester: Requester::from_columns(row.student_id, row.lecturer_id)?,
            schedule_id: row.schedule_id,
            item_id: row.item_id,
            promised_return: row.promised_return,
            status: row.status.parse()?,
            acceptance_deadline: row.acceptance_deadline,
            metadata: row.metadata.0,
            created_at: row.created_at,
            checkout_at: row.checkout_at,
            returned_at: row.returned_at,
            checkout_admin_id: row.checkout_admin_id,
            checkin_admin_id: row.checkin_admin_id,
            checkin_note: row.checkin_note,
        })
    }
}

fn collect(rows: Vec<BorrowRow>) -> AppResult<Vec<BorrowTransaction>> {
    rows.into_iter().map(BorrowTransaction::try_from).collect()
}

/// Translate the partial unique indexes into domain errors
fn map_insert_error(e: sqlx::Error, new: &NewBorrow) -> AppError {
    if let sqlx::Error::Database(ref db) = e {
        match db.constraint() {
            Some(ONE_OPEN_REQUEST) => return AppError::DuplicatePendingRequest(new.requester.key()),
            Some(ONE_OPEN_LOAN) => {
                return AppError::ItemUnavailable(
                    new.item_id.map(|id| id.to_string()).unwrap_or_default(),
                )
            }
            _ => {}
        }
    }
    AppError::Database(e)
}

impl Repository {
    /// Get transaction by ID
    pub async fn borrow_get(&self, id: Uuid) -> AppResult<Option<BorrowTransaction>> {
        sqlx::query_as::<_, BorrowRow>("SELECT * FROM borrow_transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(BorrowTransaction::try_from)
            .transpose()
    }

    /// Insert a submitted request or a direct loan
    pub async fn borrow_insert(&self, new: NewBorrow) -> AppResult<Inserted> {
        let mut tx = self.pool.begin().await?;

        if let Some(profile) = &new.profile {
            insert_requester(&mut tx, profile).await?;
        }
        lock_requester(&mut tx, &new.requester).await?;

        let mut expired = Vec::new();
        if let Some(transition) = &new.expire_stale {
            let open = sqlx::query_as::<_, BorrowRow>(
                r#"
                SELECT * FROM borrow_transactions
                WHERE requester_key = $1 AND status IN ('pending', 'accepted')
                FOR UPDATE
                "#,
            )
            .bind(new.requester.key())
            .fetch_all(&mut *tx)
            .await?;

            for current in collect(open)? {
                if transition.permits(&current) {
                    let next = transition.apply(current)?;
                    write_transaction(&mut tx, &next).await?;
                    expired.push(next);
                }
            }
        }

        if new.status == BorrowStatus::Pending {
            let open: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM borrow_transactions
                    WHERE requester_key = $1 AND status IN ('pending', 'accepted')
                )
                "#,
            )
            .bind(new.requester.key())
            .fetch_one(&mut *tx)
            .await?;

            if open {
                return Err(AppError::DuplicatePendingRequest(new.requester.key()));
            }
        }

        if new.status.holds_item() {
            let item_id = new.item_id.ok_or_else(|| {
                AppError::Validation("A loan must reference an inventory item".to_string())
            })?;
            reserve_item(&mut tx, item_id).await?;
        }

        let (student_id, lecturer_id) = new.requester.to_columns();
        let row = sqlx::query_as::<_, BorrowRow>(
            r#"
            INSERT INTO borrow_transactions
                (id, student_id, lecturer_id, requester_key, schedule_id, item_id, promised_return,
                 status, acceptance_deadline, metadata, created_at, checkout_at, checkout_admin_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(student_id)
        .bind(lecturer_id)
        .bind(new.requester.key())
        .bind(new.schedule_id)
        .bind(new.item_id)
        .bind(new.promised_return)
        .bind(new.status.as_str())
        .bind(new.acceptance_deadline)
        .bind(Json(&new.metadata))
        .bind(new.created_at)
        .bind(new.checkout_at)
        .bind(new.checkout_admin_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, &new))?;

        tx.commit().await?;
        Ok(Inserted {
            transaction: row.try_into()?,
            expired,
        })
    }

    /// Apply a guarded transition under a row lock
    pub async fn borrow_apply(&self, id: Uuid, transition: &Transition) -> AppResult<BorrowTransaction> {
        let mut tx = self.pool.begin().await?;

        let current: BorrowTransaction = sqlx::query_as::<_, BorrowRow>(
            "SELECT * FROM borrow_transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::TransactionNotFound(id))?
        .try_into()?;

        if !transition.permits(&current) {
            return Err(AppError::TransactionNotFound(id));
        }

        match transition.item {
            ItemEffect::Reserve(item_id) => reserve_item(&mut tx, item_id).await?,
            ItemEffect::Release => {
                if let Some(item_id) = current.item_id {
                    release_item(&mut tx, item_id).await?;
                }
            }
            ItemEffect::None => {}
        }

        let next = transition.apply(current)?;
        write_transaction(&mut tx, &next).await?;

        tx.commit().await?;
        Ok(next)
    }

    /// The open loan holding an item
    pub async fn borrow_find_open_loan(&self, item_id: i32) -> AppResult<Option<BorrowTransaction>> {
        sqlx::query_as::<_, BorrowRow>(
            "SELECT * FROM borrow_transactions WHERE item_id = $1 AND status IN ('active', 'overdue')",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?
        .map(BorrowTransaction::try_from)
        .transpose()
    }

    /// Transactions of one requester, newest first
    pub async fn borrow_list_for_requester(
        &self,
        requester: &Requester,
        statuses: &[BorrowStatus],
    ) -> AppResult<Vec<BorrowTransaction>> {
        let rows = sqlx::query_as::<_, BorrowRow>(
            r#"
            SELECT * FROM borrow_transactions
            WHERE requester_key = $1 AND status = ANY($2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(requester.key())
        .bind(status_texts(statuses))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    /// Transactions in the given statuses, oldest first
    pub async fn borrow_list_by_status(&self, statuses: &[BorrowStatus]) -> AppResult<Vec<BorrowTransaction>> {
        let rows = sqlx::query_as::<_, BorrowRow>(
            "SELECT * FROM borrow_transactions WHERE status = ANY($1) ORDER BY created_at ASC",
        )
        .bind(status_texts(statuses))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    pub async fn borrow_due_for_expiry(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM borrow_transactions
            WHERE (status = 'pending' AND acceptance_deadline <= $1)
               OR (status = 'accepted' AND promised_return <= $1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn borrow_due_for_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM borrow_transactions
            WHERE status = 'active' AND promised_return <= $1
            ORDER BY promised_return ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

/// Lock the open loan holding an item
pub(crate) async fn lock_open_loan(conn: &mut PgConnection, item_id: i32) -> AppResult<Option<BorrowTransaction>> {
    sqlx::query_as::<_, BorrowRow>(
        r#"
        SELECT * FROM borrow_transactions
        WHERE item_id = $1 AND status IN ('active', 'overdue')
        FOR UPDATE
        "#,
    )
    .bind(item_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(BorrowTransaction::try_from)
    .transpose()
}

/// Write every mutable column of a transaction
pub(crate) async fn write_transaction(conn: &mut PgConnection, t: &BorrowTransaction) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE borrow_transactions
        SET status = $2, item_id = $3, promised_return = $4, metadata = $5,
            checkout_at = $6, checkout_admin_id = $7,
            returned_at = $8, checkin_admin_id = $9, checkin_note = $10
        WHERE id = $1
        "#,
    )
    .bind(t.id)
    .bind(t.status.as_str())
    .bind(t.item_id)
    .bind(t.promised_return)
    .bind(Json(&t.metadata))
    .bind(t.checkout_at)
    .bind(t.checkout_admin_id)
    .bind(t.returned_at)
    .bind(t.checkin_admin_id)
    .bind(&t.checkin_note)
    .execute(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.constraint() == Some(ONE_OPEN_LOAN) => {
            AppError::ItemUnavailable(t.item_id.map(|id| id.to_string()).unwrap_or_default())
        }
        other => AppError::Database(other),
    })?;
    Ok(())
}
