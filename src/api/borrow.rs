//! Borrow lifecycle endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowTransaction, DirectLend, SubmitBorrow, SubmitOutcome, TransactionView},
        inventory::InventoryItem,
        requester::{Requester, RequesterInfo, RequesterKind},
    },
    services::expiry::SweepReport,
};

use super::AuthenticatedAdmin;

/// Borrow request submitted by a student or lecturer
#[derive(Deserialize, Validate, ToSchema)]
pub struct SubmitBorrowRequest {
    #[validate(nested)]
    pub requester: RequesterInfo,
    /// Schedule slot justifying the borrow
    pub schedule_id: i32,
    /// Preferred item, if already chosen
    pub item_id: Option<i32>,
    /// When the requester will bring the item back
    pub promised_return: DateTime<Utc>,
}

/// Checkout of an accepted request
#[derive(Deserialize, Validate, ToSchema)]
pub struct CompleteRequest {
    /// Scanned item; `barcode` may be given instead
    pub item_id: Option<i32>,
    #[validate(length(min = 1, max = 100))]
    pub barcode: Option<String>,
    pub promised_return: DateTime<Utc>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct RejectRequest {
    #[validate(length(min = 5, max = 500, message = "Reason must be 5-500 characters"))]
    pub reason: String,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct DirectLendRequest {
    #[validate(nested)]
    pub requester: RequesterInfo,
    pub item_id: i32,
    pub promised_return: DateTime<Utc>,
    /// Optional schedule slot; checked like a regular request when given
    pub schedule_id: Option<i32>,
}

#[derive(Default, Deserialize, Validate, ToSchema)]
pub struct ReturnRequest {
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
    pub transaction_id: Uuid,
}

/// Submit a borrow request
#[utoipa::path(
    post,
    path = "/borrow/requests",
    tag = "borrow",
    request_body = SubmitBorrowRequest,
    responses(
        (status = 201, description = "Request pending", body = SubmitOutcome),
        (status = 400, description = "Invalid return time or program mismatch", body = crate::error::ErrorResponse),
        (status = 404, description = "Requester, schedule or item not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Requester already has an open request", body = crate::error::ErrorResponse)
    )
)]
pub async fn submit_request(
    State(state): State<crate::AppState>,
    Json(request): Json<SubmitBorrowRequest>,
) -> AppResult<(StatusCode, Json<SubmitOutcome>)> {
    request.validate()?;

    let outcome = state
        .services
        .borrow
        .submit(SubmitBorrow {
            requester: request.requester.requester(),
            profile: request.requester.profile(),
            schedule_id: request.schedule_id,
            item_id: request.item_id,
            promised_return: request.promised_return,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Accept a pending request
#[utoipa::path(
    put,
    path = "/borrow/requests/{id}/accept",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Request accepted", body = SuccessResponse),
        (status = 404, description = "Not pending or already processed", body = crate::error::ErrorResponse)
    )
)]
pub async fn accept_request(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SuccessResponse>> {
    claims.require_desk()?;

    let transaction = state.services.borrow.accept(id, claims.admin_id).await?;
    Ok(Json(SuccessResponse {
        success: true,
        transaction_id: transaction.id,
    }))
}

/// Look up a scanned item before checkout
#[utoipa::path(
    get,
    path = "/borrow/scan/{barcode}",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(("barcode" = String, Path, description = "Item barcode")),
    responses(
        (status = 200, description = "Item ready for checkout", body = InventoryItem),
        (status = 404, description = "Unknown barcode", body = crate::error::ErrorResponse),
        (status = 409, description = "Item not available", body = crate::error::ErrorResponse)
    )
)]
pub async fn scan_barcode(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(barcode): Path<String>,
) -> AppResult<Json<InventoryItem>> {
    claims.require_desk()?;

    let item = state.services.inventory.scan_barcode(&barcode).await?;
    Ok(Json(item))
}

/// Check out an accepted request
#[utoipa::path(
    put,
    path = "/borrow/requests/{id}/complete",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = CompleteRequest,
    responses(
        (status = 200, description = "Item checked out", body = BorrowTransaction),
        (status = 404, description = "Not accepted or already processed", body = crate::error::ErrorResponse),
        (status = 409, description = "Item not available", body = crate::error::ErrorResponse)
    )
)]
pub async fn complete_request(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(id): Path<Uuid>,
    Json(request): Json<CompleteRequest>,
) -> AppResult<Json<BorrowTransaction>> {
    claims.require_desk()?;
    request.validate()?;

    let item_id = match (request.item_id, request.barcode.as_deref()) {
        (Some(item_id), _) => item_id,
        (None, Some(barcode)) => state.services.inventory.scan_barcode(barcode).await?.id,
        (None, None) => {
            return Err(AppError::Validation(
                "item_id or barcode is required".to_string(),
            ))
        }
    };

    let transaction = state
        .services
        .borrow
        .scan_and_checkout(id, claims.admin_id, item_id, request.promised_return)
        .await?;
    Ok(Json(transaction))
}

/// Reject a request before checkout
#[utoipa::path(
    put,
    path = "/borrow/requests/{id}/reject",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Request rejected", body = SuccessResponse),
        (status = 400, description = "Missing reason", body = crate::error::ErrorResponse),
        (status = 404, description = "Not open or already processed", body = crate::error::ErrorResponse)
    )
)]
pub async fn reject_request(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> AppResult<Json<SuccessResponse>> {
    claims.require_desk()?;
    request.validate()?;

    let transaction = state
        .services
        .borrow
        .reject(id, claims.admin_id, &request.reason)
        .await?;
    Ok(Json(SuccessResponse {
        success: true,
        transaction_id: transaction.id,
    }))
}

/// Lend an item directly
#[utoipa::path(
    post,
    path = "/borrow/direct-lending",
    tag = "borrow",
    security(("bearer_auth" = [])),
    request_body = DirectLendRequest,
    responses(
        (status = 201, description = "Item lent", body = BorrowTransaction),
        (status = 404, description = "Requester or item not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Item not available", body = crate::error::ErrorResponse)
    )
)]
pub async fn direct_lend(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Json(request): Json<DirectLendRequest>,
) -> AppResult<(StatusCode, Json<BorrowTransaction>)> {
    claims.require_desk()?;
    request.validate()?;

    let transaction = state
        .services
        .borrow
        .direct_lend(DirectLend {
            requester: request.requester.requester(),
            profile: request.requester.profile(),
            item_id: request.item_id,
            admin_id: claims.admin_id,
            promised_return: request.promised_return,
            schedule_id: request.schedule_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

/// Check in a loan
#[utoipa::path(
    put,
    path = "/borrow/transactions/{id}/return",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body(content = ReturnRequest, description = "Optional check-in note"),
    responses(
        (status = 200, description = "Item returned", body = BorrowTransaction),
        (status = 404, description = "Not on loan", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_transaction(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(id): Path<Uuid>,
    request: Option<Json<ReturnRequest>>,
) -> AppResult<Json<BorrowTransaction>> {
    claims.require_desk()?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let transaction = state
        .services
        .borrow
        .return_item(id, claims.admin_id, request.note)
        .await?;
    Ok(Json(transaction))
}

/// Check in the loan holding a scanned item
#[utoipa::path(
    post,
    path = "/borrow/returns/{barcode}",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(("barcode" = String, Path, description = "Item barcode")),
    request_body(content = ReturnRequest, description = "Optional check-in note"),
    responses(
        (status = 200, description = "Item returned", body = BorrowTransaction),
        (status = 404, description = "Unknown barcode or item not on loan", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_by_barcode(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(barcode): Path<String>,
    request: Option<Json<ReturnRequest>>,
) -> AppResult<Json<BorrowTransaction>> {
    claims.require_desk()?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let transaction = state
        .services
        .borrow
        .return_by_barcode(&barcode, claims.admin_id, request.note)
        .await?;
    Ok(Json(transaction))
}

/// Get one transaction
#[utoipa::path(
    get,
    path = "/borrow/transactions/{id}",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction", body = TransactionView),
        (status = 404, description = "Transaction not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_transaction(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TransactionView>> {
    claims.require_desk()?;

    let transaction = state.services.borrow.get(id).await?;
    Ok(Json(TransactionView::at(transaction, Utc::now())))
}

/// Open transactions of a requester
#[utoipa::path(
    get,
    path = "/borrow/status/{kind}/{id}",
    tag = "borrow",
    params(
        ("kind" = RequesterKind, Path, description = "student or lecturer"),
        ("id" = String, Path, description = "Requester ID")
    ),
    responses(
        (status = 200, description = "Pending, accepted and active transactions", body = Vec<TransactionView>)
    )
)]
pub async fn requester_status(
    State(state): State<crate::AppState>,
    Path((kind, id)): Path<(RequesterKind, String)>,
) -> AppResult<Json<Vec<TransactionView>>> {
    let transactions = state
        .services
        .borrow
        .requester_status(&Requester::new(kind, id.trim()))
        .await?;
    Ok(Json(transactions))
}

/// Requests waiting on an administrator
#[utoipa::path(
    get,
    path = "/borrow/pending-requests",
    tag = "borrow",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Pending and accepted requests", body = Vec<TransactionView>)
    )
)]
pub async fn pending_requests(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
) -> AppResult<Json<Vec<TransactionView>>> {
    claims.require_desk()?;

    let requests = state.services.borrow.pending_requests().await?;
    Ok(Json(requests))
}

/// Items currently out
#[utoipa::path(
    get,
    path = "/borrow/current-loans",
    tag = "borrow",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Active and overdue loans", body = Vec<TransactionView>)
    )
)]
pub async fn current_loans(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
) -> AppResult<Json<Vec<TransactionView>>> {
    claims.require_desk()?;

    let loans = state.services.borrow.current_loans().await?;
    Ok(Json(loans))
}

/// Run the expiry / overdue sweep now
#[utoipa::path(
    post,
    path = "/borrow/sweep",
    tag = "borrow",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sweep report", body = SweepReport)
    )
)]
pub async fn sweep(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
) -> AppResult<Json<SweepReport>> {
    claims.require_desk()?;

    let report = state.services.borrow.sweep().await?;
    tracing::info!(
        admin_id = claims.admin_id,
        expired = report.expired,
        overdue = report.overdue,
        "Manual sweep"
    );
    Ok(Json(report))
}
