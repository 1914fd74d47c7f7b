//! Inventory endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::AppResult,
    models::inventory::{CreateItem, InventoryItem, ItemPage, ItemQuery, UpdateItem},
};

use super::AuthenticatedAdmin;

/// List items with their current borrower
#[utoipa::path(
    get,
    path = "/inventory",
    tag = "inventory",
    params(ItemQuery),
    responses(
        (status = 200, description = "Paginated items", body = ItemPage)
    )
)]
pub async fn list_items(
    State(state): State<crate::AppState>,
    Query(query): Query<ItemQuery>,
) -> AppResult<Json<ItemPage>> {
    let page = state.services.inventory.list(&query).await?;
    Ok(Json(page))
}

/// List items that can be lent right now
#[utoipa::path(
    get,
    path = "/inventory/available",
    tag = "inventory",
    responses(
        (status = 200, description = "Available items", body = Vec<InventoryItem>)
    )
)]
pub async fn list_available(State(state): State<crate::AppState>) -> AppResult<Json<Vec<InventoryItem>>> {
    let items = state.services.inventory.list_available().await?;
    Ok(Json(items))
}

/// Get item by ID
#[utoipa::path(
    get,
    path = "/inventory/{id}",
    tag = "inventory",
    params(("id" = i32, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Item details", body = InventoryItem),
        (status = 404, description = "Item not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_item(
    State(state): State<crate::AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<InventoryItem>> {
    let item = state.services.inventory.get(id).await?;
    Ok(Json(item))
}

/// Create item
#[utoipa::path(
    post,
    path = "/inventory",
    tag = "inventory",
    security(("bearer_auth" = [])),
    request_body = CreateItem,
    responses(
        (status = 201, description = "Item created", body = InventoryItem),
        (status = 400, description = "Invalid input", body = crate::error::ErrorResponse),
        (status = 409, description = "Barcode already used", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_item(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Json(item): Json<CreateItem>,
) -> AppResult<(StatusCode, Json<InventoryItem>)> {
    claims.require_desk()?;
    item.validate()?;

    let created = state.services.inventory.create(item).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Update item
#[utoipa::path(
    put,
    path = "/inventory/{id}",
    tag = "inventory",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Item ID")),
    request_body = UpdateItem,
    responses(
        (status = 200, description = "Item updated", body = InventoryItem),
        (status = 400, description = "Manual on_loan status", body = crate::error::ErrorResponse),
        (status = 404, description = "Item not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_item(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(id): Path<i32>,
    Json(update): Json<UpdateItem>,
) -> AppResult<Json<InventoryItem>> {
    claims.require_desk()?;
    update.validate()?;

    let item = state.services.inventory.update(id, update, claims.admin_id).await?;
    Ok(Json(item))
}

/// Delete item
#[utoipa::path(
    delete,
    path = "/inventory/{id}",
    tag = "inventory",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Item ID")),
    responses(
        (status = 204, description = "Item deleted"),
        (status = 404, description = "Item not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Item on loan or with history", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_item(
    State(state): State<crate::AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    claims.require_desk()?;

    state.services.inventory.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
