//! Inventory item model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::error::AppError;

/// Availability of a physical item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    OnLoan,
    InRepair,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::OnLoan => "on_loan",
            ItemStatus::InRepair => "in_repair",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ItemStatus::Available),
            "on_loan" => Ok(ItemStatus::OnLoan),
            "in_repair" => Ok(ItemStatus::InRepair),
            other => Err(AppError::Internal(format!("Unknown item status '{}'", other))),
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inventory item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InventoryItem {
    pub id: i32,
    /// Scannable code, unique across items
    pub barcode: String,
    /// Type / category (e.g. "Projector")
    pub item_type: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub description: Option<String>,
    /// Storage location
    pub location: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Short label for notifications ("Projector Epson EB-X05")
    pub fn display_name(&self) -> String {
        [Some(self.item_type.as_str()), self.brand.as_deref(), self.model.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Inventory listing entry with the current borrower, if any
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InventoryListEntry {
    #[serde(flatten)]
    pub item: InventoryItem,
    pub borrowed_by: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

/// Paginated inventory listing
#[derive(Debug, Serialize, ToSchema)]
pub struct ItemPage {
    pub items: Vec<InventoryListEntry>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Inventory query parameters
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ItemQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Create item request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateItem {
    #[validate(length(min = 1, max = 100, message = "Barcode is required"))]
    pub barcode: String,
    #[validate(length(min = 1, max = 100, message = "Item type is required"))]
    pub item_type: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    /// Initial status; items cannot be created on loan
    pub status: Option<ItemStatus>,
}

/// Update item request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateItem {
    #[validate(length(min = 1, max = 100))]
    pub barcode: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub item_type: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    /// Administrative status override
    pub status: Option<ItemStatus>,
}

impl UpdateItem {
    /// Copy the supplied fields onto an item
    pub fn apply_to(&self, item: &mut InventoryItem) {
        if let Some(ref v) = self.barcode {
            item.barcode = v.clone();
        }
        if let Some(ref v) = self.item_type {
            item.item_type = v.clone();
        }
        if self.brand.is_some() {
            item.brand = self.brand.clone();
        }
        if self.model.is_some() {
            item.model = self.model.clone();
        }
        if self.serial_number.is_some() {
            item.serial_number = self.serial_number.clone();
        }
        if self.description.is_some() {
            item.description = self.description.clone();
        }
        if self.location.is_some() {
            item.location = self.location.clone();
        }
        if self.purchase_date.is_some() {
            item.purchase_date = self.purchase_date;
        }
        if let Some(status) = self.status {
            item.status = status;
        }
    }
}
