//! Data models for Borrowdesk

pub mod admin;
pub mod borrow;
pub mod inventory;
pub mod requester;
pub mod schedule;

// Re-export commonly used types
pub use admin::AdminClaims;
pub use borrow::{BorrowMetadata, BorrowStatus, BorrowTransaction, TransactionView};
pub use inventory::{InventoryItem, ItemStatus};
pub use requester::{Requester, RequesterKind, RequesterProfile};
pub use schedule::ScheduleSlot;
