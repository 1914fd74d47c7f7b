//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{borrow, events, health, inventory};

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Borrowdesk API",
        version = "1.0.0",
        description = "Lab equipment borrowing REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    modifiers(&BearerAuth),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Borrow lifecycle
        borrow::submit_request,
        borrow::accept_request,
        borrow::scan_barcode,
        borrow::complete_request,
        borrow::reject_request,
        borrow::direct_lend,
        borrow::return_transaction,
        borrow::return_by_barcode,
        borrow::get_transaction,
        borrow::requester_status,
        borrow::pending_requests,
        borrow::current_loans,
        borrow::sweep,
        // Inventory
        inventory::list_items,
        inventory::list_available,
        inventory::get_item,
        inventory::create_item,
        inventory::update_item,
        inventory::delete_item,
        // Events
        events::admin_events,
        events::requester_events,
    ),
    components(
        schemas(
            // Borrow
            borrow::SubmitBorrowRequest,
            borrow::CompleteRequest,
            borrow::RejectRequest,
            borrow::DirectLendRequest,
            borrow::ReturnRequest,
            borrow::SuccessResponse,
            crate::models::borrow::BorrowStatus,
            crate::models::borrow::BorrowMetadata,
            crate::models::borrow::BorrowTransaction,
            crate::models::borrow::TransactionView,
            crate::models::borrow::SubmitOutcome,
            crate::models::requester::RequesterKind,
            crate::models::requester::RequesterInfo,
            crate::services::expiry::SweepReport,
            // Inventory
            crate::models::inventory::ItemStatus,
            crate::models::inventory::InventoryItem,
            crate::models::inventory::InventoryListEntry,
            crate::models::inventory::ItemPage,
            crate::models::inventory::CreateItem,
            crate::models::inventory::UpdateItem,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorCategory,
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "borrow", description = "Borrow request lifecycle"),
        (name = "inventory", description = "Inventory management"),
        (name = "events", description = "Real-time lifecycle events")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
