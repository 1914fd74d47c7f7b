//! API handlers for Borrowdesk REST endpoints

pub mod borrow;
pub mod events;
pub mod health;
pub mod inventory;
pub mod openapi;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use crate::{error::AppError, models::AdminClaims, AppState};

/// Extractor for an authenticated administrator from a JWT bearer token
pub struct AuthenticatedAdmin(pub AdminClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

        let claims = AdminClaims::from_token(token, &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        Ok(AuthenticatedAdmin(claims))
    }
}

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Borrow lifecycle
        .route("/borrow/requests", post(borrow::submit_request))
        .route("/borrow/requests/:id/accept", put(borrow::accept_request))
        .route("/borrow/requests/:id/complete", put(borrow::complete_request))
        .route("/borrow/requests/:id/reject", put(borrow::reject_request))
        .route("/borrow/scan/:barcode", get(borrow::scan_barcode))
        .route("/borrow/direct-lending", post(borrow::direct_lend))
        .route("/borrow/transactions/:id", get(borrow::get_transaction))
        .route("/borrow/transactions/:id/return", put(borrow::return_transaction))
        .route("/borrow/returns/:barcode", post(borrow::return_by_barcode))
        .route("/borrow/status/:kind/:id", get(borrow::requester_status))
        .route("/borrow/pending-requests", get(borrow::pending_requests))
        .route("/borrow/current-loans", get(borrow::current_loans))
        .route("/borrow/sweep", post(borrow::sweep))
        // Inventory
        .route(
            "/inventory",
            get(inventory::list_items).post(inventory::create_item),
        )
        .route("/inventory/available", get(inventory::list_available))
        .route(
            "/inventory/:id",
            get(inventory::get_item)
                .put(inventory::update_item)
                .delete(inventory::delete_item),
        )
        // Real-time events
        .route("/events/admin", get(events::admin_events))
        // Public, like the status route above
        .route("/events/requesters/:kind/:id", get(events::requester_events))
        .with_state(state);

    // OpenAPI documentation
    let openapi = openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
