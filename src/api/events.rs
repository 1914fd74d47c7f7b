//! Real-time lifecycle events as Server-Sent Events

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};

use crate::{
    error::{AppError, AppResult},
    models::requester::{Requester, RequesterKind},
    services::notifications::Topic,
    AppState,
};

use super::AuthenticatedAdmin;

fn subscribe(
    state: &AppState,
    topic: Topic,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let hub = state.services.hub.as_ref().ok_or_else(|| {
        AppError::NotFound("Event stream is not served by this instance".to_string())
    })?;

    let channel = topic.channel();
    tracing::debug!(%channel, "Event stream opened");

    let stream = BroadcastStream::new(hub.subscribe()).filter_map(move |message| match message {
        Ok(envelope) if envelope.topic == topic => Event::default()
            .event(envelope.event.name())
            .json_data(&envelope)
            .map_err(|e| tracing::warn!("Failed to encode event: {}", e))
            .ok()
            .map(Ok),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(channel = %channel, skipped, "Event subscriber lagged");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Administrator room
#[utoipa::path(
    get,
    path = "/events/admin",
    tag = "events",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Streaming disabled", body = crate::error::ErrorResponse)
    )
)]
pub async fn admin_events(
    State(state): State<AppState>,
    AuthenticatedAdmin(claims): AuthenticatedAdmin,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    claims.require_desk()?;
    subscribe(&state, Topic::Admins)
}

/// Private channel of one requester.
///
/// Not authenticated: requesters hold no credentials on this server, so
/// anyone who knows a requester ID can follow that requester's events, the
/// same way `/borrow/status/{kind}/{id}` exposes their history. Deployments
/// that need more must gate this route at the proxy.
#[utoipa::path(
    get,
    path = "/events/requesters/{kind}/{id}",
    tag = "events",
    params(
        ("kind" = RequesterKind, Path, description = "student or lecturer"),
        ("id" = String, Path, description = "Requester ID")
    ),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Streaming disabled", body = crate::error::ErrorResponse)
    )
)]
pub async fn requester_events(
    State(state): State<AppState>,
    Path((kind, id)): Path<(RequesterKind, String)>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    subscribe(&state, Topic::Requester(Requester::new(kind, id.trim())))
}
