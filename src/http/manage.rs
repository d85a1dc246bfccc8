//! Schedule management and analytics endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{DeliveryRequest, DeliveryState, DeliveryUpdate};
use crate::store::DeliveryFilter;
use crate::tracking::{AnalyticsFilter, AnalyticsPage, TrackingEvent};

use super::{error_response, ApiState};

/// POST /schedules - create a delivery and bind its job.
pub(super) async fn create_schedule(
    State(state): State<ApiState>,
    Json(request): Json<DeliveryRequest>,
) -> Response {
    match state.scheduler.schedule(request).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    state: Option<DeliveryState>,
    created_by: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ScheduleList {
    schedules: Vec<crate::record::DeliveryRecord>,
}

/// GET /schedules - list deliveries, newest first.
pub(super) async fn list_schedules(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let filter = DeliveryFilter {
        state: query.state,
        created_by: query.created_by,
        limit: query.limit,
        offset: query.offset,
    };
    match state.scheduler.list(filter).await {
        Ok(schedules) => Json(ScheduleList { schedules }).into_response(),
        Err(error) => error_response(error),
    }
}

/// GET /schedules/due - pending deliveries at or past their scheduled time.
/// Used by external maintenance tooling.
pub(super) async fn list_due(State(state): State<ApiState>) -> Response {
    match state.scheduler.records().list_due(Utc::now()).await {
        Ok(schedules) => Json(ScheduleList { schedules }).into_response(),
        Err(error) => error_response(error),
    }
}

/// GET /schedules/{id}
pub(super) async fn get_schedule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.scheduler.get(&id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(error) => error_response(error),
    }
}

/// PATCH /schedules/{id} - update a pending delivery.
pub(super) async fn update_schedule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<DeliveryUpdate>,
) -> Response {
    match state.scheduler.update(&id, update).await {
        Ok(record) => Json(record).into_response(),
        Err(error) => error_response(error),
    }
}

/// POST /schedules/{id}/cancel
pub(super) async fn cancel_schedule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.scheduler.cancel(&id).await {
        Ok(record) => Json(record).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct DeleteQuery {
    /// Privilege claim from the (out-of-scope) authorization layer; the
    /// store still enforces the state precondition for ordinary deletes.
    #[serde(default)]
    elevated: bool,
}

/// DELETE /schedules/{id}
pub(super) async fn delete_schedule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    match state.scheduler.delete(&id, query.elevated).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct AnalyticsQuery {
    tracking_id: Option<String>,
    email_id: Option<String>,
    recipient_email: Option<String>,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// GET /tracking/analytics - paginated records plus the aggregate block.
pub(super) async fn analytics(
    State(state): State<ApiState>,
    Query(query): Query<AnalyticsQuery>,
) -> Response {
    let filter = AnalyticsFilter {
        tracking_id: query.tracking_id,
        email_id: query.email_id,
        recipient_email: query.recipient_email,
        date_from: query.date_from,
        date_to: query.date_to,
        limit: query.limit,
        offset: query.offset,
    };
    match state.tracking.analytics(filter).await {
        Ok(page) => Json::<AnalyticsPage>(page).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Serialize)]
struct EventList {
    events: Vec<TrackingEvent>,
}

/// GET /tracking/{tracking_id}/events - the audit log for one identifier.
pub(super) async fn tracking_events(
    State(state): State<ApiState>,
    Path(tracking_id): Path<String>,
) -> Response {
    match state.tracking.events(&tracking_id).await {
        Ok(events) => Json(EventList { events }).into_response(),
        Err(error) => error_response(error),
    }
}
