//! HTTP surface: tracking endpoints, analytics, and schedule management.
//!
//! Mount [`router`] into any axum application:
//!
//! ```rust,ignore
//! let app = axum::Router::new()
//!     .nest("/api", herald::http::router(scheduler, tracking));
//! ```
//!
//! The tracking endpoints are deliberately forgiving: a beacon hit always
//! gets its image and a link hit with a valid destination always gets its
//! redirect, whether or not the tracking id is recognized. Mail clients
//! must never see tracking-validity information leak through error shapes.

mod manage;
mod track;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::HeraldError;
use crate::scheduler::Scheduler;
use crate::tracking::TrackingService;

/// Shared state for routes.
#[derive(Clone)]
pub struct ApiState {
    scheduler: Arc<Scheduler>,
    tracking: Arc<TrackingService>,
}

/// Build the herald router.
pub fn router(scheduler: Arc<Scheduler>, tracking: Arc<TrackingService>) -> Router {
    let state = ApiState {
        scheduler,
        tracking,
    };

    Router::new()
        .route("/track/pixel", get(track::pixel))
        .route("/track/link", get(track::link))
        .route("/tracking/analytics", get(manage::analytics))
        .route("/tracking/{tracking_id}/events", get(manage::tracking_events))
        .route(
            "/schedules",
            post(manage::create_schedule).get(manage::list_schedules),
        )
        .route("/schedules/due", get(manage::list_due))
        .route(
            "/schedules/{id}",
            get(manage::get_schedule)
                .patch(manage::update_schedule)
                .delete(manage::delete_schedule),
        )
        .route("/schedules/{id}/cancel", post(manage::cancel_schedule))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Map a domain error onto an HTTP response.
fn error_response(error: HeraldError) -> Response {
    let status = match error {
        HeraldError::Validation(_) | HeraldError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
        HeraldError::NotFound { .. } => StatusCode::NOT_FOUND,
        HeraldError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Resolve the client address from proxy headers.
///
/// Precedence: `cf-connecting-ip`, `x-real-ip`, first `x-forwarded-for`
/// entry, then "unknown".
fn client_ip(headers: &HeaderMap) -> String {
    for name in ["cf-connecting-ip", "x-real-ip"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    "unknown".to_string()
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn referer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::REFERER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|r| !r.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("8.8.8.8"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("7.7.7.7"));
        assert_eq!(client_ip(&headers), "7.7.7.7");

        headers.remove("cf-connecting-ip");
        assert_eq!(client_ip(&headers), "8.8.8.8");

        headers.remove("x-real-ip");
        assert_eq!(client_ip(&headers), "9.9.9.9");

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers), "unknown");
    }
}
