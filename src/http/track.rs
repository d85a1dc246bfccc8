//! Beacon and link-redirect endpoints.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use serde::Deserialize;
use std::sync::OnceLock;
use url::Url;

use crate::tracking::EventInput;

use super::{client_ip, referer, user_agent, ApiState, ErrorBody};

/// 1x1 transparent GIF, decoded once.
fn pixel_gif() -> &'static [u8] {
    static PIXEL: OnceLock<Vec<u8>> = OnceLock::new();
    PIXEL.get_or_init(|| {
        base64::engine::general_purpose::STANDARD
            .decode("R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7")
            .unwrap_or_default()
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct PixelQuery {
    /// Tracking identifier.
    t: Option<String>,
}

/// GET /track/pixel?t=<trackingId>
///
/// Always answers with the image, whatever the tracking id - mail clients
/// must never see an error, and an unknown id must be indistinguishable
/// from a known one. Recording failures are absorbed.
pub(super) async fn pixel(
    State(state): State<ApiState>,
    Query(query): Query<PixelQuery>,
    headers: HeaderMap,
) -> Response {
    if let Some(tracking_id) = query.t.filter(|t| !t.is_empty()) {
        let mut event = EventInput::open(tracking_id, client_ip(&headers), user_agent(&headers));
        if let Some(referer) = referer(&headers) {
            event = event.referer(referer);
        }
        if let Err(error) = state.tracking.record_event(event).await {
            tracing::warn!(error = %error, "Failed to record open event");
        }
    }

    serve_pixel()
}

fn serve_pixel() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        pixel_gif().to_vec(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub(super) struct LinkQuery {
    /// Tracking identifier.
    t: Option<String>,
    /// URL-encoded original destination.
    u: Option<String>,
    /// Optional link identifier.
    l: Option<String>,
}

/// GET /track/link?t=<trackingId>&u=<destination>&l=<linkId>
///
/// Records a click (when the tracking id is recognized) and redirects to
/// the decoded destination. Destinations that are not well-formed absolute
/// http(s) URLs, or that point at loopback/private ranges, are rejected -
/// this endpoint must not be an open redirector.
pub(super) async fn link(
    State(state): State<ApiState>,
    Query(query): Query<LinkQuery>,
    headers: HeaderMap,
) -> Response {
    let (Some(tracking_id), Some(destination)) = (query.t, query.u) else {
        return bad_request("Missing required parameters");
    };
    if tracking_id.is_empty() || destination.is_empty() {
        return bad_request("Missing required parameters");
    }

    if !is_safe_destination(&destination) {
        return bad_request("Invalid URL");
    }

    let mut event = EventInput::click(
        tracking_id,
        client_ip(&headers),
        user_agent(&headers),
        destination.clone(),
    );
    if let Some(link_id) = query.l.filter(|l| !l.is_empty()) {
        event = event.link_id(link_id);
    }
    if let Some(referer) = referer(&headers) {
        event = event.referer(referer);
    }
    if let Err(error) = state.tracking.record_event(event).await {
        tracing::warn!(error = %error, "Failed to record click event");
    }

    match header::HeaderValue::from_str(&destination) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(_) => bad_request("Invalid URL"),
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Open-redirect hardening: absolute http(s) URLs only, and never loopback
/// or private ranges.
fn is_safe_destination(destination: &str) -> bool {
    let Ok(url) = Url::parse(destination) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    if host == "localhost" || host.starts_with("127.") {
        return false;
    }
    if host.starts_with("10.") || host.starts_with("192.168.") {
        return false;
    }
    // 172.16.0.0/12
    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next().and_then(|s| s.parse::<u8>().ok()) {
            if (16..=31).contains(&second) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_gif_has_gif_magic() {
        assert_eq!(&pixel_gif()[..6], b"GIF89a");
    }

    #[test]
    fn safe_destinations() {
        assert!(is_safe_destination("https://example.com/x"));
        assert!(is_safe_destination("http://example.com/path?q=1"));
    }

    #[test]
    fn unsafe_destinations_rejected() {
        assert!(!is_safe_destination("not a url"));
        assert!(!is_safe_destination("/relative/path"));
        assert!(!is_safe_destination("javascript:alert(1)"));
        assert!(!is_safe_destination("ftp://example.com/file"));
        assert!(!is_safe_destination("http://localhost/admin"));
        assert!(!is_safe_destination("http://127.0.0.1:8080/"));
        assert!(!is_safe_destination("http://10.1.2.3/"));
        assert!(!is_safe_destination("http://192.168.1.1/"));
        assert!(!is_safe_destination("http://172.16.0.1/"));
        assert!(!is_safe_destination("http://172.31.255.1/"));
    }

    #[test]
    fn edge_of_private_range_allowed() {
        assert!(is_safe_destination("http://172.15.0.1/"));
        assert!(is_safe_destination("http://172.32.0.1/"));
    }
}
