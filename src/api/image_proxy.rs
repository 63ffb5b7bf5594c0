//! Allow-listed image proxy
//!
//! GET /api/img?url=<https-url>
//!
//! Lets the browser load images from hosts that refuse hotlinked requests.
//! Only https URLs on the configured hosts are fetched; anything else is
//! rejected before a request leaves the server. Redirects are held to the
//! same rules hop by hop.

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use reqwest::redirect;
use serde::Deserialize;
use url::Url;

use super::error::ApiError;
use crate::AppState;

pub const PROXY_CACHE_CONTROL: &str =
    "public, max-age=86400, s-maxage=604800, stale-while-revalidate=86400";

const PROXY_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
const PROXY_USER_AGENT: &str = "Mozilla/5.0 (compatible; LoadoutImageProxy/1.0)";
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
}

/// Check a proxy target against the scheme and host rules
pub fn validate_target(raw: Option<&str>, allowed_hosts: &[String]) -> Result<Url, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing url parameter".to_string()))?;

    let url = Url::parse(raw).map_err(|_| ApiError::BadRequest("invalid url".to_string()))?;

    if url.scheme() != "https" {
        return Err(ApiError::BadRequest("only https urls can be proxied".to_string()));
    }

    let host = url
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| ApiError::BadRequest("url has no host".to_string()))?;

    if !allowed_hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(&host)) {
        return Err(ApiError::Forbidden(format!("host '{host}' is not allowed")));
    }

    Ok(url)
}

fn proxy_headers(target: &Url) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(PROXY_ACCEPT));
    headers.insert(header::USER_AGENT, HeaderValue::from_static(PROXY_USER_AGENT));
    let referer = format!("{}/", target.origin().ascii_serialization());
    if let Ok(value) = HeaderValue::from_str(&referer) {
        headers.insert(header::REFERER, value);
    }
    headers
}

/// What to do with a redirect returned by an allow-listed host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectDecision {
    Follow,
    /// Hand the 3xx back, which the relay reports as an upstream error
    Stop,
    TooMany,
}

/// Every hop must pass the same scheme and host rules as the requested URL
pub fn redirect_decision(next: &Url, hops: usize, allowed_hosts: &[String]) -> RedirectDecision {
    if hops > MAX_REDIRECTS {
        RedirectDecision::TooMany
    } else if validate_target(Some(next.as_str()), allowed_hosts).is_ok() {
        RedirectDecision::Follow
    } else {
        RedirectDecision::Stop
    }
}

/// HTTP client for the proxy; redirects are re-checked against the allow list
pub fn proxy_client(allowed_hosts: &[String], timeout: Duration) -> reqwest::Result<reqwest::Client> {
    let hosts = allowed_hosts.to_vec();
    let policy = redirect::Policy::custom(move |attempt| {
        match redirect_decision(attempt.url(), attempt.previous().len(), &hosts) {
            RedirectDecision::Follow => attempt.follow(),
            RedirectDecision::Stop => {
                tracing::warn!(location = %attempt.url(), "Image proxy refused redirect");
                attempt.stop()
            }
            RedirectDecision::TooMany => attempt.error("too many redirects"),
        }
    });

    reqwest::Client::builder().timeout(timeout).redirect(policy).build()
}

/// Turn the upstream answer into the proxy response.
///
/// The body is streamed through; caching is always ours, never the upstream's.
pub fn relay_upstream(target: &Url, upstream: reqwest::Response) -> Result<Response, ApiError> {
    let status = upstream.status();
    if !status.is_success() {
        tracing::warn!(url = %target, status = %status, "Image proxy upstream error");
        return Err(ApiError::Upstream(status));
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("image/png"));

    let body = Body::from_stream(upstream.bytes_stream());

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static(PROXY_CACHE_CONTROL)),
        ],
        body,
    )
        .into_response())
}

/// Stream an allow-listed image back to the caller
async fn proxy_image(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, ApiError> {
    let target = validate_target(query.url.as_deref(), &state.config.proxy_allowed_hosts)?;

    let upstream = state
        .http_client
        .get(target.clone())
        .headers(proxy_headers(&target))
        .send()
        .await
        .map_err(|e| {
            ApiError::Internal(anyhow::anyhow!("image proxy fetch of {} failed: {}", target, e))
        })?;

    relay_upstream(&target, upstream)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/img", get(proxy_image))
}
