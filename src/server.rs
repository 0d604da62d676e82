// SPDX-License-Identifier: MPL-2.0

//! XRPC endpoints for the feed generator.

use crate::feed::{Algorithm, FeedContext, FeedError, FeedParams, Skeleton, clamp_limit};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const GENERATOR_COLLECTION: &str = "app.bsky.feed.generator";

/// Shared state behind every route
pub struct AppState {
    pub feed: FeedContext,
    pub hostname: String,
    pub publisher_did: String,
    pub service_did: String,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl AppState {
    fn feed_uri(&self, algo: Algorithm) -> String {
        format!(
            "at://{}/{GENERATOR_COLLECTION}/{}",
            self.publisher_did,
            algo.shortname()
        )
    }

    /// Resolve a feed at-uri to one of our algorithms.
    fn algorithm_for(&self, feed: &str) -> Result<Algorithm, FeedError> {
        let unsupported = || FeedError::UnsupportedAlgorithm(feed.to_string());

        let rest = feed.strip_prefix("at://").ok_or_else(unsupported)?;
        let mut parts = rest.splitn(3, '/');
        let (Some(did), Some(collection), Some(rkey)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(unsupported());
        };
        if did != self.publisher_did || collection != GENERATOR_COLLECTION {
            return Err(unsupported());
        }
        Algorithm::from_shortname(rkey).ok_or_else(unsupported)
    }
}

#[derive(Debug, Deserialize)]
struct SkeletonQuery {
    feed: Option<String>,
    /// Kept as text so a bad value maps to an XRPC error
    limit: Option<String>,
    cursor: Option<String>,
}

#[derive(Serialize)]
struct XrpcErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            FeedError::InvalidRequest(message) => {
                (StatusCode::BAD_REQUEST, "InvalidRequest", message.clone())
            }
            FeedError::UnsupportedAlgorithm(_) => {
                (StatusCode::BAD_REQUEST, "UnsupportedAlgorithm", self.to_string())
            }
            FeedError::Db(e) => {
                tracing::error!(error = %e, "feed query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(XrpcErrorBody { error, message })).into_response()
    }
}

async fn get_feed_skeleton(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SkeletonQuery>,
) -> Result<Json<Skeleton>, FeedError> {
    let feed = query
        .feed
        .ok_or_else(|| FeedError::InvalidRequest("missing feed parameter".to_string()))?;
    let algo = state.algorithm_for(&feed)?;

    let requested = match query.limit.as_deref() {
        Some(raw) => Some(
            raw.trim()
                .parse::<usize>()
                .map_err(|_| FeedError::InvalidRequest(format!("invalid limit: {raw}")))?,
        ),
        None => None,
    };
    let params = FeedParams {
        limit: clamp_limit(requested, state.default_limit, state.max_limit),
        cursor: query.cursor.filter(|c| !c.is_empty()),
    };

    let skeleton = algo.skeleton(&state.feed, &params, chrono::Utc::now()).await?;
    tracing::debug!(
        feed = algo.shortname(),
        limit = params.limit,
        returned = skeleton.feed.len(),
        "served feed skeleton"
    );
    Ok(Json(skeleton))
}

async fn describe_feed_generator(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let feeds: Vec<_> = Algorithm::ALL
        .into_iter()
        .map(|algo| json!({ "uri": state.feed_uri(algo) }))
        .collect();
    Json(json!({ "did": state.service_did, "feeds": feeds }))
}

async fn did_document(State(state): State<Arc<AppState>>) -> Response {
    if state.service_did != format!("did:web:{}", state.hostname) {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": state.service_did,
        "service": [{
            "id": "#bsky_fg",
            "type": "BskyFeedGenerator",
            "serviceEndpoint": format!("https://{}", state.hostname),
        }],
    }))
    .into_response()
}

async fn healthz() -> &'static str {
    "OK"
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/xrpc/app.bsky.feed.getFeedSkeleton",
            get(get_feed_skeleton),
        )
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(describe_feed_generator),
        )
        .route("/.well-known/did.json", get(did_document))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
