//! Search API endpoints.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::{respond, ApiResult};
use crate::controllers::SearchOptions;
use crate::models::Post;
use crate::AppState;

/// Lost/found filter accepted by the search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    Lost,
    Found,
}

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Search query string.
    pub q: String,
    /// Maximum number of results (default: 20).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub status: Option<StatusFilter>,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<Post>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Maximum number of search results allowed.
const MAX_SEARCH_LIMIT: usize = 100;

/// GET /api/search - Search posts by item name, location, description and author.
pub async fn search_posts(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    let limit = params.limit.min(MAX_SEARCH_LIMIT);
    let options = SearchOptions {
        limit,
        offset: params.offset,
        status: params.status.map(|s| s == StatusFilter::Lost),
    };

    let result = state
        .posts
        .search_posts(&params.q, options)
        .await
        .map(|results| SearchResponse {
            total: results.len(),
            results,
            limit,
            offset: params.offset,
        });
    respond(&state, result).await
}
