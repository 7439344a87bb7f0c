//! Companion alert endpoints.

use axum::extract::State;

use super::{error, success, ApiResult};
use crate::relay::ReceiverState;
use crate::CompanionState;

fn revision(state: &ReceiverState) -> i64 {
    state.last_sequence.map_or(0, |seq| seq as i64)
}

/// GET /api/alerts - Lost posts mirrored from the primary.
pub async fn get_alerts(State(state): State<CompanionState>) -> ApiResult<ReceiverState> {
    let current = state.receiver.state();
    let revision_id = revision(&current);
    success(current, revision_id)
}

/// POST /api/alerts/refresh - Ask the primary to re-send its posts.
pub async fn refresh_alerts(State(state): State<CompanionState>) -> ApiResult<ReceiverState> {
    let result = state.receiver.request_refresh();
    let current = state.receiver.state();
    let revision_id = revision(&current);
    match result {
        Ok(()) => success(current, revision_id),
        Err(e) => error(e, revision_id),
    }
}
