//! One async function per HTTP endpoint. Handlers validate input, check
//! ownership or role, delegate to the repository and map the outcome to a
//! status code and JSON body.

pub mod features;
pub mod locations;
pub mod session;
pub mod system;
pub mod trails;
pub mod users;

use crate::{AppState, models::NewLogEntry};

/// record_action
///
/// Appends an audit entry. Runs after the mutation has committed, so a failed
/// write is logged and does not fail the request.
pub(crate) async fn record_action(state: &AppState, entry: NewLogEntry) {
    if let Err(e) = state.repo.log_action(&entry).await {
        tracing::warn!(
            action = entry.action.as_str(),
            user_id = entry.user_id,
            "Failed to write audit log entry: {}",
            e
        );
    }
}
