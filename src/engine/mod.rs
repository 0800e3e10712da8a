pub mod lifecycle;
pub mod matcher;
pub mod responses;
pub mod scheduler;
pub mod sweeper;

use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::request::ServiceRequest;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct MatchingPolicy {
    /// Time between scheduler cycles.
    pub tick_interval: Duration,
    /// How long a provider has to accept a proposed match.
    pub match_window: Duration,
    /// How long a request may sit in `searching` before the sweeper takes the
    /// claim back.
    pub claim_timeout: Duration,
    pub max_concurrent_matches: usize,
    /// Skip the provider who most recently declined a request when re-matching it.
    pub exclude_last_decliner: bool,
}

impl Default for MatchingPolicy {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            match_window: Duration::from_secs(5 * 60),
            claim_timeout: Duration::from_secs(60),
            max_concurrent_matches: 8,
            exclude_last_decliner: true,
        }
    }
}

pub(crate) fn to_chrono(duration: Duration) -> Result<chrono::Duration, AppError> {
    chrono::Duration::from_std(duration)
        .map_err(|err| AppError::Internal(format!("duration out of range: {err}")))
}

pub(crate) async fn load_request(
    state: &AppState,
    request_id: Uuid,
) -> Result<ServiceRequest, AppError> {
    state
        .requests
        .find_by_id(request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {request_id} not found")))
}
