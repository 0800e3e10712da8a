use tracing::{debug, info};

use crate::engine::to_chrono;
use crate::error::AppError;
use crate::models::event::{MatchEvent, MatchEventKind};
use crate::models::request::RequestStatus;
use crate::state::AppState;
use crate::store::{Guard, RequestPatch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Matched requests whose provider never answered.
    pub expired_matches: usize,
    /// Requests stuck in `searching` past the claim timeout.
    pub stale_claims: usize,
    /// Requests a provider tried to accept too late.
    pub reopened: usize,
}

impl SweepReport {
    pub fn reclaimed(&self) -> usize {
        self.expired_matches + self.stale_claims + self.reopened
    }
}

/// Puts timed-out work back into the pending pool. Each reset is a guarded
/// write carrying the deadline it was selected on, so a request that moved on
/// between the scan and the write is left alone.
pub async fn sweep(state: &AppState) -> Result<SweepReport, AppError> {
    let now = state.clock.now();
    let mut report = SweepReport::default();

    for request in state.requests.find_expired_matches(now).await? {
        let reclaimed = state
            .requests
            .conditional_update(
                request.id,
                Guard::status(RequestStatus::Matched).match_expired_by(now),
                RequestPatch::reset_to_pending(),
            )
            .await?;

        if reclaimed > 0 {
            info!(
                request_id = %request.id,
                provider_id = ?request.provider_id,
                "match expired; request back to pending"
            );
            report.expired_matches += 1;
            state.publish(MatchEvent {
                request_id: request.id,
                provider_id: request.provider_id,
                kind: MatchEventKind::Expired,
                at: now,
            });
        }
    }

    let claim_cutoff = now - to_chrono(state.policy.claim_timeout)?;
    for request in state.requests.find_stale_claims(claim_cutoff).await? {
        let reclaimed = state
            .requests
            .conditional_update(
                request.id,
                Guard::status(RequestStatus::Searching).claimed_by(claim_cutoff),
                RequestPatch::reset_to_pending(),
            )
            .await?;

        if reclaimed > 0 {
            info!(
                request_id = %request.id,
                claimed_at = ?request.claimed_at,
                "stale claim reclaimed; request back to pending"
            );
            report.stale_claims += 1;
            state.publish(MatchEvent {
                request_id: request.id,
                provider_id: None,
                kind: MatchEventKind::Reclaimed,
                at: now,
            });
        }
    }

    for request in state
        .requests
        .find_all_by_status(RequestStatus::Expired)
        .await?
    {
        let reopened = state
            .requests
            .conditional_update(
                request.id,
                Guard::status(RequestStatus::Expired),
                RequestPatch::reset_to_pending(),
            )
            .await?;

        if reopened > 0 {
            info!(request_id = %request.id, "expired request reopened for matching");
            report.reopened += 1;
            state.publish(MatchEvent {
                request_id: request.id,
                provider_id: None,
                kind: MatchEventKind::Reclaimed,
                at: now,
            });
        }
    }

    record(state, &report);
    debug!(reclaimed = report.reclaimed(), "sweep finished");

    Ok(report)
}

fn record(state: &AppState, report: &SweepReport) {
    let counters = [
        ("expired_match", report.expired_matches),
        ("stale_claim", report.stale_claims),
        ("reopened", report.reopened),
    ];

    for (reason, count) in counters {
        if count > 0 {
            state
                .metrics
                .reclaimed_requests_total
                .with_label_values(&[reason])
                .inc_by(count as u64);
        }
    }
}
