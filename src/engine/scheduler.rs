//! The matching loop.
//!
//! One owned task per process. Every tick it sweeps timed-out work back into
//! the pending pool and then tries to match each pending request, a bounded
//! number at a time. Nothing that happens inside a tick ends the loop; only
//! the shutdown token does.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::matcher::{attempt_match, MatchOutcome};
use crate::engine::sweeper::{sweep, SweepReport};
use crate::error::AppError;
use crate::models::request::RequestStatus;
use crate::state::AppState;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sweep: SweepReport,
    pub pending: usize,
    pub matched: usize,
    pub no_provider: usize,
    pub already_claimed: usize,
    pub failed: usize,
}

pub async fn run_matching_scheduler(state: Arc<AppState>, shutdown: CancellationToken) {
    info!(
        interval_ms = state.policy.tick_interval.as_millis() as u64,
        max_concurrent = state.policy.max_concurrent_matches,
        "matching scheduler started"
    );

    let mut ticker = interval(state.policy.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match run_cycle(state.clone(), &shutdown).await {
            Ok(report) => {
                if report.pending > 0 || report.sweep.reclaimed() > 0 {
                    info!(
                        pending = report.pending,
                        matched = report.matched,
                        no_provider = report.no_provider,
                        already_claimed = report.already_claimed,
                        failed = report.failed,
                        reclaimed = report.sweep.reclaimed(),
                        "matching cycle finished"
                    );
                }
            }
            Err(err) => {
                state.metrics.scheduler_cycle_failures_total.inc();
                error!(error = %err, "matching cycle failed");
            }
        }
    }

    info!("matching scheduler stopped");
}

/// One sweep followed by a match attempt for every pending request. Errors
/// from individual attempts are counted and logged, never returned. Once
/// `shutdown` fires no further attempts start; those in flight finish.
pub async fn run_cycle(
    state: Arc<AppState>,
    shutdown: &CancellationToken,
) -> Result<CycleReport, AppError> {
    let mut report = CycleReport::default();

    match sweep(&state).await {
        Ok(sweep_report) => report.sweep = sweep_report,
        Err(err) => {
            state.metrics.scheduler_cycle_failures_total.inc();
            error!(error = %err, "expiry sweep failed; matching pending requests anyway");
        }
    }

    let pending: Vec<Uuid> = state
        .requests
        .find_all_by_status(RequestStatus::Pending)
        .await?
        .into_iter()
        .map(|request| request.id)
        .collect();

    report.pending = pending.len();
    state.metrics.pending_requests.set(pending.len() as i64);

    let concurrency = state.policy.max_concurrent_matches.max(1);
    let mut attempts = stream::iter(pending)
        .take_while(|_| futures::future::ready(!shutdown.is_cancelled()))
        .map(|request_id| {
            let state = state.clone();
            async move {
                let handle = tokio::spawn(async move { attempt_match(&state, request_id).await });
                (request_id, handle.await)
            }
        })
        .buffer_unordered(concurrency);

    while let Some((request_id, joined)) = attempts.next().await {
        match joined {
            Ok(Ok(MatchOutcome::Matched(_))) => report.matched += 1,
            Ok(Ok(MatchOutcome::NoProviderAvailable)) => report.no_provider += 1,
            Ok(Ok(MatchOutcome::AlreadyClaimed)) => report.already_claimed += 1,
            Ok(Err(err)) => {
                report.failed += 1;
                warn!(request_id = %request_id, error = %err, "match attempt failed");
            }
            Err(join_err) => {
                report.failed += 1;
                error!(request_id = %request_id, error = %join_err, "match attempt panicked");
            }
        }
    }

    Ok(report)
}
