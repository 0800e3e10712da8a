use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::{load_request, to_chrono};
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::event::{MatchEvent, MatchEventKind};
use crate::models::provider::{GeoPoint, ServiceProvider};
use crate::models::request::RequestStatus;
use crate::state::AppState;
use crate::store::{Field, Guard, RequestPatch};

const RELEASE_ATTEMPTS: u32 = 3;
const RELEASE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(Uuid),
    NoProviderAvailable,
    /// Another actor holds or already finished the request.
    AlreadyClaimed,
}

impl MatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            MatchOutcome::Matched(_) => "matched",
            MatchOutcome::NoProviderAvailable => "no_provider",
            MatchOutcome::AlreadyClaimed => "already_claimed",
        }
    }
}

/// Claims a pending request, picks the nearest eligible provider and proposes
/// the job to them. The claim is released on every path that does not end in
/// a committed match.
pub async fn attempt_match(state: &AppState, request_id: Uuid) -> Result<MatchOutcome, AppError> {
    let start = Instant::now();
    let result = claim_and_match(state, request_id).await;
    let elapsed = start.elapsed().as_secs_f64();

    match &result {
        Ok(outcome) => state.metrics.observe_match(outcome.label(), elapsed),
        Err(_) => state.metrics.observe_match("error", elapsed),
    }

    result
}

async fn claim_and_match(state: &AppState, request_id: Uuid) -> Result<MatchOutcome, AppError> {
    let claimed_at = state.clock.now();
    let claimed = state
        .requests
        .conditional_update(
            request_id,
            Guard::status(RequestStatus::Pending),
            RequestPatch {
                status: Some(RequestStatus::Searching),
                claimed_at: Field::Set(claimed_at),
                ..RequestPatch::default()
            },
        )
        .await?;

    if claimed == 0 {
        debug!(request_id = %request_id, "request already claimed");
        return Ok(MatchOutcome::AlreadyClaimed);
    }

    let result = match_claimed(state, request_id, claimed_at).await;

    match &result {
        Ok(MatchOutcome::Matched(_)) | Ok(MatchOutcome::AlreadyClaimed) => {}
        Ok(MatchOutcome::NoProviderAvailable) => {
            release_claim(state, request_id, claimed_at).await;
        }
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "match failed after claim; releasing");
            release_claim(state, request_id, claimed_at).await;
        }
    }

    result
}

async fn match_claimed(
    state: &AppState,
    request_id: Uuid,
    claimed_at: DateTime<Utc>,
) -> Result<MatchOutcome, AppError> {
    let request = load_request(state, request_id).await?;

    let mut candidates = state.providers.find_eligible(&request.category).await?;
    if state.policy.exclude_last_decliner {
        if let Some(decliner) = request.last_declined_by {
            candidates.retain(|provider| provider.id != decliner);
        }
    }

    let Some((nearest, distance_km)) = select_nearest(&request.location, &candidates) else {
        warn!(
            request_id = %request_id,
            category = %request.category,
            "no eligible providers; releasing claim"
        );
        return Ok(MatchOutcome::NoProviderAvailable);
    };

    let match_expiry = state.clock.now() + to_chrono(state.policy.match_window)?;
    let committed = state
        .requests
        .conditional_update(
            request_id,
            Guard::status(RequestStatus::Searching).lease(claimed_at),
            RequestPatch {
                status: Some(RequestStatus::Matched),
                provider_id: Field::Set(nearest.id),
                match_expiry: Field::Set(match_expiry),
                claimed_at: Field::Clear,
                ..RequestPatch::default()
            },
        )
        .await?;

    if committed == 0 {
        warn!(request_id = %request_id, "claim lost before commit");
        return Ok(MatchOutcome::AlreadyClaimed);
    }

    state.publish(MatchEvent {
        request_id,
        provider_id: Some(nearest.id),
        kind: MatchEventKind::Matched,
        at: state.clock.now(),
    });

    info!(
        request_id = %request_id,
        provider_id = %nearest.id,
        distance_km,
        candidates = candidates.len(),
        "request matched"
    );

    Ok(MatchOutcome::Matched(nearest.id))
}

async fn release_claim(state: &AppState, request_id: Uuid, claimed_at: DateTime<Utc>) {
    for attempt in 1..=RELEASE_ATTEMPTS {
        match state
            .requests
            .conditional_update(
                request_id,
                Guard::status(RequestStatus::Searching).lease(claimed_at),
                RequestPatch::reset_to_pending(),
            )
            .await
        {
            Ok(released) => {
                debug!(request_id = %request_id, released, "claim released");
                return;
            }
            Err(err) => {
                warn!(request_id = %request_id, attempt, error = %err, "failed to release claim");
                if attempt < RELEASE_ATTEMPTS {
                    sleep(RELEASE_BACKOFF * attempt).await;
                }
            }
        }
    }

    error!(
        request_id = %request_id,
        "claim release failed; sweeper will reclaim it after the claim timeout"
    );
}

/// Nearest candidate to `origin`. Equal distances resolve to the earlier
/// candidate.
pub fn select_nearest<'a>(
    origin: &GeoPoint,
    candidates: &'a [ServiceProvider],
) -> Option<(&'a ServiceProvider, f64)> {
    candidates
        .iter()
        .map(|provider| (provider, haversine_km(origin, &provider.location)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::select_nearest;
    use crate::models::provider::{GeoPoint, ServiceProvider};

    const KM_PER_DEGREE_AT_EQUATOR: f64 = 6_371.0 * std::f64::consts::PI / 180.0;

    fn provider_at_km(id_seed: u128, km_east: f64) -> ServiceProvider {
        ServiceProvider {
            id: Uuid::from_u128(id_seed),
            name: format!("provider-{id_seed}"),
            services: vec!["plumbing".to_string()],
            location: GeoPoint {
                lat: 0.0,
                lng: km_east / KM_PER_DEGREE_AT_EQUATOR,
            },
            verified: true,
            subscription_active: true,
            is_available: true,
            rating: 4.0,
            updated_at: Utc::now(),
        }
    }

    fn origin() -> GeoPoint {
        GeoPoint { lat: 0.0, lng: 0.0 }
    }

    #[test]
    fn picks_the_closest_provider() {
        let candidates = vec![
            provider_at_km(1, 3.2),
            provider_at_km(2, 1.0),
            provider_at_km(3, 5.5),
        ];

        let (nearest, distance) = select_nearest(&origin(), &candidates).unwrap();
        assert_eq!(nearest.id, Uuid::from_u128(2));
        assert!((distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn equal_distances_pick_the_first_candidate() {
        let candidates = vec![
            provider_at_km(7, 2.0),
            provider_at_km(8, 2.0),
            provider_at_km(9, 4.0),
        ];

        for _ in 0..10 {
            let (nearest, _) = select_nearest(&origin(), &candidates).unwrap();
            assert_eq!(nearest.id, Uuid::from_u128(7));
        }
    }

    #[test]
    fn empty_candidate_set_selects_nothing() {
        assert!(select_nearest(&origin(), &[]).is_none());
    }
}
