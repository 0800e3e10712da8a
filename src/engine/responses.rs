use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::load_request;
use crate::error::AppError;
use crate::models::event::{MatchEvent, MatchEventKind};
use crate::models::request::{RequestStatus, ServiceRequest};
use crate::state::AppState;
use crate::store::{Field, Guard, RequestPatch};

const ACCEPT_ATTEMPTS: u32 = 2;

/// Provider takes the proposed job. Past the match window the request moves
/// to `expired` instead and the caller gets [`AppError::MatchExpired`].
///
/// Both writes carry the deadline in their guard. If the stored match changed
/// after the read (swept and re-offered, or its window ran out), the offer is
/// read again before giving up.
pub async fn accept(
    state: &AppState,
    request_id: Uuid,
    provider_id: Uuid,
) -> Result<ServiceRequest, AppError> {
    for attempt in 1..=ACCEPT_ATTEMPTS {
        let request = find_offer(state, request_id, provider_id).await?;
        let now = state.clock.now();
        let offer = Guard::status(RequestStatus::Matched).provider(provider_id);

        if request.match_expiry.is_none_or(|expiry| now >= expiry) {
            let expired = state
                .requests
                .conditional_update(
                    request_id,
                    offer.match_expired_by(now),
                    RequestPatch::release_to(RequestStatus::Expired),
                )
                .await?;
            if expired == 0 {
                debug!(request_id = %request_id, attempt, "offer changed before expiring it");
                continue;
            }

            warn!(
                request_id = %request_id,
                provider_id = %provider_id,
                match_expiry = ?request.match_expiry,
                "accept arrived after match window"
            );
            record_response(state, "expired");
            state.publish(MatchEvent {
                request_id,
                provider_id: Some(provider_id),
                kind: MatchEventKind::Expired,
                at: now,
            });
            return Err(AppError::MatchExpired);
        }

        let accepted = state
            .requests
            .conditional_update(
                request_id,
                offer.match_open_at(now),
                RequestPatch {
                    status: Some(RequestStatus::Accepted),
                    match_expiry: Field::Clear,
                    ..RequestPatch::default()
                },
            )
            .await?;
        if accepted == 0 {
            debug!(request_id = %request_id, attempt, "offer changed before accepting it");
            continue;
        }

        info!(request_id = %request_id, provider_id = %provider_id, "match accepted");
        record_response(state, "accepted");
        state.publish(MatchEvent {
            request_id,
            provider_id: Some(provider_id),
            kind: MatchEventKind::Accepted,
            at: now,
        });

        return load_request(state, request_id).await;
    }

    Err(AppError::NoLongerAvailable)
}

/// Provider turns the job down; the request goes back to the pending pool and
/// remembers who declined it.
pub async fn decline(
    state: &AppState,
    request_id: Uuid,
    provider_id: Uuid,
) -> Result<ServiceRequest, AppError> {
    find_offer(state, request_id, provider_id).await?;

    let declined = state
        .requests
        .conditional_update(
            request_id,
            Guard::status(RequestStatus::Matched).provider(provider_id),
            RequestPatch {
                last_declined_by: Field::Set(provider_id),
                ..RequestPatch::reset_to_pending()
            },
        )
        .await?;
    if declined == 0 {
        return Err(AppError::NoLongerAvailable);
    }

    info!(
        request_id = %request_id,
        provider_id = %provider_id,
        "match declined; request back to pending"
    );
    record_response(state, "declined");
    state.publish(MatchEvent {
        request_id,
        provider_id: Some(provider_id),
        kind: MatchEventKind::Declined,
        at: state.clock.now(),
    });

    load_request(state, request_id).await
}

async fn find_offer(
    state: &AppState,
    request_id: Uuid,
    provider_id: Uuid,
) -> Result<ServiceRequest, AppError> {
    let request = load_request(state, request_id).await?;

    let offered = Guard::status(RequestStatus::Matched)
        .provider(provider_id)
        .admits(&request);
    if !offered {
        return Err(AppError::NoLongerAvailable);
    }

    Ok(request)
}

fn record_response(state: &AppState, action: &str) {
    state
        .metrics
        .provider_responses_total
        .with_label_values(&[action])
        .inc();
}
