use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::load_request;
use crate::error::AppError;
use crate::models::event::{MatchEvent, MatchEventKind};
use crate::models::request::{NewServiceRequest, PaymentStatus, RequestStatus, ServiceRequest};
use crate::state::AppState;
use crate::store::{Guard, RequestPatch};

const TRANSITION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpStage {
    Start,
    Complete,
}

impl OtpStage {
    fn transition(&self) -> (RequestStatus, RequestStatus) {
        match self {
            OtpStage::Start => (RequestStatus::Accepted, RequestStatus::InProgress),
            OtpStage::Complete => (RequestStatus::InProgress, RequestStatus::Completed),
        }
    }

    fn event_kind(&self) -> MatchEventKind {
        match self {
            OtpStage::Start => MatchEventKind::Started,
            OtpStage::Complete => MatchEventKind::Completed,
        }
    }
}

pub async fn create_request(
    state: &AppState,
    new_request: NewServiceRequest,
) -> Result<ServiceRequest, AppError> {
    validate(&new_request)?;

    let now = state.clock.now();
    let request = ServiceRequest {
        id: Uuid::new_v4(),
        requester_id: new_request.requester_id,
        category: new_request.category.trim().to_string(),
        description: new_request.description,
        summary: new_request.summary,
        location: new_request.location,
        base_price: new_request.base_price,
        extra_charges: new_request.extra_charges,
        otp: generate_otp(),
        status: RequestStatus::Pending,
        provider_id: None,
        match_expiry: None,
        claimed_at: None,
        last_declined_by: None,
        payment_status: PaymentStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    state.requests.insert(request.clone()).await?;
    info!(
        request_id = %request.id,
        category = %request.category,
        "service request created"
    );

    Ok(request)
}

fn validate(new_request: &NewServiceRequest) -> Result<(), AppError> {
    if new_request.category.trim().is_empty() {
        return Err(AppError::BadRequest("category cannot be empty".to_string()));
    }

    if new_request.description.trim().is_empty() {
        return Err(AppError::BadRequest("description cannot be empty".to_string()));
    }

    let prices = [new_request.base_price, new_request.extra_charges];
    if prices.iter().any(|price| !price.is_finite() || *price < 0.0) {
        return Err(AppError::BadRequest(
            "prices must be non-negative numbers".to_string(),
        ));
    }

    let location = new_request.location;
    if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lng) {
        return Err(AppError::BadRequest("location is out of range".to_string()));
    }

    Ok(())
}

fn generate_otp() -> String {
    rand::rng().random_range(100_000..1_000_000).to_string()
}

/// Checks the job's OTP and moves it one step along: accepted to in-progress
/// on start, in-progress to completed on completion.
pub async fn verify_otp(
    state: &AppState,
    request_id: Uuid,
    otp: &str,
    stage: OtpStage,
) -> Result<ServiceRequest, AppError> {
    let request = load_request(state, request_id).await?;

    if request.otp != otp.trim() {
        return Err(AppError::InvalidOtp);
    }

    let (from, to) = stage.transition();
    if request.status != from {
        return Err(AppError::InvalidTransition {
            from: request.status,
            to,
        });
    }

    let updated = state
        .requests
        .conditional_update(
            request_id,
            Guard::status(from),
            RequestPatch {
                status: Some(to),
                ..RequestPatch::default()
            },
        )
        .await?;
    if updated == 0 {
        return Err(AppError::Conflict(format!(
            "request {request_id} changed while verifying otp"
        )));
    }

    info!(request_id = %request_id, status = %to, "otp verified");
    state.publish(MatchEvent {
        request_id,
        provider_id: request.provider_id,
        kind: stage.event_kind(),
        at: state.clock.now(),
    });

    load_request(state, request_id).await
}

/// Requester cancellation. Allowed from every state except `completed`;
/// cancelling twice is rejected.
pub async fn cancel_request(
    state: &AppState,
    request_id: Uuid,
) -> Result<ServiceRequest, AppError> {
    let mut previous_provider = None;

    let cancelled = transition_with_retry(state, request_id, |current| {
        if !current.status.can_transition_to(RequestStatus::Cancelled) {
            return Err(AppError::InvalidTransition {
                from: current.status,
                to: RequestStatus::Cancelled,
            });
        }
        previous_provider = current.provider_id;
        Ok(RequestPatch::release_to(RequestStatus::Cancelled))
    })
    .await?;

    info!(request_id = %request_id, "service request cancelled");
    state.publish(MatchEvent {
        request_id,
        provider_id: previous_provider,
        kind: MatchEventKind::Cancelled,
        at: state.clock.now(),
    });

    Ok(cancelled)
}

pub async fn record_payment(
    state: &AppState,
    request_id: Uuid,
    payment_status: PaymentStatus,
) -> Result<ServiceRequest, AppError> {
    let updated = transition_with_retry(state, request_id, |_| {
        Ok(RequestPatch {
            payment_status: Some(payment_status),
            ..RequestPatch::default()
        })
    })
    .await?;

    info!(request_id = %request_id, payment_status = ?payment_status, "payment status recorded");
    Ok(updated)
}

/// Read, plan a patch against what was read, write it guarded on the status
/// that was read. Retries a few times if the status moved in between.
async fn transition_with_retry<F>(
    state: &AppState,
    request_id: Uuid,
    mut plan: F,
) -> Result<ServiceRequest, AppError>
where
    F: FnMut(&ServiceRequest) -> Result<RequestPatch, AppError>,
{
    for attempt in 1..=TRANSITION_ATTEMPTS {
        let current = load_request(state, request_id).await?;
        let patch = plan(&current)?;

        let updated = state
            .requests
            .conditional_update(request_id, Guard::status(current.status), patch)
            .await?;
        if updated > 0 {
            return load_request(state, request_id).await;
        }

        debug!(request_id = %request_id, attempt, "request changed underneath; retrying");
    }

    Err(AppError::Conflict(format!(
        "request {request_id} kept changing; try again"
    )))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{generate_otp, validate};
    use crate::models::provider::GeoPoint;
    use crate::models::request::NewServiceRequest;

    fn new_request() -> NewServiceRequest {
        NewServiceRequest {
            requester_id: Uuid::new_v4(),
            category: "plumbing".to_string(),
            description: "kitchen sink leaking".to_string(),
            summary: None,
            location: GeoPoint {
                lat: 19.07,
                lng: 72.87,
            },
            base_price: 350.0,
            extra_charges: 0.0,
        }
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..100 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn rejects_blank_category_and_negative_price() {
        assert!(validate(&new_request()).is_ok());

        let mut blank = new_request();
        blank.category = "  ".to_string();
        assert!(validate(&blank).is_err());

        let mut negative = new_request();
        negative.extra_charges = -10.0;
        assert!(validate(&negative).is_err());

        let mut off_planet = new_request();
        off_planet.location.lat = 123.0;
        assert!(validate(&off_planet).is_err());
    }
}
