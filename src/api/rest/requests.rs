use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::lifecycle::{self, OtpStage};
use crate::engine::responses;
use crate::error::AppError;
use crate::models::request::{NewServiceRequest, PaymentStatus, RequestStatus, ServiceRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", post(create_request).get(list_requests))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/accept", post(accept_request))
        .route("/requests/:id/decline", post(decline_request))
        .route("/requests/:id/verify-otp", post(verify_otp))
        .route("/requests/:id/cancel", post(cancel_request))
        .route("/requests/:id/payment", patch(record_payment))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub provider_id: Option<Uuid>,
}

/// Provider identity comes from the auth layer in front of this service.
#[derive(Deserialize)]
pub struct ProviderAction {
    pub provider_id: Uuid,
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub otp: String,
    #[serde(rename = "type")]
    pub stage: OtpStage,
}

#[derive(Deserialize)]
pub struct PaymentUpdate {
    pub payment_status: PaymentStatus,
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewServiceRequest>,
) -> Result<(StatusCode, Json<ServiceRequest>), AppError> {
    let request = lifecycle::create_request(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServiceRequest>>, AppError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            RequestStatus::parse(raw)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };

    let mut requests = match (query.provider_id, status) {
        (Some(provider_id), _) => state.requests.find_by_provider(provider_id).await?,
        (None, Some(status)) => state.requests.find_all_by_status(status).await?,
        (None, None) => state.requests.list().await?,
    };
    if let (Some(_), Some(status)) = (query.provider_id, status) {
        requests.retain(|request| request.status == status);
    }

    Ok(Json(requests))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>, AppError> {
    let request = state
        .requests
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {} not found", id)))?;

    Ok(Json(request))
}

async fn accept_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProviderAction>,
) -> Result<Json<ServiceRequest>, AppError> {
    let request = responses::accept(&state, id, payload.provider_id).await?;
    Ok(Json(request))
}

async fn decline_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProviderAction>,
) -> Result<Json<ServiceRequest>, AppError> {
    let request = responses::decline(&state, id, payload.provider_id).await?;
    Ok(Json(request))
}

async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<ServiceRequest>, AppError> {
    if payload.otp.trim().is_empty() {
        return Err(AppError::BadRequest("otp is required".to_string()));
    }

    let request = lifecycle::verify_otp(&state, id, &payload.otp, payload.stage).await?;
    Ok(Json(request))
}

async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>, AppError> {
    let request = lifecycle::cancel_request(&state, id).await?;
    Ok(Json(request))
}

async fn record_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentUpdate>,
) -> Result<Json<ServiceRequest>, AppError> {
    let request = lifecycle::record_payment(&state, id, payload.payment_status).await?;
    Ok(Json(request))
}
