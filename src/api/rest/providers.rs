use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::provider::{GeoPoint, ServiceProvider};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/providers", post(register_provider).get(list_providers))
        .route("/providers/:id/availability", patch(update_availability))
        .route("/providers/:id/verification", patch(update_verification))
        .route("/providers/:id/subscription", patch(update_subscription))
}

#[derive(Deserialize)]
pub struct RegisterProviderRequest {
    pub name: String,
    pub services: Vec<String>,
    pub location: GeoPoint,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub subscription_active: bool,
    #[serde(default = "default_available")]
    pub is_available: bool,
    #[serde(default)]
    pub rating: f64,
}

fn default_available() -> bool {
    true
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub is_available: bool,
}

#[derive(Deserialize)]
pub struct UpdateVerificationRequest {
    pub verified: bool,
}

#[derive(Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub subscription_active: bool,
}

async fn register_provider(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterProviderRequest>,
) -> Result<Json<ServiceProvider>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let services: Vec<String> = payload
        .services
        .iter()
        .map(|service| service.trim().to_string())
        .filter(|service| !service.is_empty())
        .collect();
    if services.is_empty() {
        return Err(AppError::BadRequest(
            "at least one service is required".to_string(),
        ));
    }

    let provider = ServiceProvider {
        id: Uuid::new_v4(),
        name: payload.name,
        services,
        location: payload.location,
        verified: payload.verified,
        subscription_active: payload.subscription_active,
        is_available: payload.is_available,
        rating: payload.rating.clamp(0.0, 5.0),
        updated_at: Utc::now(),
    };

    state.providers.register(provider.clone()).await?;
    Ok(Json(provider))
}

async fn list_providers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ServiceProvider>>, AppError> {
    Ok(Json(state.providers.list().await?))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<ServiceProvider>, AppError> {
    let provider = state
        .providers
        .set_availability(id, payload.is_available)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("provider {} not found", id)))?;

    Ok(Json(provider))
}

async fn update_verification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateVerificationRequest>,
) -> Result<Json<ServiceProvider>, AppError> {
    let provider = state
        .providers
        .set_verified(id, payload.verified)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("provider {} not found", id)))?;

    info!(provider_id = %id, verified = payload.verified, "provider verification updated");
    Ok(Json(provider))
}

async fn update_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSubscriptionRequest>,
) -> Result<Json<ServiceProvider>, AppError> {
    let provider = state
        .providers
        .set_subscription_active(id, payload.subscription_active)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("provider {} not found", id)))?;

    info!(
        provider_id = %id,
        subscription_active = payload.subscription_active,
        "provider subscription updated"
    );
    Ok(Json(provider))
}
