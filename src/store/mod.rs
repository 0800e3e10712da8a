//! Collaborator interfaces for request persistence and the provider directory.
//!
//! The matching engine only talks to these traits. Every state change on a
//! request is expressed as [`RequestStore::conditional_update`]: a [`Guard`]
//! describing what the stored row must look like and a [`RequestPatch`] to
//! apply if it does, evaluated and written as one step. Implementations must
//! not split that into a read followed by a write.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::provider::ServiceProvider;
use crate::models::request::{PaymentStatus, RequestStatus, ServiceRequest};

pub use memory::{InMemoryProviderDirectory, InMemoryRequestStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Unavailable(String),
}

/// Conditions the stored request must satisfy for a conditional update to
/// apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Guard {
    pub status: RequestStatus,
    pub provider_id: Option<Uuid>,
    pub match_expiry_not_after: Option<DateTime<Utc>>,
    pub match_open_after: Option<DateTime<Utc>>,
    pub claimed_not_after: Option<DateTime<Utc>>,
    pub lease: Option<DateTime<Utc>>,
}

impl Guard {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status,
            provider_id: None,
            match_expiry_not_after: None,
            match_open_after: None,
            claimed_not_after: None,
            lease: None,
        }
    }

    pub fn provider(mut self, provider_id: Uuid) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    /// Require `match_expiry <= at`.
    pub fn match_expired_by(mut self, at: DateTime<Utc>) -> Self {
        self.match_expiry_not_after = Some(at);
        self
    }

    /// Require `match_expiry > at`.
    pub fn match_open_at(mut self, at: DateTime<Utc>) -> Self {
        self.match_open_after = Some(at);
        self
    }

    /// Require `claimed_at <= at`.
    pub fn claimed_by(mut self, at: DateTime<Utc>) -> Self {
        self.claimed_not_after = Some(at);
        self
    }

    /// Require the stored claim to be the one taken at `claimed_at`.
    pub fn lease(mut self, claimed_at: DateTime<Utc>) -> Self {
        self.lease = Some(claimed_at);
        self
    }

    pub fn admits(&self, request: &ServiceRequest) -> bool {
        if request.status != self.status {
            return false;
        }

        if let Some(provider_id) = self.provider_id {
            if request.provider_id != Some(provider_id) {
                return false;
            }
        }

        if let Some(at) = self.match_expiry_not_after {
            if !request.match_expiry.is_some_and(|expiry| expiry <= at) {
                return false;
            }
        }

        if let Some(at) = self.match_open_after {
            if !request.match_expiry.is_some_and(|expiry| expiry > at) {
                return false;
            }
        }

        if let Some(at) = self.claimed_not_after {
            if !request.claimed_at.is_some_and(|claimed| claimed <= at) {
                return false;
            }
        }

        if let Some(lease) = self.lease {
            if request.claimed_at != Some(lease) {
                return false;
            }
        }

        true
    }
}

/// Tri-state update for a nullable column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Keep
    }
}

impl<T> Field<T> {
    fn apply(self, slot: &mut Option<T>) {
        match self {
            Field::Keep => {}
            Field::Set(value) => *slot = Some(value),
            Field::Clear => *slot = None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPatch {
    pub status: Option<RequestStatus>,
    pub provider_id: Field<Uuid>,
    pub match_expiry: Field<DateTime<Utc>>,
    pub claimed_at: Field<DateTime<Utc>>,
    pub last_declined_by: Field<Uuid>,
    pub payment_status: Option<PaymentStatus>,
}

impl RequestPatch {
    /// Back into the matching pool with no provider, expiry or claim.
    pub fn reset_to_pending() -> Self {
        Self::release_to(RequestStatus::Pending)
    }

    /// Move to `status` dropping every matching-related field.
    pub fn release_to(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            provider_id: Field::Clear,
            match_expiry: Field::Clear,
            claimed_at: Field::Clear,
            ..Self::default()
        }
    }

    pub fn apply_to(self, request: &mut ServiceRequest, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            request.status = status;
        }
        self.provider_id.apply(&mut request.provider_id);
        self.match_expiry.apply(&mut request.match_expiry);
        self.claimed_at.apply(&mut request.claimed_at);
        self.last_declined_by.apply(&mut request.last_declined_by);
        if let Some(payment_status) = self.payment_status {
            request.payment_status = payment_status;
        }
        request.updated_at = now;
    }
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(&self, request: ServiceRequest) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError>;

    async fn list(&self) -> Result<Vec<ServiceRequest>, StoreError>;

    /// Oldest first.
    async fn find_all_by_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<ServiceRequest>, StoreError>;

    /// Requests assigned to `provider_id` in any state, oldest first.
    async fn find_by_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<ServiceRequest>, StoreError>;

    /// Matched requests whose `match_expiry` is at or before `now`.
    async fn find_expired_matches(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ServiceRequest>, StoreError>;

    /// Searching requests claimed at or before `cutoff`.
    async fn find_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ServiceRequest>, StoreError>;

    /// Applies `patch` only if the stored request satisfies `guard`, as a
    /// single atomic step. Returns the number of rows affected (0 or 1).
    async fn conditional_update(
        &self,
        id: Uuid,
        guard: Guard,
        patch: RequestPatch,
    ) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn register(&self, provider: ServiceProvider) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ServiceProvider>, StoreError>;

    async fn list(&self) -> Result<Vec<ServiceProvider>, StoreError>;

    async fn set_availability(
        &self,
        id: Uuid,
        is_available: bool,
    ) -> Result<Option<ServiceProvider>, StoreError>;

    async fn set_verified(
        &self,
        id: Uuid,
        verified: bool,
    ) -> Result<Option<ServiceProvider>, StoreError>;

    async fn set_subscription_active(
        &self,
        id: Uuid,
        subscription_active: bool,
    ) -> Result<Option<ServiceProvider>, StoreError>;

    /// Verified, subscribed, available providers offering `category`, in a
    /// stable order.
    async fn find_eligible(&self, category: &str) -> Result<Vec<ServiceProvider>, StoreError>;
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{Field, Guard, RequestPatch};
    use crate::models::provider::GeoPoint;
    use crate::models::request::{PaymentStatus, RequestStatus, ServiceRequest};

    fn matched_request(provider_id: Uuid, expiry_in: Duration) -> ServiceRequest {
        let now = Utc::now();
        ServiceRequest {
            id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            category: "cleaning".to_string(),
            description: "deep clean, 2bhk".to_string(),
            summary: None,
            location: GeoPoint {
                lat: 12.97,
                lng: 77.59,
            },
            base_price: 1500.0,
            extra_charges: 0.0,
            otp: "123456".to_string(),
            status: RequestStatus::Matched,
            provider_id: Some(provider_id),
            match_expiry: Some(now + expiry_in),
            claimed_at: None,
            last_declined_by: None,
            payment_status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn guard_checks_status_and_provider() {
        let provider = Uuid::new_v4();
        let request = matched_request(provider, Duration::minutes(5));

        assert!(Guard::status(RequestStatus::Matched).admits(&request));
        assert!(!Guard::status(RequestStatus::Pending).admits(&request));
        assert!(Guard::status(RequestStatus::Matched)
            .provider(provider)
            .admits(&request));
        assert!(!Guard::status(RequestStatus::Matched)
            .provider(Uuid::new_v4())
            .admits(&request));
    }

    #[test]
    fn expiry_guard_rejects_fresh_matches() {
        let request = matched_request(Uuid::new_v4(), Duration::minutes(5));

        assert!(!Guard::status(RequestStatus::Matched)
            .match_expired_by(Utc::now())
            .admits(&request));
        assert!(Guard::status(RequestStatus::Matched)
            .match_expired_by(Utc::now() + Duration::minutes(10))
            .admits(&request));
    }

    #[test]
    fn open_guard_rejects_matches_at_their_expiry() {
        let request = matched_request(Uuid::new_v4(), Duration::minutes(5));
        let expiry = request.match_expiry.unwrap();

        let open_at = |at| Guard::status(RequestStatus::Matched).match_open_at(at);
        assert!(open_at(expiry - Duration::seconds(1)).admits(&request));
        assert!(!open_at(expiry).admits(&request));
        assert!(Guard::status(RequestStatus::Matched)
            .match_expired_by(expiry)
            .admits(&request));
    }

    #[test]
    fn reset_to_pending_clears_matching_fields() {
        let mut request = matched_request(Uuid::new_v4(), Duration::minutes(5));
        let declined_by = request.provider_id;

        RequestPatch {
            last_declined_by: declined_by.map(Field::Set).unwrap_or_default(),
            ..RequestPatch::reset_to_pending()
        }
        .apply_to(&mut request, Utc::now());

        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.provider_id.is_none());
        assert!(request.match_expiry.is_none());
        assert_eq!(request.last_declined_by, declined_by);
        assert!(request.is_consistent());
    }
}
