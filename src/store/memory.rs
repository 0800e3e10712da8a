use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::models::provider::ServiceProvider;
use crate::models::request::{RequestStatus, ServiceRequest};
use crate::store::{Guard, ProviderDirectory, RequestPatch, RequestStore, StoreError};

/// Requests keyed by id. A conditional update holds the entry's shard lock
/// for the guard check and the write. `updated_at` is stamped from `clock`.
pub struct InMemoryRequestStore {
    requests: DashMap<Uuid, ServiceRequest>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryRequestStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: DashMap::new(),
            clock,
        }
    }

    fn collect_where<F>(&self, predicate: F) -> Vec<ServiceRequest>
    where
        F: Fn(&ServiceRequest) -> bool,
    {
        let mut matching: Vec<ServiceRequest> = self
            .requests
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matching
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, request: ServiceRequest) -> Result<(), StoreError> {
        self.requests.insert(request.id, request);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError> {
        Ok(self.requests.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> Result<Vec<ServiceRequest>, StoreError> {
        Ok(self.collect_where(|_| true))
    }

    async fn find_all_by_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<ServiceRequest>, StoreError> {
        Ok(self.collect_where(|request| request.status == status))
    }

    async fn find_by_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<ServiceRequest>, StoreError> {
        Ok(self.collect_where(|request| request.provider_id == Some(provider_id)))
    }

    async fn find_expired_matches(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ServiceRequest>, StoreError> {
        let guard = Guard::status(RequestStatus::Matched).match_expired_by(now);
        Ok(self.collect_where(|request| guard.admits(request)))
    }

    async fn find_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ServiceRequest>, StoreError> {
        let guard = Guard::status(RequestStatus::Searching).claimed_by(cutoff);
        Ok(self.collect_where(|request| guard.admits(request)))
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        guard: Guard,
        patch: RequestPatch,
    ) -> Result<u64, StoreError> {
        let Some(mut entry) = self.requests.get_mut(&id) else {
            return Ok(0);
        };

        if !guard.admits(entry.value()) {
            return Ok(0);
        }

        patch.apply_to(entry.value_mut(), self.clock.now());
        Ok(1)
    }
}

struct Registered {
    seq: u64,
    provider: ServiceProvider,
}

/// Providers keyed by id, listed in registration order.
#[derive(Default)]
pub struct InMemoryProviderDirectory {
    providers: DashMap<Uuid, Registered>,
    next_seq: AtomicU64,
}

impl InMemoryProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_where<F>(&self, predicate: F) -> Vec<ServiceProvider>
    where
        F: Fn(&ServiceProvider) -> bool,
    {
        let mut matching: Vec<(u64, ServiceProvider)> = self
            .providers
            .iter()
            .filter(|entry| predicate(&entry.value().provider))
            .map(|entry| (entry.value().seq, entry.value().provider.clone()))
            .collect();

        matching.sort_by_key(|(seq, _)| *seq);
        matching.into_iter().map(|(_, provider)| provider).collect()
    }

    fn update<F>(&self, id: Uuid, change: F) -> Option<ServiceProvider>
    where
        F: FnOnce(&mut ServiceProvider),
    {
        self.providers.get_mut(&id).map(|mut entry| {
            change(&mut entry.provider);
            entry.provider.updated_at = Utc::now();
            entry.provider.clone()
        })
    }
}

#[async_trait]
impl ProviderDirectory for InMemoryProviderDirectory {
    async fn register(&self, provider: ServiceProvider) -> Result<(), StoreError> {
        match self.providers.entry(provider.id) {
            Entry::Occupied(mut existing) => existing.get_mut().provider = provider,
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(Registered { seq, provider });
            }
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ServiceProvider>, StoreError> {
        Ok(self
            .providers
            .get(&id)
            .map(|entry| entry.value().provider.clone()))
    }

    async fn list(&self) -> Result<Vec<ServiceProvider>, StoreError> {
        Ok(self.collect_where(|_| true))
    }

    async fn set_availability(
        &self,
        id: Uuid,
        is_available: bool,
    ) -> Result<Option<ServiceProvider>, StoreError> {
        Ok(self.update(id, |provider| provider.is_available = is_available))
    }

    async fn set_verified(
        &self,
        id: Uuid,
        verified: bool,
    ) -> Result<Option<ServiceProvider>, StoreError> {
        Ok(self.update(id, |provider| provider.verified = verified))
    }

    async fn set_subscription_active(
        &self,
        id: Uuid,
        subscription_active: bool,
    ) -> Result<Option<ServiceProvider>, StoreError> {
        Ok(self.update(id, |provider| {
            provider.subscription_active = subscription_active
        }))
    }

    async fn find_eligible(&self, category: &str) -> Result<Vec<ServiceProvider>, StoreError> {
        Ok(self.collect_where(|provider| provider.is_eligible_for(category)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::{InMemoryProviderDirectory, InMemoryRequestStore};
    use crate::clock::ManualClock;
    use crate::models::provider::{GeoPoint, ServiceProvider};
    use crate::models::request::{PaymentStatus, RequestStatus, ServiceRequest};
    use crate::store::{Guard, ProviderDirectory, RequestPatch, RequestStore};

    fn pending_request() -> ServiceRequest {
        let now = Utc::now();
        ServiceRequest {
            id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            category: "electrical".to_string(),
            description: "replace ceiling fan".to_string(),
            summary: None,
            location: GeoPoint {
                lat: 28.61,
                lng: 77.20,
            },
            base_price: 400.0,
            extra_charges: 0.0,
            otp: "654321".to_string(),
            status: RequestStatus::Pending,
            provider_id: None,
            match_expiry: None,
            claimed_at: None,
            last_declined_by: None,
            payment_status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn provider(name: &str, services: &[&str]) -> ServiceProvider {
        ServiceProvider {
            id: Uuid::new_v4(),
            name: name.to_string(),
            services: services.iter().map(|s| s.to_string()).collect(),
            location: GeoPoint {
                lat: 28.6,
                lng: 77.2,
            },
            verified: true,
            subscription_active: true,
            is_available: true,
            rating: 4.0,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn conditional_update_applies_once() {
        let store = InMemoryRequestStore::new();
        let request = pending_request();
        let id = request.id;
        store.insert(request).await.unwrap();

        let claim = RequestPatch {
            status: Some(RequestStatus::Searching),
            ..RequestPatch::default()
        };

        let first = store
            .conditional_update(id, Guard::status(RequestStatus::Pending), claim.clone())
            .await
            .unwrap();
        let second = store
            .conditional_update(id, Guard::status(RequestStatus::Pending), claim)
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let stored = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Searching);
    }

    #[tokio::test]
    async fn conditional_update_stamps_time_from_the_store_clock() {
        let start = Utc.with_ymd_and_hms(2025, 2, 3, 8, 30, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = InMemoryRequestStore::with_clock(clock.clone());
        let request = pending_request();
        let id = request.id;
        store.insert(request).await.unwrap();

        clock.advance(Duration::minutes(2));
        store
            .conditional_update(
                id,
                Guard::status(RequestStatus::Pending),
                RequestPatch::release_to(RequestStatus::Cancelled),
            )
            .await
            .unwrap();

        let stored = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, start + Duration::minutes(2));
    }

    #[tokio::test]
    async fn conditional_update_on_unknown_id_affects_nothing() {
        let store = InMemoryRequestStore::new();
        let affected = store
            .conditional_update(
                Uuid::new_v4(),
                Guard::status(RequestStatus::Pending),
                RequestPatch::reset_to_pending(),
            )
            .await
            .unwrap();

        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn eligible_providers_keep_registration_order() {
        let directory = InMemoryProviderDirectory::new();
        let first = provider("first", &["electrical"]);
        let other_trade = provider("other", &["plumbing"]);
        let mut offline = provider("offline", &["electrical"]);
        offline.is_available = false;
        let second = provider("second", &["electrical", "plumbing"]);

        for p in [&first, &other_trade, &offline, &second] {
            directory.register(p.clone()).await.unwrap();
        }

        let eligible = directory.find_eligible("electrical").await.unwrap();
        let ids: Vec<Uuid> = eligible.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn verification_and_subscription_gate_eligibility() {
        let directory = InMemoryProviderDirectory::new();
        let mut pending_review = provider("pending review", &["painting"]);
        pending_review.verified = false;
        pending_review.subscription_active = false;
        directory.register(pending_review.clone()).await.unwrap();
        assert!(directory.find_eligible("painting").await.unwrap().is_empty());

        let verified = directory
            .set_verified(pending_review.id, true)
            .await
            .unwrap()
            .unwrap();
        assert!(verified.verified);
        assert!(directory.find_eligible("painting").await.unwrap().is_empty());

        directory
            .set_subscription_active(pending_review.id, true)
            .await
            .unwrap();
        let eligible = directory.find_eligible("painting").await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, pending_review.id);

        let missing = directory.set_verified(Uuid::new_v4(), true).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn re_registering_keeps_original_position() {
        let directory = InMemoryProviderDirectory::new();
        let mut first = provider("first", &["carpentry"]);
        let second = provider("second", &["carpentry"]);
        directory.register(first.clone()).await.unwrap();
        directory.register(second.clone()).await.unwrap();

        first.rating = 4.9;
        directory.register(first.clone()).await.unwrap();

        let listed = directory.list().await.unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[0].rating, 4.9);
        assert_eq!(listed[1].id, second.id);
    }
}
