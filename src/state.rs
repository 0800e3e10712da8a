use std::sync::Arc;

use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::engine::MatchingPolicy;
use crate::models::event::MatchEvent;
use crate::observability::metrics::Metrics;
use crate::store::{
    InMemoryProviderDirectory, InMemoryRequestStore, ProviderDirectory, RequestStore,
};

pub struct AppState {
    pub requests: Arc<dyn RequestStore>,
    pub providers: Arc<dyn ProviderDirectory>,
    pub clock: Arc<dyn Clock>,
    pub policy: MatchingPolicy,
    pub match_events_tx: broadcast::Sender<MatchEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        providers: Arc<dyn ProviderDirectory>,
        clock: Arc<dyn Clock>,
        policy: MatchingPolicy,
        event_buffer_size: usize,
    ) -> Self {
        let (match_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            requests,
            providers,
            clock,
            policy,
            match_events_tx,
            metrics: Metrics::new(),
        }
    }

    /// In-memory collaborators on the system clock.
    pub fn in_memory(policy: MatchingPolicy, event_buffer_size: usize) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::new(
            Arc::new(InMemoryRequestStore::with_clock(clock.clone())),
            Arc::new(InMemoryProviderDirectory::new()),
            clock,
            policy,
            event_buffer_size,
        )
    }

    pub fn publish(&self, event: MatchEvent) {
        let _ = self.match_events_tx.send(event);
    }
}
