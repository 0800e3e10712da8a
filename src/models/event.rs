use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchEventKind {
    Matched,
    Accepted,
    Declined,
    Expired,
    Reclaimed,
    Started,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEvent {
    pub request_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub kind: MatchEventKind,
    pub at: DateTime<Utc>,
}
