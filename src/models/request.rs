use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::provider::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Pending,
    Searching,
    Matched,
    Accepted,
    InProgress,
    Completed,
    Expired,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Searching => "searching",
            RequestStatus::Matched => "matched",
            RequestStatus::Accepted => "accepted",
            RequestStatus::InProgress => "in-progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Expired => "expired",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let status = match raw {
            "pending" => RequestStatus::Pending,
            "searching" => RequestStatus::Searching,
            "matched" => RequestStatus::Matched,
            "accepted" => RequestStatus::Accepted,
            "in-progress" => RequestStatus::InProgress,
            "completed" => RequestStatus::Completed,
            "expired" => RequestStatus::Expired,
            "cancelled" => RequestStatus::Cancelled,
            _ => return None,
        };
        Some(status)
    }

    /// States in which the request is owned by a provider.
    pub fn holds_provider(&self) -> bool {
        matches!(
            self,
            RequestStatus::Matched
                | RequestStatus::Accepted
                | RequestStatus::InProgress
                | RequestStatus::Completed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    /// The request state machine. Every write goes through a guard on the
    /// current status, this table decides which guards are legal.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;

        match (self, next) {
            (Pending, Searching) => true,
            (Searching, Matched) | (Searching, Pending) => true,
            (Matched, Accepted) | (Matched, Pending) | (Matched, Expired) => true,
            (Expired, Pending) => true,
            (Accepted, InProgress) => true,
            (InProgress, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub category: String,
    pub description: String,
    pub summary: Option<String>,
    pub location: GeoPoint,
    pub base_price: f64,
    pub extra_charges: f64,
    pub otp: String,
    pub status: RequestStatus,
    pub provider_id: Option<Uuid>,
    pub match_expiry: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_declined_by: Option<Uuid>,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRequest {
    /// `provider_id`, `match_expiry` and `claimed_at` agree with `status`.
    pub fn is_consistent(&self) -> bool {
        self.provider_id.is_some() == self.status.holds_provider()
            && self.match_expiry.is_some() == (self.status == RequestStatus::Matched)
            && self.claimed_at.is_some() == (self.status == RequestStatus::Searching)
    }
}

/// Requester-supplied fields of a new request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewServiceRequest {
    pub requester_id: Uuid,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub location: GeoPoint,
    pub base_price: f64,
    #[serde(default)]
    pub extra_charges: f64,
}

#[cfg(test)]
mod tests {
    use super::RequestStatus;
    use super::RequestStatus::*;

    #[test]
    fn matcher_path_is_allowed() {
        assert!(Pending.can_transition_to(Searching));
        assert!(Searching.can_transition_to(Matched));
        assert!(Searching.can_transition_to(Pending));
        assert!(Matched.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!Pending.can_transition_to(Matched));
        assert!(!Matched.can_transition_to(InProgress));
        assert!(!Accepted.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
    }

    #[test]
    fn cancel_allowed_until_terminal() {
        for status in [Pending, Searching, Matched, Accepted, InProgress, Expired] {
            assert!(status.can_transition_to(Cancelled), "{status}");
        }
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn status_names_round_trip_through_parse() {
        assert_eq!(RequestStatus::parse("in-progress"), Some(InProgress));
        assert_eq!(RequestStatus::parse(InProgress.as_str()), Some(InProgress));
        assert_eq!(RequestStatus::parse("done"), None);
    }
}
