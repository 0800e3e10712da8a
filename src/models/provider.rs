use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProvider {
    pub id: Uuid,
    pub name: String,
    pub services: Vec<String>,
    pub location: GeoPoint,
    pub verified: bool,
    pub subscription_active: bool,
    pub is_available: bool,
    pub rating: f64,
    pub updated_at: DateTime<Utc>,
}

impl ServiceProvider {
    /// Verified, subscribed, available and offering `category`.
    pub fn is_eligible_for(&self, category: &str) -> bool {
        self.verified
            && self.subscription_active
            && self.is_available
            && self.services.iter().any(|service| service == category)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{GeoPoint, ServiceProvider};

    fn plumber() -> ServiceProvider {
        ServiceProvider {
            id: Uuid::new_v4(),
            name: "Pipes & Co".to_string(),
            services: vec!["plumbing".to_string(), "heating".to_string()],
            location: GeoPoint {
                lat: 19.07,
                lng: 72.87,
            },
            verified: true,
            subscription_active: true,
            is_available: true,
            rating: 4.2,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn eligible_when_all_flags_set_and_category_offered() {
        assert!(plumber().is_eligible_for("heating"));
        assert!(!plumber().is_eligible_for("electrical"));
    }

    #[test]
    fn any_missing_flag_disqualifies() {
        let mut unverified = plumber();
        unverified.verified = false;
        assert!(!unverified.is_eligible_for("plumbing"));

        let mut lapsed = plumber();
        lapsed.subscription_active = false;
        assert!(!lapsed.is_eligible_for("plumbing"));

        let mut busy = plumber();
        busy.is_available = false;
        assert!(!busy.is_eligible_for("plumbing"));
    }
}
