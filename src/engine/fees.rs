use serde::{Deserialize, Serialize};

const CRITICAL_URGENCY: u8 = 8;
const HIGH_URGENCY: u8 = 6;

/// Pricing constants for a single delivery job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeePolicy {
    pub base_fee: f64,
    pub per_km: f64,
    pub per_kg: f64,
    pub high_urgency_surcharge: f64,
    pub critical_urgency_surcharge: f64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            base_fee: 100.0,
            per_km: 5.0,
            per_kg: 2.0,
            high_urgency_surcharge: 100.0,
            critical_urgency_surcharge: 200.0,
        }
    }
}

impl FeePolicy {
    pub fn delivery_fee(&self, distance_km: f64, weight_kg: f64, urgency_score: u8) -> f64 {
        let fee = self.base_fee
            + distance_km * self.per_km
            + weight_kg * self.per_kg
            + self.urgency_surcharge(urgency_score);

        round_to_cents(fee)
    }

    fn urgency_surcharge(&self, urgency_score: u8) -> f64 {
        if urgency_score >= CRITICAL_URGENCY {
            self.critical_urgency_surcharge
        } else if urgency_score >= HIGH_URGENCY {
            self.high_urgency_surcharge
        } else {
            0.0
        }
    }
}

pub fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::FeePolicy;

    #[test]
    fn critical_urgency_adds_top_surcharge() {
        let fee = FeePolicy::default().delivery_fee(20.0, 500.0, 9);
        assert_eq!(fee, 1400.0);
    }

    #[test]
    fn surcharge_tiers() {
        let policy = FeePolicy::default();
        assert_eq!(policy.delivery_fee(0.0, 0.0, 8), 300.0);
        assert_eq!(policy.delivery_fee(0.0, 0.0, 7), 200.0);
        assert_eq!(policy.delivery_fee(0.0, 0.0, 6), 200.0);
        assert_eq!(policy.delivery_fee(0.0, 0.0, 5), 100.0);
        assert_eq!(policy.delivery_fee(0.0, 0.0, 3), 100.0);
    }

    #[test]
    fn fractional_distance_rounds_to_cents() {
        let fee = FeePolicy::default().delivery_fee(12.3456, 10.0, 3);
        assert_eq!(fee, 181.73);
    }

    #[test]
    fn policy_overrides_apply() {
        let policy = FeePolicy {
            base_fee: 50.0,
            per_km: 1.0,
            per_kg: 0.5,
            high_urgency_surcharge: 10.0,
            critical_urgency_surcharge: 20.0,
        };
        assert_eq!(policy.delivery_fee(10.0, 100.0, 10), 130.0);
    }
}
