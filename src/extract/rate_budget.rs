//! Page sizing against Shopify's cost-based token bucket.
//!
//! # Overview
//!
//! Every Admin GraphQL response reports what the query cost and how full the
//! bucket is afterwards. [`RateBudget`] keeps that state for one paginator and
//! turns it into two decisions:
//!
//! - [`RateBudget::should_wait_for`]: how long to sleep before the next request
//!   so that at least five requests' worth of points are available
//! - [`RateBudget::next_page_size`]: the largest `first:` argument that stays
//!   under both the per-query ceiling and the points likely to be available
//!
//! Until a response has been observed, nothing is known and the page size is 1.
//!
//! # Example
//!
//! ```rust
//! use shopify_extract::extract::RateBudget;
//! use shopify_extract::clients::{QueryCost, ThrottleStatus};
//!
//! let mut budget = RateBudget::new(250, 900.0);
//! assert_eq!(budget.next_page_size(), 1);
//!
//! budget.observe(&QueryCost {
//!     requested_query_cost: 4.0,
//!     actual_query_cost: Some(4.0),
//!     throttle_status: ThrottleStatus {
//!         maximum_available: 1000.0,
//!         currently_available: 996.0,
//!         restore_rate: 50.0,
//!     },
//! });
//!
//! // 900 / 4 = 225 points-safe, (996 + 50) / 4 = 261 availability-safe
//! assert_eq!(budget.next_page_size(), 225);
//! ```

use std::time::Duration;

use crate::clients::QueryCost;

/// Number of requests the bucket must be able to afford before the next one.
pub const SAFETY_MARGIN_REQUESTS: f64 = 5.0;

/// Request latency assumed when crediting replenishment during a request.
pub const ASSUMED_LATENCY: Duration = Duration::from_secs(1);

/// Longest single budget wait, however slowly the bucket restores.
pub const MAX_BUDGET_WAIT: Duration = Duration::from_secs(300);

/// Default ceiling on the points a single query may cost.
///
/// Shopify rejects single queries above 1000 points.
pub const DEFAULT_MAX_SAFE_POINTS: f64 = 900.0;

/// Cost economics for one paginator.
#[derive(Clone, Debug, PartialEq)]
pub struct RateBudget {
    available_points: Option<f64>,
    max_points: Option<f64>,
    restore_rate: Option<f64>,
    cost_per_request: Option<f64>,
    max_page_size: u32,
    max_safe_points: f64,
}

impl RateBudget {
    /// Creates a budget with nothing known yet.
    #[must_use]
    pub const fn new(max_page_size: u32, max_safe_points: f64) -> Self {
        Self {
            available_points: None,
            max_points: None,
            restore_rate: None,
            cost_per_request: None,
            max_page_size,
            max_safe_points,
        }
    }

    /// Points currently believed to be available.
    #[must_use]
    pub const fn available_points(&self) -> Option<f64> {
        self.available_points
    }

    /// Bucket size.
    #[must_use]
    pub const fn max_points(&self) -> Option<f64> {
        self.max_points
    }

    /// Points restored per second.
    #[must_use]
    pub const fn restore_rate(&self) -> Option<f64> {
        self.restore_rate
    }

    /// Learned cost of one request.
    #[must_use]
    pub const fn cost_per_request(&self) -> Option<f64> {
        self.cost_per_request
    }

    /// Records the cost block of a response.
    ///
    /// The first observation fixes the per-request cost at the mean of the
    /// requested and actual cost; later observations only move the bucket.
    pub fn observe(&mut self, cost: &QueryCost) {
        let status = cost.throttle_status;
        let max = status.maximum_available.max(0.0);

        self.max_points = Some(max);
        self.restore_rate = Some(status.restore_rate.max(0.0));
        self.available_points = Some(status.currently_available.clamp(0.0, max));

        if self.cost_per_request.is_none() {
            let requested = cost.requested_query_cost;
            let actual = cost.actual_query_cost.unwrap_or(requested);
            let mean = (requested + actual) / 2.0;
            if mean > 0.0 {
                self.cost_per_request = Some(mean);
            }
        }
    }

    /// Forgets the bucket level, e.g. after a throttle or before a retry.
    pub fn reset(&mut self) {
        self.available_points = None;
    }

    /// Forgets the bucket level and the learned cost.
    ///
    /// Used when the shape of the query changes (a new monthly chunk).
    pub fn recalibrate(&mut self) {
        self.available_points = None;
        self.cost_per_request = None;
    }

    /// Credits points restored while the caller slept, capped at the bucket size.
    pub fn replenish(&mut self, waited: Duration) {
        if let (Some(available), Some(rate), Some(max)) =
            (self.available_points, self.restore_rate, self.max_points)
        {
            let refilled = rate.mul_add(waited.as_secs_f64(), available);
            self.available_points = Some(refilled.clamp(0.0, max));
        }
    }

    /// How long to wait before the next request, zero when none is needed.
    ///
    /// Never longer than [`MAX_BUDGET_WAIT`].
    #[must_use]
    pub fn should_wait_for(&self) -> Duration {
        let (Some(available), Some(cost), Some(rate)) =
            (self.available_points, self.cost_per_request, self.restore_rate)
        else {
            return Duration::ZERO;
        };

        let margin = cost * SAFETY_MARGIN_REQUESTS;
        if available >= margin || rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64((margin - available) / rate)
            .map_or(MAX_BUDGET_WAIT, |wait| wait.min(MAX_BUDGET_WAIT))
    }

    /// Returns the page size to request next, in `[1, max_page_size]`.
    #[must_use]
    pub fn next_page_size(&self) -> u32 {
        let (Some(available), Some(cost)) = (self.available_points, self.cost_per_request) else {
            return 1;
        };
        if available < cost * SAFETY_MARGIN_REQUESTS {
            return 1;
        }

        let rate = self.restore_rate.unwrap_or(0.0);
        let replenished = rate.mul_add(ASSUMED_LATENCY.as_secs_f64(), available);
        let size = (self.max_safe_points / cost).min(replenished / cost).floor();

        if size.is_nan() || size < 1.0 {
            1
        } else if size >= f64::from(self.max_page_size) {
            self.max_page_size.max(1)
        } else {
            // Bounded by max_page_size above.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let size = size as u32;
            size
        }
    }
}

impl Default for RateBudget {
    fn default() -> Self {
        Self::new(crate::config::PROVIDER_MAX_PAGE_SIZE, DEFAULT_MAX_SAFE_POINTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ThrottleStatus;
    use rand::Rng;

    fn cost(requested: f64, actual: Option<f64>, available: f64, max: f64, rate: f64) -> QueryCost {
        QueryCost {
            requested_query_cost: requested,
            actual_query_cost: actual,
            throttle_status: ThrottleStatus {
                maximum_available: max,
                currently_available: available,
                restore_rate: rate,
            },
        }
    }

    #[test]
    fn test_unknown_budget_yields_page_size_one() {
        let budget = RateBudget::default();
        assert_eq!(budget.next_page_size(), 1);
        assert_eq!(budget.should_wait_for(), Duration::ZERO);
    }

    #[test]
    fn test_cost_is_mean_of_requested_and_actual() {
        let mut budget = RateBudget::default();
        budget.observe(&cost(12.0, Some(8.0), 1000.0, 1000.0, 50.0));
        assert_eq!(budget.cost_per_request(), Some(10.0));

        // Held fixed after the first observation.
        budget.observe(&cost(100.0, Some(100.0), 900.0, 1000.0, 50.0));
        assert_eq!(budget.cost_per_request(), Some(10.0));
    }

    #[test]
    fn test_missing_actual_cost_falls_back_to_requested() {
        let mut budget = RateBudget::default();
        budget.observe(&cost(6.0, None, 1000.0, 1000.0, 50.0));
        assert_eq!(budget.cost_per_request(), Some(6.0));
    }

    #[test]
    fn test_page_size_is_capped_by_safe_points_and_max_page_size() {
        let mut budget = RateBudget::new(250, 900.0);
        budget.observe(&cost(2.0, Some(2.0), 2000.0, 2000.0, 100.0));
        // 900 / 2 = 450, clamped to 250
        assert_eq!(budget.next_page_size(), 250);

        let mut budget = RateBudget::new(250, 900.0);
        budget.observe(&cost(10.0, Some(10.0), 1000.0, 1000.0, 50.0));
        // min(90, 105) = 90
        assert_eq!(budget.next_page_size(), 90);
    }

    #[test]
    fn test_page_size_limited_by_availability() {
        let mut budget = RateBudget::new(250, 900.0);
        budget.observe(&cost(10.0, Some(10.0), 100.0, 1000.0, 50.0));
        // (100 + 50) / 10 = 15
        assert_eq!(budget.next_page_size(), 15);
    }

    #[test]
    fn test_wait_when_below_safety_margin() {
        let mut budget = RateBudget::default();
        budget.observe(&cost(20.0, Some(20.0), 40.0, 1000.0, 50.0));
        // (20 * 5 - 40) / 50 = 1.2s
        assert_eq!(budget.should_wait_for(), Duration::from_secs_f64(1.2));
        assert_eq!(budget.next_page_size(), 1);

        budget.replenish(Duration::from_secs(2));
        assert_eq!(budget.should_wait_for(), Duration::ZERO);
        assert!(budget.next_page_size() > 1);
    }

    #[test]
    fn test_wait_is_capped_for_a_trickling_restore_rate() {
        let mut budget = RateBudget::default();
        budget.observe(&cost(50.0, Some(50.0), 0.0, 1000.0, 1e-300));
        assert_eq!(budget.should_wait_for(), MAX_BUDGET_WAIT);

        let mut budget = RateBudget::default();
        budget.observe(&cost(50.0, Some(50.0), 0.0, 1000.0, 0.5));
        // 250 points at 0.5/s would be 500s.
        assert_eq!(budget.should_wait_for(), MAX_BUDGET_WAIT);
    }

    #[test]
    fn test_replenish_caps_at_max_points() {
        let mut budget = RateBudget::default();
        budget.observe(&cost(10.0, Some(10.0), 990.0, 1000.0, 50.0));
        budget.replenish(Duration::from_secs(60));
        assert_eq!(budget.available_points(), Some(1000.0));
    }

    #[test]
    fn test_reset_and_recalibrate() {
        let mut budget = RateBudget::default();
        budget.observe(&cost(10.0, Some(10.0), 990.0, 1000.0, 50.0));

        budget.reset();
        assert_eq!(budget.available_points(), None);
        assert_eq!(budget.cost_per_request(), Some(10.0));
        assert_eq!(budget.next_page_size(), 1);

        budget.observe(&cost(10.0, Some(10.0), 990.0, 1000.0, 50.0));
        budget.recalibrate();
        assert_eq!(budget.available_points(), None);
        assert_eq!(budget.cost_per_request(), None);
    }

    #[test]
    fn test_available_points_stay_within_bounds_for_any_observations() {
        let mut rng = rand::thread_rng();
        let mut budget = RateBudget::default();

        for _ in 0..1000 {
            let max = rng.gen_range(0.0..5000.0);
            let available = rng.gen_range(-500.0..6000.0);
            let requested = rng.gen_range(0.0..1000.0);
            budget.observe(&cost(requested, Some(requested), available, max, 50.0));

            let points = budget.available_points().unwrap();
            assert!(points >= 0.0);
            assert!(points <= budget.max_points().unwrap());

            if rng.gen_bool(0.3) {
                budget.replenish(Duration::from_secs(rng.gen_range(0..120)));
                let points = budget.available_points().unwrap();
                assert!((0.0..=budget.max_points().unwrap()).contains(&points));
            }

            let size = budget.next_page_size();
            assert!((1..=250).contains(&size));
        }
    }
}
