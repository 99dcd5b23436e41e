//! Multi-axis trust scores with outcome updates and time decay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An agent's reputation: four axes in [0, 100] plus a cached overall mean.
///
/// `overall` is the arithmetic mean of the other four axes and is
/// recomputed at the end of every outcome mutation. Time decay scales the
/// cached overall directly; the next outcome event re-derives it from the
/// axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reputation {
    pub overall: f64,
    /// Completes tasks on time.
    pub reliability: f64,
    /// Quality of outputs.
    pub quality: f64,
    /// Works well with others.
    pub cooperation: f64,
    /// Accurate self-assessment.
    pub honesty: f64,

    pub tasks_completed: u64,
    pub tasks_failed: u64,

    pub last_active: DateTime<Utc>,
    /// Daily decay fraction applied to inactive agents.
    pub decay_rate: f64,
}

impl Default for Reputation {
    fn default() -> Self {
        Self::new()
    }
}

impl Reputation {
    /// Baseline reputation: every axis at 50.0, 1% daily decay.
    pub fn new() -> Self {
        Self {
            overall: 50.0,
            reliability: 50.0,
            quality: 50.0,
            cooperation: 50.0,
            honesty: 50.0,
            tasks_completed: 0,
            tasks_failed: 0,
            last_active: Utc::now(),
            decay_rate: 0.01,
        }
    }

    pub fn with_decay_rate(mut self, rate: f64) -> Self {
        self.decay_rate = rate;
        self
    }

    /// Record a successful task with output quality `q` in [0, 1].
    pub fn record_success(&mut self, q: f64) {
        self.tasks_completed += 1;
        self.quality = self.quality * 0.9 + q * 100.0 * 0.1;
        self.reliability = self.reliability * 0.95 + 100.0 * 0.05;
        self.recalculate_overall();
        self.last_active = Utc::now();
    }

    /// Record a failed task.
    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
        self.reliability *= 0.9;
        self.recalculate_overall();
        self.last_active = Utc::now();
    }

    /// Fold in a peer rating `r` in [0, 1], weighted by the rater's own
    /// overall score. Admission rules (minimum rater stake) live in the
    /// registry, not here.
    pub fn record_peer_rating(&mut self, r: f64, rater_overall: f64) {
        let weight = rater_overall / 100.0;
        self.cooperation = self.cooperation * 0.9 + r * 100.0 * 0.1 * weight;
        self.recalculate_overall();
    }

    /// Apply time-based decay. No-op within one day of activity; the decay
    /// factor is floored at 0.5 so a dormant agent keeps half its standing.
    pub fn apply_decay(&mut self) {
        let days_inactive =
            (Utc::now() - self.last_active).num_milliseconds() as f64 / 86_400_000.0;
        if days_inactive > 1.0 {
            let factor = (1.0 - self.decay_rate * days_inactive).max(0.5);
            self.overall *= factor;
        }
    }

    fn recalculate_overall(&mut self) {
        self.overall = (self.reliability + self.quality + self.cooperation + self.honesty) / 4.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn assert_mean_invariant(rep: &Reputation) {
        let mean = (rep.reliability + rep.quality + rep.cooperation + rep.honesty) / 4.0;
        assert!((rep.overall - mean).abs() < 1e-9);
        for axis in [rep.reliability, rep.quality, rep.cooperation, rep.honesty] {
            assert!((0.0..=100.0).contains(&axis));
        }
    }

    #[test]
    fn success_raises_quality_and_reliability() {
        let mut rep = Reputation::new();
        rep.record_success(0.8);

        assert_eq!(rep.tasks_completed, 1);
        assert!((rep.quality - 53.0).abs() < 1e-9);
        assert!((rep.reliability - 52.5).abs() < 1e-9);
        assert!(rep.overall > 50.0);
        assert_mean_invariant(&rep);
    }

    #[test]
    fn failure_penalises_reliability() {
        let mut rep = Reputation::new();
        rep.record_failure();

        assert_eq!(rep.tasks_failed, 1);
        assert!((rep.reliability - 45.0).abs() < 1e-9);
        assert!(rep.overall < 50.0);
        assert_mean_invariant(&rep);
    }

    #[test]
    fn counters_never_decrease() {
        let mut rep = Reputation::new();
        rep.record_success(1.0);
        rep.record_failure();
        rep.record_success(0.5);
        assert_eq!(rep.tasks_completed, 2);
        assert_eq!(rep.tasks_failed, 1);
    }

    #[test]
    fn peer_rating_weighted_by_rater() {
        let mut rep = Reputation::new();
        // Perfect rating from a rater at overall 80: 0.9*50 + 100*0.1*0.8.
        rep.record_peer_rating(1.0, 80.0);
        assert!((rep.cooperation - 53.0).abs() < 1e-9);
        assert_mean_invariant(&rep);
    }

    #[test]
    fn axes_stay_bounded_under_repeated_events() {
        let mut rep = Reputation::new();
        for _ in 0..200 {
            rep.record_success(1.0);
            rep.record_peer_rating(1.0, 100.0);
        }
        assert!(rep.quality <= 100.0);
        assert!(rep.reliability <= 100.0);
        assert!(rep.cooperation <= 100.0);
        assert!(rep.overall <= 100.0);

        for _ in 0..200 {
            rep.record_failure();
        }
        assert!(rep.reliability >= 0.0);
        assert!(rep.overall >= 0.0);
    }

    #[test]
    fn decay_noop_within_a_day() {
        let mut rep = Reputation::new();
        rep.last_active = Utc::now() - Duration::hours(12);
        let before = rep.overall;
        rep.apply_decay();
        assert_eq!(rep.overall, before);
    }

    #[test]
    fn decay_scales_overall_after_inactivity() {
        let mut rep = Reputation::new().with_decay_rate(0.1);
        rep.last_active = Utc::now() - Duration::days(3);
        rep.apply_decay();
        // factor = 1 - 0.1 * 3 = 0.7, applied to the baseline 50.
        assert!((rep.overall - 35.0).abs() < 0.01);
    }

    #[test]
    fn decay_factor_floored_at_half() {
        let mut rep = Reputation::new().with_decay_rate(0.1);
        rep.last_active = Utc::now() - Duration::days(30);
        rep.apply_decay();
        assert!((rep.overall - 25.0).abs() < 0.01);
    }
}
