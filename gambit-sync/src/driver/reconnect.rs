//! Bounded reconnection with exponential backoff.
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::constants::{
    RECONNECT_BASE_DELAY_MS, RECONNECT_JITTER_RATIO, RECONNECT_MAX_ATTEMPTS,
    RECONNECT_MAX_DELAY_MS, RECOVERY_FRESHNESS_MS,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    #[serde(default = "ReconnectPolicy::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "ReconnectPolicy::default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "ReconnectPolicy::default_max_attempts")]
    pub max_attempts: u32,
    /// Fraction of each delay randomly added or removed.
    #[serde(default = "ReconnectPolicy::default_jitter_ratio")]
    pub jitter_ratio: f32,
    /// Measured from the last persisted snapshot; past it the session is abandoned.
    #[serde(default = "ReconnectPolicy::default_window_ms")]
    pub window_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
            max_attempts: Self::default_max_attempts(),
            jitter_ratio: Self::default_jitter_ratio(),
            window_ms: Self::default_window_ms(),
        }
    }
}

impl ReconnectPolicy {
    const fn default_base_delay_ms() -> u64 {
        RECONNECT_BASE_DELAY_MS
    }

    const fn default_max_delay_ms() -> u64 {
        RECONNECT_MAX_DELAY_MS
    }

    const fn default_max_attempts() -> u32 {
        RECONNECT_MAX_ATTEMPTS
    }

    const fn default_jitter_ratio() -> f32 {
        RECONNECT_JITTER_RATIO
    }

    const fn default_window_ms() -> u64 {
        RECOVERY_FRESHNESS_MS
    }

    /// # Errors
    ///
    /// Returns the first field outside its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms == 0 {
            return Err(ConfigError::RangeViolation {
                field: "baseDelayMs",
                reason: "must be positive",
            });
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::RangeViolation {
                field: "maxDelayMs",
                reason: "must be at least baseDelayMs",
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(ConfigError::RangeViolation {
                field: "jitterRatio",
                reason: "must be within 0.0..=1.0",
            });
        }
        if self.window_ms == 0 {
            return Err(ConfigError::RangeViolation {
                field: "windowMs",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    /// Delay before the attempt numbered `attempt` (zero-based).
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> u64 {
        let doubled = self
            .base_delay_ms
            .saturating_mul(1_u64 << attempt.min(32))
            .min(self.max_delay_ms);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let spread = (doubled as f64 * f64::from(self.jitter_ratio)).round() as u64;
        if spread == 0 {
            return doubled;
        }
        rng.gen_range(doubled.saturating_sub(spread)..=doubled.saturating_add(spread))
    }
}

/// What the reconnection schedule wants at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStep {
    Idle,
    Waiting { at: u64 },
    Attempt { number: u32 },
    Exhausted,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Waiting { at: u64 },
    InFlight,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    rng: ChaCha20Rng,
    attempts: u32,
    deadline: Option<u64>,
    stage: Stage,
}

impl Reconnector {
    #[must_use]
    pub fn new(policy: ReconnectPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: ChaCha20Rng::seed_from_u64(seed),
            attempts: 0,
            deadline: None,
            stage: Stage::Idle,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.stage != Stage::Idle
    }

    /// Begin a fresh schedule after a connection drop.
    pub fn start(&mut self, now: u64, deadline: u64) {
        self.attempts = 0;
        self.deadline = Some(deadline);
        self.schedule(now);
    }

    /// The attempt in flight failed; queue the next one if any remain.
    pub fn attempt_failed(&mut self, now: u64) {
        self.schedule(now);
    }

    pub fn succeeded(&mut self) {
        self.cancel();
    }

    pub fn cancel(&mut self) {
        self.attempts = 0;
        self.deadline = None;
        self.stage = Stage::Idle;
    }

    fn schedule(&mut self, now: u64) {
        self.stage = if self.attempts >= self.policy.max_attempts {
            Stage::Exhausted
        } else {
            let delay = self.policy.delay_for(self.attempts, &mut self.rng);
            self.attempts += 1;
            Stage::Waiting {
                at: now.saturating_add(delay),
            }
        };
    }

    /// Advance the schedule to `now`. `Attempt`, `Exhausted` and `Expired` are reported once.
    pub fn poll(&mut self, now: u64) -> ReconnectStep {
        if self.stage == Stage::Idle {
            return ReconnectStep::Idle;
        }
        if self.deadline.is_some_and(|deadline| now > deadline) {
            self.cancel();
            return ReconnectStep::Expired;
        }
        match self.stage {
            Stage::Idle => ReconnectStep::Idle,
            Stage::InFlight => ReconnectStep::Waiting { at: now },
            Stage::Exhausted => {
                self.cancel();
                ReconnectStep::Exhausted
            }
            Stage::Waiting { at } if now >= at => {
                self.stage = Stage::InFlight;
                ReconnectStep::Attempt {
                    number: self.attempts,
                }
            }
            Stage::Waiting { at } => ReconnectStep::Waiting { at },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            jitter_ratio: 0.0,
            ..ReconnectPolicy::default()
        }
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let policy = flat_policy();
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let delays: Vec<u64> = (0..6).map(|n| policy.delay_for(n, &mut rng)).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 8_000, 8_000]);
    }

    #[test]
    fn jitter_stays_in_band_and_is_seeded() {
        let policy = ReconnectPolicy::default();
        let mut a = ChaCha20Rng::seed_from_u64(7);
        let mut b = ChaCha20Rng::seed_from_u64(7);
        for attempt in 0..6 {
            let delay = policy.delay_for(attempt, &mut a);
            assert_eq!(delay, policy.delay_for(attempt, &mut b));
            let nominal = flat_policy().delay_for(attempt, &mut a);
            let spread = nominal / 5;
            assert!(delay >= nominal - spread && delay <= nominal + spread);
        }
    }

    #[test]
    fn schedule_runs_to_exhaustion() {
        let mut rc = Reconnector::new(
            ReconnectPolicy {
                max_attempts: 2,
                ..flat_policy()
            },
            1,
        );
        rc.start(0, 1_000_000);
        assert_eq!(rc.poll(100), ReconnectStep::Waiting { at: 500 });
        assert_eq!(rc.poll(500), ReconnectStep::Attempt { number: 1 });
        rc.attempt_failed(600);
        assert_eq!(rc.poll(1_600), ReconnectStep::Attempt { number: 2 });
        rc.attempt_failed(1_700);
        assert_eq!(rc.poll(1_800), ReconnectStep::Exhausted);
        assert_eq!(rc.poll(1_900), ReconnectStep::Idle);
    }

    #[test]
    fn deadline_beats_pending_attempt() {
        let mut rc = Reconnector::new(flat_policy(), 1);
        rc.start(0, 400);
        assert_eq!(rc.poll(401), ReconnectStep::Expired);
        assert!(!rc.is_active());
    }

    #[test]
    fn rejects_inverted_delays() {
        let policy = ReconnectPolicy {
            max_delay_ms: 10,
            ..ReconnectPolicy::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::RangeViolation {
                field: "maxDelayMs",
                ..
            })
        ));
        assert!(ReconnectPolicy::default().validate().is_ok());
    }
}
