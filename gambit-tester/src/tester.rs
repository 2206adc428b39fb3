use anyhow::{Context, Result, ensure};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::harness::Harness;
use crate::scenario::Scenario;
use crate::util::{artifacts_dir, capture_artifacts};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub seed: u64,
    pub passed: bool,
    pub iterations_run: usize,
    pub successful_iterations: usize,
    pub steps: usize,
    pub failures: Vec<String>,
    #[serde(with = "duration_serde")]
    pub average_duration: Duration,
}

/// What one replay left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub steps: usize,
    pub digest: u64,
    pub sent: usize,
}

/// Run a script against `harness`.
///
/// # Errors
///
/// Returns the first failing step, with its index and label.
fn drive(harness: &mut Harness, scenario: &Scenario, seed: u64) -> Result<ReplayOutcome> {
    let steps = (scenario.script)(seed);
    for (index, step) in steps.iter().enumerate() {
        harness
            .apply(step)
            .with_context(|| format!("step {index}: {}", step.label()))?;
    }
    Ok(ReplayOutcome {
        steps: steps.len(),
        digest: harness.driver().state().digest(),
        sent: harness.sent().len(),
    })
}

pub struct ReplayTester {
    verbose: bool,
    artifacts: Option<String>,
}

impl ReplayTester {
    pub const fn new(verbose: bool) -> Self {
        Self {
            verbose,
            artifacts: None,
        }
    }

    /// Write state, sent frames and the error chain under `base` when a replay fails.
    #[must_use]
    pub fn with_artifacts(mut self, base: impl Into<String>) -> Self {
        self.artifacts = Some(base.into());
        self
    }

    pub fn run_scenario(
        &self,
        scenario: &Scenario,
        seeds: &[u64],
        iterations: usize,
    ) -> Vec<ScenarioResult> {
        seeds
            .iter()
            .map(|&seed| {
                if self.verbose {
                    println!(
                        "🧪 Replaying scenario: {} (seed: {seed})",
                        scenario.key.bright_white()
                    );
                }
                self.run_single(scenario, seed, iterations)
            })
            .collect()
    }

    fn run_single(&self, scenario: &Scenario, seed: u64, iterations: usize) -> ScenarioResult {
        let mut failures = Vec::new();
        let mut durations = Vec::with_capacity(iterations);
        let mut successes = 0;
        let mut steps = 0;
        let mut baseline: Option<ReplayOutcome> = None;

        for iteration in 0..iterations {
            let start = Instant::now();
            let mut harness = Harness::new(seed);
            let outcome = drive(&mut harness, scenario, seed).and_then(|outcome| {
                if let Some(first) = baseline {
                    ensure!(
                        first == outcome,
                        "replay diverged from iteration 0 ({first:?} vs {outcome:?})"
                    );
                }
                Ok(outcome)
            });
            durations.push(start.elapsed());
            match outcome {
                Ok(outcome) => {
                    successes += 1;
                    steps = outcome.steps;
                    baseline.get_or_insert(outcome);
                    if self.verbose {
                        println!(
                            "   ✅ iteration {iteration}: {} steps, {} sent",
                            outcome.steps, outcome.sent
                        );
                    }
                }
                Err(err) => {
                    let message = format!("seed {seed} iteration {iteration}: {err:#}");
                    if self.verbose {
                        println!("   ❌ {}", message.red());
                    }
                    log::debug!("{message}");
                    if let Some(base) = &self.artifacts {
                        let dir = artifacts_dir(base, scenario.key, seed);
                        if let Err(write_err) = capture_artifacts(&dir, &harness, &err) {
                            log::warn!("could not write artifacts to {dir}: {write_err:#}");
                        }
                    }
                    failures.push(message);
                }
            }
        }

        let average_duration = if durations.is_empty() {
            Duration::ZERO
        } else {
            durations.iter().sum::<Duration>() / u32::try_from(durations.len()).unwrap_or(1)
        };

        ScenarioResult {
            scenario_name: scenario.key.to_string(),
            seed,
            passed: failures.is_empty(),
            iterations_run: iterations,
            successful_iterations: successes,
            steps,
            failures,
            average_duration,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
