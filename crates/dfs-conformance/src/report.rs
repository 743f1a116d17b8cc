// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Sequential suite execution and pass/fail aggregation.
//!
//! Scenarios run strictly one at a time: the two mount directories are
//! shared mutable state with no locking discipline, so concurrency would
//! invalidate the oracle's assumptions.

use std::thread;

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{error, info};

use crate::context::RunContext;
use crate::fixtures::FixtureSet;
use crate::scenarios::Scenario;

/// Verdict and diagnostics for one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ScenarioOutcome {
    pub fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: None,
        }
    }

    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

/// The harness's test report: every outcome in suite order plus the tally.
#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub started_at: String,
    pub finished_at: String,
    pub outcomes: Vec<ScenarioOutcome>,
    pub passed: usize,
    pub total: usize,
    pub status: String,
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Run the suite strictly in sequence. A fault inside one scenario becomes a
/// failed outcome; the remaining scenarios still run.
pub fn run_suite(ctx: &RunContext, fixtures: &FixtureSet, suite: &[Scenario]) -> SuiteReport {
    let started_at = chrono::Utc::now();
    let mut outcomes = Vec::with_capacity(suite.len());

    for scenario in suite {
        info!("--- {} ---", scenario.name);
        let outcome = run_isolated(ctx, fixtures, scenario);
        if outcome.passed {
            info!("{} passed", scenario.name);
        } else {
            error!(
                "{} failed: {}",
                scenario.name,
                outcome.detail.as_deref().unwrap_or("no detail")
            );
        }
        outcomes.push(outcome);
    }

    let passed = outcomes.iter().filter(|o| o.passed).count();
    let total = outcomes.len();
    SuiteReport {
        started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        finished_at: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        outcomes,
        passed,
        total,
        status: if passed == total { "passed" } else { "failed" }.to_string(),
    }
}

/// Run one scenario on its own thread so a panic is contained there and
/// recorded instead of tearing down the whole run.
fn run_isolated(ctx: &RunContext, fixtures: &FixtureSet, scenario: &Scenario) -> ScenarioOutcome {
    thread::scope(|scope| {
        let handle = scope.spawn(|| scenario.run(ctx, fixtures));
        match handle.join() {
            Ok(outcome) => outcome,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                ScenarioOutcome::fail(scenario.name, format!("unexpected fault: {msg}"))
            }
        }
    })
}

/// Print the human summary: one PASS/FAIL line per scenario plus the tally.
pub fn print_summary(report: &SuiteReport) {
    println!("{}", "=".repeat(60));
    for outcome in &report.outcomes {
        if outcome.passed {
            println!("PASS {}", outcome.name);
        } else {
            println!(
                "FAIL {} ({})",
                outcome.name,
                outcome.detail.as_deref().unwrap_or("no detail")
            );
        }
    }
    println!(
        "Test results: {}/{} scenarios passed",
        report.passed, report.total
    );
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing;
    use crate::error::HarnessError;
    use tempfile::tempdir;

    #[test]
    fn tally_counts_passes_and_failures() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        let fixtures = FixtureSet::default();

        let suite = [
            Scenario::new("ALWAYS_PASS", |_, _| Ok(())),
            Scenario::new("ALWAYS_FAIL", |_, _| {
                Err(HarnessError::Io(std::io::Error::other("boom")))
            }),
        ];

        let report = run_suite(&ctx, &fixtures, &suite);

        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.status, "failed");
        assert!(!report.all_passed());
        assert!(report.outcomes[1].detail.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn a_panicking_scenario_does_not_abort_the_suite() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        let fixtures = FixtureSet::default();

        let suite = [
            Scenario::new("KABOOM", |_, _| panic!("scenario blew up")),
            Scenario::new("STILL_RUNS", |_, _| Ok(())),
        ];

        let report = run_suite(&ctx, &fixtures, &suite);

        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        let detail = report.outcomes[0].detail.as_deref().unwrap();
        assert!(detail.contains("unexpected fault"));
        assert!(detail.contains("scenario blew up"));
        assert!(report.outcomes[1].passed);
    }

    #[test]
    fn report_serializes_with_outcomes_in_order() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        let fixtures = FixtureSet::default();

        let suite = [Scenario::new("ONLY", |_, _| Ok(()))];
        let report = run_suite(&ctx, &fixtures, &suite);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"name\":\"ONLY\""));
        assert!(json.contains("\"status\":\"passed\""));
        // Passed outcomes carry no detail field at all.
        assert!(!json.contains("\"detail\""));
    }
}
