// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The fixed scenario suite.
//!
//! Each scenario is an independent function over the shared run state; it
//! reports its verdict as a value, never by raising. The not-found variants
//! deliberately accept exit code 0 plus a textual marker: that is the
//! documented contract of the client CLI under test.

use std::fs;
use std::thread;

use tracing::info;

use crate::client::{ClientOp, CommandDriver, CommandResult};
use crate::context::RunContext;
use crate::error::{HarnessError, Result};
use crate::fixtures::{require_match, FixtureOracle, FixtureSet};
use crate::report::ScenarioOutcome;
use crate::sync;

/// Marker the client must print to stderr after a successful store.
pub const STORE_OK_MARKER: &str = "store OK";

/// Marker the client must print to stderr for any absent resource.
pub const NOT_FOUND_MARKER: &str = "NOT_FOUND";

/// One entry of the fixed suite.
pub struct Scenario {
    pub name: &'static str,
    body: fn(&RunContext, &FixtureSet) -> Result<()>,
}

impl Scenario {
    pub(crate) fn new(name: &'static str, body: fn(&RunContext, &FixtureSet) -> Result<()>) -> Self {
        Self { name, body }
    }

    /// Execute the scenario, folding any failure into the outcome's detail.
    pub fn run(&self, ctx: &RunContext, fixtures: &FixtureSet) -> ScenarioOutcome {
        match (self.body)(ctx, fixtures) {
            Ok(()) => ScenarioOutcome::pass(self.name),
            Err(err) => ScenarioOutcome::fail(self.name, err.to_string()),
        }
    }
}

/// The fixed, ordered scenario suite.
pub fn suite() -> Vec<Scenario> {
    vec![
        Scenario::new("LIST", list),
        Scenario::new("FETCH", fetch),
        Scenario::new("STORE", store),
        Scenario::new("STAT", stat),
        Scenario::new("DELETE", delete),
        Scenario::new("FETCH_NOT_FOUND", fetch_not_found),
        Scenario::new("DELETE_NOT_FOUND", delete_not_found),
        Scenario::new("STAT_NOT_FOUND", stat_not_found),
        Scenario::new("STORE_NOT_FOUND", store_not_found),
    ]
}

fn list(ctx: &RunContext, fixtures: &FixtureSet) -> Result<()> {
    let result = CommandDriver::new(ctx).run(ClientOp::List, None)?;
    result.echo("LIST");
    require_clean_exit(ctx, &result)?;

    let output = result.combined_output();
    let found = fixtures.iter().filter(|f| output.contains(&f.name)).count();
    if found == 0 {
        return Err(HarnessError::MissingMarker {
            marker: "any seeded fixture name".to_string(),
            command: result.command,
        });
    }
    info!("list reported {found} of {} fixtures", fixtures.len());
    Ok(())
}

fn fetch(ctx: &RunContext, fixtures: &FixtureSet) -> Result<()> {
    let fixture = first_fixture(fixtures)?;

    // Remove any client-side copy so the client has to perform a real
    // transfer rather than serving from its own directory.
    let client_path = ctx.client_dir.join(&fixture.name);
    if client_path.exists() {
        fs::remove_file(&client_path)?;
    }

    let result = CommandDriver::new(ctx).run(ClientOp::Fetch, Some(&fixture.name))?;
    result.echo("FETCH");
    require_clean_exit(ctx, &result)?;

    sync::wait_and_verify(&client_path, &fixture.checksum, &ctx.timing)
}

fn store(ctx: &RunContext, _fixtures: &FixtureSet) -> Result<()> {
    let fixture = FixtureOracle::new().generate_store_fixture(ctx)?;

    let result = CommandDriver::new(ctx).run(ClientOp::Store, Some(&fixture.name))?;
    result.echo("STORE");
    require_clean_exit(ctx, &result)?;
    require_marker(&result, STORE_OK_MARKER)?;

    // Store is synchronous from the client's perspective: one settle delay,
    // one check, no polling.
    thread::sleep(ctx.timing.settle_delay);
    require_match(&ctx.server_dir.join(&fixture.name), &fixture.checksum)
}

fn stat(ctx: &RunContext, fixtures: &FixtureSet) -> Result<()> {
    let fixture = first_fixture(fixtures)?;

    let result = CommandDriver::new(ctx).run(ClientOp::Stat, Some(&fixture.name))?;
    result.echo("STAT");
    require_clean_exit(ctx, &result)?;

    if !result.combined_output().contains(&fixture.name) {
        return Err(HarnessError::MissingMarker {
            marker: fixture.name.clone(),
            command: result.command,
        });
    }
    Ok(())
}

fn delete(ctx: &RunContext, fixtures: &FixtureSet) -> Result<()> {
    // Last by insertion order, so delete never races fetch/stat on the first.
    let fixture = fixtures.last().ok_or_else(no_fixtures)?;

    let result = CommandDriver::new(ctx).run(ClientOp::Delete, Some(&fixture.name))?;
    result.echo("DELETE");
    require_clean_exit(ctx, &result)?;

    thread::sleep(ctx.timing.settle_delay);
    let server_path = ctx.server_dir.join(&fixture.name);
    if server_path.exists() {
        return Err(HarnessError::Io(std::io::Error::other(format!(
            "{} still present on server after delete",
            fixture.name
        ))));
    }
    Ok(())
}

fn fetch_not_found(ctx: &RunContext, _fixtures: &FixtureSet) -> Result<()> {
    not_found_probe(ctx, ClientOp::Fetch, "FETCH_NOT_FOUND")
}

fn delete_not_found(ctx: &RunContext, _fixtures: &FixtureSet) -> Result<()> {
    not_found_probe(ctx, ClientOp::Delete, "DELETE_NOT_FOUND")
}

fn stat_not_found(ctx: &RunContext, _fixtures: &FixtureSet) -> Result<()> {
    not_found_probe(ctx, ClientOp::Stat, "STAT_NOT_FOUND")
}

fn store_not_found(ctx: &RunContext, _fixtures: &FixtureSet) -> Result<()> {
    not_found_probe(ctx, ClientOp::Store, "STORE_NOT_FOUND")
}

/// Run `op` against a name guaranteed never to exist. The contract is exit
/// code 0 with the not-found marker on stderr.
fn not_found_probe(ctx: &RunContext, op: ClientOp, label: &str) -> Result<()> {
    let name = ctx.missing_name(op.token());

    if op == ClientOp::Store {
        // The store probe targets a local source file; make sure none exists.
        let client_path = ctx.client_dir.join(&name);
        if client_path.exists() {
            fs::remove_file(&client_path)?;
        }
    }

    let result = CommandDriver::new(ctx).run(op, Some(&name))?;
    result.echo(label);
    require_clean_exit(ctx, &result)?;
    require_marker(&result, NOT_FOUND_MARKER)
}

fn require_clean_exit(ctx: &RunContext, result: &CommandResult) -> Result<()> {
    if result.timed_out {
        return Err(HarnessError::CommandTimeout {
            command: result.command.clone(),
            budget_secs: ctx.timing.command_timeout.as_secs(),
        });
    }
    match result.exit_code {
        Some(0) => Ok(()),
        code => Err(HarnessError::UnexpectedExitCode {
            command: result.command.clone(),
            code: code.unwrap_or(-1),
        }),
    }
}

fn require_marker(result: &CommandResult, marker: &str) -> Result<()> {
    if result.stderr.contains(marker) {
        Ok(())
    } else {
        Err(HarnessError::MissingMarker {
            marker: marker.to_string(),
            command: result.command.clone(),
        })
    }
}

fn first_fixture(fixtures: &FixtureSet) -> Result<&crate::fixtures::Fixture> {
    fixtures.first().ok_or_else(no_fixtures)
}

fn no_fixtures() -> HarnessError {
    HarnessError::Io(std::io::Error::other("no fixtures were generated"))
}
