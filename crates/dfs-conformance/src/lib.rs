// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Black-box conformance harness for a DFS server/client pair.
//!
//! The server and client binaries are opaque external collaborators driven
//! purely through their command-line and filesystem contracts. The harness
//! seeds randomized fixtures with a checksum oracle, walks a fixed scenario
//! suite (list, fetch, store, stat, delete and their not-found variants),
//! and aggregates pass/fail outcomes into the run's verdict.

pub mod client;
pub mod context;
pub mod env;
pub mod error;
pub mod fixtures;
pub mod report;
pub mod scenarios;
pub mod server;
pub mod sync;

pub use client::{ClientOp, CommandDriver, CommandResult};
pub use context::{RunContext, Timing};
pub use error::{HarnessError, Result};
pub use fixtures::{Fixture, FixtureOracle, FixtureSet};
pub use report::{ScenarioOutcome, SuiteReport};
pub use server::{ServerController, ServerState};
