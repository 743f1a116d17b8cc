// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Polling-based synchronization verification.
//!
//! The interval and max-wait are part of the observable contract: together
//! they are the timing budget a conforming pair has to meet.

use std::path::Path;
use std::thread;
use std::time::Instant;

use tracing::debug;

use crate::context::Timing;
use crate::error::{HarnessError, Result};
use crate::fixtures;

/// Block until `path` exists, polling at the configured interval. The loop
/// re-checks the deadline every iteration, so a shorter budget (or a mock
/// clock in tests) short-circuits it rather than sleeping through.
pub fn wait_for_file(path: &Path, timing: &Timing) -> Result<()> {
    let deadline = Instant::now() + timing.sync_max_wait;
    loop {
        if path.exists() {
            debug!("{} appeared", path.display());
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::SyncTimeout {
                path: path.to_path_buf(),
                waited_secs: timing.sync_max_wait.as_secs(),
            });
        }
        thread::sleep(timing.sync_poll_interval);
    }
}

/// Combined pass condition for a synced file: appeared within the deadline
/// AND matches the checksum recorded at creation.
pub fn wait_and_verify(path: &Path, expected: &str, timing: &Timing) -> Result<()> {
    wait_for_file(path, timing)?;
    fixtures::require_match(path, expected)
}
