// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Convenient result alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Failure taxonomy for a conformance run.
///
/// Build and server-start failures abort the run; every other variant is
/// scoped to the scenario that observed it and becomes diagnostic text on a
/// failed outcome.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// An external build step exited non-zero.
    #[error("build step `{step}` failed with status {status}: {stderr}")]
    BuildFailure {
        step: String,
        status: i32,
        stderr: String,
    },

    /// The server exited during the startup grace period or could not spawn.
    #[error("server failed to start: {detail}")]
    ServerStartFailure { detail: String },

    /// A client invocation exceeded its wall-clock budget.
    #[error("client command `{command}` exceeded the {budget_secs}s budget")]
    CommandTimeout { command: String, budget_secs: u64 },

    /// An expected file never appeared within the polling deadline.
    #[error("{} did not appear within {waited_secs}s", .path.display())]
    SyncTimeout { path: PathBuf, waited_secs: u64 },

    /// Content read back does not match the checksum recorded at creation.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The client exited non-zero where the contract requires zero.
    #[error("client command `{command}` exited with status {code}")]
    UnexpectedExitCode { command: String, code: i32 },

    /// A contractual marker string is absent from the client's stderr.
    #[error("marker `{marker}` missing from stderr of `{command}`")]
    MissingMarker { marker: String, command: String },

    /// Underlying IO error while orchestrating the run.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Whether this failure invalidates the whole run rather than a single
    /// scenario. Nothing is meaningful without a built binary and a live
    /// server, so those two abort immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::BuildFailure { .. } | HarnessError::ServerStartFailure { .. }
        )
    }
}
