// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount-directory preparation, leftover-fixture scrubbing, and the external
//! build pipeline.

use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::context::{BuildStep, RunContext, FIXTURE_PREFIX};
use crate::error::{HarnessError, Result};

/// Prepares and restores the on-disk state the run depends on.
pub struct EnvironmentManager;

impl EnvironmentManager {
    /// Create both mount directories if absent, drop fixtures left behind by
    /// earlier runs, and drive the build pipeline to completion. Any build
    /// step exiting non-zero aborts the run.
    pub fn prepare(ctx: &RunContext) -> Result<()> {
        info!("setting up test environment");
        fs::create_dir_all(&ctx.server_dir)?;
        fs::create_dir_all(&ctx.client_dir)?;

        scrub_fixtures(&ctx.server_dir);
        scrub_fixtures(&ctx.client_dir);

        for step in &ctx.build_steps {
            run_build_step(step)?;
        }
        Ok(())
    }

    /// Remove run artifacts from both directories. Best-effort: a locked or
    /// unremovable file must not fail the run during cleanup.
    pub fn teardown(ctx: &RunContext) {
        scrub_fixtures(&ctx.server_dir);
        scrub_fixtures(&ctx.client_dir);
    }
}

/// Delete every file in `dir` carrying the harness naming prefix. Errors are
/// logged and swallowed.
fn scrub_fixtures(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(FIXTURE_PREFIX) {
            if let Err(err) = fs::remove_file(entry.path()) {
                warn!("failed to remove leftover fixture {:?}: {err}", name);
            }
        }
    }
}

fn run_build_step(step: &BuildStep) -> Result<()> {
    info!("running build step `{}`", step.render());
    let output = Command::new(&step.program).args(&step.args).output()?;
    if !output.status.success() {
        return Err(HarnessError::BuildFailure {
            step: step.render(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        });
    }
    debug!("build step `{}` succeeded", step.render());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing;
    use crate::error::HarnessError;
    use tempfile::tempdir;

    #[test]
    fn prepare_scrubs_only_prefixed_files() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        fs::create_dir_all(&ctx.server_dir).unwrap();
        fs::create_dir_all(&ctx.client_dir).unwrap();

        fs::write(ctx.server_dir.join("dfstest-999-000.bin"), b"old").unwrap();
        fs::write(ctx.server_dir.join("keepme.txt"), b"data").unwrap();
        fs::write(ctx.client_dir.join("dfstest-store-999.bin"), b"old").unwrap();

        EnvironmentManager::prepare(&ctx).unwrap();

        assert!(!ctx.server_dir.join("dfstest-999-000.bin").exists());
        assert!(!ctx.client_dir.join("dfstest-store-999.bin").exists());
        assert!(ctx.server_dir.join("keepme.txt").exists());
    }

    #[test]
    fn prepare_creates_missing_mount_directories() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        assert!(!ctx.server_dir.exists());

        EnvironmentManager::prepare(&ctx).unwrap();

        assert!(ctx.server_dir.is_dir());
        assert!(ctx.client_dir.is_dir());
    }

    #[test]
    fn failing_build_step_aborts_with_its_stderr() {
        let dir = tempdir().unwrap();
        let mut ctx = testing::context(dir.path());
        ctx.build_steps = vec![BuildStep::new("/bin/sh", &["-c", "echo boom >&2; exit 3"])];

        let err = EnvironmentManager::prepare(&ctx).unwrap_err();
        match err {
            HarnessError::BuildFailure {
                step,
                status,
                stderr,
            } => {
                assert!(step.starts_with("/bin/sh"));
                assert_eq!(status, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected BuildFailure, got {other:?}"),
        }
    }

    #[test]
    fn successful_pipeline_runs_all_steps() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("step-ran");
        let mut ctx = testing::context(dir.path());
        ctx.build_steps = vec![
            BuildStep::new("true", &[]),
            BuildStep::new(
                "/bin/sh",
                &["-c", &format!("touch {}", marker.display())],
            ),
        ];

        EnvironmentManager::prepare(&ctx).unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn teardown_tolerates_missing_directories() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        // Never prepared; both directories are absent.
        EnvironmentManager::teardown(&ctx);
    }
}
