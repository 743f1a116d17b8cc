// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Immutable description of one conformance run.
//!
//! The context is built once in `main` and borrowed by every component.
//! Mutable results (the fixture set, the outcome list) live in values
//! returned by the stages, never here.

use std::path::PathBuf;
use std::time::Duration;

/// Filename prefix shared by every fixture the harness writes. Cleanup only
/// ever touches files carrying this prefix.
pub const FIXTURE_PREFIX: &str = "dfstest-";

/// One external build step: a program plus its arguments.
#[derive(Debug, Clone)]
pub struct BuildStep {
    pub program: String,
    pub args: Vec<String>,
}

impl BuildStep {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `program arg arg` form for logs and diagnostics.
    pub fn render(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// Timing knobs of the run.
///
/// The defaults are part of the observable contract: the poll interval and
/// max-wait values are the timing budget a conforming server/client pair is
/// tested against.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Pause after sweeping stale server processes, before the new spawn.
    pub stale_kill_settle: Duration,
    /// Fixed grace period between spawning the server and the liveness check.
    pub startup_grace: Duration,
    /// Bound on the graceful shutdown wait before escalating to SIGKILL.
    pub shutdown_wait: Duration,
    /// Wall-clock budget per client invocation.
    pub command_timeout: Duration,
    /// Maximum total wait for a fetched file to appear client-side.
    pub sync_max_wait: Duration,
    /// Poll interval while waiting for a file to appear.
    pub sync_poll_interval: Duration,
    /// Pause before checking an asynchronous server-side effect (store, delete).
    pub settle_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            stale_kill_settle: Duration::from_secs(1),
            startup_grace: Duration::from_secs(2),
            shutdown_wait: Duration::from_secs(5),
            command_timeout: Duration::from_secs(30),
            sync_max_wait: Duration::from_secs(10),
            sync_poll_interval: Duration::from_millis(500),
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Shared run state: identifiers, endpoints, directories, binaries, and the
/// build pipeline. Immutable for the run's duration.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Microsecond-epoch identifier namespacing every fixture filename, so
    /// concurrent or historical runs never collide.
    pub run_id: i64,
    /// Address the server listens on and the client connects to.
    pub server_address: String,
    /// Server-side mount directory.
    pub server_dir: PathBuf,
    /// Client-side mount directory.
    pub client_dir: PathBuf,
    /// Server binary under test.
    pub server_bin: PathBuf,
    /// Client binary under test.
    pub client_bin: PathBuf,
    /// External build pipeline; empty when running against prebuilt binaries.
    pub build_steps: Vec<BuildStep>,
    pub timing: Timing,
}

impl RunContext {
    /// Name of the `index`-th bulk fixture seeded into the server directory.
    pub fn bulk_fixture_name(&self, index: usize) -> String {
        format!("{FIXTURE_PREFIX}{}-{index:03}.bin", self.run_id)
    }

    /// Name of the fixture generated client-side for the store scenario.
    pub fn store_fixture_name(&self) -> String {
        format!("{FIXTURE_PREFIX}store-{}.bin", self.run_id)
    }

    /// A run-scoped name guaranteed never to exist on the server, for the
    /// not-found scenario variants.
    pub fn missing_name(&self, op: &str) -> String {
        format!("nonexistent-{op}-{}.txt", self.run_id)
    }
}

/// Microsecond-epoch run identifier.
pub fn fresh_run_id() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// The original build pipeline: clean, protocol code generation, then the
/// parallel binary build.
pub fn default_build_steps() -> Vec<BuildStep> {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    vec![
        BuildStep::new("make", &["clean_all"]),
        BuildStep::new("make", &["protos"]),
        BuildStep::new("make", &[&format!("-j{cores}"), "part1"]),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::fs;
    use std::path::Path;

    /// Context rooted at `root` with tight timings for unit tests.
    pub(crate) fn context(root: &Path) -> RunContext {
        RunContext {
            run_id: 1_700_000_000_000_000,
            server_address: "127.0.0.1:54099".to_string(),
            server_dir: root.join("server"),
            client_dir: root.join("client"),
            server_bin: root.join("bin").join("dfs-test-server"),
            client_bin: root.join("bin").join("dfs-test-client"),
            build_steps: Vec::new(),
            timing: Timing {
                stale_kill_settle: Duration::from_millis(10),
                startup_grace: Duration::from_millis(150),
                shutdown_wait: Duration::from_secs(2),
                command_timeout: Duration::from_millis(400),
                sync_max_wait: Duration::from_millis(500),
                sync_poll_interval: Duration::from_millis(50),
                settle_delay: Duration::from_millis(50),
            },
        }
    }

    /// Write an executable shell script, for stub binaries under test.
    pub(crate) fn write_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_names_are_run_scoped() {
        let ctx = testing::context(std::path::Path::new("/tmp/x"));
        assert_eq!(
            ctx.bulk_fixture_name(3),
            "dfstest-1700000000000000-003.bin"
        );
        assert_eq!(
            ctx.store_fixture_name(),
            "dfstest-store-1700000000000000.bin"
        );
        assert_eq!(
            ctx.missing_name("fetch"),
            "nonexistent-fetch-1700000000000000.txt"
        );
        assert!(ctx.bulk_fixture_name(0).starts_with(FIXTURE_PREFIX));
    }

    #[test]
    fn build_step_renders_argv() {
        let step = BuildStep::new("make", &["-j4", "part1"]);
        assert_eq!(step.render(), "make -j4 part1");
    }

    #[test]
    fn default_pipeline_has_three_steps() {
        let steps = default_build_steps();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].render(), "make clean_all");
        assert_eq!(steps[1].render(), "make protos");
        assert!(steps[2].render().starts_with("make -j"));
        assert!(steps[2].render().ends_with("part1"));
    }
}
