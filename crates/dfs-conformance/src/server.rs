// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server subprocess lifecycle.
//!
//! The controller owns the one long-lived shared resource of the run. Its
//! state machine is `NotStarted → Starting → Running → Stopping → Stopped`,
//! with a graceful-then-forced shutdown so the harness never leaves an
//! orphaned server behind, and a `Drop` backstop covering non-local exits.

use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use libc::pid_t;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::{HarnessError, Result};

/// Lifecycle states of the managed server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Owns the server subprocess for the duration of the run.
pub struct ServerController {
    ctx: RunContext,
    state: ServerState,
    child: Option<Child>,
}

impl ServerController {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            ctx: ctx.clone(),
            state: ServerState::NotStarted,
            child: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Bring the server up. Any stale instance from a prior run is killed
    /// first so it cannot keep the listen port bound. Startup success is
    /// "process still alive after the grace period"; there is no readiness
    /// handshake.
    pub fn start(&mut self) -> Result<()> {
        self.state = ServerState::Starting;

        kill_stale_servers(&self.ctx.server_bin);
        thread::sleep(self.ctx.timing.stale_kill_settle);

        info!("starting DFS server on {}", self.ctx.server_address);
        let spawned = Command::new(&self.ctx.server_bin)
            .arg("-a")
            .arg(&self.ctx.server_address)
            .arg("-m")
            .arg(&self.ctx.server_dir)
            .arg("-d")
            .arg("1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                self.state = ServerState::Stopped;
                return Err(HarnessError::ServerStartFailure {
                    detail: format!("failed to spawn {}: {err}", self.ctx.server_bin.display()),
                });
            }
        };

        thread::sleep(self.ctx.timing.startup_grace);

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                let output = child.wait_with_output()?;
                self.state = ServerState::Stopped;
                return Err(HarnessError::ServerStartFailure {
                    detail: format!(
                        "server exited with {status} during startup: {}",
                        String::from_utf8_lossy(&output.stderr).trim_end()
                    ),
                });
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                self.state = ServerState::Stopped;
                return Err(HarnessError::ServerStartFailure {
                    detail: format!("failed to poll server during startup: {err}"),
                });
            }
        }

        // Keep the pipes drained so a chatty server can never block on a
        // full pipe buffer mid-run.
        drain_in_background(child.stdout.take(), "stdout");
        drain_in_background(child.stderr.take(), "stderr");

        self.child = Some(child);
        self.state = ServerState::Running;
        info!("server started");
        Ok(())
    }

    /// Graceful stop with forced-kill escalation: SIGTERM, a bounded wait,
    /// then SIGKILL and an unconditional reap. Calling this when the server
    /// is not running is a no-op.
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.state = ServerState::Stopping;
        info!("stopping DFS server");

        let pid = child.id() as pid_t;
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }

        let deadline = Instant::now() + self.ctx.timing.shutdown_wait;
        let exited = loop {
            match child.try_wait() {
                Ok(Some(_)) => break true,
                Ok(None) if Instant::now() >= deadline => break false,
                Ok(None) => thread::sleep(Duration::from_millis(100)),
                Err(err) => {
                    warn!("failed to poll server process: {err}");
                    break false;
                }
            }
        };

        if !exited {
            warn!("server ignored SIGTERM, escalating to SIGKILL");
            let _ = child.kill();
            let _ = child.wait();
        }

        self.state = ServerState::Stopped;
        info!("server stopped");
    }
}

impl Drop for ServerController {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.stop();
        }
    }
}

/// Forward a server output stream to the debug log until EOF.
fn drain_in_background<R: Read + Send + 'static>(stream: Option<R>, label: &'static str) {
    let Some(stream) = stream else {
        return;
    };
    thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(|l| l.ok()) {
            debug!("server {label}: {line}");
        }
    });
}

/// SIGKILL every process whose cmdline names the server binary. A lingering
/// instance from an earlier run would otherwise hold the listen port.
fn kill_stale_servers(server_bin: &Path) {
    let needle = match server_bin.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return,
    };
    for pid in matching_pids(&needle) {
        warn!("killing stale server process {pid}");
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

fn matching_pids(needle: &str) -> Vec<pid_t> {
    let mut pids = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return pids;
    };
    let own_pid = std::process::id() as pid_t;
    for entry in entries.filter_map(|e| e.ok()) {
        let pid: pid_t = match entry.file_name().to_string_lossy().parse() {
            Ok(pid) => pid,
            Err(_) => continue,
        };
        if pid == own_pid {
            continue;
        }
        let cmdline = match fs::read(entry.path().join("cmdline")) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        if cmdline.is_empty() {
            continue;
        }
        let cmdline = cmdline
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part))
            .collect::<Vec<_>>()
            .join(" ");
        if cmdline.contains(needle) {
            pids.push(pid);
        }
    }
    pids
}
