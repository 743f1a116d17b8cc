// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client invocation with bounded wall-clock time.
//!
//! The driver captures output and enforces the timeout; it never interprets
//! what the client printed. Interpretation belongs to the scenarios, which
//! own the output contract.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::context::RunContext;
use crate::error::Result;

/// Client subcommands of the directory-mirroring protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOp {
    List,
    Fetch,
    Store,
    Delete,
    Stat,
}

impl ClientOp {
    pub fn token(self) -> &'static str {
        match self {
            ClientOp::List => "list",
            ClientOp::Fetch => "fetch",
            ClientOp::Store => "store",
            ClientOp::Delete => "delete",
            ClientOp::Stat => "stat",
        }
    }
}

/// Captured result of one client invocation. Consumed immediately by the
/// calling scenario, never retained.
#[derive(Debug)]
pub struct CommandResult {
    /// Rendered command line, for diagnostics.
    pub command: String,
    /// Exit code when the process completed; negative signal number when it
    /// was signal-killed; `None` when the invocation timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandResult {
    /// Combined stdout and stderr, for contracts that accept either stream.
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Echo the raw client output under `label`. Every invocation's full
    /// output is shown during the run for diagnosability.
    pub fn echo(&self, label: &str) {
        if self.stdout.trim().is_empty() {
            println!("{label} stdout: (empty)");
        } else {
            println!("{label} stdout:\n{}", self.stdout.trim_end());
        }
        if self.stderr.trim().is_empty() {
            println!("{label} stderr: (empty)");
        } else {
            println!("{label} stderr:\n{}", self.stderr.trim_end());
        }
    }
}

/// Invokes the client binary with the run's fixed address, mount directory,
/// and debug flag.
pub struct CommandDriver {
    ctx: RunContext,
}

impl CommandDriver {
    pub fn new(ctx: &RunContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Run `<client> -a <addr> -m <dir> -d 1 <subcommand> [filename]`
    /// synchronously. A timeout kills the child and is reported as a
    /// distinct state in the result, never conflated with a non-zero exit.
    pub fn run(&self, op: ClientOp, filename: Option<&str>) -> Result<CommandResult> {
        let rendered = self.render(op, filename);
        info!("running: {rendered}");

        let mut command = Command::new(&self.ctx.client_bin);
        command
            .arg("-a")
            .arg(&self.ctx.server_address)
            .arg("-m")
            .arg(&self.ctx.client_dir)
            .arg("-d")
            .arg("1")
            .arg(op.token());
        if let Some(name) = filename {
            command.arg(name);
        }

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.ctx.timing.command_timeout;
        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if Instant::now() >= deadline {
                timed_out = true;
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            thread::sleep(Duration::from_millis(50));
        };

        Ok(CommandResult {
            command: rendered,
            exit_code: status.map(exit_code_of),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            timed_out,
        })
    }

    fn render(&self, op: ClientOp, filename: Option<&str>) -> String {
        let mut rendered = format!(
            "{} -a {} -m {} -d 1 {}",
            self.ctx.client_bin.display(),
            self.ctx.server_address,
            self.ctx.client_dir.display(),
            op.token()
        );
        if let Some(name) = filename {
            rendered.push(' ');
            rendered.push_str(name);
        }
        rendered
    }
}

/// Read a pipe to exhaustion on its own thread, so a full buffer can never
/// wedge the child while the driver polls for exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut raw = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut raw);
        }
        String::from_utf8_lossy(&raw).into_owned()
    })
}

fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|s| -s)).unwrap_or(-1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}
