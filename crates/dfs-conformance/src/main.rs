// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use dfs_conformance::context::{default_build_steps, fresh_run_id, RunContext, Timing};
use dfs_conformance::env::EnvironmentManager;
use dfs_conformance::fixtures::{FixtureOracle, BULK_SIZE_RANGE};
use dfs_conformance::report::{self, SuiteReport};
use dfs_conformance::scenarios;
use dfs_conformance::server::ServerController;

#[derive(Debug, Parser)]
#[command(author, version, about = "Black-box conformance harness for the DFS server/client pair")]
struct Cli {
    /// Number of bulk fixtures to seed into the server directory
    #[arg(long, default_value_t = 5)]
    files: usize,

    /// Address the server listens on and the client connects to
    #[arg(long, default_value = "127.0.0.1:54080")]
    address: String,

    /// Server-side mount directory
    #[arg(long, default_value = "mnt/server")]
    server_dir: PathBuf,

    /// Client-side mount directory
    #[arg(long, default_value = "mnt/client")]
    client_dir: PathBuf,

    /// Path to the server binary under test
    #[arg(long, default_value = "bin/dfs-server-p1")]
    server_bin: PathBuf,

    /// Path to the client binary under test
    #[arg(long, default_value = "bin/dfs-client-p1")]
    client_bin: PathBuf,

    /// Skip the external build pipeline and run against prebuilt binaries
    #[arg(long)]
    skip_build: bool,

    /// Wall-clock budget per client invocation, in seconds
    #[arg(long, default_value_t = 30)]
    command_timeout_sec: u64,

    /// Maximum wait for a fetched file to appear client-side, in seconds
    #[arg(long, default_value_t = 10)]
    sync_max_wait_sec: u64,

    /// Optional path for writing the JSON report
    #[arg(long)]
    json_output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => {
            info!("all scenarios passed");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            error!("some scenarios failed");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("run aborted: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let timing = Timing {
        command_timeout: Duration::from_secs(cli.command_timeout_sec),
        sync_max_wait: Duration::from_secs(cli.sync_max_wait_sec),
        ..Timing::default()
    };

    let ctx = RunContext {
        run_id: fresh_run_id(),
        server_address: cli.address,
        server_dir: cli.server_dir,
        client_dir: cli.client_dir,
        server_bin: cli.server_bin,
        client_bin: cli.client_bin,
        build_steps: if cli.skip_build { Vec::new() } else { default_build_steps() },
        timing,
    };

    info!("run id {}", ctx.run_id);
    info!("server dir {}", ctx.server_dir.display());
    info!("client dir {}", ctx.client_dir.display());

    EnvironmentManager::prepare(&ctx).context("environment preparation failed")?;

    let mut server = ServerController::new(&ctx);
    if let Err(err) = server.start() {
        EnvironmentManager::teardown(&ctx);
        return Err(err).context("server bring-up failed");
    }

    // The server is up; from here on every exit path stops it and scrubs
    // fixtures before the verdict propagates. The controller's Drop covers
    // panics escaping this scope.
    let report = seed_and_run(&ctx, cli.files);
    server.stop();
    EnvironmentManager::teardown(&ctx);

    let report = report?;
    report::print_summary(&report);

    if let Some(path) = &cli.json_output {
        let file = File::create(path)
            .with_context(|| format!("failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(file, &report).context("failed to write JSON report")?;
        info!("wrote JSON report to {}", path.display());
    }

    Ok(report.all_passed())
}

fn seed_and_run(ctx: &RunContext, count: usize) -> anyhow::Result<SuiteReport> {
    let mut oracle = FixtureOracle::new();
    let fixtures = oracle
        .generate(ctx, &ctx.server_dir, count, BULK_SIZE_RANGE)
        .context("fixture seeding failed")?;

    let suite = scenarios::suite();
    Ok(report::run_suite(ctx, &fixtures, &suite))
}
