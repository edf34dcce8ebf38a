use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use cpu_arbiter_agent::{
    cgroup::{CgroupLayout, HelperScriptWriter},
    server::{AgentShared, serve_commands, weights_app},
    weights::SharedWeights,
};
use cpu_arbiter_config::constants::{
    AGENT_COMMAND_PORT, AGENT_WEIGHTS_PORT, CPU_UTILIZATION_INTERVAL, DEFAULT_CGROUP_ROOT,
    DEFAULT_WRITE_HELPER,
};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Per-node host agent of the CPU arbitration control plane")]
struct Args {
    /// TCP port of the controller command channel.
    #[arg(long, env = "ARBITER_AGENT_COMMAND_PORT", default_value_t = AGENT_COMMAND_PORT)]
    command_port: u16,
    /// HTTP port polled by the local LB proxy for the current weights.
    #[arg(long, env = "ARBITER_AGENT_WEIGHTS_PORT", default_value_t = AGENT_WEIGHTS_PORT)]
    weights_port: u16,
    /// Root of the controlled cgroup hierarchy.
    #[arg(long, env = "ARBITER_CGROUP_ROOT", default_value = DEFAULT_CGROUP_ROOT)]
    cgroup_root: PathBuf,
    /// Privileged helper script performing the actual cgroup writes.
    #[arg(long, env = "ARBITER_WRITE_HELPER", default_value = DEFAULT_WRITE_HELPER)]
    write_helper: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let weights = SharedWeights::new();
    let shared = AgentShared {
        layout: CgroupLayout::new(args.cgroup_root),
        writer: Arc::new(HelperScriptWriter::new(args.write_helper)),
        weights: weights.clone(),
        sample_interval: CPU_UTILIZATION_INTERVAL,
    };

    let command_listener = TcpListener::bind(("0.0.0.0", args.command_port))
        .await
        .with_context(|| format!("failed to bind command channel on port {}", args.command_port))?;
    let weights_listener = TcpListener::bind(("0.0.0.0", args.weights_port))
        .await
        .with_context(|| format!("failed to bind weights endpoint on port {}", args.weights_port))?;
    info!(
        command_port = args.command_port,
        weights_port = args.weights_port,
        "agent listening"
    );

    tokio::select! {
        result = serve_commands(command_listener, shared) => {
            result.context("command listener terminated unexpectedly")
        }
        result = axum::serve(weights_listener, weights_app(weights)) => {
            result.context("weights endpoint terminated unexpectedly")
        }
    }
}
