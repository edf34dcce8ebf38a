use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use cpu_arbiter_config::{
    constants::{OPTIMIZER_PORT, RUN_DURATION},
    enforcement::Enforcement,
    topology::Topology,
};
use cpu_arbiter_core::{controller::Controller, optimizer::OptimizerClient, roundlog::RoundLog};
use reqwest::Url;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Central controller of the CPU arbitration control plane")]
struct Args {
    /// Topology snapshot (YAML) enumerating nodes and their pods.
    #[arg(long, env = "ARBITER_TOPOLOGY")]
    topology: PathBuf,
    /// Enforcement strategy for this run.
    #[arg(long, env = "ARBITER_ENFORCEMENT")]
    enforcement: Enforcement,
    /// Optimizer service base URL; defaults to the local service port.
    #[arg(long, env = "ARBITER_OPTIMIZER_URL")]
    optimizer_url: Option<Url>,
    /// Directory prefix the round logs are written under.
    #[arg(long, env = "ARBITER_LOG_PREFIX", default_value = "logs")]
    log_prefix: PathBuf,
    /// Experiment folder under the log prefix.
    #[arg(long, env = "ARBITER_LOG_FOLDER")]
    folder: String,
    /// Run identifier appended to the log file name.
    #[arg(long, env = "ARBITER_RUN_ID")]
    run: String,
    /// Wall-clock lifetime of the run, in seconds.
    #[arg(long, env = "ARBITER_DURATION_SECS", default_value_t = RUN_DURATION.as_secs())]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let topology = Topology::load(&args.topology).with_context(|| {
        format!("failed to load topology from {}", args.topology.display())
    })?;

    let optimizer_url = match args.optimizer_url {
        Some(url) => url,
        None => Url::parse(&format!("http://127.0.0.1:{OPTIMIZER_PORT}/"))
            .context("failed to build the default optimizer URL")?,
    };

    let log = RoundLog::create(
        &args.log_prefix,
        &args.folder,
        args.enforcement.file_tag(),
        &args.run,
    )
    .context("failed to open the round log")?;

    info!(
        mode = %args.enforcement,
        nodes = topology.nodes().len(),
        optimizer = %optimizer_url,
        "starting controller"
    );

    let controller = Controller::start(
        topology,
        OptimizerClient::new(optimizer_url),
        args.enforcement,
        log,
    )
    .await
    .context("controller startup failed")?;

    controller
        .run(Duration::from_secs(args.duration_secs))
        .await
        .context("controller run failed")?;

    Ok(())
}
