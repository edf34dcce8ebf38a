use std::{sync::Arc, time::Duration};

use cpu_arbiter_config::{
    constants::{DEFAULT_CPU_SHARES, UNLIMITED_CPU_QUOTA},
    enforcement::Enforcement,
    topology::Topology,
};
use cpu_arbiter_protocol::{Command, Response};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    decision,
    demand::{AppDemand, DemandWindow, effective_demand},
    optimizer::OptimizerClient,
    roundlog::{RoundLog, RoundRecord},
    sampler,
    transport::{self, NodeLink, TransportError},
};

/// Fatal controller failures. Everything that can go wrong inside a round
/// is contained there and only logged.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to write the round log: {0}")]
    Log(#[from] std::io::Error),
}

/// Central control loop: samples the fleet, averages demand, consults the
/// optimizer and distributes enforcement decisions.
pub struct Controller {
    topology: Topology,
    links: Vec<Arc<NodeLink>>,
    optimizer: OptimizerClient,
    enforcement: Enforcement,
    window: DemandWindow,
    log: RoundLog,
}

impl Controller {
    /// Fatal startup sequence: connect to every agent, install the pod
    /// topology node by node, and push default kernel state for the
    /// enforcing modes.
    pub async fn start(
        topology: Topology,
        optimizer: OptimizerClient,
        enforcement: Enforcement,
        log: RoundLog,
    ) -> Result<Self, ControllerError> {
        let links = transport::connect_all(&topology).await?;
        let controller = Self {
            topology,
            links,
            optimizer,
            enforcement,
            window: DemandWindow::default(),
            log,
        };
        controller.install_pods().await?;
        if enforcement.needs_defaults() {
            controller.push_defaults().await?;
        }
        Ok(controller)
    }

    async fn install_pods(&self) -> Result<(), TransportError> {
        for link in &self.links {
            let bindings = link
                .node
                .pods
                .iter()
                .map(|pod| (pod.name.clone(), pod.cgroup.clone()))
                .collect();
            link.expect_success(&Command::UpdatePods(bindings), "updatePods")
                .await?;
            info!(node = link.name(), "pod topology installed");
        }
        Ok(())
    }

    /// Reset kernel state before enforcement starts: no LB bias, unlimited
    /// quotas, default shares.
    async fn push_defaults(&self) -> Result<(), TransportError> {
        for link in &self.links {
            let pods = || link.node.pods.iter();
            link.expect_success(&Command::ApplyLbWeights(String::new()), "applyLBWeights")
                .await?;
            link.expect_success(
                &Command::ApplyCpuQuotas(
                    pods().map(|pod| (pod.name.clone(), UNLIMITED_CPU_QUOTA)).collect(),
                ),
                "applyCPUQuotas",
            )
            .await?;
            link.expect_success(
                &Command::ApplyCpuShares(
                    pods().map(|pod| (pod.name.clone(), DEFAULT_CPU_SHARES)).collect(),
                ),
                "applyCPUShares",
            )
            .await?;
            info!(node = link.name(), "default kernel state pushed");
        }
        Ok(())
    }

    /// Drive rounds until the wall-clock lifetime elapses. The loop has no
    /// pacing sleep of its own; the agents' sampling interval paces it.
    pub async fn run(mut self, lifetime: Duration) -> Result<(), ControllerError> {
        let deadline = Instant::now() + lifetime;
        let mut round = 0u64;
        while Instant::now() < deadline {
            round += 1;
            self.run_round(round).await?;
        }
        info!(rounds = round, "controller lifetime elapsed");
        Ok(())
    }

    /// One sample → optimize → apply → log cycle. A failure anywhere in the
    /// round skips the remaining actions and lets the loop continue.
    pub async fn run_round(&mut self, round: u64) -> Result<(), ControllerError> {
        let samples = match sampler::sample_all(&self.links).await {
            Ok(samples) => samples,
            Err(error) => {
                warn!(round, %error, "sampling failed, skipping round");
                return Ok(());
            }
        };

        let mut record = RoundRecord::now();
        record.cpu_utilizations = sampler::flatten_pods(&samples);
        let demand = sampler::aggregate_by_app(&samples);

        match self.enforcement {
            Enforcement::None => {}
            Enforcement::Lb => self.lb_round(round, demand, &mut record).await,
            Enforcement::CpuQuota | Enforcement::CpuShare | Enforcement::Both => {
                self.kernel_round(round, demand, &mut record).await;
            }
        }

        self.log.append(&record)?;
        Ok(())
    }

    async fn lb_round(&mut self, round: u64, demand: AppDemand, record: &mut RoundRecord) {
        self.window.push(demand);
        let average = self.window.average();

        let allocation = match self.optimizer.solve_generic(&self.topology, &average).await {
            Ok(allocation) => allocation,
            Err(error) => {
                warn!(round, %error, "optimizer rejected the LB round");
                return;
            }
        };

        let (wire, weights) = decision::lb_weights(&allocation.result);
        record.lb_weights = weights;
        for link in &self.links {
            self.apply(round, link, Command::ApplyLbWeights(wire.clone()))
                .await;
        }
    }

    async fn kernel_round(&mut self, round: u64, demand: AppDemand, record: &mut RoundRecord) {
        self.window.push(effective_demand(&demand));
        let average = self.window.average();

        let allocation = match self
            .optimizer
            .solve_legacy(self.topology.apps(), &average)
            .await
        {
            Ok(allocation) => allocation,
            Err(error) => {
                warn!(round, %error, "optimizer rejected the kernel round");
                return;
            }
        };
        let shares = decision::project_allocation(&self.topology, &allocation);

        if self.enforcement.applies_quotas() {
            let batches = decision::cpu_quotas(&self.topology, &shares);
            record.cpu_quotas = batches
                .iter()
                .flatten()
                .map(|(pod, quota)| (pod.clone(), *quota))
                .collect();
            for (link, batch) in self.links.iter().zip(batches) {
                self.apply(round, link, Command::ApplyCpuQuotas(batch)).await;
            }
        }

        if self.enforcement.applies_shares() {
            let batches = decision::cpu_shares(&self.topology, &shares);
            record.cpu_shares = batches
                .iter()
                .flatten()
                .map(|(pod, share)| (pod.clone(), *share))
                .collect();
            for (link, batch) in self.links.iter().zip(batches) {
                self.apply(round, link, Command::ApplyCpuShares(batch)).await;
            }
        }
    }

    /// Sequential apply fan-out: a rejection or transport failure is logged
    /// and the remaining nodes still receive their command.
    async fn apply(&self, round: u64, link: &Arc<NodeLink>, command: Command) {
        match link.exchange(&command).await {
            Ok(Response::Success) => {}
            Ok(response) => {
                warn!(round, node = link.name(), ?response, "apply rejected");
            }
            Err(error) => {
                warn!(round, node = link.name(), %error, "apply failed");
            }
        }
    }
}
