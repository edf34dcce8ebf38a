use std::time::Duration;

/// Number of per-app demand snapshots kept by the rolling window.
pub const DEMAND_WINDOW: usize = 50;

/// Per-app demand below this percentage is treated as sampling noise and
/// zeroed before optimization.
pub const NOISE_FLOOR_PCT: f64 = 2.0;

/// Base overhead pad, in CPU percent, added on top of per-app demand.
pub const OVERHEAD_PCT: f64 = 5.0;

/// Tenant that receives a single overhead pad; every other tenant gets a
/// double one.
pub const SINGLE_PAD_APP: &str = "app3";

/// CFS bandwidth period the quotas are computed against, in microseconds.
pub const CFS_PERIOD_US: i64 = 100_000;

/// CPUs per worker node in the experiment fleet.
pub const CPUS_IN_NODE: i64 = 2;

/// Lower bound for any emitted CFS quota, in microseconds.
pub const MINIMUM_CPU_QUOTA_US: i64 = 1000;

/// Extra quota headroom per pod, as a percentage of the node bandwidth.
pub const POD_QUOTA_OVERHEAD_PCT: i64 = 10;

/// Per-node cpu.shares credit budget split across tenants.
pub const SHARE_BUDGET: f64 = 512.0;

/// cpu.shares value pushed to every pod before enforcement starts.
pub const DEFAULT_CPU_SHARES: f64 = 256.0;

/// cfs_quota_us value that disables bandwidth control.
pub const UNLIMITED_CPU_QUOTA: i64 = -1;

/// Wall-clock lifetime of one controller run.
pub const RUN_DURATION: Duration = Duration::from_secs(80);

/// Interval the agent sleeps between its two usage captures. The sleep runs
/// on the command handler, which also paces the controller's round loop.
pub const CPU_UTILIZATION_INTERVAL: Duration = Duration::from_millis(100);

/// TCP port of the agent command channel.
pub const AGENT_COMMAND_PORT: u16 = 9988;

/// HTTP port of the agent weights endpoint.
pub const AGENT_WEIGHTS_PORT: u16 = 9989;

/// Default optimizer service port.
pub const OPTIMIZER_PORT: u16 = 5000;

/// Optimizer status code meaning the solution is optimal.
pub const OPTIMAL_STATUS: i64 = 2;

/// Deadline for one command exchange with an agent.
pub const COMMAND_DEADLINE: Duration = Duration::from_secs(10);

/// Deadline for one optimizer call.
pub const OPTIMIZER_DEADLINE: Duration = Duration::from_secs(10);

/// Default root of the cgroup hierarchy the agent operates under.
pub const DEFAULT_CGROUP_ROOT: &str = "/host/sys/fs/cgroup/cpu/kubepods";

/// Default privileged helper script performing cgroup writes.
pub const DEFAULT_WRITE_HELPER: &str = "./writetofile.sh";
