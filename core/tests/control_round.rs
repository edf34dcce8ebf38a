use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    extract::{RawQuery, State},
    response::IntoResponse,
    routing::get,
};
use cpu_arbiter_config::{
    enforcement::Enforcement,
    topology::{Node, Pod, Topology},
};
use cpu_arbiter_core::{controller::Controller, optimizer::OptimizerClient, roundlog::RoundLog};
use reqwest::Url;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpListener,
};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Minimal agent double: acks every command, answers the scripted line to
/// `getCPUUtilizations`, and records each received frame in order.
async fn spawn_fake_agent(
    utils_reply: &str,
) -> Result<(SocketAddr, Arc<Mutex<Vec<String>>>), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let record = Arc::clone(&seen);
    let utils_reply = format!("{utils_reply}\n");
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let record = Arc::clone(&record);
            let utils_reply = utils_reply.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let read = match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(read) => read,
                    };
                    let frame = String::from_utf8_lossy(&buf[..read])
                        .trim_end_matches(['\r', '\n'])
                        .to_owned();
                    let reply = if frame == "getCPUUtilizations" {
                        utils_reply.clone()
                    } else {
                        "Success\n".to_owned()
                    };
                    record.lock().unwrap().push(frame);
                    if stream.write_all(reply.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    Ok((addr, seen))
}

#[derive(Clone)]
struct FakeOptimizer {
    reply: Arc<str>,
    queries: Arc<Mutex<Vec<String>>>,
}

async fn serve_allocation(
    State(state): State<FakeOptimizer>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    state.queries.lock().unwrap().push(query.unwrap_or_default());
    (
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        state.reply.to_string(),
    )
}

async fn spawn_fake_optimizer(
    reply: &str,
) -> Result<(Url, Arc<Mutex<Vec<String>>>), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let queries = Arc::new(Mutex::new(Vec::new()));
    let state = FakeOptimizer {
        reply: reply.into(),
        queries: Arc::clone(&queries),
    };
    let app = Router::new()
        .route("/", get(serve_allocation).post(serve_allocation))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((Url::parse(&format!("http://{addr}/"))?, queries))
}

fn single_pod_topology(agent: SocketAddr) -> Topology {
    Topology::from_nodes(vec![Node {
        index: 0,
        name: "node1".to_owned(),
        ip: agent.ip().to_string(),
        agent_port: agent.port(),
        milli_cores: 2000,
        pods: vec![Pod {
            name: "app1-0".to_owned(),
            fair_share: 0.5,
            cgroup: "uid-1".to_owned(),
        }],
    }])
    .unwrap()
}

#[tokio::test]
async fn lb_round_normalizes_the_single_replica_to_one_hundred() -> TestResult {
    let (agent_addr, seen) = spawn_fake_agent("utils: app1-0:40.000000").await?;
    let (optimizer_url, _) =
        spawn_fake_optimizer(r#"{"status":2,"result":{"app1":{"app1-0":17.0}}}"#).await?;

    let logs = tempfile::tempdir()?;
    let log = RoundLog::create(logs.path(), "it", Enforcement::Lb.file_tag(), "1")?;

    let mut controller = Controller::start(
        single_pod_topology(agent_addr),
        OptimizerClient::new(optimizer_url),
        Enforcement::Lb,
        log,
    )
    .await?;
    controller.run_round(1).await?;

    let frames = seen.lock().unwrap().clone();
    assert_eq!(
        frames,
        [
            "updatePods app1-0:uid-1",
            "getCPUUtilizations",
            "applyLBWeights app1:100.000000 ",
        ]
    );

    let line = std::fs::read_to_string(logs.path().join("it").join("lb_CPU_1"))?;
    let record: serde_json::Value = serde_json::from_str(line.lines().next().unwrap())?;
    assert_eq!(record["CPUUtilizations"]["app1-0"], 40.0);
    assert_eq!(record["LBWeights"]["app1"]["app1-0"], 100.0);
    assert_eq!(record["CPUShares"], serde_json::json!({}));
    Ok(())
}

#[tokio::test]
async fn zero_allocation_falls_back_to_the_equal_split() -> TestResult {
    let (agent_addr, seen) = spawn_fake_agent("utils: app1-0:0.000000").await?;
    let (optimizer_url, _) =
        spawn_fake_optimizer(r#"{"status":2,"result":{"app1":{"app1-0":0.0}}}"#).await?;

    let logs = tempfile::tempdir()?;
    let log = RoundLog::create(logs.path(), "it", Enforcement::Lb.file_tag(), "1")?;

    let mut controller = Controller::start(
        single_pod_topology(agent_addr),
        OptimizerClient::new(optimizer_url),
        Enforcement::Lb,
        log,
    )
    .await?;
    controller.run_round(1).await?;

    let frames = seen.lock().unwrap().clone();
    assert_eq!(frames.last().unwrap(), "applyLBWeights app1:100.000000 ");
    Ok(())
}

#[tokio::test]
async fn non_optimal_status_skips_the_apply_but_still_logs() -> TestResult {
    let (agent_addr, seen) = spawn_fake_agent("utils: app1-0:40.000000").await?;
    let (optimizer_url, queries) = spawn_fake_optimizer(r#"{"status":3}"#).await?;

    let logs = tempfile::tempdir()?;
    let log = RoundLog::create(logs.path(), "it", Enforcement::CpuShare.file_tag(), "1")?;

    let mut controller = Controller::start(
        single_pod_topology(agent_addr),
        OptimizerClient::new(optimizer_url),
        Enforcement::CpuShare,
        log,
    )
    .await?;
    controller.run_round(1).await?;

    // Startup pushes defaults; the rejected round must add nothing after
    // the sampling command.
    let frames = seen.lock().unwrap().clone();
    assert_eq!(
        frames,
        [
            "updatePods app1-0:uid-1",
            "applyLBWeights ",
            "applyCPUQuotas app1-0:-1",
            "applyCPUShares app1-0:256.000000",
            "getCPUUtilizations",
        ]
    );

    // Demand reaching the optimizer is noise-filtered and padded:
    // 40% + 2×5% overhead.
    let queries = queries.lock().unwrap().clone();
    assert_eq!(queries, ["host_cap=200&t0=50.000000"]);

    let line = std::fs::read_to_string(logs.path().join("it").join("cpu_share_CPU_1"))?;
    let record: serde_json::Value = serde_json::from_str(line.lines().next().unwrap())?;
    assert_eq!(record["CPUUtilizations"]["app1-0"], 40.0);
    assert_eq!(record["CPUShares"], serde_json::json!({}));
    Ok(())
}

#[tokio::test]
async fn startup_fails_fast_when_an_agent_is_unreachable() -> TestResult {
    let unreachable: SocketAddr = "127.0.0.1:9".parse()?;
    let (optimizer_url, _) = spawn_fake_optimizer(r#"{"status":2}"#).await?;

    let logs = tempfile::tempdir()?;
    let log = RoundLog::create(logs.path(), "it", Enforcement::None.file_tag(), "1")?;

    let result = Controller::start(
        single_pod_topology(unreachable),
        OptimizerClient::new(optimizer_url),
        Enforcement::None,
        log,
    )
    .await;
    assert!(result.is_err());
    Ok(())
}
