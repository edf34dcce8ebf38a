use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::header,
    response::IntoResponse,
};
use cpu_arbiter_protocol::MAX_FRAME_LEN;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use crate::{
    cgroup::{CgroupLayout, CgroupWriter},
    commands::CommandSession,
    weights::SharedWeights,
};

/// Pieces shared by every accepted command connection.
#[derive(Clone)]
pub struct AgentShared {
    pub layout: CgroupLayout,
    pub writer: Arc<dyn CgroupWriter>,
    pub weights: SharedWeights,
    pub sample_interval: Duration,
}

impl AgentShared {
    fn new_session(&self) -> CommandSession {
        CommandSession::new(
            self.layout.clone(),
            Arc::clone(&self.writer),
            self.weights.clone(),
            self.sample_interval,
        )
    }
}

/// Accept loop of the command channel. Each connection gets a dedicated task
/// and a fresh session for its lifetime.
pub async fn serve_commands(listener: TcpListener, shared: AgentShared) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "command connection accepted");
        let session = shared.new_session();
        tokio::spawn(handle_connection(stream, session));
    }
}

/// One read of up to [`MAX_FRAME_LEN`] bytes is one command; each command
/// yields exactly one response on the same connection.
async fn handle_connection(mut stream: TcpStream, mut session: CommandSession) {
    let mut frame = vec![0u8; MAX_FRAME_LEN];
    loop {
        let read = match stream.read(&mut frame).await {
            Ok(0) => {
                debug!("command connection closed by peer");
                return;
            }
            Ok(read) => read,
            Err(error) => {
                warn!(%error, "command read failed, closing connection");
                return;
            }
        };

        let reply = session
            .handle(&String::from_utf8_lossy(&frame[..read]))
            .await
            .encode();
        if let Err(error) = stream.write_all(reply.as_bytes()).await {
            warn!(%error, "command reply failed, closing connection");
            return;
        }
    }
}

/// Weights endpoint polled by the local LB proxy: any method on any path
/// returns the current weights verbatim.
pub fn weights_app(weights: SharedWeights) -> Router {
    Router::new().fallback(serve_weights).with_state(weights)
}

async fn serve_weights(State(weights): State<SharedWeights>, body: Bytes) -> impl IntoResponse {
    if !body.is_empty() {
        debug!(body = %String::from_utf8_lossy(&body), "ignoring weights request body");
    }
    ([(header::CONNECTION, "close")], weights.current())
}
