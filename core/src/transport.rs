use std::sync::Arc;

use cpu_arbiter_config::{
    constants::COMMAND_DEADLINE,
    topology::{Node, Topology},
};
use cpu_arbiter_protocol::{Command, MAX_FRAME_LEN, ProtocolError, Response};
use futures::future::try_join_all;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
    sync::Mutex,
    time::timeout,
};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to agent {node} at {addr}: {source}")]
    Connect {
        node: String,
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o failure on the {node} command channel: {source}")]
    Io {
        node: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent {node} closed the command channel")]
    Closed { node: String },
    #[error("deadline exceeded waiting for {node}")]
    Deadline { node: String },
    #[error("bad reply from {node}: {source}")]
    BadReply {
        node: String,
        #[source]
        source: ProtocolError,
    },
    #[error("agent {node} rejected {command}")]
    Rejected {
        node: String,
        command: &'static str,
    },
}

/// One persistent command channel to a node agent.
///
/// The connection lives as long as the process. One exchange is one framed
/// write followed by one framed read; the agent answers every command with
/// exactly one response.
pub struct AgentChannel {
    node: String,
    stream: TcpStream,
}

impl AgentChannel {
    /// Dial the node's command channel.
    pub async fn connect(node: &Node) -> Result<Self, TransportError> {
        let addr = node.agent_addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| TransportError::Connect {
                node: node.name.clone(),
                addr: addr.clone(),
                source,
            })?;
        debug!(node = %node.name, %addr, "command channel established");
        Ok(Self {
            node: node.name.clone(),
            stream,
        })
    }

    /// Send one command and await its response, bounded by the command
    /// deadline on each direction.
    pub async fn exchange(&mut self, command: &Command) -> Result<Response, TransportError> {
        let frame = command.encode();
        timeout(COMMAND_DEADLINE, self.stream.write_all(frame.as_bytes()))
            .await
            .map_err(|_| TransportError::Deadline {
                node: self.node.clone(),
            })?
            .map_err(|source| TransportError::Io {
                node: self.node.clone(),
                source,
            })?;

        let mut reply = vec![0u8; MAX_FRAME_LEN];
        let read = timeout(COMMAND_DEADLINE, self.stream.read(&mut reply))
            .await
            .map_err(|_| TransportError::Deadline {
                node: self.node.clone(),
            })?
            .map_err(|source| TransportError::Io {
                node: self.node.clone(),
                source,
            })?;
        if read == 0 {
            return Err(TransportError::Closed {
                node: self.node.clone(),
            });
        }
        Response::parse(&String::from_utf8_lossy(&reply[..read])).map_err(|source| {
            TransportError::BadReply {
                node: self.node.clone(),
                source,
            }
        })
    }
}

/// Node metadata plus its serialized command channel. All commands to the
/// node flow through the mutex, so the agent receives them in issue order
/// even when rounds fan out across nodes.
pub struct NodeLink {
    pub node: Node,
    channel: Mutex<AgentChannel>,
}

impl NodeLink {
    #[must_use]
    pub fn new(node: Node, channel: AgentChannel) -> Self {
        Self {
            node,
            channel: Mutex::new(channel),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub async fn exchange(&self, command: &Command) -> Result<Response, TransportError> {
        self.channel.lock().await.exchange(command).await
    }

    /// Exchange that treats anything but `Success` as a rejection.
    pub async fn expect_success(
        &self,
        command: &Command,
        label: &'static str,
    ) -> Result<(), TransportError> {
        match self.exchange(command).await? {
            Response::Success => Ok(()),
            _ => Err(TransportError::Rejected {
                node: self.name().to_owned(),
                command: label,
            }),
        }
    }
}

/// Open one persistent connection per node, failing fast if any agent is
/// unreachable.
pub async fn connect_all(topology: &Topology) -> Result<Vec<Arc<NodeLink>>, TransportError> {
    let links = try_join_all(topology.nodes().iter().map(|node| async move {
        let channel = AgentChannel::connect(node).await?;
        Ok::<_, TransportError>(Arc::new(NodeLink::new(node.clone(), channel)))
    }))
    .await?;
    info!(nodes = links.len(), "connected to all agents");
    Ok(links)
}
