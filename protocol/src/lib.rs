//! Line-oriented ASCII protocol spoken over the persistent per-node command
//! channel between the controller and the host agents.
//!
//! There is no length prefix: each side treats one read of up to
//! [`MAX_FRAME_LEN`] bytes as one whole message. Frames are
//! newline-terminated for robustness, which stays wire-compatible with a
//! single-message-per-read peer.

use std::fmt::Write as _;

use thiserror::Error;

/// Upper bound of one framed message on the command channel.
pub const MAX_FRAME_LEN: usize = 4096;

const UPDATE_PODS: &str = "updatePods";
const APPLY_CPU_SHARES: &str = "applyCPUShares";
const APPLY_CPU_QUOTAS: &str = "applyCPUQuotas";
const APPLY_LB_WEIGHTS: &str = "applyLBWeights";
const GET_CPU_UTILIZATIONS: &str = "getCPUUtilizations";

const SUCCESS_REPLY: &str = "Success";
const FAILURE_REPLY: &str = "Failure";
const UNKNOWN_REPLY: &str = "Unknown message type";
const UTILS_PREFIX: &str = "utils:";

/// Grammar violations on either side of the channel.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("{command} requires at least one pair")]
    EmptyPayload { command: &'static str },
    #[error("malformed pair {pair:?} in {command}")]
    MalformedPair {
        command: &'static str,
        pair: String,
    },
    #[error("malformed response {0:?}")]
    MalformedResponse(String),
}

/// One controller→agent command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Replace the agent's session pod map with `podName:podUID` bindings.
    UpdatePods(Vec<(String, String)>),
    /// Write `⌊value⌋` into each pod's `cpu.shares`.
    ApplyCpuShares(Vec<(String, f64)>),
    /// Write the value into each pod's `cpu.cfs_quota_us`.
    ApplyCpuQuotas(Vec<(String, i64)>),
    /// Replace the agent's shared LB weights string verbatim.
    ApplyLbWeights(String),
    /// Sample per-pod CPU utilization over the agent's sampling interval.
    GetCpuUtilizations,
}

impl Command {
    /// Render the command as one newline-terminated frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::UpdatePods(bindings) => {
                let mut frame = UPDATE_PODS.to_owned();
                for (pod, uid) in bindings {
                    let _ = write!(frame, " {pod}:{uid}");
                }
                frame.push('\n');
                frame
            }
            Self::ApplyCpuShares(batch) => {
                let mut frame = APPLY_CPU_SHARES.to_owned();
                for (pod, share) in batch {
                    let _ = write!(frame, " {pod}:{share:.6}");
                }
                frame.push('\n');
                frame
            }
            Self::ApplyCpuQuotas(batch) => {
                let mut frame = APPLY_CPU_QUOTAS.to_owned();
                for (pod, quota) in batch {
                    let _ = write!(frame, " {pod}:{quota}");
                }
                frame.push('\n');
                frame
            }
            Self::ApplyLbWeights(weights) => format!("{APPLY_LB_WEIGHTS} {weights}\n"),
            Self::GetCpuUtilizations => format!("{GET_CPU_UTILIZATIONS}\n"),
        }
    }

    /// Parse one received frame. CR/LF framing bytes are stripped; interior
    /// and trailing spaces of an `applyLBWeights` payload are preserved.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let line = frame.trim_end_matches(['\r', '\n']);

        if line == GET_CPU_UTILIZATIONS {
            return Ok(Self::GetCpuUtilizations);
        }
        if let Some(rest) = line.strip_prefix(APPLY_LB_WEIGHTS) {
            if rest.is_empty() {
                return Ok(Self::ApplyLbWeights(String::new()));
            }
            if let Some(payload) = rest.strip_prefix(' ') {
                return Ok(Self::ApplyLbWeights(payload.to_owned()));
            }
        }

        let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
        match keyword {
            UPDATE_PODS => Ok(Self::UpdatePods(parse_pairs(UPDATE_PODS, rest, |uid| {
                Some(uid.to_owned())
            })?)),
            APPLY_CPU_SHARES => Ok(Self::ApplyCpuShares(parse_pairs(
                APPLY_CPU_SHARES,
                rest,
                |share| share.parse::<f64>().ok(),
            )?)),
            APPLY_CPU_QUOTAS => Ok(Self::ApplyCpuQuotas(parse_pairs(
                APPLY_CPU_QUOTAS,
                rest,
                // Quotas arrive as integers but a fractional value is
                // accepted and floored, matching the shares path.
                |quota| quota.parse::<f64>().ok().map(|value| value.floor() as i64),
            )?)),
            other => Err(ProtocolError::UnknownCommand(other.to_owned())),
        }
    }
}

fn parse_pairs<T>(
    command: &'static str,
    rest: &str,
    parse_value: impl Fn(&str) -> Option<T>,
) -> Result<Vec<(String, T)>, ProtocolError> {
    let mut pairs = Vec::new();
    for token in rest.split_whitespace() {
        let malformed = || ProtocolError::MalformedPair {
            command,
            pair: token.to_owned(),
        };
        let (name, value) = token.split_once(':').ok_or_else(malformed)?;
        if name.is_empty() {
            return Err(malformed());
        }
        let value = parse_value(value).ok_or_else(malformed)?;
        pairs.push((name.to_owned(), value));
    }
    if pairs.is_empty() {
        return Err(ProtocolError::EmptyPayload { command });
    }
    Ok(pairs)
}

/// One agent→controller response; every command yields exactly one.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Success,
    Failure,
    /// The agent did not recognize the command keyword.
    UnknownCommand,
    /// Per-pod utilization percentages; `-1` marks a failed sample.
    Utilizations(Vec<(String, f64)>),
}

impl Response {
    /// Render the response as one newline-terminated frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Success => format!("{SUCCESS_REPLY}\n"),
            Self::Failure => format!("{FAILURE_REPLY}\n"),
            Self::UnknownCommand => format!("{UNKNOWN_REPLY}\n"),
            Self::Utilizations(report) => {
                let mut frame = UTILS_PREFIX.to_owned();
                for (pod, pct) in report {
                    let _ = write!(frame, " {pod}:{pct:.6}");
                }
                frame.push('\n');
                frame
            }
        }
    }

    /// Parse one received frame.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let line = frame.trim_end_matches(['\r', '\n']);
        match line {
            SUCCESS_REPLY => Ok(Self::Success),
            FAILURE_REPLY => Ok(Self::Failure),
            UNKNOWN_REPLY => Ok(Self::UnknownCommand),
            _ => {
                let Some(rest) = line.strip_prefix(UTILS_PREFIX) else {
                    return Err(ProtocolError::MalformedResponse(line.to_owned()));
                };
                let mut report = Vec::new();
                for token in rest.split_whitespace() {
                    let malformed = || ProtocolError::MalformedResponse(line.to_owned());
                    let (pod, pct) = token.split_once(':').ok_or_else(malformed)?;
                    let pct = pct.parse::<f64>().map_err(|_| malformed())?;
                    report.push((pod.to_owned(), pct));
                }
                Ok(Self::Utilizations(report))
            }
        }
    }
}
