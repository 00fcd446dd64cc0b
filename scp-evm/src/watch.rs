//! Dispute watcher.
//!
//! Each tick compares the best locally held, countersigned state for a
//! channel with the contract's view. When the channel is closing on an older
//! nonce and there is still a safety buffer before the close deadline, the
//! watcher submits `challenge` with its local state. Near the deadline it
//! declines rather than race it.
//!
//! [`run`] drives one channel on a fixed interval until cancelled; a failed
//! tick is logged and the next tick proceeds. [`run_all`] watches several
//! channels concurrently, each on its own loop.

use alloy_primitives::{B256, Bytes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use scp::UnixTimestamp;
use scp::proto::ChannelState;

use crate::chain::{ChainError, ChannelContract};

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default seconds of margin required before the close deadline.
pub const DEFAULT_SAFETY_BUFFER_SECS: u64 = 2;

/// Which local record the watcher defends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The payer; proofs come from the agent state file.
    Agent,
    /// The hub; proofs come from the hub store.
    Hub,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => f.write_str("agent"),
            Self::Hub => f.write_str("hub"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "hub" => Ok(Self::Hub),
            other => Err(format!("ROLE must be agent or hub, got {other}")),
        }
    }
}

/// Per-channel watcher settings.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Whose proof to read.
    pub role: Role,
    /// Channel to defend.
    pub channel_id: B256,
    /// Delay between ticks.
    pub poll_interval: Duration,
    /// Required margin before the close deadline, in seconds.
    pub safety_buffer_secs: u64,
}

impl WatcherConfig {
    /// Settings with the default interval and buffer.
    #[must_use]
    pub const fn new(role: Role, channel_id: B256) -> Self {
        Self {
            role,
            channel_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
            safety_buffer_secs: DEFAULT_SAFETY_BUFFER_SECS,
        }
    }
}

/// A state plus the counterparty's signature over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProof {
    /// Highest countersigned state held locally.
    pub state: ChannelState,
    /// Signature the contract will check.
    pub counterparty_sig: Bytes,
}

/// Tick failure.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The contract call failed.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// The proof source could not be read.
    #[error("proof source: {0}")]
    Io(#[from] std::io::Error),
}

/// Where local proofs come from.
#[async_trait]
pub trait ProofSource: Send + Sync {
    /// Best proof for `channel_id`, or `None` when nothing provable is held.
    async fn local_proof(&self, channel_id: B256) -> Result<Option<LocalProof>, WatchError>;
}

/// Reads proofs from the hub store file or the agent state file.
///
/// - hub: `channels[<id>].latestState` with `sigA`
/// - agent: `watch.byChannelId[<id>].state` with `sigB`
///
/// A missing or unparsable file yields no proof.
#[derive(Debug, Clone)]
pub struct FileProofSource {
    role: Role,
    path: PathBuf,
}

impl FileProofSource {
    /// Reads `path` interpreting it per `role`.
    pub fn new(role: Role, path: impl Into<PathBuf>) -> Self {
        Self {
            role,
            path: path.into(),
        }
    }
}

fn lookup<'a>(map: &'a serde_json::Value, channel_id: B256) -> Option<&'a serde_json::Value> {
    let key = channel_id.to_string();
    map.get(&key).or_else(|| {
        map.as_object()?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
            .map(|(_, v)| v)
    })
}

#[async_trait]
impl ProofSource for FileProofSource {
    async fn local_proof(&self, channel_id: B256) -> Result<Option<LocalProof>, WatchError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Ok(doc) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            return Ok(None);
        };
        let (record, state_field, sig_field) = match self.role {
            Role::Hub => (lookup(&doc["channels"], channel_id), "latestState", "sigA"),
            Role::Agent => (
                lookup(&doc["watch"]["byChannelId"], channel_id),
                "state",
                "sigB",
            ),
        };
        let Some(record) = record else {
            return Ok(None);
        };
        let state = record
            .get(state_field)
            .and_then(|v| serde_json::from_value::<ChannelState>(v.clone()).ok());
        let sig = record
            .get(sig_field)
            .and_then(|v| serde_json::from_value::<Bytes>(v.clone()).ok());
        Ok(state
            .zip(sig)
            .map(|(state, counterparty_sig)| LocalProof {
                state,
                counterparty_sig,
            }))
    }
}

/// Result of one tick, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing provable held locally.
    NoLocalProof,
    /// The contract has no such channel (never opened or already closed).
    ChannelNotFound,
    /// The channel is open; nothing to defend.
    NotClosing,
    /// Too close to (or past) the deadline to challenge safely.
    DeadlineTooClose {
        /// On-chain close deadline.
        close_deadline: UnixTimestamp,
    },
    /// The on-chain nonce is already at least the local one.
    NoNewerState {
        /// Local nonce.
        local_nonce: u64,
        /// On-chain nonce.
        onchain_nonce: u64,
    },
    /// A challenge was mined.
    Challenged {
        /// Challenge transaction.
        tx_hash: B256,
        /// Nonce submitted.
        local_nonce: u64,
        /// Nonce replaced.
        onchain_nonce: u64,
    },
}

/// Runs one watcher step at time `now`.
///
/// # Errors
///
/// Returns [`WatchError`] if the proof source or the contract fails.
pub async fn tick(
    contract: &dyn ChannelContract,
    proofs: &dyn ProofSource,
    config: &WatcherConfig,
    now: UnixTimestamp,
) -> Result<TickOutcome, WatchError> {
    let Some(local) = proofs.local_proof(config.channel_id).await? else {
        return Ok(TickOutcome::NoLocalProof);
    };
    let onchain = contract.get_channel(config.channel_id).await?;
    if !onchain.exists() {
        return Ok(TickOutcome::ChannelNotFound);
    }
    if !onchain.is_closing {
        return Ok(TickOutcome::NotClosing);
    }
    if now + config.safety_buffer_secs >= onchain.close_deadline {
        return Ok(TickOutcome::DeadlineTooClose {
            close_deadline: onchain.close_deadline,
        });
    }
    let local_nonce = local.state.state_nonce;
    let onchain_nonce = onchain.latest_nonce;
    if local_nonce <= onchain_nonce {
        return Ok(TickOutcome::NoNewerState {
            local_nonce,
            onchain_nonce,
        });
    }
    let tx_hash = contract
        .challenge(&local.state, &local.counterparty_sig)
        .await?;
    Ok(TickOutcome::Challenged {
        tx_hash,
        local_nonce,
        onchain_nonce,
    })
}

#[cfg(feature = "telemetry")]
fn log_outcome(config: &WatcherConfig, result: &Result<TickOutcome, WatchError>) {
    let role = config.role;
    let channel_id = config.channel_id;
    match result {
        Ok(TickOutcome::NoLocalProof) => {
            tracing::info!(%role, %channel_id, "no local proof for channel");
        }
        Ok(TickOutcome::ChannelNotFound) => {
            tracing::info!(%role, %channel_id, "channel not found or closed");
        }
        Ok(TickOutcome::NotClosing) => {
            tracing::info!(%role, %channel_id, "channel open; no challenge needed");
        }
        Ok(TickOutcome::DeadlineTooClose { close_deadline }) => {
            tracing::warn!(%role, %channel_id, %close_deadline, "too close to deadline, cannot safely challenge");
        }
        Ok(TickOutcome::NoNewerState {
            local_nonce,
            onchain_nonce,
        }) => {
            tracing::info!(%role, %channel_id, local_nonce, onchain_nonce, "no newer local state");
        }
        Ok(TickOutcome::Challenged {
            tx_hash,
            local_nonce,
            onchain_nonce,
        }) => {
            tracing::info!(%role, %channel_id, %tx_hash, local_nonce, onchain_nonce, "challenge mined");
        }
        Err(e) => tracing::error!(%role, %channel_id, error = %e, "tick failed"),
    }
}

/// Watches one channel until `cancel` fires. The first tick runs immediately.
pub async fn run(
    contract: Arc<dyn ChannelContract>,
    proofs: Arc<dyn ProofSource>,
    config: WatcherConfig,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let _result = tick(contract.as_ref(), proofs.as_ref(), &config, UnixTimestamp::now()).await;
                #[cfg(feature = "telemetry")]
                log_outcome(&config, &_result);
            }
        }
    }
}

/// Watches every channel in `configs` concurrently until `cancel` fires.
pub async fn run_all(
    contract: Arc<dyn ChannelContract>,
    proofs: Arc<dyn ProofSource>,
    configs: Vec<WatcherConfig>,
    cancel: CancellationToken,
) {
    let loops = configs.into_iter().map(|config| {
        run(
            Arc::clone(&contract),
            Arc::clone(&proofs),
            config,
            cancel.clone(),
        )
    });
    futures_util::future::join_all(loops).await;
}
