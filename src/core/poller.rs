//! Wait for an uploaded asset to become usable.
//!
//! The wait is a small state machine: every observation of the remote state
//! goes through [`transition`], which decides whether to keep waiting, return,
//! or fail.

use crate::core::gemini::{InferenceClient, RemoteAsset};
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_POLL_CEILING: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Processing,
    Active,
    Failed,
}

impl AssetState {
    /// Anything the service does not call ACTIVE or FAILED is still processing.
    pub fn from_api(raw: Option<&str>) -> Self {
        match raw {
            Some("ACTIVE") => AssetState::Active,
            Some("FAILED") => AssetState::Failed,
            _ => AssetState::Processing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Ready,
    Failed,
    Wait,
    TimedOut,
}

/// PROCESSING→ACTIVE, PROCESSING→FAILED, PROCESSING→PROCESSING (timeout-checked).
pub fn transition(state: AssetState, elapsed: Duration, ceiling: Duration) -> Transition {
    match state {
        AssetState::Active => Transition::Ready,
        AssetState::Failed => Transition::Failed,
        AssetState::Processing if elapsed >= ceiling => Transition::TimedOut,
        AssetState::Processing => Transition::Wait,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            ceiling: DEFAULT_POLL_CEILING,
        }
    }
}

/// Block until `asset` is ACTIVE. The caller owns any local artifact and is
/// expected to drop it when this returns an error.
pub async fn wait_until_active(
    client: &dyn InferenceClient,
    asset: RemoteAsset,
    policy: PollPolicy,
) -> Result<RemoteAsset> {
    let started = Instant::now();
    let mut current = asset;

    loop {
        let elapsed = started.elapsed();
        match transition(current.state, elapsed, policy.ceiling) {
            Transition::Ready => {
                info!(name = %current.name, waited_secs = elapsed.as_secs(), "Asset is active");
                return Ok(current);
            }
            Transition::Failed => {
                return Err(Error::ProcessingFailed {
                    reason: current
                        .error
                        .take()
                        .unwrap_or_else(|| "asset entered FAILED state".to_string()),
                    asset: current.name,
                });
            }
            Transition::TimedOut => {
                return Err(Error::ProcessingTimeout {
                    asset: current.name,
                    waited_secs: elapsed.as_secs(),
                });
            }
            Transition::Wait => {
                info!(
                    name = %current.name,
                    waited_secs = elapsed.as_secs(),
                    "Asset still processing"
                );
                tokio::time::sleep(policy.interval).await;
                current = client.asset(&current.name).await?;
                debug!(name = %current.name, state = ?current.state, "Polled asset state");
            }
        }
    }
}
