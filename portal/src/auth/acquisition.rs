//! Backend handle acquisition.
//!
//! Polls the backend probe at a fixed interval until a factory appears, then builds the
//! client once. When the bound is exhausted the portal continues in offline mode.

use std::fmt;
use std::time::Duration;

use adapters::{AdapterError, BackendEndpoint, BackendHandle, FactoryProbe};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Bounds of the readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            interval: Duration::from_millis(100),
        }
    }
}

pub enum Acquisition {
    Ready(BackendHandle),
    /// The backend never became available; only the persistence mirror is usable.
    Degraded { attempts: u32 },
}

impl fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acquisition::Ready(_) => f.write_str("Ready"),
            Acquisition::Degraded { attempts } => f
                .debug_struct("Degraded")
                .field("attempts", attempts)
                .finish(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The backend is present but the client cannot be built; retrying will not help.
    #[error("backend client could not be constructed on attempt {attempt}: {source}")]
    Construction {
        attempt: u32,
        #[source]
        source: AdapterError,
    },
}

/// Waits for the backend and constructs a client from `endpoint`.
///
/// The probe is consulted at most `policy.max_attempts` times, `policy.interval`
/// apart. A construction failure is reported immediately instead of being retried.
pub async fn acquire_backend_handle(
    probe: &dyn FactoryProbe,
    endpoint: &BackendEndpoint,
    policy: ReadinessPolicy,
) -> Result<Acquisition, AcquisitionError> {
    info!(url = %endpoint.url, "waiting for backend library");

    for attempt in 1..=policy.max_attempts {
        if let Some(factory) = probe.probe().await {
            return match factory.create(endpoint) {
                Ok(handle) => {
                    info!(attempt, "backend client initialised");
                    Ok(Acquisition::Ready(handle))
                }
                Err(source) => {
                    error!(attempt, error = %source, "backend client construction failed");
                    Err(AcquisitionError::Construction { attempt, source })
                }
            };
        }
        debug!(attempt, max_attempts = policy.max_attempts, "backend library not loaded yet");
        tokio::time::sleep(policy.interval).await;
    }

    warn!(
        attempts = policy.max_attempts,
        "backend library failed to load, continuing in offline mode"
    );
    Ok(Acquisition::Degraded {
        attempts: policy.max_attempts,
    })
}
