use std::time::Duration;

use tracing::{debug, info};

use crate::control::ControlApi;

/// Bounded retry budget for waiting on the control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_millis(200),
        }
    }
}

impl ProbePolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    // A hung connection must not eat the whole budget.
    fn attempt_timeout(&self) -> Duration {
        self.interval.max(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts } | Self::Exhausted { attempts } => *attempts,
        }
    }
}

/// Poll `GET /version` until it answers 2xx or the budget runs out.
///
/// Connection failures are the expected state while the engine is still
/// binding, so they are retried rather than reported.
pub async fn wait_until_ready(api: &ControlApi, policy: ProbePolicy) -> Readiness {
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        if attempts > 0 {
            tokio::time::sleep(policy.interval).await;
        }
        attempts += 1;

        match api.version(policy.attempt_timeout()).await {
            Ok(version) => {
                info!(attempt = attempts, "engine {version} ready at {}", api.base_url());
                return Readiness::Ready { attempts };
            }
            Err(err) => debug!(attempt = attempts, "control API not ready: {err}"),
        }
    }

    Readiness::Exhausted { attempts }
}
