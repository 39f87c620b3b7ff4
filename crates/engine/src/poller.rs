//! Readiness polling for freshly created or discovered resources.
//!
//! The same loop serves workflows and workflow versions; callers supply only
//! a fetch closure and a description for log lines.

use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use omics_run_api::ApiError;
use omics_run_types::{EntityStatus, RemoteEntity};
use tracing::{debug, error};

use crate::EngineError;

/// Anything that reports a remote lifecycle status.
pub trait StatusBearing {
    fn status(&self) -> Option<&EntityStatus>;
    fn status_message(&self) -> Option<&str>;
}

impl StatusBearing for RemoteEntity {
    fn status(&self) -> Option<&EntityStatus> {
        self.status.as_ref()
    }

    fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }
}

/// Suspends the poller between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Polls a fetch closure until the status leaves the in-progress set.
#[derive(Clone)]
pub struct ReadinessPoller {
    interval: Duration,
    in_progress: Vec<EntityStatus>,
    failure: Vec<EntityStatus>,
    max_wait: Option<Duration>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            in_progress: vec![EntityStatus::Creating],
            failure: vec![EntityStatus::Failed],
            max_wait: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl ReadinessPoller {
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Give up once this much time has been spent sleeping.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_statuses(mut self, in_progress: Vec<EntityStatus>, failure: Vec<EntityStatus>) -> Self {
        self.in_progress = in_progress;
        self.failure = failure;
        self
    }

    /// Fetch until the resource is ready and return its final details.
    ///
    /// A status in the failure set ends the wait with
    /// [`EngineError::ResourceFailed`]; statuses outside both sets (or no
    /// status at all) count as ready.
    pub async fn await_ready<T, F, Fut>(&self, description: &str, mut fetch: F) -> Result<T, EngineError>
    where
        T: StatusBearing + Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut waited = Duration::ZERO;
        loop {
            let details = fetch().await?;
            let Some(status) = details.status() else {
                debug!("{description} reports no status; treating as ready");
                return Ok(details);
            };
            let message = details.status_message().unwrap_or("(no status message)");

            if self.failure.contains(status) {
                error!("{description} status {status}, {message}");
                return Err(EngineError::ResourceFailed {
                    description: description.to_string(),
                    status: status.to_string(),
                    message: message.to_string(),
                });
            }
            debug!("{description} status {status}, {message}");
            if !self.in_progress.contains(status) {
                debug!("{description} details: {details:?}");
                return Ok(details);
            }

            if let Some(max_wait) = self.max_wait
                && waited >= max_wait
            {
                return Err(EngineError::ReadinessTimeout {
                    description: description.to_string(),
                    waited,
                });
            }
            self.sleeper.sleep(self.interval).await;
            waited += self.interval;
        }
    }
}
