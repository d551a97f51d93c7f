//! Request dispatch with transparent failover.
//!
//! [`Switcher`] owns an [`InstanceTracker`], starts its initialization in the background, and
//! retries every tagged request on the next selected instance until one answers.
//!
//! # Retry semantics
//!
//! There is no attempt cap and no delay between attempts; the loop only yields to the scheduler
//! so background check passes keep running. If every instance keeps failing, a plain request
//! never resolves. Use [`Switcher::request_with_cancel`] to bound it. When selection itself finds
//! no candidate, [`UpstreamError::NoWorkingInstances`] is returned to the caller instead of
//! spinning.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    config::SwitcherConfig,
    upstream::{
        instance::{channel_latest_path, channel_path, channel_videos_path, video_path},
        ApiResponse, BuilderError, InstanceStatus, InstanceTracker, InstanceTrackerBuilder,
        RecordEvent, RequestKind, UpstreamError,
    },
};

#[derive(Debug, Error)]
pub enum SwitcherError {
    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Construction needs a running tokio runtime to start initialization.
    #[error("No tokio runtime available: {0}")]
    Runtime(String),

    #[error("Request cancelled")]
    Cancelled,

    /// The switcher was shut down, possibly before it ever became ready.
    #[error("Switcher is shut down")]
    Closed,
}

/// Dispatcher over a set of tracked instances.
pub struct Switcher {
    tracker: Arc<InstanceTracker>,
    init_handle: Mutex<Option<JoinHandle<()>>>,
    closed: CancellationToken,
}

impl Switcher {
    /// Builds a tracker from `config` and starts its initialization in the background.
    ///
    /// # Errors
    ///
    /// Returns [`SwitcherError::Builder`] for an invalid configuration and
    /// [`SwitcherError::Runtime`] when called outside a tokio runtime.
    pub fn new(config: SwitcherConfig) -> Result<Self, SwitcherError> {
        Self::with_builder(InstanceTrackerBuilder::new().config(config))
    }

    /// Like [`Switcher::new`], with full control over the tracker construction.
    ///
    /// # Errors
    ///
    /// See [`Switcher::new`].
    pub fn with_builder(builder: InstanceTrackerBuilder) -> Result<Self, SwitcherError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SwitcherError::Runtime(e.to_string()))?;
        let tracker = Arc::new(builder.build()?);

        let init_handle = {
            let tracker = Arc::clone(&tracker);
            runtime.spawn(async move { tracker.init().await })
        };

        Ok(Self {
            tracker,
            init_handle: Mutex::new(Some(init_handle)),
            closed: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<InstanceTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.tracker.is_ready()
    }

    /// Resolves once the tracker has finished initializing.
    pub async fn wait_for_ready(&self) {
        self.tracker.wait_for_ready().await;
    }

    #[must_use]
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.tracker.subscribe_ready()
    }

    #[must_use]
    pub fn subscribe_records(&self) -> broadcast::Receiver<RecordEvent> {
        self.tracker.subscribe_records()
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<InstanceStatus> {
        self.tracker.statuses()
    }

    /// Sends a tagged request, switching instance after every failed attempt.
    ///
    /// Waits for readiness first. Resolves with the first successful answer; a resource
    /// reported unavailable by the instance counts as an answer unless detection is configured
    /// to count it against the instance.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::NoWorkingInstances`] if selection finds no candidate, and
    /// [`SwitcherError::Closed`] once [`Switcher::shutdown`] has been called, including for a
    /// request still waiting for readiness. Failures of individual attempts are never returned.
    pub async fn request(
        &self,
        kind: RequestKind,
        path: &str,
    ) -> Result<ApiResponse, SwitcherError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(SwitcherError::Closed),
            () = self.tracker.wait_for_ready() => {}
        }

        let mut attempt: u64 = 0;
        loop {
            if self.closed.is_cancelled() {
                return Err(SwitcherError::Closed);
            }
            attempt += 1;
            let instance = self.tracker.get_next_instance_for(&kind)?;

            match instance.make_api_request(kind.clone(), path).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(site = %instance.site(), kind = %kind, attempt, "request recovered");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    debug!(
                        site = %instance.site(),
                        kind = %kind,
                        attempt,
                        error = %e,
                        "request failed, switching instance"
                    );
                }
            }

            tokio::task::yield_now().await;
        }
    }

    /// [`Switcher::request`] that gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`SwitcherError::Cancelled`] if the token fires first, otherwise whatever
    /// [`Switcher::request`] returns.
    pub async fn request_with_cancel(
        &self,
        kind: RequestKind,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, SwitcherError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SwitcherError::Cancelled),
            result = self.request(kind, path) => result,
        }
    }

    /// # Errors
    ///
    /// See [`Switcher::request`].
    pub async fn request_video(&self, id: &str) -> Result<ApiResponse, SwitcherError> {
        self.request(RequestKind::Video, &video_path(id)).await
    }

    /// # Errors
    ///
    /// See [`Switcher::request`].
    pub async fn request_channel(&self, id: &str) -> Result<ApiResponse, SwitcherError> {
        self.request(RequestKind::Channel, &channel_path(id)).await
    }

    /// # Errors
    ///
    /// See [`Switcher::request`].
    pub async fn request_channel_videos(&self, id: &str) -> Result<ApiResponse, SwitcherError> {
        self.request(RequestKind::Channel, &channel_videos_path(id)).await
    }

    /// # Errors
    ///
    /// See [`Switcher::request`].
    pub async fn request_channel_latest(&self, id: &str) -> Result<ApiResponse, SwitcherError> {
        self.request(RequestKind::Channel, &channel_latest_path(id)).await
    }

    /// Stops initialization if still running, then the periodic checker.
    ///
    /// Pending and later requests fail with [`SwitcherError::Closed`].
    pub async fn shutdown(&self) {
        self.closed.cancel();
        let init_handle = self.init_handle.lock().take();
        if let Some(handle) = init_handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "tracker initialization failed");
                }
            }
        }

        self.tracker.shutdown().await;
    }
}
