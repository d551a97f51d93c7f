use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::future::join_all;
use parking_lot::Mutex;
use semver::Version;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::config::{InstanceOptions, SwitcherConfig};

use super::{
    health::HealthChecker,
    http_client::{header_map, HttpClient},
    instance::{normalise_url, Instance, InstanceStatus, RecordEvent, RequestKind},
    load_balancer::LoadBalancer,
    remote::{self, Assessment, FeedEntry, FeedInfo},
    version, UpstreamError,
};

/// Owns the instance set, its initialization and periodic checking, and selection.
///
/// # Lifecycle
///
/// [`InstanceTracker::init`] loads the configured instances, then the remote directory if
/// enabled, then (with tracking enabled) starts the periodic recheck loop and runs a first
/// full check pass. Readiness is signalled once all of that has finished, exactly once.
///
/// Construct with [`super::InstanceTrackerBuilder`].
pub struct InstanceTracker {
    config: Arc<SwitcherConfig>,
    http_client: Arc<HttpClient>,
    load_balancer: Arc<LoadBalancer>,
    health_checker: Arc<HealthChecker>,
    record_tx: broadcast::Sender<RecordEvent>,
    ready_tx: watch::Sender<bool>,
    shutdown_tx: broadcast::Sender<()>,
    checker_handle: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl InstanceTracker {
    pub(super) fn new(
        config: Arc<SwitcherConfig>,
        http_client: Arc<HttpClient>,
        load_balancer: Arc<LoadBalancer>,
        health_checker: Arc<HealthChecker>,
        record_tx: broadcast::Sender<RecordEvent>,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            http_client,
            load_balancer,
            health_checker,
            record_tx,
            ready_tx,
            shutdown_tx,
            checker_handle: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SwitcherConfig {
        &self.config
    }

    /// Runs the full initialization sequence and signals readiness.
    ///
    /// A failing remote directory is logged and skipped. Calling this more than once has no
    /// effect.
    pub async fn init(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            warn!("tracker already initialized");
            return;
        }

        self.load_config();

        if self.config.fetch.enabled {
            if let Err(e) = self.load_remote().await {
                error!(url = %self.config.fetch.url, error = %e, "failed to load remote instances");
            }
        }

        if self.config.tracking.enabled {
            let handle = self.health_checker.start_with_shutdown(self.shutdown_tx.subscribe());
            *self.checker_handle.lock() = Some(handle);
            self.health_checker.check_all().await;
        }

        self.mark_ready();
    }

    fn mark_ready(&self) {
        let changed = self.ready_tx.send_if_modified(|ready| !std::mem::replace(ready, true));
        if changed {
            info!(
                instances = self.load_balancer.len(),
                working = self.load_balancer.get_working_instances().len(),
                "tracker ready"
            );
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Resolves once initialization has completed; immediately if it already has.
    pub async fn wait_for_ready(&self) {
        let mut ready_rx = self.ready_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = ready_rx.wait_for(|ready| *ready).await;
    }

    #[must_use]
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    #[must_use]
    pub fn subscribe_records(&self) -> broadcast::Receiver<RecordEvent> {
        self.record_tx.subscribe()
    }

    /// Registers every configured instance, skipping duplicates. Returns the number added.
    pub fn load_config(&self) -> usize {
        let added = self
            .config
            .instances
            .iter()
            .map(|entry| {
                let (site, options) = entry.normalise();
                self.create_instance(&site, options).1
            })
            .filter(|added| *added)
            .count();

        info!(added, configured = self.config.instances.len(), "loaded instances from settings");
        added
    }

    /// Fetches the remote directory and registers the candidates that pass its filters.
    ///
    /// Candidates are assessed concurrently. Those needing version confirmation are held
    /// unavailable until their home page is read, and removed if that fails or the version is
    /// too old. Returns the number of instances added.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be fetched or has an unexpected shape.
    pub async fn load_remote(&self) -> Result<usize, UpstreamError> {
        let fetch = &self.config.fetch;
        let entries = remote::fetch_feed(
            &self.http_client,
            &fetch.url,
            header_map(self.config.http.headers.iter()),
            self.config.request_timeout(),
        )
        .await?;

        let minimum = if fetch.require_version.enabled {
            Version::parse(&fetch.require_version.version).ok()
        } else {
            None
        };

        let outcomes = join_all(
            entries.iter().map(|FeedEntry(name, info)| self.admit(name, info, minimum.as_ref())),
        )
        .await;
        let added = outcomes.into_iter().filter(|added| *added).count();

        info!(added, candidates = entries.len(), "loaded instances from remote directory");
        Ok(added)
    }

    async fn admit(&self, name: &str, info: &FeedInfo, minimum: Option<&Version>) -> bool {
        match remote::assess(info, &self.config.fetch, minimum) {
            Assessment::Reject(reason) => {
                debug!(name, reason, "skipping remote instance");
                false
            }
            Assessment::Accept(uri) => self.create_instance(&uri, InstanceOptions::default()).1,
            Assessment::ProbeVersion(uri) => {
                let options = InstanceOptions { available: false, ..Default::default() };
                let (instance, added) = self.create_instance(&uri, options);
                if !added {
                    return false;
                }

                match instance.get_version_from_home().await {
                    Ok(found) if minimum.is_some_and(|m| version::meets_minimum(&found, m)) => {
                        instance.set_available(true);
                        true
                    }
                    outcome => {
                        debug!(
                            site = %instance.site(),
                            version = ?outcome.ok(),
                            "discarding remote instance without a qualifying version"
                        );
                        self.load_balancer.remove_instance(instance.site());
                        false
                    }
                }
            }
        }
    }

    /// Registers an instance for `site` unless one exists. Returns the registered instance
    /// and whether it was newly created.
    pub fn create_instance(&self, site: &str, options: InstanceOptions) -> (Arc<Instance>, bool) {
        let site = normalise_url(site);
        if let Some(existing) = self.load_balancer.get_instance(&site) {
            return (existing, false);
        }

        let instance = Arc::new(Instance::new(
            &site,
            options,
            Arc::clone(&self.config),
            Arc::clone(&self.http_client),
            self.record_tx.clone(),
        ));
        let (registered, added) = self.load_balancer.insert_if_absent(instance);
        if added {
            debug!(site = %registered.site(), "instance registered");
        }
        (registered, added)
    }

    #[must_use]
    pub fn get_instance(&self, site: &str) -> Option<Arc<Instance>> {
        self.load_balancer.get_instance(&normalise_url(site))
    }

    #[must_use]
    pub fn get_all_instances(&self) -> Arc<Vec<Arc<Instance>>> {
        self.load_balancer.get_all_instances()
    }

    /// Candidate pool for selection (all instances when `only_working` is off).
    #[must_use]
    pub fn get_working_instances(&self) -> Vec<Arc<Instance>> {
        self.load_balancer.get_working_instances()
    }

    #[must_use]
    pub fn get_fastest_instance(&self) -> Option<Arc<Instance>> {
        self.load_balancer.get_fastest_instance()
    }

    /// # Errors
    ///
    /// Returns [`UpstreamError::NoWorkingInstances`] if there is no candidate.
    pub fn get_next_instance(&self) -> Result<Arc<Instance>, UpstreamError> {
        self.load_balancer.get_next_instance()
    }

    /// Selection for a tagged request: instances that blacklisted `kind` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::NoWorkingInstances`] if there is no candidate.
    pub fn get_next_instance_for(
        &self,
        kind: &RequestKind,
    ) -> Result<Arc<Instance>, UpstreamError> {
        self.load_balancer.get_next_instance_for(kind)
    }

    /// Probes every instance now. Returns `false` if a pass was already running.
    pub async fn check_all(&self) -> bool {
        self.health_checker.check_all().await
    }

    /// Probes the instances worth rechecking now. Returns `false` if a pass was already running.
    pub async fn check_recommended(&self) -> bool {
        self.health_checker.check_recommended().await
    }

    /// Status of every instance, in registration order.
    #[must_use]
    pub fn statuses(&self) -> Vec<InstanceStatus> {
        self.load_balancer.get_all_instances().iter().map(|i| i.status()).collect()
    }

    /// Stops the periodic checker and waits for it to exit.
    pub async fn shutdown(&self) {
        // No receiver means the checker was never started
        let _ = self.shutdown_tx.send(());

        let handle = self.checker_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "health checker task failed");
            }
        }
    }
}
