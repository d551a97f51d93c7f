use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::join_all;
use tokio::{
    sync::broadcast,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::config::TrackingConfig;

use super::{instance::Instance, load_balancer::LoadBalancer};

/// Runs check passes over the registered instances.
///
/// At most one pass runs at a time: a pass requested while another is in flight is skipped.
/// Passes are either fully concurrent or strictly sequential, per configuration.
pub struct HealthChecker {
    load_balancer: Arc<LoadBalancer>,
    config: TrackingConfig,
    check_in_flight: AtomicBool,
}

/// Clears the in-flight flag when a pass ends, including when its future is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl HealthChecker {
    #[must_use]
    pub fn new(load_balancer: Arc<LoadBalancer>, config: TrackingConfig) -> Self {
        Self { load_balancer, config, check_in_flight: AtomicBool::new(false) }
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.config.interval_ms)
    }

    #[must_use]
    pub fn is_checking(&self) -> bool {
        self.check_in_flight.load(Ordering::Acquire)
    }

    /// Probes every instance. Returns `false` if skipped because a pass was in flight.
    pub async fn check_all(&self) -> bool {
        let instances = self.load_balancer.get_all_instances();
        self.check_selection(instances.to_vec()).await
    }

    /// Probes the instances worth rechecking: with `only_dead`, those available but down,
    /// otherwise all of them. Returns `false` if skipped because a pass was in flight.
    pub async fn check_recommended(&self) -> bool {
        let instances = self.load_balancer.get_all_instances();
        let selection: Vec<Arc<Instance>> = if self.config.only_dead {
            instances.iter().filter(|i| i.should_try_to_save()).cloned().collect()
        } else {
            instances.to_vec()
        };
        self.check_selection(selection).await
    }

    async fn check_selection(&self, instances: Vec<Arc<Instance>>) -> bool {
        if self
            .check_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("check pass already in flight, skipping");
            return false;
        }
        let _guard = InFlightGuard(&self.check_in_flight);

        let results = if self.config.parallel {
            join_all(instances.iter().map(|instance| instance.check())).await
        } else {
            let mut results = Vec::with_capacity(instances.len());
            for instance in &instances {
                results.push(instance.check().await);
            }
            results
        };

        let up = results.iter().filter(|working| **working).count();
        info!(checked = results.len(), up, parallel = self.config.parallel, "check pass complete");
        true
    }

    /// Spawns the periodic recheck loop. The first tick fires one interval from now.
    #[must_use]
    pub fn start_with_shutdown(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let checker = Arc::clone(self);
        let period = self.check_interval();

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        checker.check_recommended().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("health checker shutting down");
                        break;
                    }
                }
            }
        })
    }
}
