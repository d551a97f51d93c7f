use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rand::Rng;

use crate::config::{SwitchingConfig, SwitchingMethod};

use super::{
    instance::{Instance, RequestKind},
    UpstreamError,
};

/// Holds the instance set and picks the instance for each call.
///
/// Uses `ArcSwap` for lock-free reads of the instance list; insertions and removals (only
/// during initialization and feed filtering) swap in a new list. The last selection is kept as
/// a weak reference so a removed instance is never resurrected by prefer-same or round-robin.
pub struct LoadBalancer {
    instances: ArcSwap<Vec<Arc<Instance>>>,
    last_selected: Mutex<Option<Weak<Instance>>>,
    config: SwitchingConfig,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(config: SwitchingConfig) -> Self {
        Self {
            instances: ArcSwap::from_pointee(Vec::new()),
            last_selected: Mutex::new(None),
            config,
        }
    }

    /// Adds `instance` unless one with the same site is already registered.
    ///
    /// Returns the registered instance and whether it was newly added.
    pub fn insert_if_absent(&self, instance: Arc<Instance>) -> (Arc<Instance>, bool) {
        let mut registered = None;
        self.instances.rcu(|current| {
            if let Some(existing) = current.iter().find(|i| i.site() == instance.site()) {
                registered = Some(Arc::clone(existing));
                return Arc::clone(current);
            }
            registered = None;
            let mut new_instances = (**current).clone();
            new_instances.push(Arc::clone(&instance));
            Arc::new(new_instances)
        });

        match registered {
            Some(existing) => (existing, false),
            None => (instance, true),
        }
    }

    /// Removes the instance registered for `site`. Returns `true` if one was removed.
    pub fn remove_instance(&self, site: &str) -> bool {
        let mut removed = false;
        self.instances.rcu(|current| {
            removed = current.iter().any(|i| i.site() == site);
            current.iter().filter(|i| i.site() != site).cloned().collect::<Vec<_>>()
        });
        removed
    }

    #[must_use]
    pub fn get_instance(&self, site: &str) -> Option<Arc<Instance>> {
        self.instances.load().iter().find(|i| i.site() == site).cloned()
    }

    #[must_use]
    pub fn get_all_instances(&self) -> Arc<Vec<Arc<Instance>>> {
        self.instances.load_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.load().is_empty()
    }

    /// Candidate pool: every instance, or only working ones when `only_working` is set.
    #[must_use]
    pub fn get_working_instances(&self) -> Vec<Arc<Instance>> {
        let instances = self.instances.load();
        if self.config.only_working {
            instances.iter().filter(|i| i.is_working()).cloned().collect()
        } else {
            instances.iter().cloned().collect()
        }
    }

    /// Lowest average latency among the candidates. Instances without data sort last and
    /// ties keep pool order.
    #[must_use]
    pub fn get_fastest_instance(&self) -> Option<Arc<Instance>> {
        Self::fastest(&self.get_working_instances())
    }

    fn fastest(candidates: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        candidates
            .iter()
            .min_by_key(|i| {
                let latency = i.average_latency();
                (latency.is_none(), latency.unwrap_or(0))
            })
            .cloned()
    }

    #[must_use]
    pub fn last_selected(&self) -> Option<Arc<Instance>> {
        self.last_selected.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Selects the instance for the next call and remembers it.
    ///
    /// With prefer-same, the last selection is returned again while it is working. Otherwise
    /// the configured method picks from the candidate pool.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::NoWorkingInstances`] if the candidate pool is empty.
    pub fn get_next_instance(&self) -> Result<Arc<Instance>, UpstreamError> {
        self.select(None)
    }

    /// Like [`Self::get_next_instance`], but instances that blacklisted `kind` are not
    /// candidates, including for prefer-same.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::NoWorkingInstances`] if no candidate accepts `kind`.
    pub fn get_next_instance_for(
        &self,
        kind: &RequestKind,
    ) -> Result<Arc<Instance>, UpstreamError> {
        self.select(Some(kind))
    }

    fn select(&self, kind: Option<&RequestKind>) -> Result<Arc<Instance>, UpstreamError> {
        let mut last_selected = self.last_selected.lock();
        let last = last_selected.as_ref().and_then(Weak::upgrade);

        let accepts =
            |instance: &Arc<Instance>| kind.map_or(true, |kind| !instance.is_blacklisted(kind));

        let mut candidates = self.get_working_instances();
        candidates.retain(|i| accepts(i));
        if candidates.is_empty() {
            return Err(UpstreamError::NoWorkingInstances);
        }

        if self.config.prefer_same {
            if let Some(last) = last.as_ref().filter(|i| i.is_working() && accepts(i)) {
                tracing::trace!(site = %last.site(), "keeping last selected instance");
                return Ok(Arc::clone(last));
            }
        }

        let selected = match self.config.method {
            SwitchingMethod::Fastest => Self::fastest(&candidates),
            SwitchingMethod::Random => {
                let index = rand::rng().random_range(0..candidates.len());
                candidates.get(index).cloned()
            }
            SwitchingMethod::RoundRobin => {
                let next = last
                    .and_then(|last| candidates.iter().position(|i| Arc::ptr_eq(i, &last)))
                    .map_or(0, |position| (position + 1) % candidates.len());
                candidates.get(next).cloned()
            }
        }
        .ok_or(UpstreamError::NoWorkingInstances)?;

        tracing::trace!(
            site = %selected.site(),
            method = ?self.config.method,
            candidates = candidates.len(),
            "selected instance"
        );

        *last_selected = Some(Arc::downgrade(&selected));
        Ok(selected)
    }
}
