//! Live component health
//!
//! One entry per registered component holding the last observed tier and
//! counters of open and in-flight faults. Readers always get a cloned
//! snapshot taken under a single lock.

use parking_lot::RwLock;
use remedy_core::{Component, ComponentHealth, ComponentId, HealthSample};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct HealthEntry {
    name: String,
    observed: ComponentHealth,
    last_sample: Option<HealthSample>,
    open_faults: usize,
    in_flight: usize,
}

impl HealthEntry {
    fn new(name: String) -> Self {
        Self {
            name,
            observed: ComponentHealth::Healthy,
            last_sample: None,
            open_faults: 0,
            in_flight: 0,
        }
    }

    fn reported(&self) -> ComponentHealth {
        if self.in_flight > 0 {
            ComponentHealth::Recovering
        } else {
            self.observed
        }
    }
}

/// Shared health state
#[derive(Debug, Default)]
pub struct HealthBoard {
    entries: RwLock<BTreeMap<ComponentId, HealthEntry>>,
}

impl HealthBoard {
    /// Create empty board
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as Healthy. Returns false if already tracked.
    pub fn register(&self, component: Component) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&component.id) {
            return false;
        }
        entries.insert(component.id, HealthEntry::new(component.name));
        true
    }

    /// Stop tracking a component. Returns false if it was not tracked.
    pub fn deregister(&self, id: &ComponentId) -> bool {
        self.entries.write().remove(id).is_some()
    }

    /// Whether a component is tracked
    #[must_use]
    pub fn contains(&self, id: &ComponentId) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Tracked components
    #[must_use]
    pub fn components(&self) -> Vec<Component> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| Component::new(id.clone(), entry.name.clone()))
            .collect()
    }

    /// Store a monitor observation
    pub fn record(&self, id: &ComponentId, health: ComponentHealth, sample: Option<HealthSample>) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.observed = health;
            if sample.is_some() {
                entry.last_sample = sample;
            }
        }
    }

    /// A fault for the component entered the backlog
    pub fn fault_opened(&self, id: &ComponentId) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.open_faults += 1;
        }
    }

    /// A fault for the component was admitted
    pub fn fault_admitted(&self, id: &ComponentId) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.in_flight += 1;
        }
    }

    /// An admitted fault for the component finished or was cancelled
    pub fn fault_closed(&self, id: &ComponentId) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.open_faults = entry.open_faults.saturating_sub(1);
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
    }

    /// Whether the component has a queued or in-flight fault
    #[must_use]
    pub fn has_open_fault(&self, id: &ComponentId) -> bool {
        self.entries
            .read()
            .get(id)
            .is_some_and(|entry| entry.open_faults > 0)
    }

    /// Reported health, with the Recovering overlay applied
    #[must_use]
    pub fn health(&self, id: &ComponentId) -> Option<ComponentHealth> {
        self.entries.read().get(id).map(HealthEntry::reported)
    }

    /// Last observed tier, without the overlay
    #[must_use]
    pub fn observed(&self, id: &ComponentId) -> Option<ComponentHealth> {
        self.entries.read().get(id).map(|entry| entry.observed)
    }

    /// Last successful sample
    #[must_use]
    pub fn last_sample(&self, id: &ComponentId) -> Option<HealthSample> {
        self.entries
            .read()
            .get(id)
            .and_then(|entry| entry.last_sample.clone())
    }

    /// Reported health of every component
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<ComponentId, ComponentHealth> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.reported()))
            .collect()
    }

    /// Worst observed tier across all components
    #[must_use]
    pub fn system_health(&self) -> ComponentHealth {
        ComponentHealth::aggregate(self.entries.read().values().map(|entry| entry.observed))
    }
}
