use std::sync::{Arc, RwLock};

use hashbrown::HashMap;

use crate::Aggregator;

/// Named aggregators, looked up by metric name.
///
/// The first aggregator registered under a name is kept for the lifetime of the registry;
/// later registrations under the same name get the existing one back.
#[derive(Debug, Default)]
pub struct AggregatorRegistry {
    aggregators: RwLock<HashMap<String, Arc<Aggregator>>>,
}

impl AggregatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The aggregator registered for `name`, creating it with `factory` if there is none.
    ///
    /// `factory` runs at most once per name, under the registry's write lock.
    pub fn aggregator_for(
        &self,
        name: &str,
        factory: impl FnOnce(&str) -> Aggregator,
    ) -> Arc<Aggregator> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut aggregators = self.aggregators.write().unwrap();
        aggregators
            .entry_ref(name)
            .or_insert_with(|| {
                tracing::debug!(metric = name, "registering aggregator");
                Arc::new(factory(name))
            })
            .clone()
    }

    /// Register `aggregator` under its own name, unless that name is already taken.
    ///
    /// Returns the aggregator that ends up registered, which is the earlier one on conflict.
    pub fn register(&self, aggregator: Aggregator) -> Arc<Aggregator> {
        let name = aggregator.name().to_owned();
        self.aggregator_for(&name, move |_| aggregator)
    }

    /// The aggregator registered for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<Aggregator>> {
        self.aggregators.read().unwrap().get(name).cloned()
    }

    /// Every registered aggregator, ordered by name.
    pub fn snapshot(&self) -> Vec<Arc<Aggregator>> {
        let mut aggregators: Vec<_> = self.aggregators.read().unwrap().values().cloned().collect();
        aggregators.sort_by(|a, b| a.name().cmp(b.name()));
        aggregators
    }

    /// Number of registered aggregators.
    pub fn len(&self) -> usize {
        self.aggregators.read().unwrap().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
