//! Live-updatable configuration handle.
//!
//! The executor keeps its process-wide [`ThrottlingConfig`](crate::config::ThrottlingConfig)
//! defaults in a `DynamicConfig` so an operator can swap them at runtime while in-flight calls
//! keep the snapshot they started with.

use crate::config::{ConfigError, ThrottlingConfig};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Cheap lock-free reads, whole-value replacement on write.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    /// Replace with `f(current)`; `f` is re-run if another writer got in first.
    pub fn update<F>(&self, mut f: F)
    where
        F: FnMut(&T) -> T,
    {
        self.inner.rcu(|current| f(current));
    }
}

impl DynamicConfig<ThrottlingConfig> {
    /// Swap in new executor defaults, refusing values the backoff calculator cannot use.
    pub fn try_set(&self, config: ThrottlingConfig) -> Result<(), ConfigError> {
        config.validate()?;
        tracing::info!(
            max_retries = config.max_retries,
            base_delay_ms = config.base_delay_ms,
            max_delay_ms = config.max_delay_ms,
            "throttling defaults replaced"
        );
        self.set(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_update() {
        let a = DynamicConfig::new(1);
        assert_eq!(*a.get(), 1);
        a.set(2);
        assert_eq!(*a.get(), 2);
        a.update(|v| v + 3);
        assert_eq!(*a.get(), 5);
    }

    #[test]
    fn snapshots_survive_updates() {
        let a = DynamicConfig::new(String::from("old"));
        let snapshot = a.get();
        a.set(String::from("new"));
        assert_eq!(*snapshot, "old");
        assert_eq!(*a.get(), "new");
    }

    #[test]
    fn try_set_validates_throttling_defaults() {
        let defaults = DynamicConfig::new(ThrottlingConfig::default());
        let bad = ThrottlingConfig { base_delay_ms: 0, ..Default::default() };
        assert!(matches!(defaults.try_set(bad), Err(ConfigError::ZeroBaseDelay)));
        assert_eq!(defaults.get().base_delay_ms, 1_000);

        let good = ThrottlingConfig { max_retries: 9, ..Default::default() };
        defaults.try_set(good).unwrap();
        assert_eq!(defaults.get().max_retries, 9);
    }
}
