use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::KeyValueStore;
use crate::error::StorageError;

type DegradeFn<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// A pending write to a [`SyncedAtom`].
pub enum AtomUpdate<T> {
    /// Replace the value outright.
    Value(T),
    /// Compute the next value from the current one.
    Update(Box<dyn FnOnce(&T) -> T + Send>),
    /// Restore the initial value and drop the persisted region.
    Reset,
}

impl<T> AtomUpdate<T> {
    pub fn with(f: impl FnOnce(&T) -> T + Send + 'static) -> Self {
        Self::Update(Box::new(f))
    }
}

/// A reactive cell mirrored into one region of a [`KeyValueStore`].
///
/// The persisted value is read synchronously at construction, so the first
/// `get` already reflects storage. Every write goes through the watch channel's
/// lock, which makes read-modify-write updates atomic with respect to other
/// writers and notifies every subscriber.
pub struct SyncedAtom<T> {
    region: String,
    initial: T,
    store: Arc<dyn KeyValueStore>,
    tx: watch::Sender<T>,
    degrade: Option<DegradeFn<T>>,
}

impl<T> SyncedAtom<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn KeyValueStore>, region: impl Into<String>, initial: T) -> Self {
        let region = region.into();
        let value = load(store.as_ref(), &region).unwrap_or_else(|| initial.clone());
        let (tx, _rx) = watch::channel(value);

        Self {
            region,
            initial,
            store,
            tx,
            degrade: None,
        }
    }

    /// Install the fallback used when a write is rejected for exceeding quota.
    pub fn with_degrade(mut self, degrade: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        self.degrade = Some(Arc::new(degrade));
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn set(&self, update: AtomUpdate<T>) {
        self.tx.send_modify(|current| match update {
            AtomUpdate::Value(value) => {
                *current = value;
                self.persist(current);
            }
            AtomUpdate::Update(f) => {
                *current = f(current);
                self.persist(current);
            }
            AtomUpdate::Reset => {
                *current = self.initial.clone();
                if let Err(e) = self.store.remove(&self.region) {
                    tracing::warn!(
                        target: "relay::storage",
                        region = %self.region,
                        error = %e,
                        "Failed to remove persisted region on reset"
                    );
                }
            }
        });
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T + Send + 'static) {
        self.set(AtomUpdate::with(f));
    }

    /// Read-modify-write where `f` may decline to change anything.
    ///
    /// Subscribers are only notified, and storage only written, when `f`
    /// returns a new value. Returns whether the value changed.
    pub fn try_update(&self, f: impl FnOnce(&T) -> Option<T>) -> bool {
        self.tx.send_if_modified(|current| match f(current) {
            Some(next) => {
                *current = next;
                self.persist(current);
                true
            }
            None => false,
        })
    }

    fn persist(&self, value: &T) {
        let err = match self.write(value) {
            Ok(()) => return,
            Err(err) => err,
        };

        if !err.is_quota_exceeded() {
            tracing::warn!(
                target: "relay::storage",
                region = %self.region,
                error = %err,
                "Failed to persist region"
            );
            return;
        }

        let Some(degrade) = &self.degrade else {
            tracing::warn!(
                target: "relay::storage",
                region = %self.region,
                error = %err,
                "Quota exceeded and no degrade function; write dropped"
            );
            return;
        };

        match self.write(&degrade(value)) {
            Ok(()) => tracing::debug!(
                target: "relay::storage",
                region = %self.region,
                "Persisted degraded value after quota error"
            ),
            Err(e) => tracing::warn!(
                target: "relay::storage",
                region = %self.region,
                error = %e,
                "Degraded write also failed; write dropped"
            ),
        }
    }

    fn write(&self, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        self.store.set(&self.region, &raw)
    }
}

fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, region: &str) -> Option<T> {
    match store.get(region) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    target: "relay::storage",
                    region = %region,
                    error = %e,
                    "Persisted region is not valid JSON; using initial value"
                );
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(
                target: "relay::storage",
                region = %region,
                error = %e,
                "Storage unavailable; using initial value"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use std::collections::BTreeMap;

    fn counter(store: &Arc<InMemoryStore>) -> SyncedAtom<u32> {
        SyncedAtom::new(store.clone(), "counter", 0)
    }

    #[test]
    fn reads_persisted_value_on_construction() {
        let store = Arc::new(InMemoryStore::new());
        store.set("counter", "41").unwrap();

        assert_eq!(counter(&store).get(), 41);
    }

    #[test]
    fn falls_back_to_initial_on_corrupt_region() {
        let store = Arc::new(InMemoryStore::new());
        store.set("counter", "not json").unwrap();

        assert_eq!(counter(&store).get(), 0);
    }

    #[test]
    fn updates_are_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let atom = counter(&store);

        atom.set(AtomUpdate::Value(3));
        atom.update(|n| n + 1);

        assert_eq!(atom.get(), 4);
        assert_eq!(store.get("counter").unwrap().as_deref(), Some("4"));
    }

    #[test]
    fn reset_restores_initial_and_removes_region() {
        let store = Arc::new(InMemoryStore::new());
        let atom = counter(&store);
        atom.set(AtomUpdate::Value(9));

        atom.set(AtomUpdate::Reset);

        assert_eq!(atom.get(), 0);
        assert_eq!(store.get("counter").unwrap(), None);
    }

    #[test]
    fn quota_error_retries_with_degraded_value() {
        let store = Arc::new(InMemoryStore::with_quota(16));
        let atom: SyncedAtom<BTreeMap<String, String>> =
            SyncedAtom::new(store.clone(), "map", BTreeMap::new())
                .with_degrade(|_| BTreeMap::new());

        atom.update(|_| BTreeMap::from([("key".to_string(), "x".repeat(64))]));

        assert_eq!(atom.get().len(), 1);
        assert_eq!(store.get("map").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn quota_error_without_degrade_keeps_memory_value() {
        let store = Arc::new(InMemoryStore::with_quota(4));
        let atom: SyncedAtom<String> = SyncedAtom::new(store.clone(), "text", String::new());

        atom.set(AtomUpdate::Value("far too long".to_string()));

        assert_eq!(atom.get(), "far too long");
        assert_eq!(store.get("text").unwrap(), None);
    }

    #[test]
    fn declined_update_leaves_storage_untouched() {
        let store = Arc::new(InMemoryStore::new());
        let atom = counter(&store);

        assert!(!atom.try_update(|_| None));
        assert_eq!(store.get("counter").unwrap(), None);

        assert!(atom.try_update(|n| Some(n + 2)));
        assert_eq!(store.get("counter").unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn subscribers_observe_writes() {
        let store = Arc::new(InMemoryStore::new());
        let atom = counter(&store);
        let mut rx = atom.subscribe();

        atom.update(|n| n + 5);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 5);
    }
}
