//! # In-Memory Store
//!
//! A [`RemoteStore`] backed by a map, with call counters and fault injection.
//! Integration tests drive the reconciler against it; it never touches the
//! network.

use super::{RemoteState, RemoteStore, StoreError, StoreOperation};
use crate::descriptor::{Attributes, Labels, ResourceRef};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// How an injected fault behaves
#[derive(Debug, Clone)]
struct Fault {
    error: StoreError,
    /// Apply the mutation before returning the error (lost response)
    applied: bool,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ResourceRef, Attributes>,
    labels: BTreeMap<ResourceRef, Labels>,
    faults: HashMap<(ResourceRef, StoreOperation), Fault>,
    delays: HashMap<(ResourceRef, StoreOperation), Duration>,
}

/// Thread-safe in-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    finds: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the map is still usable.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert an object directly, bypassing counters
    pub fn seed(&self, resource: ResourceRef, attributes: Attributes) {
        self.lock().objects.insert(resource, attributes);
    }

    /// Current attributes of an object, if present
    #[must_use]
    pub fn get(&self, resource: &ResourceRef) -> Option<Attributes> {
        self.lock().objects.get(resource).cloned()
    }

    /// Labels recorded when the object was created
    #[must_use]
    pub fn labels(&self, resource: &ResourceRef) -> Option<Labels> {
        self.lock().labels.get(resource).cloned()
    }

    /// Snapshot of every stored object
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<ResourceRef, Attributes> {
        self.lock().objects.clone()
    }

    /// Fail `operation` on `resource` with `error` until cleared
    pub fn inject_fault(&self, resource: &ResourceRef, operation: StoreOperation, error: StoreError) {
        self.lock().faults.insert(
            (resource.clone(), operation),
            Fault {
                error,
                applied: false,
            },
        );
    }

    /// Apply `operation` on `resource`, then report `error` as if the response was lost
    pub fn inject_fault_after_apply(
        &self,
        resource: &ResourceRef,
        operation: StoreOperation,
        error: StoreError,
    ) {
        self.lock().faults.insert(
            (resource.clone(), operation),
            Fault {
                error,
                applied: true,
            },
        );
    }

    /// Delay `operation` on `resource` by `delay` before it runs
    pub fn inject_delay(&self, resource: &ResourceRef, operation: StoreOperation, delay: Duration) {
        self.lock()
            .delays
            .insert((resource.clone(), operation), delay);
    }

    pub fn clear_faults(&self) {
        let mut inner = self.lock();
        inner.faults.clear();
        inner.delays.clear();
    }

    /// Number of calls made for one operation
    #[must_use]
    pub fn calls(&self, operation: StoreOperation) -> usize {
        match operation {
            StoreOperation::Find => self.finds.load(Ordering::SeqCst),
            StoreOperation::Create => self.creates.load(Ordering::SeqCst),
            StoreOperation::Update => self.updates.load(Ordering::SeqCst),
            StoreOperation::Delete => self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Number of calls made across all operations
    #[must_use]
    pub fn total_calls(&self) -> usize {
        [
            StoreOperation::Find,
            StoreOperation::Create,
            StoreOperation::Update,
            StoreOperation::Delete,
        ]
        .into_iter()
        .map(|op| self.calls(op))
        .sum()
    }

    /// Count the call, wait out any injected delay and return the injected fault
    async fn enter(&self, resource: &ResourceRef, operation: StoreOperation) -> Option<Fault> {
        let counter = match operation {
            StoreOperation::Find => &self.finds,
            StoreOperation::Create => &self.creates,
            StoreOperation::Update => &self.updates,
            StoreOperation::Delete => &self.deletes,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        debug!(resource = %resource, %operation, "memory store call");

        let key = (resource.clone(), operation);
        let delay = self.lock().delays.get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock().faults.get(&key).cloned()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find(&self, resource: &ResourceRef) -> Result<RemoteState, StoreError> {
        if let Some(fault) = self.enter(resource, StoreOperation::Find).await {
            return Err(fault.error);
        }
        Ok(self
            .lock()
            .objects
            .get(resource)
            .cloned()
            .map_or_else(RemoteState::absent, RemoteState::present))
    }

    async fn create(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
        labels: &Labels,
    ) -> Result<RemoteState, StoreError> {
        let fault = self.enter(resource, StoreOperation::Create).await;
        if let Some(Fault {
            error,
            applied: false,
        }) = fault
        {
            return Err(error);
        }

        let mut inner = self.lock();
        if inner.objects.contains_key(resource) {
            return Err(StoreError::Conflict(format!("{resource} already exists")));
        }
        inner.objects.insert(resource.clone(), attributes.clone());
        inner.labels.insert(resource.clone(), labels.clone());
        drop(inner);

        match fault {
            Some(fault) => Err(fault.error),
            None => Ok(RemoteState::present(attributes.clone())),
        }
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
    ) -> Result<RemoteState, StoreError> {
        let fault = self.enter(resource, StoreOperation::Update).await;
        if let Some(Fault {
            error,
            applied: false,
        }) = fault
        {
            return Err(error);
        }

        let mut inner = self.lock();
        let Some(current) = inner.objects.get_mut(resource) else {
            return Err(StoreError::Api {
                status: 404,
                message: format!("{resource} not found"),
            });
        };
        current.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        let state = RemoteState::present(current.clone());
        drop(inner);

        match fault {
            Some(fault) => Err(fault.error),
            None => Ok(state),
        }
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<bool, StoreError> {
        let fault = self.enter(resource, StoreOperation::Delete).await;
        if let Some(Fault {
            error,
            applied: false,
        }) = fault
        {
            return Err(error);
        }

        let mut inner = self.lock();
        let existed = inner.objects.remove(resource).is_some();
        inner.labels.remove(resource);
        drop(inner);

        match fault {
            Some(fault) => Err(fault.error),
            None => Ok(existed),
        }
    }
}
