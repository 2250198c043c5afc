//! Object registry: stable ids for live objects.
//!
//! Ids are allocated from a monotonically increasing counter the first time an
//! object is registered and are never handed out again. Registration is
//! idempotent per object identity (its allocation address), so registering
//! the same `Arc` twice yields the same id.
//!
//! Entries are only removed by [`Registry::sweep`], which consults the
//! configured [`EvictionPolicy`]. The default policy retains everything.

use super::object::{Exposed, RemoteObject};
use crate::error::RegistryError;
use crate::protocol::reference_token;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// A registered live object together with its id.
#[derive(Clone)]
pub struct ObjectRef {
    id: u64,
    object: Arc<dyn RemoteObject>,
}

impl ObjectRef {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The `hash:<id>` wire token.
    pub fn token(&self) -> String {
        reference_token(self.id)
    }

    pub fn object(&self) -> &dyn RemoteObject {
        self.object.as_ref()
    }

    pub fn class_name(&self) -> &str {
        self.object.class_name()
    }

    pub fn downcast_ref<T: Exposed>(&self) -> Option<&T> {
        self.object.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.object.class_name(), self.token())
    }
}

/// Decides which entries a sweep keeps.
pub trait EvictionPolicy: Send + Sync {
    fn retain(&self, entry: &ObjectRef) -> bool;
}

/// Never evicts.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainAll;

impl EvictionPolicy for RetainAll {
    fn retain(&self, _entry: &ObjectRef) -> bool {
        true
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    objects: HashMap<u64, ObjectRef>,
    by_address: HashMap<usize, u64>,
}

/// Table of every object reachable by reference.
pub struct Registry {
    inner: RwLock<RegistryInner>,
    policy: Box<dyn EvictionPolicy>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_policy(RetainAll)
    }

    pub fn with_policy(policy: impl EvictionPolicy + 'static) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                next_id: 1,
                ..RegistryInner::default()
            }),
            policy: Box::new(policy),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryInner>, RegistryError> {
        self.inner.read().map_err(|_| {
            warn!("Object registry lock poisoned");
            RegistryError::LockPoisoned
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryInner>, RegistryError> {
        self.inner.write().map_err(|_| {
            warn!("Object registry lock poisoned");
            RegistryError::LockPoisoned
        })
    }

    /// Register an object, returning its (possibly existing) reference.
    pub fn register<T: Exposed>(&self, object: Arc<T>) -> Result<ObjectRef, RegistryError> {
        self.register_dyn(object)
    }

    pub fn register_dyn(&self, object: Arc<dyn RemoteObject>) -> Result<ObjectRef, RegistryError> {
        let address = Arc::as_ptr(&object) as *const () as usize;
        let mut inner = self.write()?;

        if let Some(existing) = inner
            .by_address
            .get(&address)
            .and_then(|id| inner.objects.get(id))
        {
            return Ok(existing.clone());
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let entry = ObjectRef { id, object };
        debug!("Registered {:?}", entry);
        inner.objects.insert(id, entry.clone());
        inner.by_address.insert(address, id);
        Ok(entry)
    }

    pub fn lookup(&self, id: u64) -> Result<ObjectRef, RegistryError> {
        self.read()?
            .objects
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Every registered id, ascending.
    pub fn ids(&self) -> Result<Vec<u64>, RegistryError> {
        let mut ids: Vec<u64> = self.read()?.objects.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Number of registered objects. Still answers once the lock is
    /// poisoned, while every other operation fails with `LockPoisoned`.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|poisoned| {
            warn!("Object registry lock poisoned, reporting last known size");
            PoisonError::into_inner(poisoned)
        });
        inner.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry the eviction policy does not retain.
    ///
    /// Returns the number of evicted entries. Evicted ids are not reused.
    pub fn sweep(&self) -> Result<usize, RegistryError> {
        let mut inner = self.write()?;
        let evicted: Vec<u64> = inner
            .objects
            .values()
            .filter(|entry| !self.policy.retain(entry))
            .map(ObjectRef::id)
            .collect();
        for id in &evicted {
            inner.objects.remove(id);
        }
        inner.by_address.retain(|_, id| !evicted.contains(id));
        if !evicted.is_empty() {
            debug!("Evicted {} registry entries", evicted.len());
        }
        Ok(evicted.len())
    }
}
