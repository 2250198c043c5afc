//! Client-side caches shared between proxies.
//!
//! - Attribute cache: `(selfRef, name)` to the proxy that attribute last
//!   resolved to. Plain values are never stored.
//! - Auxiliary cache: `(name, items)` of a `sqlref` to its resolved value.
//!
//! Both are scoped by base endpoint, since object ids are only unique within
//! one server.

use super::proxy::TargetState;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{trace, warn};

static GLOBAL: LazyLock<Arc<ClientCache>> = LazyLock::new(|| Arc::new(ClientCache::new()));

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AttrKey {
    base: String,
    self_ref: String,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AuxKey {
    base: String,
    name: String,
    /// Canonical JSON text of `items`.
    items: String,
}

#[derive(Default)]
pub struct ClientCache {
    attrs: RwLock<HashMap<AttrKey, Arc<TargetState>>>,
    aux: RwLock<HashMap<AuxKey, serde_json::Value>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used unless a proxy is built with its own.
    pub fn global() -> Arc<ClientCache> {
        GLOBAL.clone()
    }

    pub(crate) fn attr(
        &self,
        base: &str,
        self_ref: &str,
        name: &str,
    ) -> Option<Arc<TargetState>> {
        let hit = read(&self.attrs).get(&attr_key(base, self_ref, name)).cloned();
        if hit.is_some() {
            trace!("Attribute cache hit for {}.{}", self_ref, name);
        }
        hit
    }

    pub(crate) fn store_attr(
        &self,
        base: &str,
        self_ref: &str,
        name: &str,
        target: Arc<TargetState>,
    ) {
        write(&self.attrs).insert(attr_key(base, self_ref, name), target);
    }

    pub(crate) fn invalidate_attr(&self, base: &str, self_ref: &str, name: &str) {
        write(&self.attrs).remove(&attr_key(base, self_ref, name));
    }

    /// Drop every cached attribute of one remote object.
    pub(crate) fn flush_object(&self, base: &str, self_ref: &str) -> usize {
        let mut attrs = write(&self.attrs);
        let before = attrs.len();
        attrs.retain(|key, _| !(key.base == base && key.self_ref == self_ref));
        before - attrs.len()
    }

    /// Drop every cached attribute of every object behind `base`.
    pub(crate) fn flush_base(&self, base: &str) -> usize {
        let mut attrs = write(&self.attrs);
        let before = attrs.len();
        attrs.retain(|key, _| key.base != base);
        before - attrs.len()
    }

    pub(crate) fn aux(
        &self,
        base: &str,
        name: &str,
        items: &serde_json::Value,
    ) -> Option<serde_json::Value> {
        let key = aux_key(base, name, items);
        let hit = read(&self.aux).get(&key).cloned();
        if hit.is_some() {
            trace!("Auxiliary cache hit for {} {}", name, key.items);
        }
        hit
    }

    /// Store a resolved auxiliary value. The first stored value wins.
    pub(crate) fn store_aux(
        &self,
        base: &str,
        name: &str,
        items: &serde_json::Value,
        value: serde_json::Value,
    ) -> serde_json::Value {
        write(&self.aux)
            .entry(aux_key(base, name, items))
            .or_insert(value)
            .clone()
    }

    /// Clear both caches.
    pub fn clear(&self) {
        write(&self.attrs).clear();
        write(&self.aux).clear();
    }

    pub fn attr_len(&self) -> usize {
        read(&self.attrs).len()
    }

    pub fn aux_len(&self) -> usize {
        read(&self.aux).len()
    }
}

/// Cache entries are only ever inserted or removed whole, so a lock poisoned
/// by a panicking holder still guards consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("Client cache lock poisoned, recovering");
        PoisonError::into_inner(poisoned)
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("Client cache lock poisoned, recovering");
        PoisonError::into_inner(poisoned)
    })
}

fn attr_key(base: &str, self_ref: &str, name: &str) -> AttrKey {
    AttrKey {
        base: base.to_string(),
        self_ref: self_ref.to_string(),
        name: name.to_string(),
    }
}

fn aux_key(base: &str, name: &str, items: &serde_json::Value) -> AuxKey {
    AuxKey {
        base: base.to_string(),
        name: name.to_string(),
        items: items.to_string(),
    }
}
