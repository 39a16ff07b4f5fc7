// ── Scope: reference reactive host ──
//
// A thread-safe host backed by a JSON map. Every write bumps a version
// counter and synchronously re-evaluates registered watches; callbacks
// fire for watches whose value changed. Useful for headless embedding and
// as the host in tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use super::{DataSlot, Getter, HostData, ReactiveHost, WatchCallback, WatchHandle, WatchOptions};
use crate::util::lock;

struct Watcher {
    getter: Getter,
    callback: WatchCallback,
    last: Mutex<Value>,
    active: AtomicBool,
}

struct ScopeInner {
    fields: Mutex<HostData>,
    slots: DashMap<String, DataSlot>,
    watchers: DashMap<u64, Arc<Watcher>>,
    next_watcher: AtomicU64,
    version: watch::Sender<u64>,
    server: bool,
}

/// Reference implementation of [`ReactiveHost`].
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub fn new() -> Self {
        Self::build(HostData::new(), false)
    }

    /// A scope pre-populated with `data`.
    pub fn with_data(data: HostData) -> Self {
        Self::build(data, false)
    }

    /// A scope that reports itself as server-side rendering.
    pub fn server(data: HostData) -> Self {
        Self::build(data, true)
    }

    fn build(data: HostData, server: bool) -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ScopeInner {
                fields: Mutex::new(data),
                slots: DashMap::new(),
                watchers: DashMap::new(),
                next_watcher: AtomicU64::new(0),
                version,
                server,
            }),
        }
    }

    /// Number of live watch registrations.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    /// Version counter, bumped on every change.
    pub fn version(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Fields currently bound to a data slot.
    pub fn bound_fields(&self) -> Vec<String> {
        self.inner.slots.iter().map(|r| r.key().clone()).collect()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeInner {
    fn snapshot(&self) -> HostData {
        let mut data = lock(&self.fields).clone();
        let bound: Vec<(String, Value)> = self
            .slots
            .iter()
            .map(|r| (r.key().clone(), r.value().get()))
            .collect();
        for (field, value) in bound {
            data.insert(field, value);
        }
        data
    }

    /// Re-evaluate every watch and fire the ones whose value changed.
    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));

        let watchers: Vec<Arc<Watcher>> =
            self.watchers.iter().map(|r| Arc::clone(r.value())).collect();

        for watcher in watchers {
            if !watcher.active.load(Ordering::SeqCst) {
                continue;
            }
            // earlier callbacks may have written to the scope
            let next = (watcher.getter)(&self.snapshot());
            let previous = {
                let mut last = lock(&watcher.last);
                if *last == next {
                    continue;
                }
                std::mem::replace(&mut *last, next.clone())
            };
            (watcher.callback)(&next, Some(&previous));
        }
    }
}

impl ReactiveHost for Scope {
    fn watch(
        &self,
        getter: Getter,
        callback: WatchCallback,
        options: WatchOptions,
    ) -> WatchHandle {
        let initial = getter(&self.inner.snapshot());
        let id = self.inner.next_watcher.fetch_add(1, Ordering::SeqCst);
        let watcher = Arc::new(Watcher {
            getter,
            callback,
            last: Mutex::new(initial.clone()),
            active: AtomicBool::new(true),
        });
        self.inner.watchers.insert(id, Arc::clone(&watcher));
        trace!(id, immediate = options.immediate, "watch registered");

        if options.immediate {
            (watcher.callback)(&initial, None);
        }

        let scope: Weak<ScopeInner> = Arc::downgrade(&self.inner);
        WatchHandle::new(move || {
            watcher.active.store(false, Ordering::SeqCst);
            if let Some(scope) = scope.upgrade() {
                scope.watchers.remove(&id);
                trace!(id, "watch released");
            }
        })
    }

    fn snapshot(&self) -> HostData {
        self.inner.snapshot()
    }

    fn get(&self, field: &str) -> Option<Value> {
        if let Some(slot) = self.inner.slots.get(field) {
            return Some(slot.get());
        }
        lock(&self.inner.fields).get(field).cloned()
    }

    fn set(&self, field: &str, value: Value) {
        let slot = self.inner.slots.get(field).map(|r| r.value().clone());
        if let Some(slot) = slot {
            // the slot hook re-evaluates watches
            slot.set(value);
            return;
        }
        {
            let mut fields = lock(&self.inner.fields);
            if fields.get(field) == Some(&value) {
                return;
            }
            fields.insert(field.to_owned(), value);
        }
        self.inner.notify();
    }

    fn has_field(&self, field: &str) -> bool {
        self.inner.slots.contains_key(field) || lock(&self.inner.fields).contains_key(field)
    }

    fn bind(&self, field: &str, slot: DataSlot) {
        if self
            .inner
            .slots
            .get(field)
            .is_some_and(|bound| bound.same_slot(&slot))
        {
            return;
        }
        let existing = lock(&self.inner.fields).remove(field);
        if let Some(existing) = existing {
            if slot.get().is_null() {
                slot.set(existing);
            }
        }

        let scope: Weak<ScopeInner> = Arc::downgrade(&self.inner);
        slot.on_change(Arc::new(move |_| {
            if let Some(scope) = scope.upgrade() {
                scope.notify();
            }
        }));
        self.inner.slots.insert(field.to_owned(), slot);
    }

    fn is_server(&self) -> bool {
        self.inner.server
    }
}
