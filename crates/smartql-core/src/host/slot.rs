// ── Data slots ──
//
// A single reactive value owned by the façade (the unpacked result of a
// smart query) and observed by the host and any view layer.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;

use crate::stream::FieldStream;
use crate::util::lock;

/// Invoked after the slot's value changes.
pub type SlotHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Cheaply cloneable reactive value backed by a `watch` channel.
#[derive(Clone)]
pub struct DataSlot {
    value: Arc<watch::Sender<Value>>,
    hooks: Arc<Mutex<Vec<SlotHook>>>,
}

impl DataSlot {
    pub fn new(initial: Value) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            value: Arc::new(value),
            hooks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Replace the value. Hooks and receivers are only notified when the
    /// value actually changed.
    pub fn set(&self, value: Value) {
        let mut incoming = Some(value);
        let changed = self.value.send_if_modified(|current| match incoming.take() {
            Some(next) if *current != next => {
                *current = next;
                true
            }
            _ => false,
        });
        if !changed {
            return;
        }

        let hooks: Vec<SlotHook> = lock(&self.hooks).clone();
        let current = self.get();
        for hook in hooks {
            hook(&current);
        }
    }

    /// Register a hook run after every change.
    pub fn on_change(&self, hook: SlotHook) {
        lock(&self.hooks).push(hook);
    }

    /// Whether both handles point at the same slot.
    pub fn same_slot(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    pub fn subscribe(&self) -> watch::Receiver<Value> {
        self.value.subscribe()
    }

    pub fn stream(&self) -> FieldStream {
        FieldStream::new(self.subscribe())
    }
}

impl Default for DataSlot {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl fmt::Debug for DataSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSlot")
            .field("value", &*self.value.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hooks_fire_only_on_change() {
        let slot = DataSlot::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        slot.on_change(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        slot.set(json!({ "name": "A" }));
        slot.set(json!({ "name": "A" }));
        slot.set(json!({ "name": "B" }));

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(slot.get(), json!({ "name": "B" }));
    }

    #[test]
    fn clones_share_the_value() {
        let slot = DataSlot::new(json!(1));
        let other = slot.clone();
        other.set(json!(2));
        assert_eq!(slot.get(), json!(2));
    }
}
