// ── Reactive host contract ──
//
// What the binding layer needs from the UI framework's reactivity system:
// watch an expression over the host's data, read and write named fields,
// and bind a field to a data slot owned by the façade.

mod scope;
mod slot;

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

pub use scope::Scope;
pub use slot::{DataSlot, SlotHook};

/// The host's reactive data, as seen by getters.
pub type HostData = Map<String, Value>;

/// Expression evaluated against the host's data.
pub type Getter = Arc<dyn Fn(&HostData) -> Value + Send + Sync>;

/// Watch callback: `(new, old)`. `old` is `None` on the immediate call.
pub type WatchCallback = Arc<dyn Fn(&Value, Option<&Value>) + Send + Sync>;

/// Build a [`Getter`] from a closure.
pub fn getter(f: impl Fn(&HostData) -> Value + Send + Sync + 'static) -> Getter {
    Arc::new(f)
}

/// Getter reading a single top-level field (`Null` when absent).
pub fn field_getter(field: impl Into<String>) -> Getter {
    let field = field.into();
    Arc::new(move |data: &HostData| data.get(&field).cloned().unwrap_or(Value::Null))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Invoke the callback once, synchronously, during registration.
    pub immediate: bool,
    /// Compare nested structure rather than identity.
    pub deep: bool,
}

impl WatchOptions {
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            deep: false,
        }
    }

    #[must_use]
    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }
}

/// Registration returned by [`ReactiveHost::watch`]. Dropping the handle
/// does not unregister; call [`WatchHandle::unwatch`].
pub struct WatchHandle(Option<Box<dyn FnOnce() + Send + Sync>>);

impl WatchHandle {
    pub fn new(unwatch: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(unwatch)))
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn unwatch(mut self) {
        if let Some(unwatch) = self.0.take() {
            unwatch();
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WatchHandle")
            .field(&self.0.as_ref().map(|_| "<unwatch>"))
            .finish()
    }
}

/// The component instance a façade is attached to.
///
/// Implementations may invoke watch callbacks synchronously from `set`,
/// so callers must not hold locks across these calls.
pub trait ReactiveHost: Send + Sync {
    fn watch(&self, getter: Getter, callback: WatchCallback, options: WatchOptions)
    -> WatchHandle;

    /// Current view of the host's data, bound fields included.
    fn snapshot(&self) -> HostData;

    /// Evaluate a getter once against the current data.
    fn evaluate(&self, getter: &Getter) -> Value {
        getter(&self.snapshot())
    }

    fn get(&self, field: &str) -> Option<Value>;

    fn set(&self, field: &str, value: Value);

    fn has_field(&self, field: &str) -> bool;

    /// Route reads and writes of `field` through `slot` from now on.
    fn bind(&self, field: &str, slot: DataSlot);

    /// Rendering on the server: no subscriptions, cache-first fetches.
    fn is_server(&self) -> bool {
        false
    }
}
