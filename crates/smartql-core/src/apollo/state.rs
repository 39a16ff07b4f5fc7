// ── Façade reactive state ──
//
// The `$apolloData` equivalent: unpacked query data, per-query loading
// flags and the aggregate loading counter, each observable by the view.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;

use crate::host::{DataSlot, HostData};
use crate::stream::FieldStream;

pub(crate) struct ApolloState {
    data: DashMap<String, DataSlot>,
    queries: DashMap<String, bool>,
    /// Number of queries currently loading.
    loading: watch::Sender<usize>,
    last_result_at: ArcSwapOption<DateTime<Utc>>,
}

impl ApolloState {
    pub(crate) fn new() -> Self {
        let (loading, _) = watch::channel(0usize);
        Self {
            data: DashMap::new(),
            queries: DashMap::new(),
            loading,
            last_result_at: ArcSwapOption::empty(),
        }
    }

    // ── Data bag ────────────────────────────────────────────────────

    /// Slot for `key`, created on first use.
    pub(crate) fn data_slot(&self, key: &str) -> DataSlot {
        self.data.entry(key.to_owned()).or_default().value().clone()
    }

    pub(crate) fn data_snapshot(&self) -> HostData {
        self.data
            .iter()
            .map(|r| (r.key().clone(), r.value().get()))
            .collect()
    }

    pub(crate) fn data_stream(&self, key: &str) -> Option<FieldStream> {
        self.data.get(key).map(|slot| slot.stream())
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|slot| slot.get())
    }

    // ── Loading ─────────────────────────────────────────────────────

    pub(crate) fn register_query(&self, key: &str) {
        self.queries.entry(key.to_owned()).or_insert(false);
    }

    pub(crate) fn unregister_query(&self, key: &str) {
        if let Some((_, true)) = self.queries.remove(key) {
            self.loading.send_modify(|count| *count = count.saturating_sub(1));
        }
    }

    /// Record the loading edge of one query. Repeating the current value
    /// leaves the counter untouched.
    pub(crate) fn set_query_loading(&self, key: &str, loading: bool) {
        let previous = self.queries.insert(key.to_owned(), loading).unwrap_or(false);
        if previous == loading {
            return;
        }
        self.loading.send_modify(|count| {
            if loading {
                *count += 1;
            } else {
                *count = count.saturating_sub(1);
            }
        });
    }

    pub(crate) fn query_loading(&self, key: &str) -> bool {
        self.queries.get(key).is_some_and(|r| *r.value())
    }

    pub(crate) fn loading_count(&self) -> usize {
        *self.loading.borrow()
    }

    pub(crate) fn loading_stream(&self) -> FieldStream<usize> {
        FieldStream::new(self.loading.subscribe())
    }

    // ── Timestamps ──────────────────────────────────────────────────

    pub(crate) fn touch(&self) {
        self.last_result_at.store(Some(Arc::new(Utc::now())));
    }

    pub(crate) fn last_result_at(&self) -> Option<DateTime<Utc>> {
        self.last_result_at.load_full().map(|t| *t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loading_counter_only_moves_on_edges() {
        let state = ApolloState::new();
        state.register_query("user");

        state.set_query_loading("user", true);
        state.set_query_loading("user", true);
        assert_eq!(state.loading_count(), 1);
        assert!(state.query_loading("user"));

        state.set_query_loading("user", false);
        state.set_query_loading("user", false);
        assert_eq!(state.loading_count(), 0);
    }

    #[test]
    fn unregistering_a_loading_query_releases_its_count() {
        let state = ApolloState::new();
        state.set_query_loading("posts", true);
        state.unregister_query("posts");
        assert_eq!(state.loading_count(), 0);
        assert!(!state.query_loading("posts"));
    }

    #[test]
    fn data_slots_are_shared_per_key() {
        let state = ApolloState::new();
        state.data_slot("user").set(json!({ "name": "A" }));
        assert_eq!(state.get("user"), Some(json!({ "name": "A" })));
        assert_eq!(state.data_snapshot().len(), 1);
    }
}
