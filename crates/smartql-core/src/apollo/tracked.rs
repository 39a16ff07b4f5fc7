// ── Tracked observables ──
//
// Wrappers handed out by the façade's `watch_query` / `subscribe`: every
// subscription opened through them is recorded so the façade can close
// them all on destroy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::transport::{
    ApolloError, ApolloFuture, ApolloResult, FetchMoreOptions, Observable, ObservableQuery,
    Observer, OperationOptions, Subscription, Unsubscribe,
};
use crate::util::lock;

/// Raw subscriptions opened through a façade.
#[derive(Default)]
pub(crate) struct SubscriptionTracker {
    subs: Mutex<Vec<Arc<dyn Subscription>>>,
    closed: AtomicBool,
}

impl SubscriptionTracker {
    /// Record `sub`, pruning closed entries. After `close_all` new
    /// subscriptions are closed immediately.
    pub(crate) fn record(&self, sub: &Arc<dyn Subscription>) {
        if self.closed.load(Ordering::SeqCst) {
            sub.unsubscribe();
            return;
        }
        let mut subs = lock(&self.subs);
        subs.retain(|s| !s.closed());
        subs.push(Arc::clone(sub));
    }

    pub(crate) fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let subs: Vec<_> = lock(&self.subs).drain(..).collect();
        for sub in subs {
            sub.unsubscribe();
        }
    }

    /// Open subscriptions currently tracked.
    pub(crate) fn live_count(&self) -> usize {
        lock(&self.subs).iter().filter(|s| !s.closed()).count()
    }
}

pub(crate) struct TrackedQuery {
    inner: Arc<dyn ObservableQuery>,
    tracker: Arc<SubscriptionTracker>,
}

impl TrackedQuery {
    pub(crate) fn new(inner: Arc<dyn ObservableQuery>, tracker: Arc<SubscriptionTracker>) -> Self {
        Self { inner, tracker }
    }
}

impl Observable for TrackedQuery {
    fn subscribe(&self, observer: Observer) -> Arc<dyn Subscription> {
        let sub = self.inner.subscribe(observer);
        self.tracker.record(&sub);
        sub
    }
}

impl ObservableQuery for TrackedQuery {
    fn current_result(&self) -> ApolloResult {
        self.inner.current_result()
    }

    fn refetch(&self, variables: Option<Value>) -> ApolloFuture {
        self.inner.refetch(variables)
    }

    fn set_variables(&self, variables: Option<Value>, try_fetch: bool) -> ApolloFuture {
        self.inner.set_variables(variables, try_fetch)
    }

    fn set_options(&self, options: OperationOptions) {
        self.inner.set_options(options);
    }

    fn fetch_more(&self, options: FetchMoreOptions) -> ApolloFuture {
        self.inner.fetch_more(options)
    }

    fn start_polling(&self, interval: Duration) {
        self.inner.start_polling(interval);
    }

    fn stop_polling(&self) {
        self.inner.stop_polling();
    }

    fn subscribe_to_more(&self, options: OperationOptions) -> Unsubscribe {
        self.inner.subscribe_to_more(options)
    }

    fn last_result(&self) -> Option<ApolloResult> {
        self.inner.last_result()
    }

    fn last_error(&self) -> Option<ApolloError> {
        self.inner.last_error()
    }

    fn reset_last_results(&self) {
        self.inner.reset_last_results();
    }

    fn restore_last_results(&self, result: Option<ApolloResult>, error: Option<ApolloError>) {
        self.inner.restore_last_results(result, error);
    }
}

pub(crate) struct TrackedObservable {
    inner: Arc<dyn Observable>,
    tracker: Arc<SubscriptionTracker>,
}

impl TrackedObservable {
    pub(crate) fn new(inner: Arc<dyn Observable>, tracker: Arc<SubscriptionTracker>) -> Self {
        Self { inner, tracker }
    }
}

impl Observable for TrackedObservable {
    fn subscribe(&self, observer: Observer) -> Arc<dyn Subscription> {
        let sub = self.inner.subscribe(observer);
        self.tracker.record(&sub);
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CallbackSubscription;

    fn sub() -> Arc<dyn Subscription> {
        Arc::new(CallbackSubscription::new(Box::new(|| {})))
    }

    #[test]
    fn record_prunes_closed_subscriptions() {
        let tracker = SubscriptionTracker::default();
        let first = sub();
        tracker.record(&first);
        first.unsubscribe();
        tracker.record(&sub());

        assert_eq!(lock(&tracker.subs).len(), 1);
        assert_eq!(tracker.live_count(), 1);
    }

    #[test]
    fn close_all_unsubscribes_and_rejects_late_arrivals() {
        let tracker = SubscriptionTracker::default();
        let open = sub();
        tracker.record(&open);

        tracker.close_all();
        assert!(open.closed());

        let late = sub();
        tracker.record(&late);
        assert!(late.closed());
        assert_eq!(tracker.live_count(), 0);
    }
}
