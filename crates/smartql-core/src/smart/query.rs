// ── Smart query ──
//
// Binds a watched query's results onto the host, keeps the per-query and
// façade-wide loading accounting, and forwards the watch-handle
// operations (refetch, fetchMore, polling, ...).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};

use super::{OperationCore, SmartOperation};
use crate::apollo::Apollo;
use crate::config::{Dynamic, OperationConfig, OperationKind};
use crate::error::CoreError;
use crate::host::{DataSlot, ReactiveHost};
use crate::transport::{
    ApolloClient, ApolloError, ApolloResult, CallbackSubscription, FetchMoreOptions, FetchPolicy,
    ObservableQuery, Observer, OperationOptions, Subscription,
};
use crate::util::lock;

/// A declared query bound to a host field.
pub struct SmartQuery {
    core: OperationCore,
    observer: Mutex<Option<Arc<dyn ObservableQuery>>>,
    loading: AtomicBool,
    /// Façade data-bag slot receiving the unpacked result.
    slot: DataSlot,
    last_variables: Mutex<Option<Value>>,
}

impl SmartQuery {
    /// Create the query without starting it; see [`SmartOperation::autostart`].
    pub(crate) fn new(
        apollo: &Apollo,
        host: &Arc<dyn ReactiveHost>,
        key: &str,
        config: OperationConfig,
    ) -> Arc<Self> {
        apollo.state().register_query(key);
        let slot = apollo.state().data_slot(key);
        let manual = config.is_manual();

        let query = Arc::new_cyclic(|me: &Weak<Self>| {
            let me: Weak<dyn SmartOperation> = me.clone();
            Self {
                core: OperationCore::new(OperationKind::Query, key, host, apollo, me, config),
                observer: Mutex::new(None),
                loading: AtomicBool::new(false),
                slot: slot.clone(),
                last_variables: Mutex::new(None),
            }
        });

        if !manual {
            host.bind(key, slot);
        }
        query
    }

    fn observer(&self) -> Option<Arc<dyn ObservableQuery>> {
        lock(&self.observer).clone()
    }

    fn require_observer(&self) -> Result<Arc<dyn ObservableQuery>, CoreError> {
        self.observer().ok_or_else(|| CoreError::NotStarted {
            key: self.core.key().to_owned(),
        })
    }

    /// Subscribe to the watch handle unless a live subscription exists.
    fn start_query_subscription(&self) {
        if self.core.has_active_subscription() {
            return;
        }
        let Some(observable) = self.observer() else { return };

        let next = self.core.me();
        let fail = self.core.me();
        let observer = Observer::new(
            move |result| {
                if let Some(op) = next.upgrade() {
                    op.next_result(result);
                }
            },
            move |error| {
                if let Some(op) = fail.upgrade() {
                    op.catch_error(error);
                }
            },
        );

        let epoch = self.core.epoch();
        let sub = observable.subscribe(observer);
        self.core.install_sub(sub, epoch);
    }

    /// Reopen the subscription the watch handle closed on error, keeping
    /// its last result and error.
    fn resubscribe_to_query(&self) {
        let Some(observable) = self.observer() else { return };
        let last_error = observable.last_error();
        let last_result = observable.last_result();
        observable.reset_last_results();
        self.start_query_subscription();
        observable.restore_last_results(last_result, last_error);
        debug!(key = self.core.key(), "resubscribed after error");
    }

    /// Raise loading if forced or if the current result is still loading.
    fn may_set_loading(&self, force: bool) -> Option<ApolloResult> {
        let observable = self.observer()?;
        let current = observable.current_result();
        if force || current.loading {
            if !self.is_loading() {
                self.apply_loading_modifier(1);
            }
            self.set_loading(true);
        }
        Some(current)
    }

    fn loading_done(&self) {
        if self.is_loading() {
            self.apply_loading_modifier(-1);
        }
        self.set_loading(false);
    }

    /// Adjust the numeric `loadingKey` host field and run `watchLoading`.
    fn apply_loading_modifier(&self, modifier: i32) {
        if let (Some(key), Some(host)) = (self.loading_key(), self.core.host()) {
            if let Some(current) = host.get(&key).as_ref().and_then(Value::as_i64) {
                host.set(&key, Value::from(current + i64::from(modifier)));
            }
        }
        super::watch_loading(&self.core, modifier == 1, modifier);
    }

    /// Variables pushed to the handle directly also become the ones later
    /// option updates carry.
    fn remember_variables(&self, variables: &Value) {
        self.core.live().variables = Some(Dynamic::Static(variables.clone()));
        *lock(&self.last_variables) = Some(variables.clone());
    }

    fn set_data(&self, value: Value) {
        self.slot.set(value);
    }

    // ── Loading ─────────────────────────────────────────────────────

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Loading contribution of this query. Only the edges adjust the
    /// façade counter.
    pub fn set_loading(&self, value: bool) {
        if self.loading.swap(value, Ordering::SeqCst) == value {
            return;
        }
        if let Some(apollo) = self.core.apollo() {
            apollo.state().set_query_loading(self.core.key(), value);
        }
    }

    /// Operation-level `loadingKey`, else the façade default.
    pub fn loading_key(&self) -> Option<String> {
        let own = self.core.live().loading_key.clone();
        own.or_else(|| self.core.apollo().and_then(|a| a.loading_key()))
    }

    /// The client this query resolves to.
    pub fn client(&self) -> Result<Arc<dyn ApolloClient>, CoreError> {
        let name = self.core.live().client.clone();
        let apollo = self.core.apollo().ok_or(CoreError::Destroyed)?;
        apollo.get_client(name.as_deref())
    }

    pub fn has_active_subscription(&self) -> bool {
        self.core.has_active_subscription()
    }

    /// Latest value bound on the host.
    pub fn data(&self) -> Value {
        self.slot.get()
    }

    pub fn has_observer(&self) -> bool {
        self.observer().is_some()
    }

    // ── Watch-handle pass-through ───────────────────────────────────

    pub async fn refetch(&self, variables: Option<Value>) -> Result<ApolloResult, CoreError> {
        if let Some(variables) = &variables {
            self.remember_variables(variables);
        }
        let observable = self.require_observer()?;
        let pending = observable.refetch(variables);
        self.may_set_loading(false);
        let result = pending.await?;
        if !result.loading {
            self.loading_done();
        }
        Ok(result)
    }

    pub async fn fetch_more(&self, options: FetchMoreOptions) -> Result<ApolloResult, CoreError> {
        let observable = self.require_observer()?;
        self.may_set_loading(true);
        let result = observable.fetch_more(options).await?;
        if !result.loading {
            self.loading_done();
        }
        Ok(result)
    }

    pub async fn set_variables(
        &self,
        variables: Value,
        try_fetch: bool,
    ) -> Result<ApolloResult, CoreError> {
        self.remember_variables(&variables);
        let observable = self.require_observer()?;
        let pending = observable.set_variables(Some(variables), try_fetch);
        self.may_set_loading(false);
        Ok(pending.await?)
    }

    /// Update the live configuration and push the resulting options to
    /// the watch handle.
    pub fn set_options(&self, update: impl FnOnce(&mut OperationConfig)) -> Result<(), CoreError> {
        update(&mut self.core.live());
        let observable = self.require_observer()?;
        let variables = lock(&self.last_variables).clone();
        observable.set_options(self.generate_options(variables));
        self.may_set_loading(false);
        Ok(())
    }

    pub fn start_polling(&self, interval: Duration) -> Result<(), CoreError> {
        self.require_observer()?.start_polling(interval);
        Ok(())
    }

    pub fn stop_polling(&self) -> Result<(), CoreError> {
        self.require_observer()?.stop_polling();
        Ok(())
    }

    /// Extend the watched query with a subscription whose events are
    /// merged through `options.update_query`.
    pub fn subscribe_to_more(
        &self,
        options: OperationOptions,
    ) -> Result<Arc<dyn Subscription>, CoreError> {
        let observable = self.require_observer()?;
        let unsubscribe = observable.subscribe_to_more(options);
        Ok(Arc::new(CallbackSubscription::new(unsubscribe)))
    }
}

impl SmartOperation for SmartQuery {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn execute_apollo(&self, variables: Option<Value>) {
        if self.core.is_destroyed() {
            return;
        }
        *lock(&self.last_variables) = variables.clone();
        let options = self.generate_options(variables);

        if let Some(observable) = self.observer() {
            // keeps the cache, unlike set_variables
            observable.set_options(options);
        } else {
            if let Some(sub) = self.core.take_sub() {
                sub.unsubscribe();
            }
            let Some(apollo) = self.core.apollo() else { return };
            match apollo.watch_query(options) {
                Ok(observable) => *lock(&self.observer) = Some(observable),
                Err(err) => {
                    error!(key = self.core.key(), error = %err, "cannot watch query");
                    return;
                }
            }
        }

        self.start_query_subscription();

        let no_cache = self.core.live().fetch_policy == Some(FetchPolicy::NoCache);
        if !no_cache {
            if let Some(current) = self.may_set_loading(false) {
                if !current.loading {
                    self.next_result(current);
                }
            }
        }

        self.core.execution_done();
    }

    fn next_result(&self, result: ApolloResult) {
        if self.core.is_destroyed() {
            return;
        }
        let result = super::normalize_result(result);

        if !result.loading {
            self.loading_done();
        }

        let (manual, update, hook) = {
            let live = self.core.live();
            (live.is_manual(), live.update.clone(), live.result.clone())
        };
        let key = self.core.key();

        match result.data.as_ref().filter(|d| !d.is_null()) {
            None => {}
            Some(data) if !manual => {
                if let Some(update) = update {
                    self.set_data(update(data));
                } else {
                    match data.get(key) {
                        Some(value) => self.set_data(value.clone()),
                        None if data.as_object().is_some_and(|o| !o.is_empty()) => {
                            error!(key, data = %data, "Missing {key} attribute on result");
                        }
                        None => self.set_data(Value::Null),
                    }
                }
            }
            Some(_) => {
                if hook.is_none() {
                    error!(key, "{key} query must have a 'result' hook in manual mode");
                }
            }
        }

        if let Some(hook) = hook {
            hook(&result);
        }
        if let Some(apollo) = self.core.apollo() {
            apollo.state().touch();
        }
    }

    fn catch_error(&self, error: ApolloError) {
        if self.core.is_destroyed() {
            return;
        }
        super::catch_error(self, error);
        self.loading_done();
        if let Some(observable) = self.observer() {
            self.next_result(observable.current_result());
            self.resubscribe_to_query();
        }
    }

    fn stop(&self) {
        super::stop(&self.core);
        let observable = lock(&self.observer).take();
        if let Some(observable) = observable {
            observable.stop_polling();
        }
    }

    fn destroy(&self) {
        if self.core.is_destroyed() {
            return;
        }
        super::destroy(self);
        if self.is_loading() {
            super::watch_loading(&self.core, false, -1);
        }
        self.set_loading(false);
        if let Some(apollo) = self.core.apollo() {
            apollo.state().unregister_query(self.core.key());
        }
    }
}

impl std::fmt::Debug for SmartQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartQuery")
            .field("key", &self.core.key())
            .field("state", &self.core.state())
            .field("loading", &self.is_loading())
            .field("observing", &self.has_observer())
            .finish_non_exhaustive()
    }
}

/// Emit a diagnostic when a linked subscription finds no watch handle.
pub(crate) fn warn_unlinked(query: &SmartQuery, subscription: &str) {
    warn!(
        query = query.core.key(),
        subscription, "linked query has no watch handle; subscribeToMore not registered"
    );
}
