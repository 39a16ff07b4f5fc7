// ── Apollo façade ──
//
// Per-host registry of smart queries and subscriptions. Resolves which
// client an operation talks to, aggregates loading state, broadcasts the
// skip-all switches and owns bulk teardown of everything it created.

mod state;
mod tracked;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

pub(crate) use state::ApolloState;
use tracked::{SubscriptionTracker, TrackedObservable, TrackedQuery};

use crate::config::{
    ChainControl, Dynamic, ErrorHandler, OperationConfig, OperationKind, SubscribeToMore,
    WatchLoadingHandler,
};
use crate::declaration::ApolloDeclaration;
use crate::error::CoreError;
use crate::host::{Getter, HostData, ReactiveHost, WatchCallback, WatchHandle, WatchOptions};
use crate::provider::{ApolloProvider, DEFAULT_CLIENT};
use crate::smart::{SmartOperation, SmartQuery, SmartSubscription};
use crate::stream::FieldStream;
use crate::transport::{
    ApolloClient, ApolloError, ApolloResult, MutationOptions, Observable, ObservableQuery,
    OperationOptions,
};
use crate::util::lock;

/// Component-scoped client choice (`$client`).
#[derive(Clone)]
pub enum ClientSelector {
    /// A client registered on the provider under this name.
    Named(String),
    Instance(Arc<dyn ApolloClient>),
}

impl fmt::Debug for ClientSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Instance(_) => f.write_str("Instance(<client>)"),
        }
    }
}

pub(crate) struct ApolloInner {
    host: Mutex<Option<Arc<dyn ReactiveHost>>>,
    provider: ApolloProvider,
    queries: DashMap<String, Arc<SmartQuery>>,
    subscriptions: DashMap<String, Arc<SmartSubscription>>,
    state: ApolloState,
    tracker: Arc<SubscriptionTracker>,
    client: ArcSwapOption<ClientSelector>,
    loading_key: ArcSwapOption<String>,
    error: Mutex<Option<ErrorHandler>>,
    watch_loading: Mutex<Option<WatchLoadingHandler>>,
    /// `$query` defaults applied by `add_smart_query`.
    query_defaults: Mutex<Option<OperationConfig>>,
    skip_queries: AtomicBool,
    skip_subscriptions: AtomicBool,
    /// Reactive-setter watches.
    watchers: Mutex<Vec<WatchHandle>>,
    destroyed: AtomicBool,
}

/// The `$apollo` object of one host. Cheap to clone.
#[derive(Clone)]
pub struct Apollo {
    inner: Arc<ApolloInner>,
}

impl Apollo {
    pub fn new(host: Arc<dyn ReactiveHost>, provider: ApolloProvider) -> Self {
        Self {
            inner: Arc::new(ApolloInner {
                host: Mutex::new(Some(host)),
                provider,
                queries: DashMap::new(),
                subscriptions: DashMap::new(),
                state: ApolloState::new(),
                tracker: Arc::new(SubscriptionTracker::default()),
                client: ArcSwapOption::empty(),
                loading_key: ArcSwapOption::empty(),
                error: Mutex::new(None),
                watch_loading: Mutex::new(None),
                query_defaults: Mutex::new(None),
                skip_queries: AtomicBool::new(false),
                skip_subscriptions: AtomicBool::new(false),
                watchers: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<ApolloInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<ApolloInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn state(&self) -> &ApolloState {
        &self.inner.state
    }

    pub fn provider(&self) -> &ApolloProvider {
        &self.inner.provider
    }

    /// The host, until the façade is destroyed.
    pub fn host(&self) -> Option<Arc<dyn ReactiveHost>> {
        lock(&self.inner.host).clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    fn live_host(&self) -> Result<Arc<dyn ReactiveHost>, CoreError> {
        if self.is_destroyed() {
            return Err(CoreError::Destroyed);
        }
        self.host().ok_or(CoreError::Destroyed)
    }

    // ── Client resolution ───────────────────────────────────────────

    /// Per-call override, else the component's client, else the
    /// provider's default client.
    pub fn get_client(&self, name: Option<&str>) -> Result<Arc<dyn ApolloClient>, CoreError> {
        let provider = &self.inner.provider;
        let named = |name: &str| {
            if !provider.has_clients() {
                return Err(CoreError::MissingClients);
            }
            provider.client(name).ok_or_else(|| CoreError::MissingClient {
                name: name.to_owned(),
            })
        };

        if let Some(name) = name {
            return named(name);
        }
        match self.inner.client.load_full().as_deref() {
            Some(ClientSelector::Instance(client)) => Ok(Arc::clone(client)),
            Some(ClientSelector::Named(name)) => named(name),
            None => provider.default_client().ok_or_else(|| CoreError::MissingClient {
                name: DEFAULT_CLIENT.to_owned(),
            }),
        }
    }

    pub fn set_client(&self, client: Option<ClientSelector>) {
        self.inner.client.store(client.map(Arc::new));
    }

    pub fn set_client_name(&self, name: impl Into<String>) {
        self.set_client(Some(ClientSelector::Named(name.into())));
    }

    pub fn loading_key(&self) -> Option<String> {
        self.inner.loading_key.load_full().map(|k| k.as_ref().clone())
    }

    pub fn set_loading_key(&self, key: Option<String>) {
        self.inner.loading_key.store(key.map(Arc::new));
    }

    /// Façade-level `error` handler.
    pub fn error_handler(&self) -> Option<ErrorHandler> {
        lock(&self.inner.error).clone()
    }

    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        *lock(&self.inner.error) = handler;
    }

    pub fn on_error(&self, f: impl Fn(&ApolloError) -> ChainControl + Send + Sync + 'static) {
        self.set_error_handler(Some(Arc::new(f)));
    }

    /// Façade-level `watchLoading` handler.
    pub fn watch_loading_handler(&self) -> Option<WatchLoadingHandler> {
        lock(&self.inner.watch_loading).clone()
    }

    pub fn set_watch_loading(&self, handler: Option<WatchLoadingHandler>) {
        *lock(&self.inner.watch_loading) = handler;
    }

    // ── Transport delegation ────────────────────────────────────────

    pub async fn query(&self, options: OperationOptions) -> Result<ApolloResult, CoreError> {
        let client = self.get_client(options.client.as_deref())?;
        Ok(client.query(options).await?)
    }

    pub async fn mutate(&self, options: MutationOptions) -> Result<ApolloResult, CoreError> {
        let client = self.get_client(options.client.as_deref())?;
        Ok(client.mutate(options).await?)
    }

    /// Watch a query; subscriptions to the handle are tracked for teardown.
    pub fn watch_query(
        &self,
        options: OperationOptions,
    ) -> Result<Arc<dyn ObservableQuery>, CoreError> {
        let client = self.get_client(options.client.as_deref())?;
        let observable = client.watch_query(options);
        Ok(Arc::new(TrackedQuery::new(
            observable,
            Arc::clone(&self.inner.tracker),
        )))
    }

    /// Open a subscription observable; `None` when rendering on the server.
    pub fn subscribe(
        &self,
        options: OperationOptions,
    ) -> Result<Option<Arc<dyn Observable>>, CoreError> {
        if self.host().is_some_and(|h| h.is_server()) {
            return Ok(None);
        }
        let client = self.get_client(options.client.as_deref())?;
        let observable = client.subscribe(options);
        Ok(Some(Arc::new(TrackedObservable::new(
            observable,
            Arc::clone(&self.inner.tracker),
        ))))
    }

    /// Open raw subscriptions created through `watch_query` / `subscribe`.
    pub fn tracked_subscription_count(&self) -> usize {
        self.inner.tracker.live_count()
    }

    // ── Smart operations ────────────────────────────────────────────

    /// Create and start a smart query bound to host field `key`.
    pub fn add_smart_query(
        &self,
        key: impl Into<String>,
        config: impl Into<OperationConfig>,
    ) -> Result<Arc<SmartQuery>, CoreError> {
        let key = key.into();
        let mut config = config.into();
        let host = self.live_host()?;

        let defaults = lock(&self.inner.query_defaults)
            .clone()
            .or_else(|| self.inner.provider.default_options().query_defaults.clone());
        if let Some(defaults) = defaults {
            config.fill_defaults(&defaults);
        }
        validate(OperationKind::Query, &key, &config)?;
        if let Some(name) = config.client.as_deref() {
            self.get_client(Some(name))?;
        }
        let server = host.is_server();
        if !server {
            match &config.subscribe_to_more {
                Some(SubscribeToMore::Many(subs)) => {
                    for (index, sub) in subs.iter().enumerate() {
                        validate(OperationKind::Subscription, &format!("{key}{index}"), sub)?;
                    }
                }
                Some(SubscribeToMore::Single(sub)) => {
                    validate(OperationKind::Subscription, &key, sub)?;
                }
                None => {}
            }
        }

        let query = SmartQuery::new(self, &host, &key, config.clone());
        if let Some(previous) = self.inner.queries.insert(key.clone(), Arc::clone(&query)) {
            previous.destroy();
        }
        debug!(key = %key, "smart query added");

        if self.inner.skip_queries.load(Ordering::SeqCst) {
            query.set_skip(true);
        } else if !server || config.prefetch != Some(false) {
            query.autostart();
        }

        if !server {
            match config.subscribe_to_more {
                Some(SubscribeToMore::Many(subs)) => {
                    for (index, sub) in subs.into_iter().enumerate() {
                        self.add_linked_subscription(format!("{key}{index}"), sub, &query)?;
                    }
                }
                Some(SubscribeToMore::Single(sub)) => {
                    self.add_linked_subscription(key, *sub, &query)?;
                }
                None => {}
            }
        }

        Ok(query)
    }

    /// Create and start a smart subscription. `None` on the server.
    pub fn add_smart_subscription(
        &self,
        key: impl Into<String>,
        config: OperationConfig,
    ) -> Result<Option<Arc<SmartSubscription>>, CoreError> {
        self.insert_subscription(key.into(), config, None)
    }

    fn add_linked_subscription(
        &self,
        key: String,
        config: OperationConfig,
        query: &Arc<SmartQuery>,
    ) -> Result<Option<Arc<SmartSubscription>>, CoreError> {
        self.insert_subscription(key, config, Some(query))
    }

    fn insert_subscription(
        &self,
        key: String,
        config: OperationConfig,
        linked: Option<&Arc<SmartQuery>>,
    ) -> Result<Option<Arc<SmartSubscription>>, CoreError> {
        let host = self.live_host()?;
        if host.is_server() {
            return Ok(None);
        }
        validate(OperationKind::Subscription, &key, &config)?;

        let subscription = SmartSubscription::new(self, &host, &key, config, linked);
        if let Some(previous) = self
            .inner
            .subscriptions
            .insert(key.clone(), Arc::clone(&subscription))
        {
            previous.destroy();
        }
        debug!(key = %key, linked = linked.is_some(), "smart subscription added");

        if self.inner.skip_subscriptions.load(Ordering::SeqCst) {
            subscription.set_skip(true);
        } else {
            subscription.autostart();
        }
        Ok(Some(subscription))
    }

    pub fn smart_query(&self, key: &str) -> Option<Arc<SmartQuery>> {
        self.inner.queries.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn smart_subscription(&self, key: &str) -> Option<Arc<SmartSubscription>> {
        self.inner.subscriptions.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn query_keys(&self) -> Vec<String> {
        self.inner.queries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn subscription_keys(&self) -> Vec<String> {
        self.inner.subscriptions.iter().map(|r| r.key().clone()).collect()
    }

    /// Destroy and forget one smart query.
    pub fn remove_smart_query(&self, key: &str) -> Result<(), CoreError> {
        let (_, query) = self.inner.queries.remove(key).ok_or_else(|| {
            CoreError::UnknownOperation {
                kind: OperationKind::Query.to_string(),
                key: key.to_owned(),
            }
        })?;
        query.destroy();
        Ok(())
    }

    pub fn remove_smart_subscription(&self, key: &str) -> Result<(), CoreError> {
        let (_, subscription) = self.inner.subscriptions.remove(key).ok_or_else(|| {
            CoreError::UnknownOperation {
                kind: OperationKind::Subscription.to_string(),
                key: key.to_owned(),
            }
        })?;
        subscription.destroy();
        Ok(())
    }

    // ── Skip switches ───────────────────────────────────────────────

    pub fn skip_all_queries(&self, skip: bool) {
        self.inner.skip_queries.store(skip, Ordering::SeqCst);
        let queries: Vec<Arc<SmartQuery>> =
            self.inner.queries.iter().map(|r| Arc::clone(r.value())).collect();
        for query in queries {
            query.set_skip(skip);
        }
    }

    pub fn skip_all_subscriptions(&self, skip: bool) {
        self.inner.skip_subscriptions.store(skip, Ordering::SeqCst);
        let subscriptions: Vec<Arc<SmartSubscription>> = self
            .inner
            .subscriptions
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        for subscription in subscriptions {
            subscription.set_skip(skip);
        }
    }

    pub fn skip_all(&self, skip: bool) {
        self.skip_all_queries(skip);
        self.skip_all_subscriptions(skip);
    }

    // ── Declarations ────────────────────────────────────────────────

    /// Apply a component's declaration: provider defaults beneath it,
    /// `$`-settings (watched when reactive), then every query and
    /// `$subscribe` entry.
    pub fn launch(&self, declaration: &ApolloDeclaration) -> Result<(), CoreError> {
        let host = self.live_host()?;
        let declaration = ApolloDeclaration::merge(self.inner.provider.default_options(), declaration);
        let deep = declaration.deep.unwrap_or(false);

        lock(&self.inner.query_defaults).clone_from(&declaration.query_defaults);
        if declaration.error.is_some() {
            self.set_error_handler(declaration.error.clone());
        }
        if declaration.watch_loading.is_some() {
            self.set_watch_loading(declaration.watch_loading.clone());
        }

        self.define_reactive_setter(&host, declaration.skip_all.as_ref(), deep, Self::skip_all);
        self.define_reactive_setter(
            &host,
            declaration.skip_all_queries.as_ref(),
            deep,
            Self::skip_all_queries,
        );
        self.define_reactive_setter(
            &host,
            declaration.skip_all_subscriptions.as_ref(),
            deep,
            Self::skip_all_subscriptions,
        );
        self.define_reactive_setter(&host, declaration.client.as_ref(), deep, |apollo, name| {
            apollo.set_client_name(name);
        });
        self.define_reactive_setter(&host, declaration.loading_key.as_ref(), deep, |apollo, key| {
            apollo.set_loading_key(Some(key));
        });

        for (key, config) in &declaration.queries {
            self.add_smart_query(key.clone(), config.clone())?;
        }
        for (key, config) in &declaration.subscriptions {
            self.add_smart_subscription(key.clone(), config.clone())?;
        }
        info!(
            queries = declaration.queries.len(),
            subscriptions = declaration.subscriptions.len(),
            "apollo launched"
        );
        Ok(())
    }

    /// Apply `value` now, and again whenever a reactive value changes.
    fn define_reactive_setter<T>(
        &self,
        host: &Arc<dyn ReactiveHost>,
        value: Option<&Dynamic<T>>,
        deep: bool,
        apply: fn(&Apollo, T),
    ) where
        T: Clone + Into<Value> + DeserializeOwned + Send + Sync + 'static,
    {
        match value {
            None => {}
            Some(Dynamic::Static(value)) => apply(self, value.clone()),
            Some(Dynamic::Reactive(f)) => {
                let f = Arc::clone(f);
                let getter: Getter = Arc::new(move |d: &HostData| f(d).into());
                let me = self.downgrade();
                let callback: WatchCallback = Arc::new(move |value: &Value, _old: Option<&Value>| {
                    let Some(apollo) = Apollo::upgrade(&me) else { return };
                    if let Ok(value) = serde_json::from_value::<T>(value.clone()) {
                        apply(&apollo, value);
                    }
                });
                let handle = host.watch(getter, callback, WatchOptions::immediate().deep(deep));
                if self.is_destroyed() {
                    handle.unwatch();
                } else {
                    lock(&self.inner.watchers).push(handle);
                }
            }
        }
    }

    // ── Reactive state ──────────────────────────────────────────────

    /// Unpacked data of every non-manual query.
    pub fn data(&self) -> HostData {
        self.inner.state.data_snapshot()
    }

    pub fn data_of(&self, key: &str) -> Option<Value> {
        self.inner.state.get(key)
    }

    pub fn data_stream(&self, key: &str) -> Option<FieldStream> {
        self.inner.state.data_stream(key)
    }

    /// Whether any query is loading.
    pub fn loading(&self) -> bool {
        self.loading_count() > 0
    }

    pub fn loading_count(&self) -> usize {
        self.inner.state.loading_count()
    }

    pub fn loading_stream(&self) -> FieldStream<usize> {
        self.inner.state.loading_stream()
    }

    pub fn query_loading(&self, key: &str) -> bool {
        self.inner.state.query_loading(key)
    }

    pub fn last_result_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.last_result_at()
    }

    /// Reactive-setter watches currently registered.
    pub fn watcher_count(&self) -> usize {
        lock(&self.inner.watchers).len()
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Release every watch, destroy every smart operation, close every
    /// tracked subscription and drop the host. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let watchers: Vec<WatchHandle> = lock(&self.inner.watchers).drain(..).collect();
        for watcher in watchers {
            watcher.unwatch();
        }

        let queries: Vec<Arc<SmartQuery>> =
            self.inner.queries.iter().map(|r| Arc::clone(r.value())).collect();
        self.inner.queries.clear();
        for query in queries {
            query.destroy();
        }

        let subscriptions: Vec<Arc<SmartSubscription>> = self
            .inner
            .subscriptions
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        self.inner.subscriptions.clear();
        for subscription in subscriptions {
            subscription.destroy();
        }

        self.inner.tracker.close_all();
        lock(&self.inner.host).take();
        debug!("apollo destroyed");
    }
}

impl fmt::Debug for Apollo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Apollo")
            .field("queries", &self.query_keys())
            .field("subscriptions", &self.subscription_keys())
            .field("loading", &self.loading_count())
            .field("client", &self.inner.client.load_full())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

fn validate(kind: OperationKind, key: &str, config: &OperationConfig) -> Result<(), CoreError> {
    if config.source().is_none() {
        return Err(CoreError::MissingDocument {
            kind: kind.to_string(),
            key: key.to_owned(),
        });
    }
    Ok(())
}
