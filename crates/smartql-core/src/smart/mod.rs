// ── Smart operations ──
//
// Lifecycle engine shared by smart queries and smart subscriptions:
// watches the host for the operation's reactive inputs, (re)subscribes to
// the transport, dispatches results and errors, and tears everything down.
//
// Specialisations implement `SmartOperation` and override the provided
// methods where they need to; the shared behaviour lives in the free
// functions of this module so an override can run it as a first or last
// step.

mod query;
mod subscription;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use strum::Display;
use tracing::{debug, error};

use crate::apollo::{Apollo, ApolloInner};
use crate::config::{
    ChainControl, Dynamic, OperationConfig, OperationKind, call_handlers,
};
use crate::host::{Getter, HostData, ReactiveHost, WatchCallback, WatchHandle, WatchOptions};
use crate::timing::{self, Callback};
use crate::transport::{
    ApolloError, ApolloResult, Document, ErrorKind, FetchPolicy, OperationOptions, Subscription,
};
use crate::util::{is_truthy, lock};

pub use query::SmartQuery;
pub use subscription::SmartSubscription;

// ── Lifecycle ───────────────────────────────────────────────────────

/// `Uninitialized → Skipped ⇄ Active → Destroyed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    Skipped,
    Active,
    Destroyed,
}

// ── OperationCore ───────────────────────────────────────────────────

/// State shared by every smart operation.
pub struct OperationCore {
    kind: OperationKind,
    key: String,
    host: Weak<dyn ReactiveHost>,
    apollo: Weak<ApolloInner>,
    me: Weak<dyn SmartOperation>,
    /// Configuration as declared; reactive fields are re-derived from it.
    initial: OperationConfig,
    /// Working copy with reactive fields resolved.
    live: Mutex<OperationConfig>,
    state: Mutex<Lifecycle>,
    /// Dynamic-field and skip watches; released on destroy only.
    watchers: Mutex<Vec<WatchHandle>>,
    variables_watch: Mutex<Option<WatchHandle>>,
    limiters: Mutex<Vec<timing::RateLimited<Value>>>,
    sub: Mutex<Option<Arc<dyn Subscription>>>,
    /// Bumped by every stop; registrations racing a stop check it.
    epoch: AtomicU64,
    dynamic_bound: AtomicBool,
    starting: AtomicBool,
}

impl OperationCore {
    pub(crate) fn new(
        kind: OperationKind,
        key: impl Into<String>,
        host: &Arc<dyn ReactiveHost>,
        apollo: &Apollo,
        me: Weak<dyn SmartOperation>,
        config: OperationConfig,
    ) -> Self {
        let mut live = config.clone();
        if host.is_server() {
            live.fetch_policy = Some(FetchPolicy::CacheFirst);
        }
        Self {
            kind,
            key: key.into(),
            host: Arc::downgrade(host),
            apollo: apollo.downgrade(),
            me,
            initial: config,
            live: Mutex::new(live),
            state: Mutex::new(Lifecycle::Uninitialized),
            watchers: Mutex::new(Vec::new()),
            variables_watch: Mutex::new(None),
            limiters: Mutex::new(Vec::new()),
            sub: Mutex::new(None),
            epoch: AtomicU64::new(0),
            dynamic_bound: AtomicBool::new(false),
            starting: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> Lifecycle {
        *lock(&self.state)
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == Lifecycle::Destroyed
    }

    /// True between `start()` and the first execution.
    pub fn is_starting(&self) -> bool {
        self.starting.load(Ordering::SeqCst)
    }

    pub fn initial_config(&self) -> &OperationConfig {
        &self.initial
    }

    /// Lock the working configuration. Never hold across a callback.
    pub(crate) fn live(&self) -> MutexGuard<'_, OperationConfig> {
        lock(&self.live)
    }

    pub(crate) fn host(&self) -> Option<Arc<dyn ReactiveHost>> {
        self.host.upgrade()
    }

    pub(crate) fn apollo(&self) -> Option<Apollo> {
        Apollo::upgrade(&self.apollo)
    }

    pub(crate) fn me(&self) -> Weak<dyn SmartOperation> {
        Weak::clone(&self.me)
    }

    pub fn watcher_count(&self) -> usize {
        lock(&self.watchers).len() + usize::from(lock(&self.variables_watch).is_some())
    }

    pub fn has_active_subscription(&self) -> bool {
        lock(&self.sub).as_ref().is_some_and(|sub| !sub.closed())
    }

    pub(crate) fn has_subscription(&self) -> bool {
        lock(&self.sub).is_some()
    }

    pub(crate) fn take_sub(&self) -> Option<Arc<dyn Subscription>> {
        lock(&self.sub).take()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Store a freshly opened subscription unless the operation was
    /// stopped while it was being opened.
    pub(crate) fn install_sub(&self, sub: Arc<dyn Subscription>, epoch: u64) {
        if self.epoch() != epoch || self.is_destroyed() {
            sub.unsubscribe();
            return;
        }
        let previous = lock(&self.sub).replace(sub);
        if let Some(previous) = previous {
            previous.unsubscribe();
        }
    }

    fn push_watcher(&self, handle: WatchHandle) {
        if self.is_destroyed() {
            handle.unwatch();
            return;
        }
        lock(&self.watchers).push(handle);
    }

    fn store_variables_watch(&self, handle: WatchHandle, epoch: u64) {
        if self.epoch() != epoch || self.is_destroyed() {
            handle.unwatch();
            return;
        }
        let previous = lock(&self.variables_watch).replace(handle);
        if let Some(previous) = previous {
            previous.unwatch();
        }
    }

    pub(crate) fn execution_done(&self) {
        self.starting.store(false, Ordering::SeqCst);
    }

    /// Wrap the variables-driven execution path in throttle / debounce.
    fn rate_limit(&self, mut callback: Callback<Value>) -> Callback<Value> {
        let (throttle, debounce) = {
            let live = self.live();
            (live.throttle, live.debounce)
        };
        let mut limiters = lock(&self.limiters);
        if let Some(delay) = throttle {
            let limited = timing::throttle(move |v| callback(v), delay);
            limiters.push(limited.clone());
            callback = limited.into_callback();
        }
        if let Some(delay) = debounce {
            let limited = timing::debounce(move |v| callback(v), delay, false);
            limiters.push(limited.clone());
            callback = limited.into_callback();
        }
        callback
    }
}

// ── SmartOperation ──────────────────────────────────────────────────

/// A declared GraphQL operation bound to a reactive host.
pub trait SmartOperation: Send + Sync {
    fn core(&self) -> &OperationCore;

    /// Open (or update) the network subscription for `variables`.
    fn execute_apollo(&self, variables: Option<Value>);

    /// A result emitted by the transport.
    fn next_result(&self, result: ApolloResult);

    fn catch_error(&self, error: ApolloError) {
        catch_error(self, error);
    }

    fn start(&self) {
        start(self);
    }

    fn stop(&self) {
        stop(self.core());
    }

    fn destroy(&self) {
        destroy(self);
    }

    /// `stop()` then `start()`, unless skipped.
    fn refresh(&self) {
        if self.core().state() == Lifecycle::Active {
            debug!(kind = %self.core().kind(), key = self.core().key(), "refreshing");
            self.stop();
            self.start();
        }
    }

    fn set_skip(&self, skip: bool) {
        set_skip(self, skip);
    }

    fn autostart(&self) {
        autostart(self);
    }

    fn skipped(&self) -> bool {
        self.core().state() == Lifecycle::Skipped
    }

    fn key(&self) -> &str {
        self.core().key()
    }

    fn kind(&self) -> OperationKind {
        self.core().kind()
    }

    /// Transport options: the live configuration minus reserved keys,
    /// with `variables` injected.
    fn generate_options(&self, variables: Option<Value>) -> OperationOptions {
        generate_options(self.core(), variables)
    }
}

// ── Shared behaviour ────────────────────────────────────────────────

/// Resolve every reactive field of the declaration into the working copy,
/// registering the re-derivation watches the first time round.
fn bind_dynamic_fields<O: SmartOperation + ?Sized>(op: &O, host: &Arc<dyn ReactiveHost>) {
    let core = op.core();
    let data = host.snapshot();
    {
        let mut live = core.live();
        if let Some(query @ Dynamic::Reactive(_)) = &core.initial.query {
            live.query = Some(Dynamic::Static(query.resolve(&data)));
        }
        if let Some(document @ Dynamic::Reactive(_)) = &core.initial.document {
            live.document = Some(Dynamic::Static(document.resolve(&data)));
        }
        if let Some(context @ Dynamic::Reactive(_)) = &core.initial.context {
            live.context = Some(Dynamic::Static(context.resolve(&data)));
        }
    }

    if core.dynamic_bound.swap(true, Ordering::SeqCst) {
        return;
    }

    let deep = core.initial.is_deep();
    let watch_field = |getter: Getter, apply: fn(&mut OperationConfig, &Value)| {
        let me = core.me();
        let callback: WatchCallback = Arc::new(move |value: &Value, _old: Option<&Value>| {
            let Some(op) = me.upgrade() else { return };
            apply(&mut op.core().live(), value);
            op.refresh();
        });
        let handle = host.watch(getter, callback, WatchOptions::default().deep(deep));
        core.push_watcher(handle);
    };

    if let Some(Dynamic::Reactive(f)) = &core.initial.query {
        let f = Arc::clone(f);
        watch_field(Arc::new(move |d: &HostData| f(d).to_value()), |cfg, v| {
            cfg.query = Document::from_value(v).map(Dynamic::Static);
        });
    }
    if let Some(Dynamic::Reactive(f)) = &core.initial.document {
        let f = Arc::clone(f);
        watch_field(Arc::new(move |d: &HostData| f(d).to_value()), |cfg, v| {
            cfg.document = Document::from_value(v).map(Dynamic::Static);
        });
    }
    if let Some(Dynamic::Reactive(f)) = &core.initial.context {
        watch_field(Arc::clone(f), |cfg, v| {
            cfg.context = Some(Dynamic::Static(v.clone()));
        });
    }
}

/// Derive dynamic fields, then execute: through an immediate variables
/// watch when `variables` is reactive, otherwise once with the static
/// value.
pub fn start<O: SmartOperation + ?Sized>(op: &O) {
    let core = op.core();
    if core.is_destroyed() {
        return;
    }
    let Some(host) = core.host() else { return };

    core.starting.store(true, Ordering::SeqCst);
    debug!(kind = %core.kind(), key = core.key(), "starting");

    bind_dynamic_fields(op, &host);

    let previous = lock(&core.variables_watch).take();
    if let Some(previous) = previous {
        previous.unwatch();
    }

    let variables = core.live().variables.clone();
    match variables {
        Some(Dynamic::Reactive(getter)) => {
            let me = core.me();
            let execute: Callback<Value> = Arc::new(move |variables: Value| {
                if let Some(op) = me.upgrade() {
                    op.execute_apollo((!variables.is_null()).then_some(variables));
                }
            });
            let execute = core.rate_limit(execute);
            let callback: WatchCallback =
                Arc::new(move |value: &Value, _old: Option<&Value>| execute(value.clone()));

            let epoch = core.epoch();
            let options = WatchOptions::immediate().deep(core.initial.is_deep());
            let handle = host.watch(getter, callback, options);
            core.store_variables_watch(handle, epoch);
        }
        Some(Dynamic::Static(variables)) => op.execute_apollo(Some(variables)),
        None => op.execute_apollo(None),
    }
}

/// Release the variables watch, drop pending rate-limited executions and
/// close the network subscription. Dynamic-field watches persist.
pub fn stop(core: &OperationCore) {
    core.epoch.fetch_add(1, Ordering::SeqCst);

    let watch = lock(&core.variables_watch).take();
    if let Some(watch) = watch {
        watch.unwatch();
    }

    let limiters: Vec<_> = lock(&core.limiters).drain(..).collect();
    for limiter in limiters {
        limiter.cancel();
    }

    if let Some(sub) = core.take_sub() {
        sub.unsubscribe();
    }
    debug!(kind = %core.kind(), key = core.key(), "stopped");
}

/// Idempotent teardown.
pub fn destroy<O: SmartOperation + ?Sized>(op: &O) {
    let core = op.core();
    {
        let mut state = lock(&core.state);
        if *state == Lifecycle::Destroyed {
            return;
        }
        *state = Lifecycle::Destroyed;
    }

    op.stop();

    let watchers: Vec<WatchHandle> = lock(&core.watchers).drain(..).collect();
    for watcher in watchers {
        watcher.unwatch();
    }
    debug!(kind = %core.kind(), key = core.key(), "destroyed");
}

/// Skip setter: stops an active operation, starts an inactive one.
pub fn set_skip<O: SmartOperation + ?Sized>(op: &O, skip: bool) {
    let core = op.core();
    let action = {
        let mut state = lock(&core.state);
        match (*state, skip) {
            (Lifecycle::Active, true) => {
                *state = Lifecycle::Skipped;
                Some(false)
            }
            (Lifecycle::Uninitialized, true) => {
                *state = Lifecycle::Skipped;
                None
            }
            (Lifecycle::Uninitialized | Lifecycle::Skipped, false) => {
                *state = Lifecycle::Active;
                Some(true)
            }
            _ => None,
        }
    };

    match action {
        Some(true) => op.start(),
        Some(false) => {
            debug!(kind = %core.kind(), key = core.key(), "skipped");
            op.stop();
        }
        None => {}
    }
}

/// Start unless skipped; a reactive `skip` is watched with immediate
/// semantics and drives the skip setter.
pub fn autostart<O: SmartOperation + ?Sized>(op: &O) {
    let core = op.core();
    if core.state() != Lifecycle::Uninitialized {
        return;
    }

    match core.initial.skip.clone() {
        Some(Dynamic::Reactive(skip)) => {
            let Some(host) = core.host() else { return };
            let me = core.me();
            let getter: Getter = Arc::new(move |d: &HostData| Value::Bool(skip(d)));
            let callback: WatchCallback = Arc::new(move |value: &Value, old: Option<&Value>| {
                if Some(value) == old {
                    return;
                }
                if let Some(op) = me.upgrade() {
                    op.set_skip(is_truthy(value));
                }
            });
            let options = WatchOptions::immediate().deep(core.initial.is_deep());
            let handle = host.watch(getter, callback, options);
            core.push_watcher(handle);
        }
        Some(Dynamic::Static(true)) => op.set_skip(true),
        _ => op.set_skip(false),
    }
}

pub fn generate_options(core: &OperationCore, variables: Option<Value>) -> OperationOptions {
    let kind = core.kind();
    let live = core.live().clone();
    let data = core.host().map(|h| h.snapshot()).unwrap_or_default();

    OperationOptions {
        query: live.query.as_ref().map(|q| q.resolve(&data)),
        document: live.document.as_ref().map(|d| d.resolve(&data)),
        variables,
        context: live.context.as_ref().map(|c| c.resolve(&data)),
        fetch_policy: live.fetch_policy,
        poll_interval: live.poll_interval,
        notify_on_network_status_change: live.notify_on_network_status_change,
        client: live.client.clone(),
        update_query: match kind {
            OperationKind::Subscription => live.update_query.clone(),
            OperationKind::Query => None,
        },
        extra: live
            .extra
            .into_iter()
            .filter(|(k, _)| !kind.is_reserved(k))
            .collect(),
    }
}

/// Attach `gql_error` to a result's partial error.
pub fn normalize_result(mut result: ApolloResult) -> ApolloResult {
    if let Some(error) = result.error.as_mut() {
        error.add_gql_error();
    }
    result
}

/// Log the error, then offer it to the handler chain
/// (operation → façade → provider). Returns whether a handler was present.
pub fn catch_error<O: SmartOperation + ?Sized>(op: &O, mut error: ApolloError) -> bool {
    let core = op.core();
    if core.is_destroyed() {
        return false;
    }
    error.add_gql_error();
    log_error(core, &error);

    let operation = core.live().error.clone();
    let (facade, provider) = core
        .apollo()
        .map(|apollo| (apollo.error_handler(), apollo.provider().error_handler()))
        .unwrap_or_default();

    call_handlers(
        &[operation.as_deref(), facade.as_deref(), provider.as_deref()],
        |handler| handler(&error),
    )
}

fn log_error(core: &OperationCore, error: &ApolloError) {
    let kind = core.kind();
    let key = core.key();
    match error.kind() {
        ErrorKind::GraphQL => {
            error!(%kind, key, "GraphQL execution errors for {kind} '{key}'");
            for e in &error.graphql_errors {
                error!(%kind, key, path = ?e.path, "{}", e.message);
            }
        }
        ErrorKind::Network => {
            let network = error.network_error.as_deref().unwrap_or_default();
            error!(%kind, key, network_error = network, "Error sending the {kind} '{key}'");
        }
        ErrorKind::Unknown => {
            error!(%kind, key, error = %error, "An error has occurred for {kind} '{key}'");
        }
    }
}

/// Run the `watchLoading` chain (operation → façade → provider).
pub(crate) fn watch_loading(core: &OperationCore, is_loading: bool, modifier: i32) -> bool {
    let operation = core.live().watch_loading.clone();
    let (facade, provider) = core
        .apollo()
        .map(|apollo| (apollo.watch_loading_handler(), apollo.provider().watch_loading()))
        .unwrap_or_default();

    call_handlers(
        &[operation.as_deref(), facade.as_deref(), provider.as_deref()],
        |handler| -> ChainControl { handler(is_loading, modifier) },
    )
}
