// ── Operation configuration ──
//
// Typed form of a declared smart query or subscription. Fields that may be
// derived from host state are `Dynamic<T>`; reserved keys never reach the
// transport, everything in `extra` is passed through untouched.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::host::HostData;
use crate::transport::{
    ApolloError, ApolloResult, Document, FetchPolicy, UpdateQueryArgs, UpdateQueryFn,
};

// ── Dynamic values ──────────────────────────────────────────────────

/// Function of the host's reactive data.
pub type HostFn<T> = Arc<dyn Fn(&HostData) -> T + Send + Sync>;

/// A configuration value that is either fixed or derived from host state
/// (and then re-derived whenever that state changes).
pub enum Dynamic<T> {
    Static(T),
    Reactive(HostFn<T>),
}

impl<T> Dynamic<T> {
    pub fn reactive(f: impl Fn(&HostData) -> T + Send + Sync + 'static) -> Self {
        Self::Reactive(Arc::new(f))
    }

    pub fn is_reactive(&self) -> bool {
        matches!(self, Self::Reactive(_))
    }
}

impl<T: Clone> Dynamic<T> {
    /// Evaluate against `data`.
    pub fn resolve(&self, data: &HostData) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Reactive(f) => f(data),
        }
    }
}

impl<T: Clone> Clone for Dynamic<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(value) => Self::Static(value.clone()),
            Self::Reactive(f) => Self::Reactive(Arc::clone(f)),
        }
    }
}

impl<T> From<T> for Dynamic<T> {
    fn from(value: T) -> Self {
        Self::Static(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Dynamic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Reactive(_) => f.write_str("Reactive(<fn>)"),
        }
    }
}

// ── Handler chains ──────────────────────────────────────────────────

/// Returned by error and loading handlers. `Stop` ends the chain before
/// the façade- and provider-level handlers run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChainControl {
    #[default]
    Continue,
    Stop,
}

/// `update`: maps raw result data to the value bound on the host.
pub type UpdateFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// `result` hook: receives every normalised result or event.
pub type ResultHook = Arc<dyn Fn(&ApolloResult) + Send + Sync>;

pub type ErrorHandler = Arc<dyn Fn(&ApolloError) -> ChainControl + Send + Sync>;

/// `watchLoading(is_loading, count_modifier)`.
pub type WatchLoadingHandler = Arc<dyn Fn(bool, i32) -> ChainControl + Send + Sync>;

/// Run `handlers` in order. Returns whether any handler was present.
pub(crate) fn call_handlers<F, C>(handlers: &[Option<&F>], mut call: C) -> bool
where
    F: ?Sized,
    C: FnMut(&F) -> ChainControl,
{
    let mut caught = false;
    for handler in handlers.iter().flatten().copied() {
        caught = true;
        if call(handler) == ChainControl::Stop {
            break;
        }
    }
    caught
}

// ── Operation kind ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Query,
    Subscription,
}

const QUERY_RESERVED: &[&str] = &[
    "variables",
    "watch",
    "update",
    "result",
    "error",
    "loadingKey",
    "watchLoading",
    "skip",
    "throttle",
    "debounce",
    "subscribeToMore",
    "prefetch",
    "manual",
];

const SUBSCRIPTION_RESERVED: &[&str] = &[
    "variables",
    "result",
    "error",
    "throttle",
    "debounce",
    "linkedQuery",
];

impl OperationKind {
    /// Option keys interpreted by the binding layer for this kind.
    pub fn reserved_keys(self) -> &'static [&'static str] {
        match self {
            Self::Query => QUERY_RESERVED,
            Self::Subscription => SUBSCRIPTION_RESERVED,
        }
    }

    pub fn is_reserved(self, key: &str) -> bool {
        self.reserved_keys().contains(&key)
    }
}

// ── subscribeToMore ─────────────────────────────────────────────────

/// Subscriptions linked to a query, declared on the query itself.
#[derive(Clone, Debug)]
pub enum SubscribeToMore {
    /// Registered under the query's own key.
    Single(Box<OperationConfig>),
    /// Registered as `<query key><index>`.
    Many(Vec<OperationConfig>),
}

// ── OperationConfig ─────────────────────────────────────────────────

/// A declared smart query or subscription.
///
/// Every field is optional so `$query` defaults can fill the gaps
/// ([`OperationConfig::fill_defaults`]).
#[derive(Clone, Default)]
pub struct OperationConfig {
    pub query: Option<Dynamic<Document>>,
    pub document: Option<Dynamic<Document>>,
    pub variables: Option<Dynamic<Value>>,
    pub context: Option<Dynamic<Value>>,
    pub fetch_policy: Option<FetchPolicy>,
    pub poll_interval: Option<Duration>,
    pub notify_on_network_status_change: Option<bool>,
    pub skip: Option<Dynamic<bool>>,
    pub throttle: Option<Duration>,
    pub debounce: Option<Duration>,
    /// Suppress binding the result onto the host.
    pub manual: Option<bool>,
    pub update: Option<UpdateFn>,
    pub update_query: Option<UpdateQueryFn>,
    pub result: Option<ResultHook>,
    pub error: Option<ErrorHandler>,
    pub loading_key: Option<String>,
    pub watch_loading: Option<WatchLoadingHandler>,
    pub subscribe_to_more: Option<SubscribeToMore>,
    pub deep: Option<bool>,
    /// Named client override.
    pub client: Option<String>,
    /// Server-side: `Some(false)` creates the query without starting it.
    pub prefetch: Option<bool>,
    pub extra: Map<String, Value>,
}

impl OperationConfig {
    pub fn new(query: impl Into<Document>) -> Self {
        Self {
            query: Some(Dynamic::Static(query.into())),
            ..Self::default()
        }
    }

    pub fn query(mut self, query: impl Into<Document>) -> Self {
        self.query = Some(Dynamic::Static(query.into()));
        self
    }

    pub fn query_fn(mut self, f: impl Fn(&HostData) -> Document + Send + Sync + 'static) -> Self {
        self.query = Some(Dynamic::reactive(f));
        self
    }

    pub fn document(mut self, document: impl Into<Document>) -> Self {
        self.document = Some(Dynamic::Static(document.into()));
        self
    }

    pub fn document_fn(
        mut self,
        f: impl Fn(&HostData) -> Document + Send + Sync + 'static,
    ) -> Self {
        self.document = Some(Dynamic::reactive(f));
        self
    }

    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = Some(Dynamic::Static(variables));
        self
    }

    pub fn variables_fn(mut self, f: impl Fn(&HostData) -> Value + Send + Sync + 'static) -> Self {
        self.variables = Some(Dynamic::reactive(f));
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(Dynamic::Static(context));
        self
    }

    pub fn context_fn(mut self, f: impl Fn(&HostData) -> Value + Send + Sync + 'static) -> Self {
        self.context = Some(Dynamic::reactive(f));
        self
    }

    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = Some(policy);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn notify_on_network_status_change(mut self, notify: bool) -> Self {
        self.notify_on_network_status_change = Some(notify);
        self
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = Some(Dynamic::Static(skip));
        self
    }

    pub fn skip_fn(mut self, f: impl Fn(&HostData) -> bool + Send + Sync + 'static) -> Self {
        self.skip = Some(Dynamic::reactive(f));
        self
    }

    pub fn throttle(mut self, delay: Duration) -> Self {
        self.throttle = Some(delay);
        self
    }

    pub fn debounce(mut self, delay: Duration) -> Self {
        self.debounce = Some(delay);
        self
    }

    pub fn manual(mut self, manual: bool) -> Self {
        self.manual = Some(manual);
        self
    }

    pub fn update(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.update = Some(Arc::new(f));
        self
    }

    pub fn update_query(
        mut self,
        f: impl Fn(&Value, &UpdateQueryArgs) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.update_query = Some(Arc::new(f));
        self
    }

    pub fn on_result(mut self, f: impl Fn(&ApolloResult) + Send + Sync + 'static) -> Self {
        self.result = Some(Arc::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&ApolloError) -> ChainControl + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    pub fn loading_key(mut self, key: impl Into<String>) -> Self {
        self.loading_key = Some(key.into());
        self
    }

    pub fn watch_loading(
        mut self,
        f: impl Fn(bool, i32) -> ChainControl + Send + Sync + 'static,
    ) -> Self {
        self.watch_loading = Some(Arc::new(f));
        self
    }

    pub fn subscribe_to_more(mut self, sub: OperationConfig) -> Self {
        self.subscribe_to_more = Some(SubscribeToMore::Single(Box::new(sub)));
        self
    }

    pub fn subscribe_to_more_all(mut self, subs: Vec<OperationConfig>) -> Self {
        self.subscribe_to_more = Some(SubscribeToMore::Many(subs));
        self
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = Some(deep);
        self
    }

    pub fn client(mut self, name: impl Into<String>) -> Self {
        self.client = Some(name.into());
        self
    }

    pub fn prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    /// Pass-through transport option.
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_manual(&self) -> bool {
        self.manual.unwrap_or(false)
    }

    pub fn is_deep(&self) -> bool {
        self.deep.unwrap_or(false)
    }

    /// `query` falling back to `document`.
    pub fn source(&self) -> Option<&Dynamic<Document>> {
        self.query.as_ref().or(self.document.as_ref())
    }

    /// Take every field left unset from `defaults`.
    pub fn fill_defaults(&mut self, defaults: &OperationConfig) {
        macro_rules! fill {
            ($($field:ident),* $(,)?) => {
                $(
                    if self.$field.is_none() {
                        self.$field.clone_from(&defaults.$field);
                    }
                )*
            };
        }
        fill!(
            query,
            document,
            variables,
            context,
            fetch_policy,
            poll_interval,
            notify_on_network_status_change,
            skip,
            throttle,
            debounce,
            manual,
            update,
            update_query,
            result,
            error,
            loading_key,
            watch_loading,
            subscribe_to_more,
            deep,
            client,
            prefetch,
        );
        for (key, value) in &defaults.extra {
            if !self.extra.contains_key(key) {
                self.extra.insert(key.clone(), value.clone());
            }
        }
    }
}

/// A bare document is shorthand for `{ query: document }`.
impl From<Document> for OperationConfig {
    fn from(document: Document) -> Self {
        Self::new(document)
    }
}

impl From<&str> for OperationConfig {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl fmt::Debug for OperationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hook = |present: bool| if present { "<fn>" } else { "-" };
        f.debug_struct("OperationConfig")
            .field("query", &self.query)
            .field("document", &self.document)
            .field("variables", &self.variables)
            .field("context", &self.context)
            .field("fetch_policy", &self.fetch_policy)
            .field("poll_interval", &self.poll_interval)
            .field("skip", &self.skip)
            .field("throttle", &self.throttle)
            .field("debounce", &self.debounce)
            .field("manual", &self.manual)
            .field("update", &hook(self.update.is_some()))
            .field("update_query", &hook(self.update_query.is_some()))
            .field("result", &hook(self.result.is_some()))
            .field("error", &hook(self.error.is_some()))
            .field("loading_key", &self.loading_key)
            .field("watch_loading", &hook(self.watch_loading.is_some()))
            .field("subscribe_to_more", &self.subscribe_to_more)
            .field("client", &self.client)
            .field("prefetch", &self.prefetch)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}
