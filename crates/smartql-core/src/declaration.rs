// ── Component declarations ──
//
// The `apollo` block a component declares: its smart queries, `$subscribe`
// subscriptions and the `$`-prefixed façade settings. Declarations coming
// from a parent definition (or the provider's defaults) are combined with
// `merge`, child winning per key.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::{ChainControl, Dynamic, ErrorHandler, OperationConfig, WatchLoadingHandler};
use crate::host::HostData;
use crate::transport::ApolloError;

/// Declarative Apollo block of a component.
#[derive(Clone, Default)]
pub struct ApolloDeclaration {
    /// Smart queries, keyed by the host field they bind.
    pub queries: IndexMap<String, OperationConfig>,
    /// `$subscribe`
    pub subscriptions: IndexMap<String, OperationConfig>,
    /// `$skipAll`
    pub skip_all: Option<Dynamic<bool>>,
    /// `$skipAllQueries`
    pub skip_all_queries: Option<Dynamic<bool>>,
    /// `$skipAllSubscriptions`
    pub skip_all_subscriptions: Option<Dynamic<bool>>,
    /// `$client`
    pub client: Option<Dynamic<String>>,
    /// `$loadingKey`
    pub loading_key: Option<Dynamic<String>>,
    /// `$error`
    pub error: Option<ErrorHandler>,
    /// `$watchLoading`
    pub watch_loading: Option<WatchLoadingHandler>,
    /// `$query`: defaults for every smart query of the component.
    pub query_defaults: Option<OperationConfig>,
    /// `$deep`: deep watching for the reactive setters.
    pub deep: Option<bool>,
}

impl ApolloDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, config: impl Into<OperationConfig>) -> Self {
        self.queries.insert(key.into(), config.into());
        self
    }

    pub fn subscribe(mut self, key: impl Into<String>, config: OperationConfig) -> Self {
        self.subscriptions.insert(key.into(), config);
        self
    }

    pub fn skip_all(mut self, skip: bool) -> Self {
        self.skip_all = Some(Dynamic::Static(skip));
        self
    }

    pub fn skip_all_fn(mut self, f: impl Fn(&HostData) -> bool + Send + Sync + 'static) -> Self {
        self.skip_all = Some(Dynamic::reactive(f));
        self
    }

    pub fn skip_all_queries(mut self, skip: bool) -> Self {
        self.skip_all_queries = Some(Dynamic::Static(skip));
        self
    }

    pub fn skip_all_subscriptions(mut self, skip: bool) -> Self {
        self.skip_all_subscriptions = Some(Dynamic::Static(skip));
        self
    }

    pub fn client(mut self, name: impl Into<String>) -> Self {
        self.client = Some(Dynamic::Static(name.into()));
        self
    }

    pub fn client_fn(mut self, f: impl Fn(&HostData) -> String + Send + Sync + 'static) -> Self {
        self.client = Some(Dynamic::reactive(f));
        self
    }

    pub fn loading_key(mut self, key: impl Into<String>) -> Self {
        self.loading_key = Some(Dynamic::Static(key.into()));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&ApolloError) -> ChainControl + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    pub fn watch_loading(
        mut self,
        f: impl Fn(bool, i32) -> ChainControl + Send + Sync + 'static,
    ) -> Self {
        self.watch_loading = Some(Arc::new(f));
        self
    }

    pub fn query_defaults(mut self, defaults: OperationConfig) -> Self {
        self.query_defaults = Some(defaults);
        self
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = Some(deep);
        self
    }

    /// Combine a parent declaration with this one.
    ///
    /// Scalar settings: the child's value wins when set. Query and
    /// `$subscribe` maps merge key by key (child entries replace parent
    /// entries of the same key, parent order first). `$query` defaults
    /// merge field by field.
    #[must_use]
    pub fn merge(parent: &Self, child: &Self) -> Self {
        let mut queries = parent.queries.clone();
        for (key, config) in &child.queries {
            queries.insert(key.clone(), config.clone());
        }
        let mut subscriptions = parent.subscriptions.clone();
        for (key, config) in &child.subscriptions {
            subscriptions.insert(key.clone(), config.clone());
        }

        let query_defaults = match (&parent.query_defaults, &child.query_defaults) {
            (Some(parent), Some(child)) => {
                let mut merged = child.clone();
                merged.fill_defaults(parent);
                Some(merged)
            }
            (parent, child) => child.clone().or_else(|| parent.clone()),
        };

        Self {
            queries,
            subscriptions,
            skip_all: child.skip_all.clone().or_else(|| parent.skip_all.clone()),
            skip_all_queries: child
                .skip_all_queries
                .clone()
                .or_else(|| parent.skip_all_queries.clone()),
            skip_all_subscriptions: child
                .skip_all_subscriptions
                .clone()
                .or_else(|| parent.skip_all_subscriptions.clone()),
            client: child.client.clone().or_else(|| parent.client.clone()),
            loading_key: child.loading_key.clone().or_else(|| parent.loading_key.clone()),
            error: child.error.clone().or_else(|| parent.error.clone()),
            watch_loading: child
                .watch_loading
                .clone()
                .or_else(|| parent.watch_loading.clone()),
            query_defaults,
            deep: child.deep.or(parent.deep),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
            && self.subscriptions.is_empty()
            && self.skip_all.is_none()
            && self.skip_all_queries.is_none()
            && self.skip_all_subscriptions.is_none()
            && self.client.is_none()
            && self.loading_key.is_none()
            && self.error.is_none()
            && self.watch_loading.is_none()
            && self.query_defaults.is_none()
    }
}

impl fmt::Debug for ApolloDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApolloDeclaration")
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .field("subscriptions", &self.subscriptions.keys().collect::<Vec<_>>())
            .field("skip_all", &self.skip_all)
            .field("skip_all_queries", &self.skip_all_queries)
            .field("skip_all_subscriptions", &self.skip_all_subscriptions)
            .field("client", &self.client)
            .field("loading_key", &self.loading_key)
            .field("error", &self.error.as_ref().map(|_| "<fn>"))
            .field("watch_loading", &self.watch_loading.as_ref().map(|_| "<fn>"))
            .field("query_defaults", &self.query_defaults)
            .field("deep", &self.deep)
            .finish()
    }
}
