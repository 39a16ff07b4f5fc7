// ── Apollo provider ──
//
// Application-wide holder of the GraphQL clients, the default component
// declaration and the last-resort error / loading handlers. Injected into
// components explicitly; shared by cloning.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::{ChainControl, ErrorHandler, WatchLoadingHandler};
use crate::declaration::ApolloDeclaration;
use crate::transport::{ApolloClient, ApolloError};

/// Name under which the default client is also registered.
pub const DEFAULT_CLIENT: &str = "defaultClient";

struct ProviderInner {
    default_client: Option<Arc<dyn ApolloClient>>,
    clients: IndexMap<String, Arc<dyn ApolloClient>>,
    default_options: ApolloDeclaration,
    error_handler: Option<ErrorHandler>,
    watch_loading: Option<WatchLoadingHandler>,
}

#[derive(Clone)]
pub struct ApolloProvider {
    inner: Arc<ProviderInner>,
}

impl ApolloProvider {
    /// Provider with a single default client.
    pub fn new(default_client: Arc<dyn ApolloClient>) -> Self {
        Self::builder().default_client(default_client).build()
    }

    pub fn builder() -> ApolloProviderBuilder {
        ApolloProviderBuilder::default()
    }

    pub fn default_client(&self) -> Option<Arc<dyn ApolloClient>> {
        self.inner.default_client.clone()
    }

    pub fn client(&self, name: &str) -> Option<Arc<dyn ApolloClient>> {
        self.inner.clients.get(name).cloned()
    }

    pub fn has_clients(&self) -> bool {
        !self.inner.clients.is_empty()
    }

    pub fn client_names(&self) -> impl Iterator<Item = &str> {
        self.inner.clients.keys().map(String::as_str)
    }

    /// Declaration merged beneath every component's own.
    pub fn default_options(&self) -> &ApolloDeclaration {
        &self.inner.default_options
    }

    pub fn error_handler(&self) -> Option<ErrorHandler> {
        self.inner.error_handler.clone()
    }

    pub fn watch_loading(&self) -> Option<WatchLoadingHandler> {
        self.inner.watch_loading.clone()
    }
}

impl fmt::Debug for ApolloProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApolloProvider")
            .field("default_client", &self.inner.default_client.is_some())
            .field("clients", &self.client_names().collect::<Vec<_>>())
            .field("default_options", &self.inner.default_options)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ApolloProviderBuilder {
    default_client: Option<Arc<dyn ApolloClient>>,
    clients: IndexMap<String, Arc<dyn ApolloClient>>,
    default_options: ApolloDeclaration,
    error_handler: Option<ErrorHandler>,
    watch_loading: Option<WatchLoadingHandler>,
}

impl ApolloProviderBuilder {
    pub fn default_client(mut self, client: Arc<dyn ApolloClient>) -> Self {
        self.default_client = Some(client);
        self
    }

    pub fn client(mut self, name: impl Into<String>, client: Arc<dyn ApolloClient>) -> Self {
        self.clients.insert(name.into(), client);
        self
    }

    pub fn default_options(mut self, declaration: ApolloDeclaration) -> Self {
        self.default_options = declaration;
        self
    }

    pub fn error_handler(
        mut self,
        f: impl Fn(&ApolloError) -> ChainControl + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(f));
        self
    }

    pub fn watch_loading(
        mut self,
        f: impl Fn(bool, i32) -> ChainControl + Send + Sync + 'static,
    ) -> Self {
        self.watch_loading = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> ApolloProvider {
        let mut clients = self.clients;
        if let Some(default) = &self.default_client {
            clients.insert(DEFAULT_CLIENT.to_owned(), Arc::clone(default));
        }
        ApolloProvider {
            inner: Arc::new(ProviderInner {
                default_client: self.default_client,
                clients,
                default_options: self.default_options,
                error_handler: self.error_handler,
                watch_loading: self.watch_loading,
            }),
        }
    }
}
