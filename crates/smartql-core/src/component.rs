// ── Component glue ──
//
// Ties one reactive host to a provider and a declaration. The façade is
// created on first use; `created` launches the declaration once and
// `destroyed` tears everything down.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::apollo::Apollo;
use crate::declaration::ApolloDeclaration;
use crate::error::CoreError;
use crate::host::ReactiveHost;
use crate::provider::ApolloProvider;

pub struct ApolloComponent {
    host: Arc<dyn ReactiveHost>,
    provider: Option<ApolloProvider>,
    declaration: ApolloDeclaration,
    apollo: OnceLock<Apollo>,
    launched: AtomicBool,
    destroyed: AtomicBool,
}

impl ApolloComponent {
    /// Component without a provider; inject one with [`Self::with_provider`].
    pub fn new(host: Arc<dyn ReactiveHost>) -> Self {
        Self {
            host,
            provider: None,
            declaration: ApolloDeclaration::default(),
            apollo: OnceLock::new(),
            launched: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn with_provider(mut self, provider: ApolloProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_declaration(mut self, declaration: ApolloDeclaration) -> Self {
        self.declaration = declaration;
        self
    }

    /// A component nested under this one, inheriting its provider.
    pub fn child(&self, host: Arc<dyn ReactiveHost>) -> Self {
        let child = Self::new(host);
        match &self.provider {
            Some(provider) => child.with_provider(provider.clone()),
            None => child,
        }
    }

    pub fn host(&self) -> &Arc<dyn ReactiveHost> {
        &self.host
    }

    pub fn provider(&self) -> Option<&ApolloProvider> {
        self.provider.as_ref()
    }

    pub fn declaration(&self) -> &ApolloDeclaration {
        &self.declaration
    }

    /// The component's façade, created on first access.
    pub fn apollo(&self) -> Result<&Apollo, CoreError> {
        if let Some(apollo) = self.apollo.get() {
            return Ok(apollo);
        }
        let provider = self.provider.as_ref().ok_or(CoreError::NoProvider)?;
        Ok(self
            .apollo
            .get_or_init(|| Apollo::new(Arc::clone(&self.host), provider.clone())))
    }

    /// Launch the declaration. Runs at most once; a component with an empty
    /// declaration only gets a façade when something asks for it.
    pub fn created(&self) -> Result<(), CoreError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CoreError::Destroyed);
        }
        if self.declaration.is_empty() || self.launched.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let apollo = match self.apollo() {
            Ok(apollo) => apollo,
            Err(err) => {
                self.launched.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        apollo.launch(&self.declaration)
    }

    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::SeqCst)
    }

    /// Tear down the façade if one was created. Idempotent.
    pub fn destroyed(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(apollo) = self.apollo.get() {
            apollo.destroy();
        }
        debug!("component destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ApolloComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApolloComponent")
            .field("provider", &self.provider.is_some())
            .field("launched", &self.is_launched())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}
