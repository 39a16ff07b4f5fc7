// ── Smart subscription ──
//
// A live subscription declared under `$subscribe`, or linked to a smart
// query through `subscribeToMore` so its events patch the query's result.

use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::{debug, error};

use super::query::{SmartQuery, warn_unlinked};
use super::{OperationCore, SmartOperation};
use crate::apollo::Apollo;
use crate::config::{OperationConfig, OperationKind};
use crate::host::ReactiveHost;
use crate::transport::{ApolloResult, Observable, Observer, UpdateQueryArgs, UpdateQueryFn};
use crate::util::lock;

pub struct SmartSubscription {
    core: OperationCore,
    linked: Option<Weak<SmartQuery>>,
    /// Serialised variables of the running subscription.
    previous_variables: Mutex<Option<String>>,
    observable: Mutex<Option<Arc<dyn Observable>>>,
}

impl SmartSubscription {
    pub(crate) fn new(
        apollo: &Apollo,
        host: &Arc<dyn ReactiveHost>,
        key: &str,
        config: OperationConfig,
        linked: Option<&Arc<SmartQuery>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let me: Weak<dyn SmartOperation> = me.clone();
            Self {
                core: OperationCore::new(OperationKind::Subscription, key, host, apollo, me, config),
                linked: linked.map(Arc::downgrade),
                previous_variables: Mutex::new(None),
                observable: Mutex::new(None),
            }
        })
    }

    pub fn is_linked(&self) -> bool {
        self.linked.is_some()
    }

    pub fn has_active_subscription(&self) -> bool {
        self.core.has_active_subscription()
    }

    /// Register as a `subscribeToMore` extension of the linked query,
    /// running the `result` hook ahead of the user's `updateQuery`.
    fn subscribe_linked(&self, query: &SmartQuery, variables: Option<Value>) {
        let mut options = self.generate_options(variables);
        let hook = self.core.live().result.clone();
        if let Some(hook) = hook {
            let update = options.update_query.take();
            let composed: UpdateQueryFn = Arc::new(move |previous: &Value, args: &UpdateQueryArgs| {
                hook(&args.incoming);
                update.as_ref().and_then(|update| update(previous, args))
            });
            options.update_query = Some(composed);
        }

        let epoch = self.core.epoch();
        match query.subscribe_to_more(options) {
            Ok(sub) => self.core.install_sub(sub, epoch),
            Err(_) => warn_unlinked(query, self.core.key()),
        }
    }

    fn subscribe_standalone(&self, variables: Option<Value>) {
        let options = self.generate_options(variables);
        let Some(apollo) = self.core.apollo() else { return };
        let observable = match apollo.subscribe(options) {
            Ok(Some(observable)) => observable,
            Ok(None) => return,
            Err(err) => {
                error!(key = self.core.key(), error = %err, "cannot open subscription");
                return;
            }
        };
        *lock(&self.observable) = Some(Arc::clone(&observable));

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
}

impl SmartOperation for SmartSubscription {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn execute_apollo(&self, variables: Option<Value>) {
        if self.core.is_destroyed() {
            return;
        }
        let fingerprint = serde_json::to_string(&variables).ok();
        {
            let mut previous = lock(&self.previous_variables);
            if self.core.has_subscription() && *previous == fingerprint {
                debug!(key = self.core.key(), "variables unchanged; keeping subscription");
                return;
            }
            *previous = fingerprint;
        }
        if let Some(sub) = self.core.take_sub() {
            sub.unsubscribe();
        }

        match self.linked.as_ref() {
            Some(linked) => match linked.upgrade() {
                Some(query) => self.subscribe_linked(&query, variables),
                None => debug!(key = self.core.key(), "linked query is gone"),
            },
            None => self.subscribe_standalone(variables),
        }

        self.core.execution_done();
    }

    fn next_result(&self, result: ApolloResult) {
        if self.core.is_destroyed() {
            return;
        }
        let result = super::normalize_result(result);
        let hook = self.core.live().result.clone();
        if let Some(hook) = hook {
            hook(&result);
        }
        if let Some(apollo) = self.core.apollo() {
            apollo.state().touch();
        }
    }

    fn stop(&self) {
        super::stop(&self.core);
        lock(&self.observable).take();
    }
}

impl std::fmt::Debug for SmartSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartSubscription")
            .field("key", &self.core.key())
            .field("state", &self.core.state())
            .field("linked", &self.is_linked())
            .finish_non_exhaustive()
    }
}
