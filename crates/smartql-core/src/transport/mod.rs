// ── Transport contract ──
//
// The GraphQL client is an external collaborator. The binding layer only
// needs the handful of calls below; everything about caching, retries and
// the wire protocol belongs to the implementation behind these traits.
//
// Contract notes for implementors:
// - `Observable::subscribe` may deliver results synchronously.
// - An error delivered to an observer closes that subscription
//   (`closed()` becomes true).
// - Results arriving after `unsubscribe()` must not reach the observer.

mod options;
mod result;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::util::lock;

pub use options::{
    Document, FetchMoreOptions, FetchPolicy, MutationOptions, OperationOptions, UpdateQueryArgs,
    UpdateQueryFn,
};
pub use result::{ApolloError, ApolloResult, ErrorKind, GraphQLError};

/// Future returned by promise-style transport calls.
pub type ApolloFuture = BoxFuture<'static, Result<ApolloResult, ApolloError>>;

/// Tear-down closure returned by `subscribe_to_more`.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

pub type NextFn = Arc<dyn Fn(ApolloResult) + Send + Sync>;
pub type ErrorFn = Arc<dyn Fn(ApolloError) + Send + Sync>;

/// `{ next, error }` pair handed to [`Observable::subscribe`].
#[derive(Clone)]
pub struct Observer {
    pub next: NextFn,
    pub error: ErrorFn,
}

impl Observer {
    pub fn new(
        next: impl Fn(ApolloResult) + Send + Sync + 'static,
        error: impl Fn(ApolloError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            next: Arc::new(next),
            error: Arc::new(error),
        }
    }
}

/// A live subscription to an observable's result stream.
pub trait Subscription: Send + Sync {
    fn unsubscribe(&self);
    fn closed(&self) -> bool;
}

pub trait Observable: Send + Sync {
    fn subscribe(&self, observer: Observer) -> Arc<dyn Subscription>;
}

/// Long-lived query watch handle (Apollo's `ObservableQuery`).
pub trait ObservableQuery: Observable {
    fn current_result(&self) -> ApolloResult;
    fn refetch(&self, variables: Option<Value>) -> ApolloFuture;
    fn set_variables(&self, variables: Option<Value>, try_fetch: bool) -> ApolloFuture;
    /// Results of the option change arrive on the result stream.
    fn set_options(&self, options: OperationOptions);
    fn fetch_more(&self, options: FetchMoreOptions) -> ApolloFuture;
    fn start_polling(&self, interval: Duration);
    fn stop_polling(&self);
    fn subscribe_to_more(&self, options: OperationOptions) -> Unsubscribe;
    fn last_result(&self) -> Option<ApolloResult>;
    fn last_error(&self) -> Option<ApolloError>;
    fn reset_last_results(&self);
    fn restore_last_results(&self, result: Option<ApolloResult>, error: Option<ApolloError>);
}

/// The GraphQL client.
pub trait ApolloClient: Send + Sync {
    fn watch_query(&self, options: OperationOptions) -> Arc<dyn ObservableQuery>;
    fn subscribe(&self, options: OperationOptions) -> Arc<dyn Observable>;
    fn query(&self, options: OperationOptions) -> ApolloFuture;
    fn mutate(&self, options: MutationOptions) -> ApolloFuture;
}

// ── CallbackSubscription ────────────────────────────────────────────

/// Adapts an [`Unsubscribe`] closure to the [`Subscription`] trait.
pub struct CallbackSubscription {
    teardown: Mutex<Option<Unsubscribe>>,
    closed: AtomicBool,
}

impl CallbackSubscription {
    pub fn new(teardown: Unsubscribe) -> Self {
        Self {
            teardown: Mutex::new(Some(teardown)),
            closed: AtomicBool::new(false),
        }
    }
}

impl Subscription for CallbackSubscription {
    fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let teardown = lock(&self.teardown).take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
