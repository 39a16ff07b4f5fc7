#![allow(clippy::unwrap_used, dead_code)]
// In-memory transport double shared by the integration tests.
//
// Every watch handle and subscription observable the client hands out is
// recorded so tests can push results and errors into it and count the
// network subscriptions that remain open.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};

use smartql_core::host::HostData;
use smartql_core::transport::{
    ApolloFuture, FetchMoreOptions, MutationOptions, Unsubscribe, UpdateQueryArgs,
};
use smartql_core::{
    Apollo, ApolloClient, ApolloError, ApolloProvider, ApolloResult, Observable,
    ObservableQuery, Observer, OperationOptions, ReactiveHost, Scope, Subscription,
};

// ── Subscription ────────────────────────────────────────────────────

pub struct MockSubscription {
    closed: Arc<AtomicBool>,
}

impl Subscription for MockSubscription {
    fn unsubscribe(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ── Observable ──────────────────────────────────────────────────────

/// Fan-out of observers with per-subscription closed flags.
#[derive(Default)]
pub struct MockObservable {
    pub options: OperationOptions,
    observers: Mutex<Vec<(Arc<AtomicBool>, Observer)>>,
    subscribe_calls: AtomicUsize,
}

impl MockObservable {
    pub fn new(options: OperationOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    fn open(&self) -> Vec<Observer> {
        self.observers
            .lock()
            .unwrap()
            .iter()
            .filter(|(closed, _)| !closed.load(Ordering::SeqCst))
            .map(|(_, observer)| observer.clone())
            .collect()
    }

    /// Deliver `result` to every open observer.
    pub fn emit(&self, result: &ApolloResult) {
        for observer in self.open() {
            (observer.next)(result.clone());
        }
    }

    /// Deliver `error` and close every open subscription, as Apollo does.
    pub fn fail(&self, error: &ApolloError) {
        let open = self.open();
        for (closed, _) in self.observers.lock().unwrap().iter() {
            closed.store(true, Ordering::SeqCst);
        }
        for observer in open {
            (observer.error)(error.clone());
        }
    }

    pub fn live_count(&self) -> usize {
        self.open().len()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

impl Observable for MockObservable {
    fn subscribe(&self, observer: Observer) -> Arc<dyn Subscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let closed = Arc::new(AtomicBool::new(false));
        self.observers
            .lock()
            .unwrap()
            .push((Arc::clone(&closed), observer));
        Arc::new(MockSubscription { closed })
    }
}

// ── Watch handle ────────────────────────────────────────────────────

pub struct MoreEntry {
    pub options: OperationOptions,
    pub closed: Arc<AtomicBool>,
}

pub struct MockQuery {
    pub stream: MockObservable,
    current: Mutex<ApolloResult>,
    last_result: Mutex<Option<ApolloResult>>,
    last_error: Mutex<Option<ApolloError>>,
    set_options_calls: Mutex<Vec<OperationOptions>>,
    polling: Mutex<Option<Duration>>,
    more: Mutex<Vec<MoreEntry>>,
    refetch_calls: AtomicUsize,
}

impl MockQuery {
    fn new(options: OperationOptions) -> Self {
        Self {
            stream: MockObservable::new(options),
            current: Mutex::new(ApolloResult::loading()),
            last_result: Mutex::new(None),
            last_error: Mutex::new(None),
            set_options_calls: Mutex::new(Vec::new()),
            polling: Mutex::new(None),
            more: Mutex::new(Vec::new()),
            refetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn options(&self) -> &OperationOptions {
        &self.stream.options
    }

    /// Complete the request with `data` and notify observers.
    pub fn respond(&self, data: Value) {
        let result = ApolloResult::data(data);
        *self.current.lock().unwrap() = result.clone();
        *self.last_result.lock().unwrap() = Some(result.clone());
        self.stream.emit(&result);
    }

    pub fn fail(&self, error: &ApolloError) {
        *self.current.lock().unwrap() = ApolloResult::default();
        *self.last_error.lock().unwrap() = Some(error.clone());
        self.stream.fail(error);
    }

    /// Push a `subscribeToMore` event through entry `index`, merging it
    /// into the current data the way the cache would.
    pub fn push_more(&self, index: usize, event: Value) {
        let (update, variables) = {
            let more = self.more.lock().unwrap();
            let entry = &more[index];
            if entry.closed.load(Ordering::SeqCst) {
                return;
            }
            (entry.options.update_query.clone(), entry.options.variables.clone())
        };
        let Some(update) = update else { return };
        let previous = self.current.lock().unwrap().data.clone().unwrap_or(Value::Null);
        let args = UpdateQueryArgs {
            incoming: ApolloResult::data(event),
            variables,
        };
        if let Some(next) = update(&previous, &args) {
            self.respond(next);
        }
    }

    pub fn live_more(&self) -> usize {
        self.more
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| !entry.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn set_options_calls(&self) -> Vec<OperationOptions> {
        self.set_options_calls.lock().unwrap().clone()
    }

    pub fn polling(&self) -> Option<Duration> {
        *self.polling.lock().unwrap()
    }

    pub fn refetch_calls(&self) -> usize {
        self.refetch_calls.load(Ordering::SeqCst)
    }

    /// Variables of the latest `set_options`, else of `watch_query`.
    pub fn variables(&self) -> Option<Value> {
        self.set_options_calls
            .lock()
            .unwrap()
            .last()
            .map_or_else(|| self.options().variables.clone(), |o| o.variables.clone())
    }
}

impl Observable for MockQuery {
    fn subscribe(&self, observer: Observer) -> Arc<dyn Subscription> {
        self.stream.subscribe(observer)
    }
}

impl ObservableQuery for MockQuery {
    fn current_result(&self) -> ApolloResult {
        self.current.lock().unwrap().clone()
    }

    fn refetch(&self, _variables: Option<Value>) -> ApolloFuture {
        self.refetch_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.current_result().with_loading(false);
        Box::pin(async move { Ok(result) })
    }

    fn set_variables(&self, variables: Option<Value>, _try_fetch: bool) -> ApolloFuture {
        let mut options = self.options().clone();
        options.variables = variables;
        self.set_options_calls.lock().unwrap().push(options);
        let result = self.current_result();
        Box::pin(async move { Ok(result) })
    }

    fn set_options(&self, options: OperationOptions) {
        self.set_options_calls.lock().unwrap().push(options);
    }

    fn fetch_more(&self, options: FetchMoreOptions) -> ApolloFuture {
        let previous = self.current_result().data.unwrap_or(Value::Null);
        let merged = options.update_query.and_then(|update| {
            let args = UpdateQueryArgs {
                incoming: ApolloResult::data(json!({ "more": true })),
                variables: options.variables,
            };
            update(&previous, &args)
        });
        if let Some(data) = merged {
            self.respond(data);
        }
        let result = self.current_result();
        Box::pin(async move { Ok(result) })
    }

    fn start_polling(&self, interval: Duration) {
        *self.polling.lock().unwrap() = Some(interval);
    }

    fn stop_polling(&self) {
        *self.polling.lock().unwrap() = None;
    }

    fn subscribe_to_more(&self, options: OperationOptions) -> Unsubscribe {
        let closed = Arc::new(AtomicBool::new(false));
        self.more.lock().unwrap().push(MoreEntry {
            options,
            closed: Arc::clone(&closed),
        });
        Box::new(move || closed.store(true, Ordering::SeqCst))
    }

    fn last_result(&self) -> Option<ApolloResult> {
        self.last_result.lock().unwrap().clone()
    }

    fn last_error(&self) -> Option<ApolloError> {
        self.last_error.lock().unwrap().clone()
    }

    fn reset_last_results(&self) {
        self.last_result.lock().unwrap().take();
        self.last_error.lock().unwrap().take();
    }

    fn restore_last_results(&self, result: Option<ApolloResult>, error: Option<ApolloError>) {
        *self.last_result.lock().unwrap() = result;
        *self.last_error.lock().unwrap() = error;
    }
}

// ── Client ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockClient {
    pub name: String,
    queries: Mutex<Vec<Arc<MockQuery>>>,
    subscriptions: Mutex<Vec<Arc<MockObservable>>>,
    query_calls: AtomicUsize,
    mutate_calls: AtomicUsize,
}

impl MockClient {
    pub fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            ..Self::default()
        })
    }

    pub fn queries(&self) -> Vec<Arc<MockQuery>> {
        self.queries.lock().unwrap().clone()
    }

    pub fn last_query(&self) -> Arc<MockQuery> {
        self.queries.lock().unwrap().last().cloned().unwrap()
    }

    pub fn subscriptions(&self) -> Vec<Arc<MockObservable>> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn last_subscription(&self) -> Arc<MockObservable> {
        self.subscriptions.lock().unwrap().last().cloned().unwrap()
    }

    /// Open network subscriptions across every observable handed out.
    pub fn live_count(&self) -> usize {
        let queries: usize = self.queries().iter().map(|q| q.stream.live_count()).sum();
        let subs: usize = self.subscriptions().iter().map(|s| s.live_count()).sum();
        queries + subs
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn mutate_calls(&self) -> usize {
        self.mutate_calls.load(Ordering::SeqCst)
    }
}

impl ApolloClient for MockClient {
    fn watch_query(&self, options: OperationOptions) -> Arc<dyn ObservableQuery> {
        let query = Arc::new(MockQuery::new(options));
        self.queries.lock().unwrap().push(Arc::clone(&query));
        query
    }

    fn subscribe(&self, options: OperationOptions) -> Arc<dyn Observable> {
        let observable = Arc::new(MockObservable::new(options));
        self.subscriptions
            .lock()
            .unwrap()
            .push(Arc::clone(&observable));
        observable
    }

    fn query(&self, options: OperationOptions) -> ApolloFuture {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let client = self.name.clone();
        let variables = options.variables.unwrap_or(Value::Null);
        Box::pin(async move {
            Ok(ApolloResult::data(
                json!({ "client": client, "variables": variables }),
            ))
        })
    }

    fn mutate(&self, options: MutationOptions) -> ApolloFuture {
        self.mutate_calls.fetch_add(1, Ordering::SeqCst);
        let mutation = options.mutation.to_string();
        Box::pin(async move {
            if mutation.contains("fail") {
                return Err(ApolloError::network("connection reset"));
            }
            Ok(ApolloResult::data(json!({ "ok": true })))
        })
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub const USER_QUERY: &str = "query User($id: ID!) { user(id: $id) { id name } }";
pub const MESSAGE_SUB: &str = "subscription Messages($room: ID!) { message(room: $room) { body } }";

pub fn provider(client: &Arc<MockClient>) -> ApolloProvider {
    let client: Arc<dyn ApolloClient> = client.clone();
    ApolloProvider::new(client)
}

pub fn scope(data: Value) -> Scope {
    let data: HostData = match data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Scope::with_data(data)
}

/// A scope over `data`, a fresh client and a façade wired to both.
pub fn setup(data: Value) -> (Scope, Arc<MockClient>, Apollo) {
    let scope = scope(data);
    let client = Arc::new(MockClient::default());
    let host: Arc<dyn ReactiveHost> = Arc::new(scope.clone());
    let apollo = Apollo::new(host, provider(&client));
    (scope, client, apollo)
}

/// Shared recorder for handler invocations.
pub fn recorder<T: Send + 'static>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}
