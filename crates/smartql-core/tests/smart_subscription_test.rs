#![allow(clippy::unwrap_used)]
// Integration tests for standalone and linked smart subscriptions.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use smartql_core::transport::UpdateQueryArgs;
use smartql_core::{
    Apollo, ApolloError, ApolloResult, ChainControl, Lifecycle, OperationConfig, ReactiveHost,
    Scope, SmartOperation,
};
use support::{MESSAGE_SUB, MockClient, USER_QUERY, provider, recorder, setup};

fn messages_in_room() -> OperationConfig {
    OperationConfig::new(MESSAGE_SUB).variables_fn(|d| json!({ "room": d.get("room") }))
}

// ── Standalone ──────────────────────────────────────────────────────

#[test]
fn test_result_hook_receives_the_full_payload() {
    let (_scope, client, apollo) = setup(json!({ "room": "a" }));
    let results = recorder();
    let sink = Arc::clone(&results);

    let sub = apollo
        .add_smart_subscription(
            "messages",
            messages_in_room().on_result(move |r| sink.lock().unwrap().push(r.clone())),
        )
        .unwrap()
        .unwrap();
    assert!(sub.has_active_subscription());
    assert!(!sub.is_linked());

    let event = ApolloResult::data(json!({ "message": { "body": "hi" } }));
    client.last_subscription().emit(&event);

    assert_eq!(*results.lock().unwrap(), vec![event]);
}

#[test]
fn test_identical_variables_keep_the_running_subscription() {
    let (_scope, client, apollo) = setup(json!({ "room": "a" }));
    let sub = apollo
        .add_smart_subscription("messages", messages_in_room())
        .unwrap()
        .unwrap();
    assert_eq!(client.subscriptions().len(), 1);

    sub.execute_apollo(Some(json!({ "room": "a" })));
    assert_eq!(client.subscriptions().len(), 1);
    assert_eq!(client.live_count(), 1);

    sub.execute_apollo(Some(json!({ "room": "b" })));
    assert_eq!(client.subscriptions().len(), 2);
    assert_eq!(client.live_count(), 1);
    assert_eq!(client.subscriptions()[0].live_count(), 0);
}

#[test]
fn test_variables_change_resubscribes() {
    let (scope, client, apollo) = setup(json!({ "room": "a" }));
    apollo
        .add_smart_subscription("messages", messages_in_room())
        .unwrap();

    scope.set("room", json!("b"));

    assert_eq!(client.subscriptions().len(), 2);
    assert_eq!(
        client.last_subscription().options.variables,
        Some(json!({ "room": "b" }))
    );
    assert_eq!(client.live_count(), 1);
}

#[test]
fn test_update_query_is_only_forwarded_for_subscriptions() {
    let (_scope, client, apollo) = setup(json!({}));
    apollo
        .add_smart_subscription(
            "messages",
            OperationConfig::new(MESSAGE_SUB).update_query(|prev, _| Some(prev.clone())),
        )
        .unwrap();
    apollo
        .add_smart_query(
            "user",
            OperationConfig::new(USER_QUERY).update_query(|prev, _| Some(prev.clone())),
        )
        .unwrap();

    assert!(client.last_subscription().options.update_query.is_some());
    assert!(client.last_query().options().update_query.is_none());
}

#[test]
fn test_error_runs_chain_through_provider() {
    let client = Arc::new(MockClient::default());
    let provider_calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&provider_calls);
    let provider = smartql_core::ApolloProvider::builder()
        .default_client(client.clone())
        .error_handler(move |e| {
            assert_eq!(e.gql_error.as_ref().map(|g| g.message.as_str()), Some("denied"));
            seen.fetch_add(1, Ordering::SeqCst);
            ChainControl::Continue
        })
        .build();
    let host: Arc<dyn ReactiveHost> = Arc::new(Scope::new());
    let apollo = Apollo::new(host, provider);

    let sub = apollo
        .add_smart_subscription("messages", OperationConfig::new(MESSAGE_SUB))
        .unwrap()
        .unwrap();
    client
        .last_subscription()
        .fail(&ApolloError::graphql(vec![smartql_core::GraphQLError::new("denied")]));

    assert_eq!(provider_calls.load(Ordering::SeqCst), 1);
    assert!(!sub.has_active_subscription());
}

#[test]
fn test_skip_all_subscriptions_stops_and_restarts() {
    let (_scope, client, apollo) = setup(json!({ "room": "a" }));
    let sub = apollo
        .add_smart_subscription("messages", messages_in_room())
        .unwrap()
        .unwrap();

    apollo.skip_all_subscriptions(true);
    assert!(sub.skipped());
    assert_eq!(client.live_count(), 0);

    apollo.skip_all_subscriptions(false);
    assert_eq!(sub.core().state(), Lifecycle::Active);
    assert_eq!(client.live_count(), 1);
    assert_eq!(client.subscriptions().len(), 2);
}

#[test]
fn test_destroy_twice_leaves_nothing_behind() {
    let (scope, client, apollo) = setup(json!({ "room": "a" }));
    let sub = apollo
        .add_smart_subscription("messages", messages_in_room())
        .unwrap()
        .unwrap();

    sub.destroy();
    sub.destroy();

    assert_eq!(sub.core().state(), Lifecycle::Destroyed);
    assert_eq!(sub.core().watcher_count(), 0);
    assert_eq!(scope.watcher_count(), 0);
    assert_eq!(client.live_count(), 0);

    sub.start();
    assert_eq!(client.subscriptions().len(), 1);
}

// ── Linked to a query ───────────────────────────────────────────────

#[test]
fn test_linked_subscription_fires_result_and_update_query_once_per_event() {
    let (scope, client, apollo) = setup(json!({ "id": 1 }));
    let results = Arc::new(AtomicUsize::new(0));
    let updates = Arc::new(AtomicUsize::new(0));
    let (seen_results, seen_updates) = (Arc::clone(&results), Arc::clone(&updates));

    let linked = OperationConfig::new(MESSAGE_SUB)
        .on_result(move |_| {
            seen_results.fetch_add(1, Ordering::SeqCst);
        })
        .update_query(move |previous: &Value, args: &UpdateQueryArgs| -> Option<Value> {
            seen_updates.fetch_add(1, Ordering::SeqCst);
            let body = args.incoming.data.as_ref()?["message"]["body"].clone();
            let mut next = previous.clone();
            next["user"]["status"] = body;
            Some(next)
        });
    apollo
        .add_smart_query(
            "user",
            OperationConfig::new(USER_QUERY)
                .variables(json!({ "id": 1 }))
                .subscribe_to_more(linked),
        )
        .unwrap();

    let sub = apollo.smart_subscription("user").unwrap();
    assert!(sub.is_linked());
    assert!(sub.has_active_subscription());
    assert!(client.subscriptions().is_empty());

    let mock = client.last_query();
    mock.respond(json!({ "user": { "id": 1 } }));
    mock.push_more(0, json!({ "message": { "body": "away" } }));

    assert_eq!(results.load(Ordering::SeqCst), 1);
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(scope.get("user"), Some(json!({ "id": 1, "status": "away" })));
}

#[test]
fn test_subscribe_to_more_list_registers_indexed_keys() {
    let (_scope, client, apollo) = setup(json!({}));
    apollo
        .add_smart_query(
            "user",
            OperationConfig::new(USER_QUERY).subscribe_to_more_all(vec![
                OperationConfig::new(MESSAGE_SUB),
                OperationConfig::new(MESSAGE_SUB).variables(json!({ "room": "b" })),
            ]),
        )
        .unwrap();

    let mut keys = apollo.subscription_keys();
    keys.sort();
    assert_eq!(keys, vec!["user0".to_owned(), "user1".to_owned()]);
    assert_eq!(client.last_query().live_more(), 2);

    apollo.destroy();
    assert_eq!(client.last_query().live_more(), 0);
}

#[test]
fn test_linked_subscription_without_watch_handle_is_not_registered() {
    let (_scope, client, apollo) = setup(json!({}));
    apollo
        .add_smart_query(
            "user",
            OperationConfig::new(USER_QUERY)
                .skip(true)
                .subscribe_to_more(OperationConfig::new(MESSAGE_SUB)),
        )
        .unwrap();

    let sub = apollo.smart_subscription("user").unwrap();
    assert!(!sub.has_active_subscription());
    assert!(client.queries().is_empty());
    assert!(client.subscriptions().is_empty());
}

// ── Server rendering ────────────────────────────────────────────────

#[test]
fn test_server_host_creates_no_subscriptions() {
    let client = Arc::new(MockClient::default());
    let host: Arc<dyn ReactiveHost> = Arc::new(Scope::server(serde_json::Map::new()));
    let apollo = Apollo::new(host, provider(&client));

    let sub = apollo
        .add_smart_subscription("messages", OperationConfig::new(MESSAGE_SUB))
        .unwrap();
    assert!(sub.is_none());

    apollo
        .add_smart_query(
            "user",
            OperationConfig::new(USER_QUERY).subscribe_to_more(OperationConfig::new(MESSAGE_SUB)),
        )
        .unwrap();
    assert!(apollo.subscription_keys().is_empty());
    assert_eq!(
        client.last_query().options().fetch_policy,
        Some(smartql_core::FetchPolicy::CacheFirst)
    );
}

#[test]
fn test_server_host_does_not_start_non_prefetched_queries() {
    let client = Arc::new(MockClient::default());
    let host: Arc<dyn ReactiveHost> = Arc::new(Scope::server(serde_json::Map::new()));
    let apollo = Apollo::new(host, provider(&client));

    let query = apollo
        .add_smart_query("user", OperationConfig::new(USER_QUERY).prefetch(false))
        .unwrap();

    assert_eq!(query.core().state(), Lifecycle::Uninitialized);
    assert!(client.queries().is_empty());
}
