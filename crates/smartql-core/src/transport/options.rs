// ── Transport-facing options ──
//
// What a smart operation hands to the transport after stripping its own
// reserved configuration. Only these fields (plus the `extra` pass-through
// map) ever reach the GraphQL client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use super::ApolloResult;

// ── Document ────────────────────────────────────────────────────────

/// A GraphQL document (query, mutation, or subscription source text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Arc<str>);

impl Document {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read a document back from a watched JSON value.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(Self::new)
    }

    pub fn to_value(&self) -> Value {
        Value::String(self.0.to_string())
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Document {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ── FetchPolicy ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    CacheFirst,
    CacheAndNetwork,
    NetworkOnly,
    CacheOnly,
    NoCache,
    Standby,
}

// ── updateQuery ─────────────────────────────────────────────────────

/// Second argument of an `updateQuery` callback: the incoming payload
/// (`subscriptionData` / `fetchMoreResult`) and the variables it was
/// produced with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateQueryArgs {
    pub incoming: ApolloResult,
    pub variables: Option<Value>,
}

/// Merges an incoming payload into the previous query data. `None`
/// leaves the cached result untouched.
pub type UpdateQueryFn = Arc<dyn Fn(&Value, &UpdateQueryArgs) -> Option<Value> + Send + Sync>;

// ── OperationOptions ────────────────────────────────────────────────

/// Options for `watch_query`, `query`, `subscribe` and `subscribe_to_more`.
#[derive(Clone, Default)]
pub struct OperationOptions {
    pub query: Option<Document>,
    pub document: Option<Document>,
    pub variables: Option<Value>,
    pub context: Option<Value>,
    pub fetch_policy: Option<FetchPolicy>,
    pub poll_interval: Option<Duration>,
    pub notify_on_network_status_change: Option<bool>,
    /// Named client override, consumed by client resolution.
    pub client: Option<String>,
    /// Only forwarded for subscriptions (`subscribe_to_more`).
    pub update_query: Option<UpdateQueryFn>,
    /// Transport options the binding layer does not interpret.
    pub extra: Map<String, Value>,
}

impl OperationOptions {
    pub fn new(query: impl Into<Document>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// The document to execute: `query`, falling back to `document`.
    pub fn source(&self) -> Option<&Document> {
        self.query.as_ref().or(self.document.as_ref())
    }
}

impl fmt::Debug for OperationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationOptions")
            .field("query", &self.query)
            .field("document", &self.document)
            .field("variables", &self.variables)
            .field("context", &self.context)
            .field("fetch_policy", &self.fetch_policy)
            .field("poll_interval", &self.poll_interval)
            .field(
                "notify_on_network_status_change",
                &self.notify_on_network_status_change,
            )
            .field("client", &self.client)
            .field("update_query", &self.update_query.as_ref().map(|_| "<fn>"))
            .field("extra", &self.extra)
            .finish()
    }
}

// ── Mutation / fetchMore ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MutationOptions {
    pub mutation: Document,
    pub variables: Option<Value>,
    pub context: Option<Value>,
    pub client: Option<String>,
    pub extra: Map<String, Value>,
}

impl MutationOptions {
    pub fn new(mutation: impl Into<Document>) -> Self {
        Self {
            mutation: mutation.into(),
            variables: None,
            context: None,
            client: None,
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct FetchMoreOptions {
    pub query: Option<Document>,
    pub variables: Option<Value>,
    pub update_query: Option<UpdateQueryFn>,
}

impl fmt::Debug for FetchMoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchMoreOptions")
            .field("query", &self.query)
            .field("variables", &self.variables)
            .field("update_query", &self.update_query.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_policy_uses_apollo_spelling() {
        assert_eq!(FetchPolicy::NoCache.to_string(), "no-cache");
        assert_eq!(
            "cache-and-network".parse::<FetchPolicy>().ok(),
            Some(FetchPolicy::CacheAndNetwork)
        );
    }

    #[test]
    fn source_falls_back_to_document() {
        let opts = OperationOptions {
            document: Some(Document::from("subscription { ping }")),
            ..OperationOptions::default()
        };
        assert_eq!(opts.source().map(Document::as_str), Some("subscription { ping }"));
    }
}
