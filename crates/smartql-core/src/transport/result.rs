// ── Operation results and transport errors ──
//
// Values flowing from the transport into smart operations. Errors carry
// the three-way taxonomy (GraphQL execution / network / unknown) plus the
// normalised `gql_error` convenience field.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// A single GraphQL execution error as returned in the `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Classification used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    #[strum(serialize = "graphql")]
    GraphQL,
    Network,
    Unknown,
}

/// Error value delivered by the transport on an observer's `error` channel
/// or from a rejected future.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApolloError {
    pub message: String,
    #[serde(default)]
    pub graphql_errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_error: Option<String>,
    /// First GraphQL error, filled in by [`ApolloError::add_gql_error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gql_error: Option<GraphQLError>,
}

impl ApolloError {
    /// Build an error from GraphQL execution errors.
    pub fn graphql(errors: Vec<GraphQLError>) -> Self {
        let message = errors
            .iter()
            .map(|e| format!("GraphQL error: {}", e.message))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            message,
            graphql_errors: errors,
            network_error: None,
            gql_error: None,
        }
    }

    /// Build an error for a failed request.
    pub fn network(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            message: format!("Network error: {reason}"),
            graphql_errors: Vec::new(),
            network_error: Some(reason),
            gql_error: None,
        }
    }

    /// Build an error that is neither GraphQL nor network related.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            graphql_errors: Vec::new(),
            network_error: None,
            gql_error: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        if !self.graphql_errors.is_empty() {
            ErrorKind::GraphQL
        } else if self.network_error.is_some() {
            ErrorKind::Network
        } else {
            ErrorKind::Unknown
        }
    }

    /// Attach the first GraphQL error as `gql_error`, if any.
    pub fn add_gql_error(&mut self) {
        if let Some(first) = self.graphql_errors.first() {
            self.gql_error = Some(first.clone());
        }
    }
}

impl fmt::Display for ApolloError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ApolloError {}

/// One emission of a watched query or subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApolloResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub loading: bool,
    /// Partial-error payloads (`errorPolicy: all`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApolloError>,
}

impl ApolloResult {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            loading: false,
            error: None,
        }
    }

    pub fn loading() -> Self {
        Self {
            data: None,
            loading: true,
            error: None,
        }
    }

    #[must_use]
    pub fn with_loading(mut self, loading: bool) -> Self {
        self.loading = loading;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_prefers_graphql_errors() {
        let mut err = ApolloError::graphql(vec![GraphQLError::new("boom")]);
        err.network_error = Some("also down".into());
        assert_eq!(err.kind(), ErrorKind::GraphQL);
        assert_eq!(ApolloError::network("down").kind(), ErrorKind::Network);
        assert_eq!(ApolloError::other("??").kind(), ErrorKind::Unknown);
    }

    #[test]
    fn add_gql_error_takes_the_first_error() {
        let mut err = ApolloError::graphql(vec![
            GraphQLError::new("first"),
            GraphQLError::new("second"),
        ]);
        err.add_gql_error();
        assert_eq!(err.gql_error.map(|e| e.message).as_deref(), Some("first"));

        let mut net = ApolloError::network("down");
        net.add_gql_error();
        assert!(net.gql_error.is_none());
    }

    #[test]
    fn result_deserializes_from_wire_shape() {
        let result: ApolloResult =
            serde_json::from_value(json!({ "data": { "user": { "name": "A" } } })).unwrap();
        assert_eq!(result.data, Some(json!({ "user": { "name": "A" } })));
        assert!(!result.loading);
    }
}
