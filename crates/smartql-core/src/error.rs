// ── Core error types ──
//
// Setup-time errors surfaced by smartql-core. Transport failures that reach
// a running smart operation are never returned from here; they are routed
// to the operation's error-handler chain instead. `CoreError::Apollo` only
// appears on explicit pass-through calls (`refetch`, `fetch_more`, ...).

use thiserror::Error;

use crate::transport::ApolloError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Provider / client resolution ─────────────────────────────────
    #[error("No Apollo provider injected into this host")]
    NoProvider,

    #[error("Missing 'clients' option in the Apollo provider")]
    MissingClients,

    #[error("Missing client '{name}' in the Apollo provider")]
    MissingClient { name: String },

    // ── Declaration errors ───────────────────────────────────────────
    #[error("{kind} '{key}' has no query document")]
    MissingDocument { kind: String, key: String },

    #[error("Unknown smart {kind} '{key}'")]
    UnknownOperation { kind: String, key: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Smart query '{key}' has no watch handle yet (skipped or not started)")]
    NotStarted { key: String },

    #[error("Apollo facade has been destroyed")]
    Destroyed,

    // ── Transport errors (pass-through calls only) ───────────────────
    #[error(transparent)]
    Apollo(#[from] ApolloError),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}
