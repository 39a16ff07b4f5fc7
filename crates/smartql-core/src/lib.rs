//! Binding engine between GraphQL operations and a reactive host.
//!
//! A host (a UI component, a view model, anything that exposes observable
//! fields) declares queries and subscriptions; this crate keeps them alive
//! for as long as the host lives:
//!
//! - **[`ApolloComponent`]** — Glue for one host: receives an
//!   [`ApolloProvider`] by injection (or from its parent), lazily creates the
//!   host's [`Apollo`] façade, launches its [`ApolloDeclaration`] once and
//!   tears everything down when the host goes away.
//!
//! - **[`Apollo`]** — Per-host façade. Resolves which [`ApolloClient`] an
//!   operation talks to, tracks every smart operation and raw transport
//!   subscription, exposes the aggregate loading counter and the unpacked
//!   data bag, and broadcasts the skip-all switches.
//!
//! - **[`SmartQuery`] / [`SmartSubscription`]** — Operations whose inputs
//!   (variables, document, context, skip) are functions of host state. They
//!   re-execute when those inputs change, optionally throttled or
//!   debounced, and write results back into the host.
//!
//! - **[`ReactiveHost`]** — The contract a host implements: watches with
//!   `immediate`/`deep` options, field reads and writes, and binding a field
//!   to a [`DataSlot`]. [`Scope`] is a thread-safe reference host.
//!
//! - **Transport** ([`transport`]) — The client-side GraphQL contract the
//!   engine drives: observables, watch handles, result and error values.

pub mod apollo;
pub mod component;
pub mod config;
pub mod declaration;
pub mod error;
pub mod host;
pub mod provider;
pub mod smart;
pub mod stream;
pub mod timing;
pub mod transport;

mod util;

// ── Primary re-exports ──────────────────────────────────────────────
pub use apollo::{Apollo, ClientSelector};
pub use component::ApolloComponent;
pub use config::{ChainControl, Dynamic, OperationConfig, OperationKind, SubscribeToMore};
pub use declaration::ApolloDeclaration;
pub use error::CoreError;
pub use host::{DataSlot, HostData, ReactiveHost, Scope, WatchHandle, WatchOptions};
pub use provider::{ApolloProvider, ApolloProviderBuilder, DEFAULT_CLIENT};
pub use smart::{Lifecycle, SmartOperation, SmartQuery, SmartSubscription};
pub use stream::FieldStream;
pub use transport::{
    ApolloClient, ApolloError, ApolloResult, Document, FetchPolicy, GraphQLError, Observable,
    ObservableQuery, Observer, OperationOptions, Subscription,
};
