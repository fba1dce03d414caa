//! Gateway controller object index
//!
//! The index holds the cluster resources the translator consumes:
//!
//! - `Gateway`s and the `HTTPRoute`, `GRPCRoute`, `TCPRoute` and `TLSRoute`s
//!   that attach to them, converted on arrival into the core's source types;
//! - `ReferenceGrant`s, which authorize references across namespaces;
//! - `Secret`s and `ConfigMap`s holding listener certificates and CA bundles;
//! - `Service`s, `Backend`s and `InferencePool`s that routes forward to;
//! - `TrafficPolicy`, `ListenerPolicy` and `BackendConfigPolicy` objects and
//!   the `GatewayExtension`s they reference;
//! - `Namespace` labels, used by listeners that select routes by namespace.
//!
//! A single writer applies watch events to the [`Index`]. Translation never
//! reads the index directly: [`Index::snapshot`] builds an immutable
//! [`Snapshot`] in which policies are translated and indexed by target, so
//! that any number of translation passes may read it concurrently.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backend;
mod gateway;
mod index;
pub mod metrics;
mod policy;
mod reference_grant;
mod routes;
mod secrets;
mod snapshot;


pub use self::{
    backend::{BackendIndex, ResolvedBackend},
    index::{Index, SharedIndex},
    policy::PolicyIndex,
    reference_grant::ReferenceGrants,
    snapshot::Snapshot,
};
