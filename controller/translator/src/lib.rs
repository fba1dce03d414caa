//! Gateway listener and route translator
//!
//! A translation pass reads one [`Snapshot`] of the index and produces, for
//! every Gateway, the proxy configuration of its ports ([`GatewayIr`]) along
//! with the status of every Gateway, route and policy it touched.
//!
//! Gateway listeners that share a port are merged into one physical listener:
//!
//! - HTTP listeners collapse into a single plaintext filter chain whose
//!   virtual hosts are built from the hostnames of the attached routes;
//! - each HTTPS listener gets its own TLS-terminating filter chain, selected
//!   by SNI;
//! - each TCP and TLS listener forwards to the backends of its one route.
//!
//! Translation is a pure function of the snapshot. Errors never abort a pass:
//! they are reported on the listener, route or policy that caused them and
//! only the affected piece of configuration is dropped.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod gateway;
mod http;
mod listener;
mod policy;
mod tcp;
mod tls;


use gateway_controller_core::{
    annotations::AnnotationError, ir::GatewayIr, source::RouteSpecError, tls::ListenerTlsError,
    units::UnitError, ReferenceError,
};
use gateway_controller_k8s_index::Snapshot;
use gateway_controller_k8s_status::ReportMap;

pub use self::gateway::translate_gateway;

/// The output of one translation pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Translation {
    /// One entry per Gateway, ordered by namespace and name.
    pub gateways: Vec<GatewayIr>,
    pub reports: ReportMap,
}

/// Configuration errors found while translating. Each is reported on exactly
/// one listener, route or Gateway.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum TranslateError {
    #[error("ignoring annotation {key}: {source}")]
    Quantity {
        key: &'static str,
        source: UnitError,
    },

    #[error("ignoring annotation: {0}")]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Tls(#[from] ListenerTlsError),

    #[error(transparent)]
    RouteSpec(#[from] RouteSpecError),

    #[error("only one route per {protocol} listener is supported; {count} routes are attached to listener {listener}")]
    TooManyRoutes {
        protocol: &'static str,
        listener: String,
        count: usize,
    },

    #[error("{kind} must have exactly one rule; found {count}")]
    RuleCount { kind: String, count: usize },

    #[error("no match of the route falls within the match of {parent}")]
    DelegatedMatch { parent: String },
}

/// Translates every Gateway in the snapshot.
///
/// Policies that carried this controller's status before the pass but were
/// not reported by it get an empty report, so their stale ancestors are
/// cleared.
pub fn translate(snapshot: &Snapshot) -> Translation {
    let mut translation = Translation::default();
    for gw in snapshot.gateways() {
        let (ir, reports) = translate_gateway(snapshot, gw);
        translation.gateways.push(ir);
        translation.reports.merge(reports);
    }
    translation
        .reports
        .reset_stale_policies(snapshot.previously_reported_policies());
    tracing::debug!(gateways = translation.gateways.len(), "Translated gateways");
    translation
}
