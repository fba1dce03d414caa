//! The proxy-agnostic configuration produced by a translation pass.
//!
//! Every type here compares field by field, so a pass can be checked for
//! idempotence and a publisher can skip unchanged output.

use crate::{
    http_route::{Filter, HttpRouteMatch, StatusCode},
    policy::{
        listener::ListenerSettings, AttachedPolicies, BackendConfigPolicyIr, TrafficPolicyIr,
    },
    tls::TlsConfigIr,
    ObjectSource, ReferenceError,
};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayIr {
    pub source: ObjectSource,
    pub listeners: Vec<ListenerIr>,

    /// Clusters for every backend referenced by the Gateway's routes, sorted
    /// by name.
    pub clusters: Vec<ClusterIr>,
    pub per_connection_buffer_limit_bytes: Option<u32>,
}

/// One physical listener: every Gateway listener sharing a port.
#[derive(Clone, Debug, PartialEq)]
pub struct ListenerIr {
    pub name: String,
    pub bind_address: String,
    pub bind_port: u16,
    pub http_filter_chains: Vec<HttpFilterChainIr>,
    pub tcp_filter_chains: Vec<TcpIr>,

    /// The effective ListenerPolicy settings for the port.
    pub settings: Option<ListenerSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterChainMatch {
    pub server_names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpFilterChainIr {
    pub name: String,
    pub matcher: FilterChainMatch,
    pub tls: Option<TlsConfigIr>,
    pub vhosts: Vec<VirtualHost>,

    /// TrafficPolicy in effect for the whole chain, from policies attached to
    /// the Gateway or its listeners.
    pub traffic_policy: Option<TrafficPolicyIr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VirtualHost {
    pub name: String,
    pub hostname: String,
    pub routes: Vec<RouteIr>,

    /// TrafficPolicy of the listener that owns the host, on plaintext chains
    /// shared by several listeners.
    pub traffic_policy: Option<TrafficPolicyIr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteIr {
    pub name: String,
    pub source: ObjectSource,
    pub rule_name: Option<String>,
    pub r#match: HttpRouteMatch,
    pub filters: Vec<Filter>,
    pub action: RouteAction,
    pub traffic_policy: Option<TrafficPolicyIr>,

    /// The route that delegated to this route's rule, if any.
    pub delegated_from: Option<ObjectSource>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RouteAction {
    Forward(Vec<BackendRefIr>),
    Redirect,
    DirectResponse(StatusCode),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TcpIr {
    pub name: String,
    pub matcher: FilterChainMatch,
    pub tls: Option<TlsConfigIr>,
    pub backends: Vec<BackendRefIr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackendRefIr {
    pub weight: u32,
    pub backend: Result<Arc<BackendObjectIr>, ReferenceError>,
}

/// A backend resolved from a Service or Backend object.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendObjectIr {
    pub source: ObjectSource,
    pub port: u16,
    pub cluster_name: String,
    pub kind: BackendKind,
    pub app_protocol: Option<String>,
    pub disable_istio_auto_mtls: bool,
    pub attached_policies: AttachedPolicies,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Service,
    Static { hosts: Vec<(String, u16)> },
    DynamicForwardProxy { enable_tls: bool },

    /// Model server pods chosen per request by an endpoint picker.
    InferencePool {
        selector: BTreeMap<String, String>,
        endpoint_picker: ObjectSource,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClusterIr {
    pub name: String,
    pub backend: ObjectSource,
    pub port: u16,
    pub kind: BackendKind,
    pub app_protocol: Option<String>,
    pub disable_istio_auto_mtls: bool,
    pub backend_config: Option<BackendConfigPolicyIr>,
}

// === impl BackendObjectIr ===

impl BackendObjectIr {
    /// Builds the cluster name of a backend port: `kube_{ns}_{name}_{port}`
    /// for Services, `backend_{ns}_{name}_{port}` for Backends and
    /// `endpoint-picker_{ns}_{name}_{port}` for InferencePools.
    pub fn cluster_name_for(kind: &BackendKind, namespace: &str, name: &str, port: u16) -> String {
        let prefix = match kind {
            BackendKind::Service => "kube",
            BackendKind::Static { .. } | BackendKind::DynamicForwardProxy { .. } => "backend",
            BackendKind::InferencePool { .. } => "endpoint-picker",
        };
        format!("{prefix}_{namespace}_{name}_{port}")
    }
}

// === impl BackendRefIr ===

impl BackendRefIr {
    pub fn cluster_name(&self) -> Option<&str> {
        self.backend.as_ref().ok().map(|b| b.cluster_name.as_str())
    }
}

// === impl RouteAction ===

impl RouteAction {
    /// Builds a forwarding action, falling back to a 500 direct response
    /// when no backend resolved.
    pub fn forward(backends: Vec<BackendRefIr>) -> Self {
        if !backends.is_empty() && backends.iter().all(|b| b.backend.is_err()) {
            return Self::DirectResponse(StatusCode::INTERNAL_SERVER_ERROR);
        }
        Self::Forward(backends)
    }
}

// === impl ListenerIr ===

impl ListenerIr {
    pub fn name_for_port(port: u16) -> String {
        format!("listener~{port}")
    }
}

// === impl VirtualHost ===

impl VirtualHost {
    pub fn name_for(parent: &str, hostname: &str) -> String {
        format!("{parent}~{hostname}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GroupKind;

    fn backend(port: u16) -> Arc<BackendObjectIr> {
        Arc::new(BackendObjectIr {
            source: ObjectSource::new(GroupKind::new("", "Service"), "default", "web"),
            port,
            cluster_name: BackendObjectIr::cluster_name_for(
                &BackendKind::Service,
                "default",
                "web",
                port,
            ),
            kind: BackendKind::Service,
            app_protocol: None,
            disable_istio_auto_mtls: false,
            attached_policies: AttachedPolicies::default(),
            errors: vec![],
        })
    }

    #[test]
    fn cluster_names() {
        assert_eq!(backend(8080).cluster_name, "kube_default_web_8080");
        assert_eq!(
            BackendObjectIr::cluster_name_for(
                &BackendKind::Static { hosts: vec![] },
                "ns",
                "static",
                0
            ),
            "backend_ns_static_0"
        );
    }

    #[test]
    fn unresolved_backends_become_direct_responses() {
        let missing = BackendRefIr {
            weight: 1,
            backend: Err(ReferenceError::UnresolvedReference),
        };
        assert_eq!(
            RouteAction::forward(vec![missing.clone()]),
            RouteAction::DirectResponse(StatusCode::INTERNAL_SERVER_ERROR)
        );

        let found = BackendRefIr {
            weight: 1,
            backend: Ok(backend(80)),
        };
        assert_eq!(
            RouteAction::forward(vec![missing.clone(), found.clone()]),
            RouteAction::Forward(vec![missing, found])
        );
    }

    #[test]
    fn names() {
        assert_eq!(ListenerIr::name_for_port(8443), "listener~8443");
        assert_eq!(
            VirtualHost::name_for("listener~80", "foo.example.com"),
            "listener~80~foo.example.com"
        );
    }
}
