//! Gateways and routes as the translator consumes them: defaults applied,
//! references qualified with namespaces, and matches and filters parsed.

use crate::{
    http_route::{Filter, HttpRouteMatch, MatchError},
    tls::FrontendTlsConfigIr,
    GroupKind, ObjectSource,
};
use chrono::{offset::Utc, DateTime};
use gateway_controller_k8s_api::{
    labels, GrpcRoute, HttpRoute, Labels, TcpRoute, TlsRoute, GATEWAY_API_GROUP,
};
use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};

#[derive(Clone, Debug, PartialEq)]
pub struct GatewaySource {
    pub source: ObjectSource,
    pub generation: Option<i64>,
    pub class_name: String,
    pub annotations: BTreeMap<String, String>,
    pub listeners: Vec<ListenerSource>,
    pub frontend_tls: Option<FrontendTlsConfigIr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListenerSource {
    pub name: String,
    pub hostname: Option<String>,
    pub port: u16,
    pub protocol: ListenerProtocol,
    pub tls: Option<ListenerTlsSource>,
    pub allowed_routes: AllowedRoutes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerProtocol {
    Http,
    Https,
    Tls,
    Tcp,
    Unsupported(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TlsMode {
    Terminate,
    Passthrough,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListenerTlsSource {
    pub mode: TlsMode,
    pub certificate_refs: Vec<ObjectRef>,
    pub options: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AllowedRoutes {
    pub namespaces: FromNamespaces,

    /// Route kinds named by the listener. Empty means the protocol's default
    /// kinds.
    pub kinds: Vec<GroupKind>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FromNamespaces {
    All,
    Same,
    Selector(labels::Map),
}

/// A namespaced reference with its group, kind and namespace defaulted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteSource {
    pub source: ObjectSource,
    pub generation: Option<i64>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub labels: Labels,
    pub annotations: BTreeMap<String, String>,
    pub parent_refs: Vec<ParentRef>,

    /// Hostnames declared by the route. Empty for routes that match any host.
    pub hostnames: Vec<String>,

    /// The parsed rules, or the first error that made them unusable.
    pub spec: Result<RouteSpec, RouteSpecError>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RouteSpec {
    /// HTTPRoute and GRPCRoute rules.
    Http(Vec<HttpRuleSource>),
    Tcp(Vec<TcpRuleSource>),
    Tls(Vec<TcpRuleSource>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpRuleSource {
    pub name: Option<String>,
    pub matches: Vec<HttpRouteMatch>,
    pub filters: Vec<Filter>,
    pub backends: Vec<BackendRefSource>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TcpRuleSource {
    pub name: Option<String>,
    pub backends: Vec<BackendRefSource>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParentRef {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub section_name: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendRefSource {
    pub target: ObjectRef,
    pub port: Option<u16>,
    pub weight: u32,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum RouteSpecError {
    #[error("{0}")]
    Match(String),

    #[error(transparent)]
    Annotation(#[from] crate::annotations::AnnotationError),
}

/// Route kinds served by the translator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    Http,
    Grpc,
    Tcp,
    Tls,
}

// === impl ListenerProtocol ===

impl ListenerProtocol {
    pub fn parse(protocol: &str) -> Self {
        match protocol {
            "HTTP" => Self::Http,
            "HTTPS" => Self::Https,
            "TLS" => Self::Tls,
            "TCP" => Self::Tcp,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// The route kinds a listener of this protocol accepts by default.
    pub fn default_route_kinds(&self) -> &'static [RouteKind] {
        match self {
            Self::Http | Self::Https => &[RouteKind::Http, RouteKind::Grpc],
            Self::Tls => &[RouteKind::Tls],
            Self::Tcp => &[RouteKind::Tcp],
            Self::Unsupported(_) => &[],
        }
    }
}

// === impl ListenerSource ===

impl ListenerSource {
    /// Resolves the listener's route kinds, returning the supported kinds and
    /// whether any requested kind was invalid for the protocol.
    pub fn supported_route_kinds(&self) -> (Vec<RouteKind>, bool) {
        let defaults = self.protocol.default_route_kinds();
        if self.allowed_routes.kinds.is_empty() {
            return (defaults.to_vec(), false);
        }
        let mut invalid = false;
        let mut kinds = Vec::new();
        for gk in &self.allowed_routes.kinds {
            match RouteKind::from_group_kind(gk).filter(|k| defaults.contains(k)) {
                Some(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Some(_) => {}
                None => invalid = true,
            }
        }
        (kinds, invalid)
    }

    /// Returns true if the listener terminates TLS.
    pub fn terminates_tls(&self) -> bool {
        matches!(&self.tls, Some(tls) if tls.mode == TlsMode::Terminate)
    }
}

// === impl TlsMode ===

impl TlsMode {
    /// Parses a listener TLS mode. A missing mode is `Terminate`.
    pub fn parse(mode: Option<&str>) -> Option<Self> {
        match mode.unwrap_or("Terminate") {
            "Terminate" => Some(Self::Terminate),
            "Passthrough" => Some(Self::Passthrough),
            _ => None,
        }
    }
}

// === impl ObjectRef ===

impl ObjectRef {
    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }

    pub fn to_source(&self) -> ObjectSource {
        ObjectSource::new(self.group_kind(), self.namespace.clone(), self.name.clone())
    }
}

// === impl RouteKind ===

impl RouteKind {
    pub fn from_group_kind(gk: &GroupKind) -> Option<Self> {
        if gk.group != GATEWAY_API_GROUP {
            return None;
        }
        match gk.kind.as_str() {
            "HTTPRoute" => Some(Self::Http),
            "GRPCRoute" => Some(Self::Grpc),
            "TCPRoute" => Some(Self::Tcp),
            "TLSRoute" => Some(Self::Tls),
            _ => None,
        }
    }

    pub fn group_kind(&self) -> GroupKind {
        match self {
            Self::Http => GroupKind::of::<HttpRoute>(),
            Self::Grpc => GroupKind::of::<GrpcRoute>(),
            Self::Tcp => GroupKind::of::<TcpRoute>(),
            Self::Tls => GroupKind::of::<TlsRoute>(),
        }
    }
}

// === impl RouteSource ===

impl RouteSource {
    pub fn kind(&self) -> Option<RouteKind> {
        RouteKind::from_group_kind(&self.source.group_kind())
    }

    /// The route's hostnames, defaulting to `*`.
    pub fn effective_hostnames(&self) -> Vec<String> {
        if self.hostnames.is_empty() {
            return vec!["*".to_string()];
        }
        self.hostnames.clone()
    }

    /// Returns true if `parent` references the Gateway `gateway`.
    pub fn references_gateway(parent: &ParentRef, gateway: &ObjectSource) -> bool {
        parent.group == gateway.group
            && parent.kind == gateway.kind
            && parent.namespace == gateway.namespace
            && parent.name == gateway.name
    }
}

/// Orders routes by creation timestamp, oldest first, then by namespace and
/// name.
pub fn cmp_routes(a: &RouteSource, b: &RouteSource) -> Ordering {
    let by_age = match (a.creation_timestamp, b.creation_timestamp) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_age
        .then_with(|| a.source.namespace.cmp(&b.source.namespace))
        .then_with(|| a.source.name.cmp(&b.source.name))
}

/// Sorts routes in place with [`cmp_routes`].
pub fn sort_routes(routes: &mut [Arc<RouteSource>]) {
    routes.sort_by(|a, b| cmp_routes(a, b));
}

impl From<MatchError> for RouteSpecError {
    fn from(error: MatchError) -> Self {
        Self::Match(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn route(name: &str, created: Option<i64>) -> RouteSource {
        RouteSource {
            source: ObjectSource::new(GroupKind::of::<HttpRoute>(), "default", name.to_string()),
            generation: None,
            creation_timestamp: created.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            labels: Labels::default(),
            annotations: BTreeMap::new(),
            parent_refs: vec![],
            hostnames: vec![],
            spec: Ok(RouteSpec::Http(vec![])),
        }
    }

    #[test]
    fn routes_order_by_age_then_name() {
        let mut routes = vec![
            Arc::new(route("c", None)),
            Arc::new(route("b", Some(20))),
            Arc::new(route("z", Some(10))),
            Arc::new(route("a", Some(20))),
        ];
        sort_routes(&mut routes);
        let names = routes
            .iter()
            .map(|r| r.source.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["z", "a", "b", "c"]);
    }

    #[test]
    fn hostnames_default_to_wildcard() {
        assert_eq!(route("r", None).effective_hostnames(), vec!["*"]);
    }

    #[test]
    fn listener_route_kinds() {
        let mut listener = ListenerSource {
            name: "tcp".to_string(),
            hostname: None,
            port: 9000,
            protocol: ListenerProtocol::Tcp,
            tls: None,
            allowed_routes: AllowedRoutes {
                namespaces: FromNamespaces::Same,
                kinds: vec![],
            },
        };
        assert_eq!(listener.supported_route_kinds(), (vec![RouteKind::Tcp], false));

        listener.allowed_routes.kinds = vec![
            GroupKind::of::<TcpRoute>(),
            GroupKind::of::<HttpRoute>(),
        ];
        assert_eq!(listener.supported_route_kinds(), (vec![RouteKind::Tcp], true));

        listener.protocol = ListenerProtocol::Https;
        listener.allowed_routes.kinds = vec![];
        assert_eq!(
            listener.supported_route_kinds(),
            (vec![RouteKind::Http, RouteKind::Grpc], false)
        );
    }

    #[test]
    fn tls_mode_defaults_to_terminate() {
        assert_eq!(TlsMode::parse(None), Some(TlsMode::Terminate));
        assert_eq!(TlsMode::parse(Some("Passthrough")), Some(TlsMode::Passthrough));
        assert_eq!(TlsMode::parse(Some("Mirror")), None);
    }
}
