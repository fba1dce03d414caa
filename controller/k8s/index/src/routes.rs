use gateway_controller_core::{
    annotations,
    source::{BackendRefSource, ObjectRef, ParentRef, RouteSource, RouteSpec, TcpRuleSource},
    GroupKind, ObjectSource,
};
use gateway_controller_k8s_api::{
    routes as api, GrpcRoute, HttpRoute, Labels, Resource, ResourceExt, TcpRoute, TlsRoute,
    GATEWAY_API_GROUP,
};

mod grpc;
mod http;

pub(crate) fn convert_http(route: HttpRoute) -> RouteSource {
    let namespace = route.namespace().unwrap_or_default();
    let spec = annotations::parse_redirect_status_codes(route.annotations())
        .map_err(Into::into)
        .and_then(|codes| http::convert_rules(&route.spec.rules, codes.as_ref(), &namespace))
        .map(RouteSpec::Http);
    route_source(
        &route,
        &route.spec.parent_refs,
        route.spec.hostnames.clone(),
        spec,
    )
}

pub(crate) fn convert_grpc(route: GrpcRoute) -> RouteSource {
    let namespace = route.namespace().unwrap_or_default();
    let spec = grpc::convert_rules(&route.spec.rules, &namespace).map(RouteSpec::Http);
    route_source(
        &route,
        &route.spec.parent_refs,
        route.spec.hostnames.clone(),
        spec,
    )
}

pub(crate) fn convert_tcp(route: TcpRoute) -> RouteSource {
    let namespace = route.namespace().unwrap_or_default();
    let rules = route
        .spec
        .rules
        .iter()
        .map(|rule| TcpRuleSource {
            name: rule.name.clone(),
            backends: rule
                .backend_refs
                .iter()
                .map(|b| backend_ref(b, &namespace))
                .collect(),
        })
        .collect();
    route_source(&route, &route.spec.parent_refs, vec![], Ok(RouteSpec::Tcp(rules)))
}

pub(crate) fn convert_tls(route: TlsRoute) -> RouteSource {
    let namespace = route.namespace().unwrap_or_default();
    let rules = route
        .spec
        .rules
        .iter()
        .map(|rule| TcpRuleSource {
            name: rule.name.clone(),
            backends: rule
                .backend_refs
                .iter()
                .map(|b| backend_ref(b, &namespace))
                .collect(),
        })
        .collect();
    route_source(
        &route,
        &route.spec.parent_refs,
        route.spec.hostnames.clone(),
        Ok(RouteSpec::Tls(rules)),
    )
}

fn route_source<T>(
    route: &T,
    parent_refs: &[api::ParentReference],
    hostnames: Vec<String>,
    spec: Result<RouteSpec, gateway_controller_core::source::RouteSpecError>,
) -> RouteSource
where
    T: Resource,
    T::DynamicType: Default,
{
    let source = ObjectSource::of(route);
    let meta = route.meta();
    RouteSource {
        generation: meta.generation,
        creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0),
        labels: Labels::from(meta.labels.clone()),
        annotations: meta.annotations.clone().unwrap_or_default(),
        parent_refs: parent_refs
            .iter()
            .map(|p| parent_ref(p, &source.namespace))
            .collect(),
        hostnames,
        spec,
        source,
    }
}

/// Defaults a parent reference to a Gateway in the route's namespace.
pub(crate) fn parent_ref(r: &api::ParentReference, namespace: &str) -> ParentRef {
    let gk = GroupKind::new(
        r.group
            .clone()
            .unwrap_or_else(|| GATEWAY_API_GROUP.to_string()),
        r.kind.clone().unwrap_or_else(|| "Gateway".to_string()),
    );
    ParentRef {
        group: gk.group,
        kind: gk.kind,
        namespace: r.namespace.clone().unwrap_or_else(|| namespace.to_string()),
        name: r.name.clone(),
        section_name: r.section_name.clone(),
        port: r.port,
    }
}

/// Defaults a backend reference to a Service in the route's namespace with
/// weight 1.
pub(crate) fn backend_ref(r: &api::BackendRef, namespace: &str) -> BackendRefSource {
    let gk = GroupKind::new(
        r.group.clone().unwrap_or_default(),
        r.kind.clone().unwrap_or_else(|| "Service".to_string()),
    );
    BackendRefSource {
        target: ObjectRef {
            group: gk.group,
            kind: gk.kind,
            namespace: r.namespace.clone().unwrap_or_else(|| namespace.to_string()),
            name: r.name.clone(),
        },
        port: r.port,
        weight: r.weight.unwrap_or(1),
    }
}
