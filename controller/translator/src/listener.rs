use gateway_controller_core::{
    hostname,
    source::{
        FromNamespaces, GatewaySource, ListenerProtocol, ListenerSource, ParentRef, RouteKind,
        RouteSource, TlsMode,
    },
};
use gateway_controller_k8s_index::Snapshot;
use gateway_controller_k8s_status::{
    conditions::{self, reasons},
    Condition, ListenerReport, ReportMap,
};
use std::sync::Arc;

/// A Gateway listener that passed validation, with the routes attached to it.
#[derive(Debug)]
pub(crate) struct ValidListener<'a> {
    pub(crate) source: &'a ListenerSource,
    pub(crate) class: PortClass,
    pub(crate) kinds: Vec<RouteKind>,

    /// Attached routes, oldest first.
    pub(crate) routes: Vec<AttachedRoute>,
}

#[derive(Clone, Debug)]
pub(crate) struct AttachedRoute {
    pub(crate) route: Arc<RouteSource>,

    /// The parent reference through which the route attached. Conditions
    /// about the route are reported under it.
    pub(crate) parent: ParentRef,

    /// The route hostnames that fall under the listener. Empty when the
    /// route matches any host.
    pub(crate) hostnames: Vec<String>,
}

/// Listeners that share a port must agree on how connections are told apart.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PortClass {
    /// Plaintext HTTP, split by Host header.
    Http,
    /// HTTPS and TLS, split by SNI.
    Tls,
    /// Raw TCP; one listener per port.
    Tcp,
}

/// Validates a Gateway's listeners, in order, reporting every rejected
/// listener. A listener conflicting with an earlier valid listener on the
/// same port is rejected.
pub(crate) fn validate<'a>(
    gw: &'a GatewaySource,
    reports: &mut ReportMap,
) -> Vec<ValidListener<'a>> {
    let report = reports.gateway(gw);
    let mut valid: Vec<ValidListener<'a>> = Vec::new();

    for l in &gw.listeners {
        let lr = report.listener(&l.name);
        let class = match &l.protocol {
            ListenerProtocol::Http => PortClass::Http,
            ListenerProtocol::Https | ListenerProtocol::Tls => PortClass::Tls,
            ListenerProtocol::Tcp => PortClass::Tcp,
            ListenerProtocol::Unsupported(protocol) => {
                reject(
                    lr,
                    Condition::new(
                        conditions::ACCEPTED,
                        false,
                        reasons::UNSUPPORTED_PROTOCOL,
                        format!("Protocol {protocol} is not supported."),
                    ),
                );
                continue;
            }
        };

        let (kinds, invalid_kinds) = l.supported_route_kinds();
        lr.supported_kinds = kinds.iter().map(RouteKind::group_kind).collect();
        if invalid_kinds {
            lr.conditions.set(Condition::new(
                conditions::RESOLVED_REFS,
                false,
                reasons::INVALID_ROUTE_KINDS,
                "Listener allows route kinds that are not supported by its protocol.",
            ));
        }
        if kinds.is_empty() {
            reject(
                lr,
                Condition::new(
                    conditions::ACCEPTED,
                    false,
                    reasons::INVALID_ROUTE_KINDS,
                    "Listener allows no supported route kinds.",
                ),
            );
            continue;
        }

        if l.protocol == ListenerProtocol::Https
            && matches!(&l.tls, Some(tls) if tls.mode == TlsMode::Passthrough)
        {
            reject(
                lr,
                Condition::new(
                    conditions::ACCEPTED,
                    false,
                    reasons::UNSUPPORTED_VALUE,
                    "HTTPS listeners must terminate TLS.",
                ),
            );
            continue;
        }

        if let Some(other) = valid
            .iter()
            .find(|v| v.source.port == l.port && v.class != class)
        {
            reject(
                lr,
                Condition::new(
                    conditions::CONFLICTED,
                    true,
                    reasons::PROTOCOL_CONFLICT,
                    format!(
                        "Port {} is already used by listener {} with an incompatible protocol.",
                        l.port, other.source.name
                    ),
                ),
            );
            continue;
        }

        if let Some(other) = valid
            .iter()
            .find(|v| v.source.port == l.port && hostname_key(v.source) == hostname_key(l))
        {
            reject(
                lr,
                Condition::new(
                    conditions::CONFLICTED,
                    true,
                    reasons::HOSTNAME_CONFLICT,
                    format!(
                        "Listener {} already serves this hostname on port {}.",
                        other.source.name, l.port
                    ),
                ),
            );
            continue;
        }

        valid.push(ValidListener {
            source: l,
            class,
            kinds,
            routes: Vec::new(),
        });
    }

    valid
}

fn reject(lr: &mut ListenerReport, condition: Condition) {
    tracing::debug!(reason = condition.reason, message = %condition.message, "Listener rejected");
    let message = condition.message.clone();
    lr.conditions.set(condition);
    lr.conditions.set(Condition::new(
        conditions::PROGRAMMED,
        false,
        reasons::INVALID,
        message,
    ));
}

/// TCP listeners cannot be told apart by hostname.
fn hostname_key(l: &ListenerSource) -> Option<&str> {
    if l.protocol == ListenerProtocol::Tcp {
        return None;
    }
    l.hostname.as_deref()
}

/// Attaches the Gateway's routes to its valid listeners, reporting on each
/// route parent that could not attach.
pub(crate) fn attach_routes(
    snapshot: &Snapshot,
    gw: &GatewaySource,
    listeners: &mut [ValidListener<'_>],
    reports: &mut ReportMap,
) {
    for route in snapshot.routes_for_gateway(&gw.source) {
        let Some(kind) = route.kind() else {
            continue;
        };
        for parent in route
            .parent_refs
            .iter()
            .filter(|p| RouteSource::references_gateway(p, &gw.source))
        {
            let result = match &route.spec {
                Ok(_) => attach(snapshot, gw, listeners, &route, kind, parent),
                Err(error) => Err(Condition::new(
                    conditions::ACCEPTED,
                    false,
                    reasons::UNSUPPORTED_VALUE,
                    error.to_string(),
                )),
            };
            let report = reports.route(&route).parent(parent);
            if let Err(condition) = result {
                tracing::debug!(
                    route = %route.source,
                    gateway = %gw.source,
                    reason = condition.reason,
                    "Route not attached"
                );
                report.conditions.set(condition);
            }
        }
    }

    let report = reports.gateway(gw);
    for l in listeners.iter() {
        report.listener(&l.source.name).attached_routes =
            i32::try_from(l.routes.len()).unwrap_or(i32::MAX);
    }
}

fn attach(
    snapshot: &Snapshot,
    gw: &GatewaySource,
    listeners: &mut [ValidListener<'_>],
    route: &Arc<RouteSource>,
    kind: RouteKind,
    parent: &ParentRef,
) -> Result<(), Condition> {
    let selected = |l: &ListenerSource| {
        parent.section_name.as_deref().map_or(true, |s| s == l.name)
            && parent.port.map_or(true, |p| p == l.port)
    };
    if !gw.listeners.iter().any(selected) {
        return Err(Condition::new(
            conditions::ACCEPTED,
            false,
            reasons::NO_MATCHING_PARENT,
            "No listener matches the parent reference.",
        ));
    }

    let mut allowed = listeners
        .iter_mut()
        .filter(|l| {
            selected(l.source)
                && l.kinds.contains(&kind)
                && namespace_allowed(snapshot, gw, l.source, &route.source.namespace)
        })
        .peekable();
    if allowed.peek().is_none() {
        return Err(Condition::new(
            conditions::ACCEPTED,
            false,
            reasons::NOT_ALLOWED_BY_LISTENERS,
            "No listener allows the route.",
        ));
    }

    let mut attached = false;
    for l in allowed {
        let hostnames = match kind {
            RouteKind::Tcp => Some(Vec::new()),
            _ => hostname::intersect(l.source.hostname.as_deref(), &route.hostnames),
        };
        let Some(hostnames) = hostnames else {
            continue;
        };
        attached = true;
        if l.routes.iter().any(|a| a.route.source == route.source) {
            continue;
        }
        l.routes.push(AttachedRoute {
            route: route.clone(),
            parent: parent.clone(),
            hostnames,
        });
    }
    if !attached {
        return Err(Condition::new(
            conditions::ACCEPTED,
            false,
            reasons::NO_MATCHING_LISTENER_HOSTNAME,
            "No hostname of the route matches a listener hostname.",
        ));
    }
    Ok(())
}

/// An empty namespace selector selects every namespace.
fn namespace_allowed(
    snapshot: &Snapshot,
    gw: &GatewaySource,
    l: &ListenerSource,
    namespace: &str,
) -> bool {
    match &l.allowed_routes.namespaces {
        FromNamespaces::All => true,
        FromNamespaces::Same => namespace == gw.source.namespace,
        FromNamespaces::Selector(selector) if selector.is_empty() => true,
        FromNamespaces::Selector(selector) => snapshot
            .namespace_labels(namespace)
            .map_or(false, |labels| labels.selected_by(selector)),
    }
}
