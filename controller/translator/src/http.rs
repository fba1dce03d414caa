//! HTTP filter chains, virtual hosts and route delegation.

use crate::{
    gateway::{self, Ctx},
    listener::{AttachedRoute, ValidListener},
    tls, TranslateError,
};
use gateway_controller_core::{
    hostname,
    http_route::{Filter, HttpRouteMatch, PathMatch, StatusCode},
    ir::{BackendRefIr, FilterChainMatch, HttpFilterChainIr, RouteAction, RouteIr, VirtualHost},
    policy::{AttachedPolicies, MergeSettings, TrafficPolicyIr},
    source::{
        cmp_routes, BackendRefSource, HttpRuleSource, ObjectRef, ParentRef, RouteSource,
        RouteSpec,
    },
    ObjectSource, ReferenceError,
};
use gateway_controller_k8s_api::GATEWAY_API_GROUP;
use gateway_controller_k8s_status::{
    conditions::{self, reasons},
    Condition,
};
use std::{collections::BTreeMap, sync::Arc};

const HTTP_ROUTE_KIND: &str = "HTTPRoute";

/// Selects every HTTPRoute in the referenced namespace.
const DELEGATE_ALL: &str = "*";

type Hosts = BTreeMap<String, Vec<HostRoute>>;

/// A translated route along with the route it came from, so that routes
/// gathered through different listeners still sort by age.
struct HostRoute {
    source: Arc<RouteSource>,

    /// Position among the routes translated from `source`.
    seq: usize,
    ir: RouteIr,
}

/// The route whose rules are being translated and where to report on it.
struct RuleCtx<'r> {
    route: &'r RouteSource,
    parent: &'r ParentRef,
    delegated_from: Option<&'r ObjectSource>,
    merge: MergeSettings,
}

#[derive(Default)]
struct Walk {
    /// Routes on the delegation path to the rule being translated.
    stack: Vec<ObjectSource>,
    routes: Vec<RouteIr>,
}

/// Builds the single plaintext chain shared by a port's HTTP listeners.
///
/// Virtual hosts are keyed by hostname, so routes attached through several
/// listeners to the same host share one virtual host. Each virtual host
/// carries the TrafficPolicy of the listener with the most specific hostname
/// that covers it.
pub(crate) fn plaintext_chain(
    ctx: &mut Ctx<'_>,
    name: &str,
    listeners: &[&ValidListener<'_>],
) -> HttpFilterChainIr {
    let mut hosts = Hosts::new();
    for l in listeners {
        let attached = ctx.listener_policies(&l.source.name);
        collect_routes(ctx, l, &attached, &mut hosts);
    }

    let vhosts = hosts
        .into_iter()
        .map(|(host, routes)| {
            let traffic_policy =
                owner(listeners, &host).and_then(|l| ctx.listener_traffic_policy(&l.source.name));
            virtual_host(name, host, routes, traffic_policy)
        })
        .collect();

    HttpFilterChainIr {
        name: name.to_string(),
        matcher: FilterChainMatch::default(),
        tls: None,
        vhosts,
        traffic_policy: None,
    }
}

/// Builds the TLS-terminating chain of one HTTPS listener. The chain is
/// dropped when the listener's TLS configuration is invalid.
pub(crate) fn https_chain(ctx: &mut Ctx<'_>, l: &ValidListener<'_>) -> Option<HttpFilterChainIr> {
    let gateway = ctx.gateway;
    let name = format!(
        "{}/{}/{}",
        gateway.source.namespace, gateway.source.name, l.source.name
    );
    let attached = ctx.listener_policies(&l.source.name);
    let mut hosts = Hosts::new();
    collect_routes(ctx, l, &attached, &mut hosts);

    let tls = match tls::resolve(ctx, l.source) {
        Ok(tls) => tls,
        Err(error) => {
            tracing::info!(
                gateway = %gateway.source,
                listener = %l.source.name,
                %error,
                "Dropping HTTPS listener"
            );
            return None;
        }
    };
    let traffic_policy = ctx.traffic_policy(&attached, ctx.merge).map(|m| m.ir);

    let vhosts = hosts
        .into_iter()
        .map(|(host, routes)| virtual_host(&name, host, routes, None))
        .collect();
    Some(HttpFilterChainIr {
        name,
        matcher: FilterChainMatch {
            server_names: l.source.hostname.iter().cloned().collect(),
        },
        tls,
        vhosts,
        traffic_policy,
    })
}

fn collect_routes(
    ctx: &mut Ctx<'_>,
    l: &ValidListener<'_>,
    inherited: &AttachedPolicies,
    hosts: &mut Hosts,
) {
    for attached in &l.routes {
        let routes = translate_route(ctx, attached, inherited);
        if routes.is_empty() {
            continue;
        }
        let names = if attached.hostnames.is_empty() {
            vec!["*".to_string()]
        } else {
            attached.hostnames.clone()
        };
        for host in names {
            // A route attached through several listeners of a shared chain
            // is added to each host once.
            let vhost = hosts.entry(host).or_default();
            for (seq, route) in routes.iter().enumerate() {
                if !vhost.iter().any(|r| r.ir.name == route.name) {
                    vhost.push(HostRoute {
                        source: attached.route.clone(),
                        seq,
                        ir: route.clone(),
                    });
                }
            }
        }
    }
}

/// The listener with the longest hostname covering `host`. The first such
/// listener wins ties.
fn owner<'l, 'a>(
    listeners: &'l [&'l ValidListener<'a>],
    host: &str,
) -> Option<&'l ValidListener<'a>> {
    let mut best: Option<(usize, &ValidListener<'a>)> = None;
    for l in listeners {
        let hostname = l.source.hostname.as_deref();
        if !hostname::is_host_contained(host, hostname) {
            continue;
        }
        let len = hostname.map_or(0, str::len);
        if best.map_or(true, |(b, _)| len > b) {
            best = Some((len, l));
        }
    }
    best.map(|(_, l)| l)
}

fn virtual_host(
    chain: &str,
    hostname: String,
    mut routes: Vec<HostRoute>,
    traffic_policy: Option<TrafficPolicyIr>,
) -> VirtualHost {
    sort_routes(&mut routes);
    VirtualHost {
        name: VirtualHost::name_for(chain, &hostname),
        hostname,
        routes: routes.into_iter().map(|r| r.ir).collect(),
        traffic_policy,
    }
}

/// Orders routes so the most specific match is tried first: exact paths, then
/// regexes, then prefixes, longer paths first, then routes that match on a
/// method, more headers or more query parameters. Ties go to the oldest route,
/// then to the earliest rule and match within it.
fn sort_routes(routes: &mut [HostRoute]) {
    routes.sort_by(|a, b| {
        precedence(&b.ir.r#match)
            .cmp(&precedence(&a.ir.r#match))
            .then_with(|| cmp_routes(&a.source, &b.source))
            .then_with(|| a.seq.cmp(&b.seq))
    });
}

fn precedence(m: &HttpRouteMatch) -> (u8, usize, bool, usize, usize) {
    let (kind, len) = m.path.as_ref().map_or((0, 0), PathMatch::specificity);
    (
        kind,
        len,
        m.method.is_some(),
        m.headers.len(),
        m.query_params.len(),
    )
}

// === Rules ===

fn translate_route(
    ctx: &mut Ctx<'_>,
    attached: &AttachedRoute,
    inherited: &AttachedPolicies,
) -> Vec<RouteIr> {
    let route = &*attached.route;
    let Ok(RouteSpec::Http(rules)) = &route.spec else {
        return Vec::new();
    };
    let rc = RuleCtx {
        route,
        parent: &attached.parent,
        delegated_from: None,
        merge: ctx.merge,
    };
    let mut walk = Walk {
        stack: vec![route.source.clone()],
        routes: Vec::new(),
    };
    for (i, rule) in rules.iter().enumerate() {
        let mut policies = ctx
            .snapshot
            .policies_for(&route.source, rule.name.as_deref());
        policies.inherit_from(inherited);
        let name = format!(
            "{}.{}-rule-{i}",
            route.source.namespace, route.source.name
        );
        translate_rule(ctx, &rc, rule, &name, &policies, None, &mut walk);
    }
    walk.routes
}

fn translate_rule(
    ctx: &mut Ctx<'_>,
    rc: &RuleCtx<'_>,
    rule: &HttpRuleSource,
    name: &str,
    policies: &AttachedPolicies,
    parent_match: Option<&HttpRouteMatch>,
    walk: &mut Walk,
) {
    let matches = rule_matches(rule, parent_match);
    if matches.is_empty() {
        return;
    }

    let (delegates, backends): (Vec<&BackendRefSource>, Vec<&BackendRefSource>) =
        rule.backends.iter().partition(|b| is_delegation(&b.target));

    // Policy errors are reported on the policy; the fields that failed are
    // already left out of the merged IR.
    let traffic_policy = ctx.traffic_policy(policies, rc.merge).map(|p| p.ir);

    if !backends.is_empty() || delegates.is_empty() {
        let resolved = resolve_backends(ctx, rc, &backends);
        let action = if rule
            .filters
            .iter()
            .any(|f| matches!(f, Filter::RequestRedirect(_)))
        {
            RouteAction::Redirect
        } else if resolved.is_empty() {
            RouteAction::DirectResponse(StatusCode::INTERNAL_SERVER_ERROR)
        } else {
            RouteAction::forward(resolved)
        };
        for (j, m) in &matches {
            walk.routes.push(route_ir(
                rc,
                rule,
                format!("{name}-match-{j}"),
                m.clone(),
                action.clone(),
                traffic_policy.clone(),
            ));
        }
    }

    for target in delegates {
        let before = walk.routes.len();
        let Err(error) = delegate(ctx, rc, &target.target, name, &matches, policies, walk) else {
            continue;
        };
        ctx.route_condition(
            rc.route,
            rc.parent,
            Condition::new(
                conditions::RESOLVED_REFS,
                false,
                error.reason(),
                error.to_string(),
            ),
        );
        if walk.routes.len() == before && backends.is_empty() {
            for (j, m) in &matches {
                walk.routes.push(route_ir(
                    rc,
                    rule,
                    format!("{name}-match-{j}"),
                    m.clone(),
                    RouteAction::DirectResponse(StatusCode::INTERNAL_SERVER_ERROR),
                    traffic_policy.clone(),
                ));
            }
        }
    }
}

fn route_ir(
    rc: &RuleCtx<'_>,
    rule: &HttpRuleSource,
    name: String,
    r#match: HttpRouteMatch,
    action: RouteAction,
    traffic_policy: Option<TrafficPolicyIr>,
) -> RouteIr {
    RouteIr {
        name,
        source: rc.route.source.clone(),
        rule_name: rule.name.clone(),
        r#match,
        filters: rule.filters.clone(),
        action,
        traffic_policy,
        delegated_from: rc.delegated_from.cloned(),
    }
}

fn resolve_backends(
    ctx: &mut Ctx<'_>,
    rc: &RuleCtx<'_>,
    backends: &[&BackendRefSource],
) -> Vec<BackendRefIr> {
    backends
        .iter()
        .map(|b| {
            let resolved = ctx.snapshot.resolve_backend(&rc.route.source, b);
            if let Err(error) = &resolved.backend {
                ctx.route_condition(
                    rc.route,
                    rc.parent,
                    Condition::new(
                        conditions::RESOLVED_REFS,
                        false,
                        error.reason(),
                        error.to_string(),
                    ),
                );
            }
            resolved
        })
        .collect()
}

/// The matches of a rule, keyed by their index in the rule. Under a
/// delegating parent, only the matches that fall within the parent's match
/// are kept; a rule without matches takes the parent's.
fn rule_matches(
    rule: &HttpRuleSource,
    parent: Option<&HttpRouteMatch>,
) -> Vec<(usize, HttpRouteMatch)> {
    match parent {
        None if rule.matches.is_empty() => vec![(0, HttpRouteMatch::any_path())],
        None => rule.matches.iter().cloned().enumerate().collect(),
        Some(parent) if rule.matches.is_empty() => vec![(0, parent.clone())],
        Some(parent) => rule
            .matches
            .iter()
            .enumerate()
            .filter_map(|(j, m)| within(parent, m).map(|m| (j, m)))
            .collect(),
    }
}

/// Narrows a delegated route's match by the delegating route's match.
///
/// The child's path must fall under the parent's prefix or equal the parent's
/// exact path. Header and query matches add up and the child's method
/// replaces the parent's.
fn within(parent: &HttpRouteMatch, child: &HttpRouteMatch) -> Option<HttpRouteMatch> {
    let path = match (&parent.path, &child.path) {
        (path, None) => path.clone(),
        (None, path) => path.clone(),
        (Some(PathMatch::Prefix(prefix)), Some(path)) => {
            let p = match path {
                PathMatch::Exact(p) | PathMatch::Prefix(p) => p.as_str(),
                PathMatch::Regex(r) => r.as_str(),
            };
            if !p.starts_with(prefix.as_str()) {
                return None;
            }
            Some(path.clone())
        }
        (Some(parent), Some(path)) if parent == path => Some(path.clone()),
        _ => return None,
    };
    Some(HttpRouteMatch {
        path,
        headers: parent.headers.iter().chain(&child.headers).cloned().collect(),
        query_params: parent
            .query_params
            .iter()
            .chain(&child.query_params)
            .cloned()
            .collect(),
        method: child.method.clone().or_else(|| parent.method.clone()),
    })
}

fn is_delegation(target: &ObjectRef) -> bool {
    target.group == GATEWAY_API_GROUP && target.kind == HTTP_ROUTE_KIND
}

/// Translates the routes a rule delegates to, beneath each of the rule's
/// matches.
///
/// Children are reported under a parent reference naming the delegating
/// route. A child already on the delegation path is skipped and the cycle is
/// returned as an error once the other children are translated.
fn delegate(
    ctx: &mut Ctx<'_>,
    rc: &RuleCtx<'_>,
    target: &ObjectRef,
    name: &str,
    matches: &[(usize, HttpRouteMatch)],
    inherited: &AttachedPolicies,
    walk: &mut Walk,
) -> Result<(), ReferenceError> {
    let snapshot = ctx.snapshot;
    let parent = &rc.route.source;
    let accepts = |child: &RouteSource| {
        child.parent_refs.is_empty()
            || child.parent_refs.iter().any(|p| {
                p.group == GATEWAY_API_GROUP
                    && p.kind == HTTP_ROUTE_KIND
                    && p.namespace == parent.namespace
                    && p.name == parent.name
            })
    };
    let children: Vec<Arc<RouteSource>> = if target.name == DELEGATE_ALL {
        snapshot
            .http_routes_in(&target.namespace)
            .filter(|c| c.source != *parent && accepts(c))
            .cloned()
            .collect()
    } else {
        snapshot
            .route(&target.to_source())
            .filter(|c| accepts(c))
            .cloned()
            .into_iter()
            .collect()
    };
    if children.is_empty() {
        return Err(ReferenceError::UnresolvedReference);
    }

    let merge = match gateway::merge_settings(&rc.route.annotations, rc.merge) {
        Ok(merge) => merge,
        Err(error) => {
            ctx.route_condition(
                rc.route,
                rc.parent,
                Condition::new(
                    conditions::PARTIALLY_INVALID,
                    true,
                    reasons::UNSUPPORTED_VALUE,
                    error.to_string(),
                ),
            );
            rc.merge
        }
    };
    let parent_ref = ParentRef {
        group: GATEWAY_API_GROUP.to_string(),
        kind: HTTP_ROUTE_KIND.to_string(),
        namespace: parent.namespace.clone(),
        name: parent.name.clone(),
        section_name: None,
        port: None,
    };

    let mut result = Ok(());
    for child in children {
        if walk.stack.contains(&child.source) {
            tracing::debug!(route = %parent, child = %child.source, "Delegation cycle");
            result = Err(ReferenceError::CyclicReference);
            continue;
        }
        ctx.reports.route(&child).parent(&parent_ref);
        let rules = match &child.spec {
            Ok(RouteSpec::Http(rules)) => rules,
            Ok(_) => continue,
            Err(error) => {
                ctx.route_condition(
                    &child,
                    &parent_ref,
                    Condition::new(
                        conditions::ACCEPTED,
                        false,
                        reasons::UNSUPPORTED_VALUE,
                        error.to_string(),
                    ),
                );
                continue;
            }
        };

        let crc = RuleCtx {
            route: &child,
            parent: &parent_ref,
            delegated_from: Some(parent),
            merge,
        };
        walk.stack.push(child.source.clone());
        let before = walk.routes.len();
        for (k, rule) in rules.iter().enumerate() {
            let mut policies = snapshot.policies_for(&child.source, rule.name.as_deref());
            policies.inherit_from(inherited);
            for (j, m) in matches {
                let rule_name = format!(
                    "{name}-match-{j}/{}.{}-rule-{k}",
                    child.source.namespace, child.source.name
                );
                translate_rule(ctx, &crc, rule, &rule_name, &policies, Some(m), walk);
            }
        }
        walk.stack.pop();

        if walk.routes.len() == before {
            let error = TranslateError::DelegatedMatch {
                parent: parent.to_string(),
            };
            ctx.route_condition(
                &child,
                &parent_ref,
                Condition::new(
                    conditions::ACCEPTED,
                    false,
                    reasons::UNSUPPORTED_VALUE,
                    error.to_string(),
                ),
            );
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_core::http_route::{HeaderMatch, HeaderName, HeaderValue, Method};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn path(p: PathMatch) -> HttpRouteMatch {
        HttpRouteMatch {
            path: Some(p),
            headers: vec![],
            query_params: vec![],
            method: None,
        }
    }

    #[rstest]
    #[case(PathMatch::Prefix("/api/v1".into()), true)]
    #[case(PathMatch::Exact("/api".into()), true)]
    #[case(PathMatch::Prefix("/web".into()), false)]
    #[case(PathMatch::regex("/api/.*").unwrap(), true)]
    fn child_paths_under_prefix(#[case] child: PathMatch, #[case] kept: bool) {
        let parent = path(PathMatch::Prefix("/api".into()));
        assert_eq!(within(&parent, &path(child)).is_some(), kept);
    }

    #[test]
    fn child_path_under_exact_parent() {
        let parent = path(PathMatch::Exact("/login".into()));
        assert!(within(&parent, &path(PathMatch::Exact("/login".into()))).is_some());
        assert!(within(&parent, &path(PathMatch::Prefix("/login".into()))).is_none());
    }

    #[test]
    fn child_extends_parent_match() {
        let parent = HttpRouteMatch {
            headers: vec![HeaderMatch::Exact(
                HeaderName::from_static("x-team"),
                HeaderValue::from_static("a"),
            )],
            method: Some(Method::GET),
            ..path(PathMatch::Prefix("/api".into()))
        };
        let child = HttpRouteMatch {
            path: None,
            headers: vec![HeaderMatch::Exact(
                HeaderName::from_static("x-env"),
                HeaderValue::from_static("dev"),
            )],
            query_params: vec![],
            method: Some(Method::POST),
        };
        let combined = within(&parent, &child).expect("child must fall within parent");
        assert_eq!(combined.path, Some(PathMatch::Prefix("/api".into())));
        assert_eq!(combined.headers.len(), 2);
        assert_eq!(combined.method, Some(Method::POST));
    }

    fn route_source(name: &str) -> Arc<RouteSource> {
        Arc::new(RouteSource {
            source: ObjectSource::new(
                gateway_controller_core::GroupKind::new(GATEWAY_API_GROUP, HTTP_ROUTE_KIND),
                "default",
                name,
            ),
            generation: None,
            creation_timestamp: None,
            labels: Default::default(),
            annotations: BTreeMap::new(),
            parent_refs: vec![],
            hostnames: vec![],
            spec: Ok(RouteSpec::Http(vec![])),
        })
    }

    fn host_route(
        source: &Arc<RouteSource>,
        seq: usize,
        name: &str,
        m: HttpRouteMatch,
    ) -> HostRoute {
        HostRoute {
            source: source.clone(),
            seq,
            ir: RouteIr {
                name: name.to_string(),
                source: source.source.clone(),
                rule_name: None,
                r#match: m,
                filters: vec![],
                action: RouteAction::Redirect,
                traffic_policy: None,
                delegated_from: None,
            },
        }
    }

    fn names(routes: &[HostRoute]) -> Vec<&str> {
        routes.iter().map(|r| r.ir.name.as_str()).collect()
    }

    #[test]
    fn more_specific_routes_first() {
        let r = route_source("r");
        let ir = |name: &str, m: HttpRouteMatch| host_route(&r, 0, name, m);
        let mut routes = vec![
            ir("prefix-short", path(PathMatch::Prefix("/".into()))),
            ir("prefix-long", path(PathMatch::Prefix("/foo/bar".into()))),
            ir("exact", path(PathMatch::Exact("/foo".into()))),
            ir(
                "prefix-long-get",
                HttpRouteMatch {
                    method: Some(Method::GET),
                    ..path(PathMatch::Prefix("/foo/bar".into()))
                },
            ),
            ir("regex", path(PathMatch::regex("/f.*").unwrap())),
        ];
        sort_routes(&mut routes);
        assert_eq!(
            names(&routes),
            ["exact", "regex", "prefix-long-get", "prefix-long", "prefix-short"]
        );
    }

    #[test]
    fn equal_matches_order_by_route_then_rule() {
        let a = route_source("a");
        let b = route_source("b");
        let root = || path(PathMatch::Prefix("/".into()));
        let mut routes = vec![
            host_route(&b, 0, "b-0", root()),
            host_route(&a, 1, "a-1", root()),
            host_route(&a, 0, "a-0", root()),
        ];
        sort_routes(&mut routes);
        assert_eq!(names(&routes), ["a-0", "a-1", "b-0"]);
    }
}
