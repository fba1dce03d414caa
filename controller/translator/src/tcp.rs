use crate::{gateway::Ctx, listener::ValidListener, tls, TranslateError};
use gateway_controller_core::{
    annotations::ALLOW_EMPTY_ALPN,
    ir::{FilterChainMatch, TcpIr},
    source::{ListenerProtocol, RouteSpec},
};
use gateway_controller_k8s_status::{
    conditions::{self, reasons},
    Condition,
};

/// Builds the filter chain of a TCP or TLS listener from its one route.
///
/// Returns `None`, after reporting why, when the listener has no usable
/// route. A route with unresolved backends still produces a chain.
pub(crate) fn chain(
    ctx: &mut Ctx<'_>,
    listener_name: &str,
    l: &ValidListener<'_>,
) -> Option<TcpIr> {
    let attached = match l.routes.as_slice() {
        [] => {
            tracing::debug!(listener = %l.source.name, "No routes attached to listener");
            return None;
        }
        [attached] => attached,
        routes => {
            let error = TranslateError::TooManyRoutes {
                protocol: match l.source.protocol {
                    ListenerProtocol::Tcp => "TCP",
                    _ => "TLS",
                },
                listener: l.source.name.clone(),
                count: routes.len(),
            };
            for a in routes {
                ctx.route_condition(
                    &a.route,
                    &a.parent,
                    Condition::new(
                        conditions::ACCEPTED,
                        false,
                        reasons::UNSUPPORTED_VALUE,
                        error.to_string(),
                    ),
                );
            }
            return None;
        }
    };

    let route = &*attached.route;
    let rules = match &route.spec {
        Ok(RouteSpec::Tcp(rules) | RouteSpec::Tls(rules)) => rules,
        _ => return None,
    };
    let [rule] = rules.as_slice() else {
        let error = TranslateError::RuleCount {
            kind: route.source.kind.clone(),
            count: rules.len(),
        };
        ctx.route_condition(
            route,
            &attached.parent,
            Condition::new(
                conditions::ACCEPTED,
                false,
                reasons::UNSUPPORTED_VALUE,
                error.to_string(),
            ),
        );
        return None;
    };

    let backends = rule
        .backends
        .iter()
        .map(|b| {
            let resolved = ctx.snapshot.resolve_backend(&route.source, b);
            if let Err(error) = &resolved.backend {
                ctx.route_condition(
                    route,
                    &attached.parent,
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
        .collect::<Vec<_>>();
    if backends.is_empty() {
        tracing::debug!(route = %route.source, "Route has no backends");
        return None;
    }

    let tls = match tls::resolve(ctx, l.source) {
        Ok(tls) => tls.map(|mut tls| {
            if tls.alpn_protocols.is_empty() {
                tls.alpn_protocols = vec![ALLOW_EMPTY_ALPN.to_string()];
            }
            tls
        }),
        Err(error) => {
            tracing::info!(listener = %l.source.name, %error, "Dropping TLS listener");
            return None;
        }
    };
    let matcher = match l.source.protocol {
        ListenerProtocol::Tls => FilterChainMatch {
            server_names: l.source.hostname.iter().cloned().collect(),
        },
        _ => FilterChainMatch::default(),
    };

    Some(TcpIr {
        name: format!(
            "{listener_name}-{}.{}-rule-0",
            route.source.namespace, route.source.name
        ),
        matcher,
        tls,
        backends,
    })
}
