use gateway_controller_core::{
    source::{
        AllowedRoutes, FromNamespaces, GatewaySource, ListenerProtocol, ListenerSource,
        ListenerTlsSource, ObjectRef, TlsMode,
    },
    tls::FrontendTlsConfigIr,
    GroupKind, ObjectSource,
};
use gateway_controller_k8s_api::{gateway as api, Gateway, ResourceExt, GATEWAY_API_GROUP};

/// Converts a Gateway into the form consumed by the translator, defaulting
/// every optional listener field.
pub(crate) fn convert(gateway: Gateway) -> GatewaySource {
    let source = ObjectSource::of(&gateway);
    let namespace = source.namespace.clone();
    let frontend_tls = gateway
        .spec
        .tls
        .as_ref()
        .and_then(|tls| tls.frontend.as_ref())
        .map(|cfg| FrontendTlsConfigIr::from_api(cfg, &namespace));
    let listeners = gateway
        .spec
        .listeners
        .iter()
        .map(|l| convert_listener(l, &namespace))
        .collect();

    GatewaySource {
        generation: gateway.metadata.generation,
        class_name: gateway.spec.gateway_class_name.clone(),
        annotations: gateway.annotations().clone(),
        listeners,
        frontend_tls,
        source,
    }
}

fn convert_listener(listener: &api::Listener, namespace: &str) -> ListenerSource {
    let tls = listener.tls.as_ref().map(|tls| {
        let mode = TlsMode::parse(tls.mode.as_deref()).unwrap_or_else(|| {
            tracing::warn!(
                listener = %listener.name,
                mode = ?tls.mode,
                "unknown TLS mode; terminating TLS"
            );
            TlsMode::Terminate
        });
        ListenerTlsSource {
            mode,
            certificate_refs: tls
                .certificate_refs
                .iter()
                .map(|r| secret_ref(r, namespace))
                .collect(),
            options: tls.options.clone(),
        }
    });

    ListenerSource {
        name: listener.name.clone(),
        hostname: listener.hostname.clone().filter(|h| !h.is_empty()),
        port: listener.port,
        protocol: ListenerProtocol::parse(&listener.protocol),
        tls,
        allowed_routes: allowed_routes(listener.allowed_routes.as_ref()),
    }
}

fn secret_ref(r: &api::SecretObjectReference, namespace: &str) -> ObjectRef {
    let gk = GroupKind::new(
        r.group.clone().unwrap_or_default(),
        r.kind.clone().unwrap_or_else(|| "Secret".to_string()),
    );
    ObjectRef {
        group: gk.group,
        kind: gk.kind,
        namespace: r.namespace.clone().unwrap_or_else(|| namespace.to_string()),
        name: r.name.clone(),
    }
}

fn allowed_routes(allowed: Option<&api::AllowedRoutes>) -> AllowedRoutes {
    let Some(allowed) = allowed else {
        return AllowedRoutes {
            namespaces: FromNamespaces::Same,
            kinds: vec![],
        };
    };

    let namespaces = match allowed.namespaces.as_ref() {
        None => FromNamespaces::Same,
        Some(ns) => match ns.from.as_deref() {
            Some("All") => FromNamespaces::All,
            Some("Selector") => FromNamespaces::Selector(
                ns.selector
                    .as_ref()
                    .and_then(|s| s.match_labels.clone())
                    .unwrap_or_default(),
            ),
            _ => FromNamespaces::Same,
        },
    };

    let kinds = allowed
        .kinds
        .iter()
        .flatten()
        .map(|k| {
            GroupKind::new(
                k.group
                    .clone()
                    .unwrap_or_else(|| GATEWAY_API_GROUP.to_string()),
                k.kind.clone(),
            )
        })
        .collect();

    AllowedRoutes { namespaces, kinds }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_k8s_api::ObjectMeta;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn listener(name: &str) -> api::Listener {
        api::Listener {
            name: name.to_string(),
            hostname: None,
            port: 443,
            protocol: "HTTPS".to_string(),
            tls: None,
            allowed_routes: None,
        }
    }

    #[test]
    fn defaults_listener_fields() {
        let gateway = Gateway {
            metadata: ObjectMeta {
                namespace: Some("infra".to_string()),
                name: Some("gw".to_string()),
                generation: Some(3),
                ..Default::default()
            },
            spec: api::GatewaySpec {
                gateway_class_name: "kgateway".to_string(),
                listeners: vec![api::Listener {
                    hostname: Some("*.example.com".to_string()),
                    tls: Some(api::ListenerTlsConfig {
                        mode: None,
                        certificate_refs: vec![api::SecretObjectReference {
                            group: None,
                            kind: None,
                            name: "cert".to_string(),
                            namespace: None,
                        }],
                        options: Default::default(),
                    }),
                    allowed_routes: Some(api::AllowedRoutes {
                        namespaces: Some(api::RouteNamespaces {
                            from: Some("Selector".to_string()),
                            selector: Some(api::NamespaceSelector {
                                match_labels: Some(btreemap! {
                                    "team".to_string() => "a".to_string(),
                                }),
                            }),
                        }),
                        kinds: Some(vec![api::RouteGroupKind {
                            group: None,
                            kind: "HTTPRoute".to_string(),
                        }]),
                    }),
                    ..listener("https")
                }],
                tls: None,
            },
            status: None,
        };

        let gw = convert(gateway);
        assert_eq!(gw.generation, Some(3));
        assert_eq!(gw.listeners.len(), 1);
        let l = &gw.listeners[0];
        assert_eq!(l.protocol, ListenerProtocol::Https);
        assert!(l.terminates_tls());
        assert_eq!(
            l.tls.as_ref().unwrap().certificate_refs,
            vec![ObjectRef {
                group: "".to_string(),
                kind: "Secret".to_string(),
                namespace: "infra".to_string(),
                name: "cert".to_string(),
            }]
        );
        assert_eq!(
            l.allowed_routes,
            AllowedRoutes {
                namespaces: FromNamespaces::Selector(btreemap! {
                    "team".to_string() => "a".to_string(),
                }),
                kinds: vec![GroupKind::new(GATEWAY_API_GROUP, "HTTPRoute")],
            }
        );
    }

    #[test]
    fn routes_default_to_same_namespace() {
        assert_eq!(
            allowed_routes(None).namespaces,
            FromNamespaces::Same,
        );
        assert_eq!(
            allowed_routes(Some(&api::AllowedRoutes {
                namespaces: Some(api::RouteNamespaces {
                    from: Some("All".to_string()),
                    selector: None,
                }),
                kinds: None,
            }))
            .namespaces,
            FromNamespaces::All,
        );
    }
}
