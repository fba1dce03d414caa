use gateway_controller_core::{
    policy::{
        listener::{HttpListenerSettings, ListenerSettings, ProxyProtocolIr},
        ListenerPolicyIr, PolicyError,
    },
    units,
};
use gateway_controller_k8s_api::{policy as api, ListenerPolicy};
use std::collections::BTreeMap;

pub(super) fn convert(policy: &ListenerPolicy, errors: &mut Vec<PolicyError>) -> ListenerPolicyIr {
    let default = policy
        .spec
        .default
        .as_ref()
        .map(|config| settings("default", config, errors));

    let mut per_port = BTreeMap::new();
    for p in &policy.spec.per_port {
        let s = settings("perPortPolicy", &p.listener, errors);
        if per_port.insert(p.port, s).is_some() {
            errors.push(PolicyError::InvalidField {
                field: "perPortPolicy",
                message: format!("port {} is configured more than once", p.port),
            });
        }
    }

    ListenerPolicyIr { default, per_port }
}

fn settings(
    field: &'static str,
    config: &api::ListenerConfig,
    errors: &mut Vec<PolicyError>,
) -> ListenerSettings {
    ListenerSettings {
        proxy_protocol: config.proxy_protocol.as_ref().map(|p| ProxyProtocolIr {
            allow_requests_without_proxy_protocol: p
                .allow_requests_without_proxy_protocol
                .unwrap_or(false),
        }),
        per_connection_buffer_limit_bytes: config.per_connection_buffer_limit_bytes,
        http: config.http_settings.as_ref().map(|h| {
            let mut duration = |value: &Option<String>| {
                value.as_deref().and_then(|v| match units::parse_duration(v) {
                    Ok(d) => Some(d),
                    Err(e) => {
                        errors.push(PolicyError::InvalidField {
                            field,
                            message: format!("httpSettings: {e}"),
                        });
                        None
                    }
                })
            };
            HttpListenerSettings {
                use_remote_address: h.use_remote_address,
                xff_num_trusted_hops: h.xff_num_trusted_hops,
                server_header_transformation: h.server_header_transformation.clone(),
                stream_idle_timeout: duration(&h.stream_idle_timeout),
                idle_timeout: duration(&h.idle_timeout),
                preserve_http1_header_case: h.preserve_http1_header_case,
                accept_http10: h.accept_http10,
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_k8s_api::{policy::ListenerPolicySpec, ObjectMeta};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn policy(spec: ListenerPolicySpec) -> ListenerPolicy {
        ListenerPolicy {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("lp".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    #[test]
    fn default_and_per_port() {
        let mut errors = vec![];
        let ir = convert(
            &policy(ListenerPolicySpec {
                default: Some(api::ListenerConfig {
                    per_connection_buffer_limit_bytes: Some(32768),
                    http_settings: Some(api::HttpListenerConfig {
                        idle_timeout: Some("30s".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                per_port: vec![api::ListenerPortConfig {
                    port: 8443,
                    listener: api::ListenerConfig {
                        proxy_protocol: Some(Default::default()),
                        ..Default::default()
                    },
                }],
                ..Default::default()
            }),
            &mut errors,
        );
        assert_eq!(errors, vec![]);
        let default = ir.default.expect("default settings");
        assert_eq!(default.per_connection_buffer_limit_bytes, Some(32768));
        assert_eq!(
            default.http.and_then(|h| h.idle_timeout),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            ir.per_port[&8443].proxy_protocol,
            Some(ProxyProtocolIr {
                allow_requests_without_proxy_protocol: false
            })
        );
    }

    #[test]
    fn invalid_durations_and_duplicate_ports() {
        let port = |p| api::ListenerPortConfig {
            port: p,
            listener: api::ListenerConfig {
                http_settings: Some(api::HttpListenerConfig {
                    stream_idle_timeout: Some("forever".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        };
        let mut errors = vec![];
        let ir = convert(
            &policy(ListenerPolicySpec {
                per_port: vec![port(80), port(80)],
                ..Default::default()
            }),
            &mut errors,
        );
        assert_eq!(ir.per_port.len(), 1);
        assert_eq!(errors.len(), 3);
        assert_eq!(
            errors[2].to_string(),
            "perPortPolicy: port 80 is configured more than once"
        );
    }
}
