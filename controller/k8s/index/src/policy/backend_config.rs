use gateway_controller_core::{
    policy::{
        backend_config::{
            CommonHttpProtocolOptionsIr, HeaderFormat, Http1ProtocolOptionsIr,
            LoadBalancerAlgorithm, LoadBalancerIr, TcpKeepaliveIr,
        },
        BackendConfigPolicyIr, PolicyError,
    },
    units,
};
use gateway_controller_k8s_api::BackendConfigPolicy;
use std::time::Duration;

pub(super) fn convert(
    policy: &BackendConfigPolicy,
    errors: &mut Vec<PolicyError>,
) -> BackendConfigPolicyIr {
    let spec = &policy.spec;
    let mut duration = |field: &'static str, value: &Option<String>| -> Option<Duration> {
        let value = value.as_deref()?;
        units::parse_duration(value)
            .map_err(|e| {
                errors.push(PolicyError::InvalidField {
                    field,
                    message: e.to_string(),
                })
            })
            .ok()
    };

    let connect_timeout = duration("connectTimeout", &spec.connect_timeout);

    let tcp_keepalive = spec.tcp_keepalive.as_ref().map(|k| TcpKeepaliveIr {
        probes: k.keep_alive_probes,
        time: duration("tcpKeepalive.keepAliveTime", &k.keep_alive_time),
        interval: duration("tcpKeepalive.keepAliveInterval", &k.keep_alive_interval),
    });

    let common_http_protocol_options =
        spec.common_http_protocol_options
            .as_ref()
            .map(|o| CommonHttpProtocolOptionsIr {
                idle_timeout: duration("commonHttpProtocolOptions.idleTimeout", &o.idle_timeout),
                max_headers_count: o.max_headers_count,
                max_stream_duration: duration(
                    "commonHttpProtocolOptions.maxStreamDuration",
                    &o.max_stream_duration,
                ),
                max_requests_per_connection: o.max_requests_per_connection,
            });

    let load_balancer = spec.load_balancer.as_ref().map(|lb| LoadBalancerIr {
        algorithm: None,
        healthy_panic_threshold: lb.healthy_panic_threshold,
        update_merge_window: duration("loadBalancer.updateMergeWindow", &lb.update_merge_window),
    });

    let mut ir = BackendConfigPolicyIr {
        connect_timeout,
        per_connection_buffer_limit_bytes: spec.per_connection_buffer_limit_bytes,
        tcp_keepalive,
        common_http_protocol_options,
        http1_protocol_options: None,
        load_balancer,
    };

    if let Some(o) = &spec.http1_protocol_options {
        let header_format = o.header_format.as_deref().and_then(|f| {
            f.parse::<HeaderFormat>()
                .map_err(|message| {
                    errors.push(PolicyError::InvalidField {
                        field: "http1ProtocolOptions.headerFormat",
                        message,
                    })
                })
                .ok()
        });
        ir.http1_protocol_options = Some(Http1ProtocolOptionsIr {
            enable_trailers: o.enable_trailers,
            header_format,
            override_stream_error_on_invalid_http_message: o
                .override_stream_error_on_invalid_http_message,
        });
    }

    if let (Some(lb), Some(ir_lb)) = (&spec.load_balancer, ir.load_balancer.as_mut()) {
        ir_lb.algorithm = lb.algorithm.as_deref().and_then(|a| {
            a.parse::<LoadBalancerAlgorithm>()
                .map_err(|message| {
                    errors.push(PolicyError::InvalidField {
                        field: "loadBalancer.algorithm",
                        message,
                    })
                })
                .ok()
        });
    }

    ir
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_k8s_api::{
        policy::{BackendConfigPolicySpec, Http1ProtocolOptions, LoadBalancer, TcpKeepalive},
        ObjectMeta,
    };
    use pretty_assertions::assert_eq;

    fn policy(spec: BackendConfigPolicySpec) -> BackendConfigPolicy {
        BackendConfigPolicy {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("bcp".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    #[test]
    fn converts_connection_settings() {
        let mut errors = vec![];
        let ir = convert(
            &policy(BackendConfigPolicySpec {
                connect_timeout: Some("5s".to_string()),
                tcp_keepalive: Some(TcpKeepalive {
                    keep_alive_probes: Some(3),
                    keep_alive_time: Some("1m".to_string()),
                    keep_alive_interval: None,
                }),
                load_balancer: Some(LoadBalancer {
                    algorithm: Some("LeastRequest".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            &mut errors,
        );
        assert_eq!(errors, vec![]);
        assert_eq!(ir.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            ir.tcp_keepalive,
            Some(TcpKeepaliveIr {
                probes: Some(3),
                time: Some(Duration::from_secs(60)),
                interval: None,
            })
        );
        assert_eq!(
            ir.load_balancer.and_then(|lb| lb.algorithm),
            Some(LoadBalancerAlgorithm::LeastRequest)
        );
    }

    #[test]
    fn invalid_values_are_dropped_with_errors() {
        let mut errors = vec![];
        let ir = convert(
            &policy(BackendConfigPolicySpec {
                connect_timeout: Some("later".to_string()),
                http1_protocol_options: Some(Http1ProtocolOptions {
                    header_format: Some("Shouting".to_string()),
                    enable_trailers: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            &mut errors,
        );
        assert_eq!(ir.connect_timeout, None);
        let http1 = ir.http1_protocol_options.expect("http1 options");
        assert_eq!(http1.enable_trailers, Some(true));
        assert_eq!(http1.header_format, None);
        assert_eq!(
            errors
                .iter()
                .map(|e| match e {
                    PolicyError::InvalidField { field, .. } => *field,
                    _ => "other",
                })
                .collect::<Vec<_>>(),
            vec!["connectTimeout", "http1ProtocolOptions.headerFormat"]
        );
    }
}
