use super::{MergeCtx, MergeablePolicy, PolicyError, PolicyIr};
use std::{collections::BTreeMap, time::Duration};

/// Listener settings applied to every port of a Gateway, optionally
/// overridden per port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerPolicyIr {
    pub default: Option<ListenerSettings>,
    pub per_port: BTreeMap<u16, ListenerSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerSettings {
    pub proxy_protocol: Option<ProxyProtocolIr>,
    pub per_connection_buffer_limit_bytes: Option<u32>,
    pub http: Option<HttpListenerSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyProtocolIr {
    pub allow_requests_without_proxy_protocol: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpListenerSettings {
    pub use_remote_address: Option<bool>,
    pub xff_num_trusted_hops: Option<u32>,
    pub server_header_transformation: Option<String>,
    pub stream_idle_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub preserve_http1_header_case: Option<bool>,
    pub accept_http10: Option<bool>,
}

const SERVER_HEADER_TRANSFORMATIONS: [&str; 3] = ["Overwrite", "AppendIfAbsent", "PassThrough"];

// === impl ListenerPolicyIr ===

impl MergeablePolicy for ListenerPolicyIr {
    fn from_ir(ir: &PolicyIr) -> Option<&Self> {
        match ir {
            PolicyIr::Listener(ir) => Some(ir.as_ref()),
            _ => None,
        }
    }

    fn set_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.default.is_some() {
            fields.push("default");
        }
        if !self.per_port.is_empty() {
            fields.push("perPortPolicy");
        }
        fields
    }

    /// Listener settings always merge field by field. A port configured only
    /// by `other` is taken whole.
    fn merge_from(&mut self, other: &Self, ctx: &mut MergeCtx<'_>) {
        if let Some(src) = &other.default {
            let dst = self.default.get_or_insert_with(Default::default);
            dst.merge_fields("default", src, ctx);
        }

        for (port, src) in &other.per_port {
            match self.per_port.get_mut(port) {
                Some(dst) => dst.merge_fields(&format!("perPortPolicy[{port}]"), src, ctx),
                None => {
                    self.per_port.insert(*port, src.clone());
                    ctx.record(format!("perPortPolicy[{port}]"));
                }
            }
        }
    }
}

impl ListenerPolicyIr {
    /// The settings in effect on `port`: the port's own settings with unset
    /// fields taken from the default.
    pub fn for_port(&self, port: u16) -> Option<ListenerSettings> {
        match (self.per_port.get(&port), &self.default) {
            (None, None) => None,
            (None, Some(d)) => Some(d.clone()),
            (Some(p), None) => Some(p.clone()),
            (Some(p), Some(d)) => Some(p.clone().or(d)),
        }
    }

    pub fn validate(&self) -> Vec<PolicyError> {
        self.default
            .iter()
            .chain(self.per_port.values())
            .filter_map(|s| s.http.as_ref()?.server_header_transformation.as_deref())
            .filter(|v| !SERVER_HEADER_TRANSFORMATIONS.contains(v))
            .map(|v| PolicyError::InvalidField {
                field: "httpSettings.serverHeaderTransformation",
                message: format!("unknown server header transformation {v:?}"),
            })
            .collect()
    }
}

// === impl ListenerSettings ===

impl ListenerSettings {
    fn merge_fields(&mut self, prefix: &str, other: &Self, ctx: &mut MergeCtx<'_>) {
        ctx.fill(
            &format!("{prefix}.proxyProtocol"),
            &mut self.proxy_protocol,
            &other.proxy_protocol,
        );
        ctx.fill(
            &format!("{prefix}.perConnectionBufferLimitBytes"),
            &mut self.per_connection_buffer_limit_bytes,
            &other.per_connection_buffer_limit_bytes,
        );

        let Some(src) = &other.http else {
            return;
        };
        let dst = self.http.get_or_insert_with(Default::default);
        let prefix = format!("{prefix}.httpSettings");
        macro_rules! fill_http {
            ($($field:ident => $name:literal),+ $(,)?) => {
                $( ctx.fill(&format!("{prefix}.{}", $name), &mut dst.$field, &src.$field); )+
            };
        }
        fill_http! {
            use_remote_address => "useRemoteAddress",
            xff_num_trusted_hops => "xffNumTrustedHops",
            server_header_transformation => "serverHeaderTransformation",
            stream_idle_timeout => "streamIdleTimeout",
            idle_timeout => "idleTimeout",
            preserve_http1_header_case => "preserveHttp1HeaderCase",
            accept_http10 => "acceptHttp10",
        }
    }

    fn or(mut self, fallback: &Self) -> Self {
        if self.proxy_protocol.is_none() {
            self.proxy_protocol = fallback.proxy_protocol.clone();
        }
        if self.per_connection_buffer_limit_bytes.is_none() {
            self.per_connection_buffer_limit_bytes = fallback.per_connection_buffer_limit_bytes;
        }
        match (&mut self.http, &fallback.http) {
            (None, fb) => self.http = fb.clone(),
            (Some(http), Some(fb)) => {
                http.use_remote_address = http.use_remote_address.or(fb.use_remote_address);
                http.xff_num_trusted_hops = http.xff_num_trusted_hops.or(fb.xff_num_trusted_hops);
                if http.server_header_transformation.is_none() {
                    http.server_header_transformation = fb.server_header_transformation.clone();
                }
                http.stream_idle_timeout = http.stream_idle_timeout.or(fb.stream_idle_timeout);
                http.idle_timeout = http.idle_timeout.or(fb.idle_timeout);
                http.preserve_http1_header_case = http
                    .preserve_http1_header_case
                    .or(fb.preserve_http1_header_case);
                http.accept_http10 = http.accept_http10.or(fb.accept_http10);
            }
            (Some(_), None) => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        policy::{
            merge_policies, InheritedPolicyPriority, PolicyAttachment, PolicyWrapper,
            Specificity,
        },
        GroupKind, ObjectSource,
    };
    use gateway_controller_k8s_api::ListenerPolicy;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn source(name: &str) -> ObjectSource {
        ObjectSource::new(GroupKind::of::<ListenerPolicy>(), "default", name.to_string())
    }

    fn attach(name: &str, weight: i32, ir: ListenerPolicyIr) -> PolicyAttachment {
        PolicyAttachment::new(
            Arc::new(PolicyWrapper {
                source: source(name),
                generation: None,
                creation_timestamp: None,
                ir: PolicyIr::Listener(Arc::new(ir)),
                target_refs: vec![],
                errors: vec![],
                precedence_weight: weight,
            }),
            Specificity::Name,
        )
    }

    fn buffer_limit(limit: Option<u32>) -> ListenerSettings {
        ListenerSettings {
            per_connection_buffer_limit_bytes: limit,
            ..Default::default()
        }
    }

    #[test]
    fn buffer_limit_equality() {
        let pairs = [
            (None, None, true),
            (Some(1024), Some(1024), true),
            (Some(1024), Some(2048), false),
            (Some(1024), None, false),
            (None, Some(0), false),
            (Some(0), Some(0), true),
        ];
        for (a, b, equal) in pairs {
            let (a, b) = (buffer_limit(a), buffer_limit(b));
            assert_eq!(a == b, equal, "{a:?} == {b:?}");
            assert_eq!(b == a, equal, "{b:?} == {a:?}");
            assert_eq!(a, a.clone());
        }
    }

    #[test]
    fn equality_is_transitive() {
        let a = ListenerPolicyIr {
            default: Some(buffer_limit(Some(10))),
            per_port: btreemap! { 8080 => buffer_limit(None) },
        };
        let b = a.clone();
        let c = b.clone();
        assert!(a == b && b == c && a == c);
    }

    #[test]
    fn merges_two_policies_on_one_listener() {
        let first = attach(
            "a",
            1,
            ListenerPolicyIr {
                default: Some(ListenerSettings {
                    per_connection_buffer_limit_bytes: Some(1024),
                    ..Default::default()
                }),
                per_port: btreemap! {
                    8080 => ListenerSettings {
                        http: Some(HttpListenerSettings {
                            xff_num_trusted_hops: Some(2),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                },
            },
        );
        let second = attach(
            "b",
            0,
            ListenerPolicyIr {
                default: Some(ListenerSettings {
                    per_connection_buffer_limit_bytes: Some(2048),
                    proxy_protocol: Some(ProxyProtocolIr::default()),
                    ..Default::default()
                }),
                per_port: btreemap! {
                    8080 => ListenerSettings {
                        http: Some(HttpListenerSettings {
                            xff_num_trusted_hops: Some(5),
                            use_remote_address: Some(true),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    9090 => buffer_limit(Some(1)),
                },
            },
        );

        let merged = merge_policies::<ListenerPolicyIr>(
            &[second, first],
            InheritedPolicyPriority::ShallowMergePreferChild.into(),
        )
        .expect("must merge");

        let default = merged.ir.default.as_ref().expect("default");
        assert_eq!(default.per_connection_buffer_limit_bytes, Some(1024));
        assert_eq!(default.proxy_protocol, Some(ProxyProtocolIr::default()));
        assert_eq!(
            merged.ir.per_port[&8080].http,
            Some(HttpListenerSettings {
                xff_num_trusted_hops: Some(2),
                use_remote_address: Some(true),
                ..Default::default()
            })
        );
        assert_eq!(merged.ir.per_port[&9090], buffer_limit(Some(1)));

        assert_eq!(
            merged.origins.get("default.perConnectionBufferLimitBytes"),
            Some(&source("a"))
        );
        assert_eq!(
            merged.origins.get("perPortPolicy[8080].httpSettings.useRemoteAddress"),
            Some(&source("b"))
        );
        assert_eq!(merged.origins.get("perPortPolicy[9090]"), Some(&source("b")));
    }

    #[test]
    fn port_settings_fall_back_to_default() {
        let ir = ListenerPolicyIr {
            default: Some(ListenerSettings {
                per_connection_buffer_limit_bytes: Some(4096),
                http: Some(HttpListenerSettings {
                    accept_http10: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            per_port: btreemap! {
                443 => ListenerSettings {
                    http: Some(HttpListenerSettings {
                        idle_timeout: Some(Duration::from_secs(30)),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            },
        };
        let settings = ir.for_port(443).expect("settings");
        assert_eq!(settings.per_connection_buffer_limit_bytes, Some(4096));
        assert_eq!(
            settings.http,
            Some(HttpListenerSettings {
                accept_http10: Some(true),
                idle_timeout: Some(Duration::from_secs(30)),
                ..Default::default()
            })
        );
        assert_eq!(ir.for_port(80), ir.default);
        assert_eq!(ListenerPolicyIr::default().for_port(80), None);
    }

    #[test]
    fn rejects_unknown_server_header_transformation() {
        let ir = ListenerPolicyIr {
            default: Some(ListenerSettings {
                http: Some(HttpListenerSettings {
                    server_header_transformation: Some("Rewrite".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            per_port: Default::default(),
        };
        assert_eq!(ir.validate().len(), 1);
    }
}
