use super::{merge::deep_merge_fields, MergeCtx, MergeablePolicy, PolicyError, PolicyIr};
use std::time::Duration;

/// Connection settings for the clusters of the backends a
/// BackendConfigPolicy targets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendConfigPolicyIr {
    pub connect_timeout: Option<Duration>,
    pub per_connection_buffer_limit_bytes: Option<u32>,
    pub tcp_keepalive: Option<TcpKeepaliveIr>,
    pub common_http_protocol_options: Option<CommonHttpProtocolOptionsIr>,
    pub http1_protocol_options: Option<Http1ProtocolOptionsIr>,
    pub load_balancer: Option<LoadBalancerIr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TcpKeepaliveIr {
    pub probes: Option<u32>,
    pub time: Option<Duration>,
    pub interval: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommonHttpProtocolOptionsIr {
    pub idle_timeout: Option<Duration>,
    pub max_headers_count: Option<u32>,
    pub max_stream_duration: Option<Duration>,
    pub max_requests_per_connection: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Http1ProtocolOptionsIr {
    pub enable_trailers: Option<bool>,
    pub header_format: Option<HeaderFormat>,
    pub override_stream_error_on_invalid_http_message: Option<bool>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeaderFormat {
    ProperCase,
    PreserveCase,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadBalancerIr {
    pub algorithm: Option<LoadBalancerAlgorithm>,
    pub healthy_panic_threshold: Option<u32>,
    pub update_merge_window: Option<Duration>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadBalancerAlgorithm {
    RoundRobin,
    LeastRequest,
    Random,
    RingHash,
    Maglev,
}

// === impl BackendConfigPolicyIr ===

impl MergeablePolicy for BackendConfigPolicyIr {
    fn from_ir(ir: &PolicyIr) -> Option<&Self> {
        match ir {
            PolicyIr::BackendConfig(ir) => Some(ir.as_ref()),
            _ => None,
        }
    }

    fn set_fields(&self) -> Vec<&'static str> {
        [
            ("connectTimeout", self.connect_timeout.is_some()),
            (
                "perConnectionBufferLimitBytes",
                self.per_connection_buffer_limit_bytes.is_some(),
            ),
            ("tcpKeepalive", self.tcp_keepalive.is_some()),
            (
                "commonHttpProtocolOptions",
                self.common_http_protocol_options.is_some(),
            ),
            ("http1ProtocolOptions", self.http1_protocol_options.is_some()),
            ("loadBalancer", self.load_balancer.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }

    fn merge_from(&mut self, other: &Self, ctx: &mut MergeCtx<'_>) {
        ctx.leaf("connectTimeout", &mut self.connect_timeout, &other.connect_timeout);
        ctx.leaf(
            "perConnectionBufferLimitBytes",
            &mut self.per_connection_buffer_limit_bytes,
            &other.per_connection_buffer_limit_bytes,
        );
        ctx.nested("tcpKeepalive", &mut self.tcp_keepalive, &other.tcp_keepalive);
        ctx.nested(
            "commonHttpProtocolOptions",
            &mut self.common_http_protocol_options,
            &other.common_http_protocol_options,
        );
        ctx.nested(
            "http1ProtocolOptions",
            &mut self.http1_protocol_options,
            &other.http1_protocol_options,
        );
        ctx.nested("loadBalancer", &mut self.load_balancer, &other.load_balancer);
    }
}

impl BackendConfigPolicyIr {
    pub fn validate(&self) -> Vec<PolicyError> {
        let mut errors = Vec::new();
        if let Some(t) = self
            .load_balancer
            .as_ref()
            .and_then(|lb| lb.healthy_panic_threshold)
            .filter(|t| *t > 100)
        {
            errors.push(PolicyError::InvalidField {
                field: "loadBalancer.healthyPanicThreshold",
                message: format!("threshold {t} must be at most 100"),
            });
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            errors.push(PolicyError::InvalidField {
                field: "connectTimeout",
                message: "must be greater than zero".to_string(),
            });
        }
        errors
    }
}

deep_merge_fields!(TcpKeepaliveIr {
    probes => "keepAliveProbes",
    time => "keepAliveTime",
    interval => "keepAliveInterval",
});

deep_merge_fields!(CommonHttpProtocolOptionsIr {
    idle_timeout => "idleTimeout",
    max_headers_count => "maxHeadersCount",
    max_stream_duration => "maxStreamDuration",
    max_requests_per_connection => "maxRequestsPerConnection",
});

deep_merge_fields!(Http1ProtocolOptionsIr {
    enable_trailers => "enableTrailers",
    header_format => "headerFormat",
    override_stream_error_on_invalid_http_message => "overrideStreamErrorOnInvalidHttpMessage",
});

deep_merge_fields!(LoadBalancerIr {
    algorithm => "algorithm",
    healthy_panic_threshold => "healthyPanicThreshold",
    update_merge_window => "updateMergeWindow",
});

// === impl HeaderFormat ===

impl std::str::FromStr for HeaderFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ProperCaseHeaderKeyFormat" => Ok(Self::ProperCase),
            "PreserveCaseHeaderKeyFormat" => Ok(Self::PreserveCase),
            _ => Err(format!("unknown header format {s:?}")),
        }
    }
}

// === impl LoadBalancerAlgorithm ===

impl std::str::FromStr for LoadBalancerAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RoundRobin" => Ok(Self::RoundRobin),
            "LeastRequest" => Ok(Self::LeastRequest),
            "Random" => Ok(Self::Random),
            "RingHash" => Ok(Self::RingHash),
            "Maglev" => Ok(Self::Maglev),
            _ => Err(format!("unknown load balancer algorithm {s:?}")),
        }
    }
}
