use super::{LocalPolicyTargetReference, LocalPolicyTargetSelector, PolicyStatus};

/// BackendConfigPolicy configures the upstream connections to Services and
/// Backends.
#[derive(
    Clone,
    Debug,
    Default,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "gateway.kgateway.dev",
    version = "v1alpha1",
    kind = "BackendConfigPolicy",
    root = "BackendConfigPolicy",
    status = "PolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfigPolicySpec {
    #[serde(default)]
    pub target_refs: Vec<LocalPolicyTargetReference>,
    #[serde(default)]
    pub target_selectors: Vec<LocalPolicyTargetSelector>,
    pub connect_timeout: Option<String>,
    pub per_connection_buffer_limit_bytes: Option<u32>,
    pub tcp_keepalive: Option<TcpKeepalive>,
    pub common_http_protocol_options: Option<CommonHttpProtocolOptions>,
    pub http1_protocol_options: Option<Http1ProtocolOptions>,
    pub load_balancer: Option<LoadBalancer>,
}

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct TcpKeepalive {
    pub keep_alive_probes: Option<u32>,
    pub keep_alive_time: Option<String>,
    pub keep_alive_interval: Option<String>,
}

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct CommonHttpProtocolOptions {
    pub idle_timeout: Option<String>,
    pub max_headers_count: Option<u32>,
    pub max_stream_duration: Option<String>,
    pub max_requests_per_connection: Option<u32>,
}

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Http1ProtocolOptions {
    pub enable_trailers: Option<bool>,
    /// `PreserveCaseHeaderKeyFormat` or `ProperCaseHeaderKeyFormat`.
    pub header_format: Option<String>,
    pub override_stream_error_on_invalid_http_message: Option<bool>,
}

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    /// `RoundRobin`, `LeastRequest`, `Random`, `RingHash` or `Maglev`.
    pub algorithm: Option<String>,
    pub healthy_panic_threshold: Option<u32>,
    pub update_merge_window: Option<String>,
}
