use super::{LocalPolicyTargetReference, LocalPolicyTargetSelector, PolicyStatus};

/// ListenerPolicy configures the proxy listeners generated for a Gateway.
///
/// `default` applies to every port of the targeted Gateway; `perPort` entries
/// take precedence for their port.
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
    kind = "ListenerPolicy",
    root = "ListenerPolicy",
    status = "PolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ListenerPolicySpec {
    #[serde(default)]
    pub target_refs: Vec<LocalPolicyTargetReference>,
    #[serde(default)]
    pub target_selectors: Vec<LocalPolicyTargetSelector>,
    pub default: Option<ListenerConfig>,
    #[serde(default)]
    pub per_port: Vec<ListenerPortConfig>,
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
pub struct ListenerConfig {
    pub proxy_protocol: Option<ProxyProtocolConfig>,
    pub per_connection_buffer_limit_bytes: Option<u32>,
    pub http_settings: Option<HttpListenerConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct ListenerPortConfig {
    pub port: u16,
    pub listener: ListenerConfig,
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
pub struct ProxyProtocolConfig {
    /// Allow connections that do not carry a PROXY header.
    pub allow_requests_without_proxy_protocol: Option<bool>,
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
pub struct HttpListenerConfig {
    pub use_remote_address: Option<bool>,
    pub xff_num_trusted_hops: Option<u32>,
    pub server_header_transformation: Option<String>,
    pub stream_idle_timeout: Option<String>,
    pub idle_timeout: Option<String>,
    pub preserve_http1_header_case: Option<bool>,
    pub accept_http10: Option<bool>,
}
