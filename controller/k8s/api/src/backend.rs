/// Backend describes a destination that is not a Kubernetes Service, such as
/// a set of static hosts.
///
/// Backends are addressed without a port: their hosts carry ports already.
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
    kind = "Backend",
    root = "Backend",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    #[serde(rename = "static")]
    pub static_: Option<StaticBackend>,
    pub dynamic_forward_proxy: Option<DynamicForwardProxyBackend>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticBackend {
    #[serde(default)]
    pub hosts: Vec<Host>,
    /// Application protocol of the hosts, e.g. `http2`.
    pub app_protocol: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct Host {
    pub host: String,
    pub port: u16,
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
pub struct DynamicForwardProxyBackend {
    pub enable_tls: Option<bool>,
}
