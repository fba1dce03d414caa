use std::collections::BTreeMap;

/// InferencePool groups model server pods behind an endpoint picker that
/// chooses the pod for each request.
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
    group = "inference.networking.k8s.io",
    version = "v1",
    kind = "InferencePool",
    root = "InferencePool",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InferencePoolSpec {
    #[serde(default)]
    pub selector: PoolSelector,

    /// Ports of the selected pods that serve inference traffic. Exactly one
    /// is supported.
    #[serde(default)]
    pub target_ports: Vec<Port>,

    pub endpoint_picker_ref: EndpointPickerRef,
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
pub struct PoolSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct Port {
    pub number: u16,
}

/// The Service of the endpoint picker extension.
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
pub struct EndpointPickerRef {
    pub group: Option<String>,
    #[serde(default = "service_kind")]
    pub kind: String,
    pub name: String,
    pub port: Option<Port>,
}

fn service_kind() -> String {
    "Service".to_string()
}
