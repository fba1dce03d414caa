use crate::{routes::ParentReference, Condition};

mod backend_config_policy;
mod gateway_extension;
mod listener_policy;
mod target_ref;
mod traffic_policy;

pub use self::{
    backend_config_policy::*, gateway_extension::*, listener_policy::*, target_ref::*,
    traffic_policy::*,
};

/// Status of a policy, reported per ancestor (the Gateway or route the policy
/// attaches through).
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub ancestors: Vec<PolicyAncestorStatus>,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAncestorStatus {
    pub ancestor_ref: ParentReference,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A reference to an object in the policy's own namespace.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
pub struct LocalObjectReference {
    pub name: String,
}
