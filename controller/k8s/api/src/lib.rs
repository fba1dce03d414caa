#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod gateway;
pub mod inference_pool;
pub mod labels;
pub mod policy;
pub mod reference_grant;
pub mod routes;

pub use self::{
    backend::Backend,
    gateway::Gateway,
    inference_pool::InferencePool,
    labels::Labels,
    policy::{BackendConfigPolicy, GatewayExtension, ListenerPolicy, TrafficPolicy},
    reference_grant::ReferenceGrant,
    routes::{GrpcRoute, HttpRoute, TcpRoute, TlsRoute},
};
pub use k8s_openapi::{
    api::core::v1::{ConfigMap, Namespace, Secret, Service, ServicePort, ServiceSpec},
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    Client,
};

/// The API group of the Kubernetes Gateway API resources.
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// The API group of the gateway controller's own resources.
pub const KGATEWAY_API_GROUP: &str = "gateway.kgateway.dev";

/// Returns the group of a resource type, normalizing the core group to `""`.
pub fn group_of<T>() -> String
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    let group = T::group(&dt);
    if group == "core" {
        return String::new();
    }
    group.into_owned()
}

/// Returns the kind of a resource type.
pub fn kind_of<T>() -> String
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    T::kind(&dt).into_owned()
}
