use crate::Condition;

mod grpc;
mod http;
mod tcp;
mod tls;

pub use self::{
    grpc::{GrpcMethodMatch, GrpcRoute, GrpcRouteMatch, GrpcRouteRule, GrpcRouteSpec},
    http::{
        HttpHeader, HttpHeaderFilter, HttpHeaderMatch, HttpPathMatch, HttpPathModifier,
        HttpQueryParamMatch, HttpRequestRedirectFilter, HttpRoute, HttpRouteFilter,
        HttpRouteMatch, HttpRouteRule, HttpRouteSpec, HttpUrlRewriteFilter,
    },
    tcp::{TcpRoute, TcpRouteRule, TcpRouteSpec},
    tls::{TlsRoute, TlsRouteRule, TlsRouteSpec},
};

/// ParentReference identifies an API object (usually a Gateway) that a route
/// wants to be attached to.
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
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub section_name: Option<String>,
    pub port: Option<u16>,
}

/// BackendRef references an object traffic is forwarded to.
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
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub name: String,
    pub namespace: Option<String>,
    pub port: Option<u16>,
    pub weight: Option<u32>,
}

/// Status shared by all route kinds.
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
pub struct RouteStatus {
    #[serde(default)]
    pub parents: Vec<RouteParentStatus>,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteParentStatus {
    pub parent_ref: ParentReference,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
