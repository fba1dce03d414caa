use crate::routes::BackendRef;

/// GatewayExtension describes an external provider (an authorization server,
/// an external processor, a rate limit service, JWT or OAuth2 providers)
/// referenced by TrafficPolicy sections.
///
/// A `kgateway.dev/policy-weight` annotation on the extension overrides the
/// weight of the policy sections that use it.
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
    kind = "GatewayExtension",
    root = "GatewayExtension",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayExtensionSpec {
    pub ext_auth: Option<ExtAuthProvider>,
    pub ext_proc: Option<ExtProcProvider>,
    pub rate_limit: Option<RateLimitProvider>,
    pub jwt: Option<JwtProvider>,
    pub oauth2: Option<OAuth2Provider>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuthProvider {
    pub grpc_service: GrpcService,
    pub fail_open: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtProcProvider {
    pub grpc_service: GrpcService,
    pub fail_open: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitProvider {
    pub grpc_service: GrpcService,
    pub domain: String,
    pub fail_open: Option<bool>,
    pub timeout: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct JwtProvider {
    #[serde(default)]
    pub providers: Vec<JwtIssuer>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwtIssuer {
    pub name: String,
    pub issuer: Option<String>,
    #[serde(default)]
    pub audiences: Vec<String>,
    /// Inline JWKS document.
    pub local_jwks: Option<String>,
    pub remote_jwks_uri: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Provider {
    pub issuer_uri: String,
    pub client_id: String,
    /// A Secret holding the client secret under the `client-secret` key.
    pub client_secret_ref: super::LocalObjectReference,
    pub backend_ref: BackendRef,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrpcService {
    pub backend_ref: BackendRef,
    pub authority: Option<String>,
}
