use super::{
    LocalObjectReference, LocalPolicyTargetReference, LocalPolicyTargetSelector, PolicyStatus,
};
use std::collections::BTreeMap;

/// TrafficPolicy attaches HTTP traffic behavior to Gateways, listeners,
/// HTTPRoutes and route rules. Every section is optional and merges
/// independently of the others.
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
    kind = "TrafficPolicy",
    root = "TrafficPolicy",
    status = "PolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicySpec {
    #[serde(default)]
    pub target_refs: Vec<LocalPolicyTargetReference>,
    #[serde(default)]
    pub target_selectors: Vec<LocalPolicyTargetSelector>,

    pub buffer: Option<Buffer>,
    pub ext_proc: Option<ExtProcPolicy>,
    pub transformation: Option<TransformationPolicy>,
    pub ext_auth: Option<ExtAuthPolicy>,
    pub rate_limit: Option<RateLimit>,
    pub cors: Option<CorsPolicy>,
    pub csrf: Option<CsrfPolicy>,
    pub header_modifiers: Option<HeaderModifiers>,
    pub auto_host_rewrite: Option<bool>,
    pub retry: Option<Retry>,
    pub timeouts: Option<Timeouts>,
    pub rbac: Option<Rbac>,
    pub jwt: Option<JwtAuthentication>,
    pub compression: Option<Compression>,
    pub decompression: Option<Decompression>,
    pub basic_auth: Option<BasicAuthPolicy>,
    pub url_rewrite: Option<UrlRewrite>,
    pub api_key_auth: Option<ApiKeyAuthentication>,
    pub oauth2: Option<OAuth2Policy>,
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
pub struct Buffer {
    /// Maximum request size as a Kubernetes quantity, e.g. `1Mi`.
    pub max_request_size: Option<String>,
    pub disable: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtProcPolicy {
    pub extension_ref: Option<LocalObjectReference>,
    pub processing_mode: Option<ProcessingMode>,
    pub disable: Option<bool>,
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
pub struct ProcessingMode {
    pub request_header_mode: Option<String>,
    pub response_header_mode: Option<String>,
    pub request_body_mode: Option<String>,
    pub response_body_mode: Option<String>,
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
pub struct TransformationPolicy {
    pub request: Option<Transform>,
    pub response: Option<Transform>,
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
pub struct Transform {
    /// Headers to set; values are templates.
    pub set: Option<Vec<HeaderValue>>,
    pub add: Option<Vec<HeaderValue>>,
    pub remove: Option<Vec<String>>,
    pub body: Option<BodyTransformation>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct HeaderValue {
    pub name: String,
    pub value: String,
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
pub struct BodyTransformation {
    /// `AsString` or `AsJson`.
    pub parse_as: Option<String>,
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuthPolicy {
    pub extension_ref: Option<LocalObjectReference>,
    pub context_extensions: Option<BTreeMap<String, String>>,
    pub disable: Option<bool>,
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
pub struct RateLimit {
    pub local: Option<LocalRateLimit>,
    pub global: Option<GlobalRateLimit>,
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
pub struct LocalRateLimit {
    pub token_bucket: Option<TokenBucket>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenBucket {
    pub max_tokens: u32,
    pub tokens_per_fill: Option<u32>,
    /// A duration such as `1s`.
    pub fill_interval: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRateLimit {
    pub extension_ref: LocalObjectReference,
    #[serde(default)]
    pub descriptors: Vec<RateLimitDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct RateLimitDescriptor {
    #[serde(default)]
    pub entries: Vec<RateLimitDescriptorEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDescriptorEntry {
    /// `Generic`, `Header`, `RemoteAddress` or `Path`.
    #[serde(rename = "type")]
    pub r#type: String,
    pub key: Option<String>,
    pub value: Option<String>,
    pub header: Option<String>,
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
pub struct CorsPolicy {
    pub allow_origins: Option<Vec<String>>,
    pub allow_methods: Option<Vec<String>>,
    pub allow_headers: Option<Vec<String>>,
    pub expose_headers: Option<Vec<String>>,
    pub max_age: Option<u32>,
    pub allow_credentials: Option<bool>,
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
pub struct CsrfPolicy {
    pub percentage_enabled: Option<u32>,
    pub percentage_shadowed: Option<u32>,
    pub additional_origins: Option<Vec<String>>,
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
pub struct HeaderModifiers {
    pub request: Option<HeaderFilter>,
    pub response: Option<HeaderFilter>,
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
pub struct HeaderFilter {
    pub set: Option<Vec<HeaderValue>>,
    pub add: Option<Vec<HeaderValue>>,
    pub remove: Option<Vec<String>>,
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
pub struct Retry {
    pub attempts: Option<u32>,
    pub per_try_timeout: Option<String>,
    pub retry_on: Option<Vec<String>>,
    pub status_codes: Option<Vec<u16>>,
    pub backoff_base_interval: Option<String>,
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
pub struct Timeouts {
    pub request: Option<String>,
    pub stream_idle: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rbac {
    /// `Allow` (default) or `Deny`.
    pub action: Option<String>,
    /// CEL expressions; the action applies when any expression matches.
    #[serde(default)]
    pub match_expressions: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthentication {
    pub extension_ref: Option<LocalObjectReference>,
    pub disable: Option<bool>,
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
pub struct Compression {
    pub response_compression: Option<ResponseCompression>,
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
pub struct ResponseCompression {
    pub algorithms: Option<Vec<String>>,
    pub min_content_length: Option<u32>,
    pub disable: Option<bool>,
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
pub struct Decompression {
    pub request: Option<bool>,
    pub response: Option<bool>,
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
pub struct BasicAuthPolicy {
    /// Inline htpasswd entries (`user:hash`).
    pub users: Option<Vec<String>>,
    /// A Secret holding htpasswd entries under the `.htaccess` key.
    pub secret_ref: Option<LocalObjectReference>,
    pub disable: Option<bool>,
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
pub struct UrlRewrite {
    pub path_regex: Option<RegexRewrite>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct RegexRewrite {
    pub pattern: String,
    pub substitution: String,
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
pub struct ApiKeyAuthentication {
    #[serde(default)]
    pub key_sources: Vec<ApiKeySource>,
    /// A Secret whose entries map client ids to API keys.
    pub secret_ref: Option<LocalObjectReference>,
    pub disable: Option<bool>,
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
pub struct ApiKeySource {
    pub header: Option<String>,
    pub query: Option<String>,
    pub cookie: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Policy {
    pub extension_ref: LocalObjectReference,
    pub redirect_uri: Option<String>,
    pub logout_path: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}
