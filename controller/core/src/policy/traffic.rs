//! The translated form of a TrafficPolicy.
//!
//! Each sub-policy merges independently: merging two TrafficPolicies is the
//! union of the per-field merges, never an all-or-nothing replace.

use super::{
    merge::deep_merge_fields, MergeCtx, MergeablePolicy, PolicyError, PolicyIr,
};
use crate::{http_route::HeaderModifierFilter, ObjectSource};
use regex::Regex;
use std::{collections::BTreeMap, fmt, time::Duration};

/// A validated CSRF percentage may not exceed this.
pub const MAX_PERCENTAGE: u32 = 100;

/// The smallest local rate limit fill interval the proxy accepts.
pub const MIN_FILL_INTERVAL: Duration = Duration::from_millis(50);

const HEADER_PROCESSING_MODES: [&str; 3] = ["DEFAULT", "SEND", "SKIP"];
const BODY_PROCESSING_MODES: [&str; 5] = [
    "NONE",
    "STREAMED",
    "BUFFERED",
    "BUFFERED_PARTIAL",
    "FULL_DUPLEX_STREAMED",
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrafficPolicyIr {
    pub buffer: Option<BufferIr>,
    pub ext_proc: Option<ExtProcIr>,
    pub transformation: Option<TransformationIr>,
    pub rustformation: Option<TransformationIr>,
    pub ext_auth: Option<ExtAuthIr>,
    pub local_rate_limit: Option<LocalRateLimitIr>,
    pub rate_limit: Option<GlobalRateLimitIr>,
    pub cors: Option<CorsIr>,
    pub csrf: Option<CsrfIr>,
    pub header_modifiers: Option<HeaderModifiersIr>,
    pub auto_host_rewrite: Option<bool>,
    pub retry: Option<RetryIr>,
    pub timeouts: Option<TimeoutsIr>,
    pub rbac: Option<RbacIr>,
    pub jwt: Option<JwtIr>,
    pub compression: Option<CompressionIr>,
    pub decompression: Option<DecompressionIr>,
    pub basic_auth: Option<BasicAuthIr>,
    pub url_rewrite: Option<UrlRewriteIr>,
    pub api_key_auth: Option<ApiKeyAuthIr>,
    pub oauth2: Option<OAuth2Ir>,
}

/// A GatewayExtension referenced by a policy, with its precedence weight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionRef {
    pub source: ObjectSource,
    pub weight: i32,
}

/// A gRPC service resolved to the cluster that serves it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrpcServiceIr {
    pub cluster_name: String,
    pub authority: Option<String>,
}

/// A gRPC provider configured by a GatewayExtension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrpcProvider {
    pub extension: ExtensionRef,
    pub service: GrpcServiceIr,
    pub fail_open: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferIr {
    pub max_request_bytes: Option<u32>,
    pub disable: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtProcIr {
    Disabled,
    Enabled {
        provider: GrpcProvider,
        processing_mode: Option<ProcessingModeIr>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessingModeIr {
    pub request_header_mode: Option<String>,
    pub response_header_mode: Option<String>,
    pub request_body_mode: Option<String>,
    pub response_body_mode: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformationIr {
    pub request: Option<TransformIr>,
    pub response: Option<TransformIr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformIr {
    pub set: Vec<(String, String)>,
    pub add: Vec<(String, String)>,
    pub remove: Vec<String>,
    pub body: Option<BodyTransformIr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BodyTransformIr {
    AsString(Option<String>),
    AsJson(Option<String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtAuthIr {
    Disabled,
    Enabled {
        provider: GrpcProvider,
        context_extensions: BTreeMap<String, String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalRateLimitIr {
    pub max_tokens: u32,
    pub tokens_per_fill: u32,
    pub fill_interval: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalRateLimitIr {
    pub provider: GrpcProvider,
    pub domain: String,
    pub timeout: Option<Duration>,
    pub descriptors: Vec<Vec<DescriptorEntryIr>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorEntryIr {
    Generic { key: String, value: String },
    Header(String),
    RemoteAddress,
    Path,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorsIr {
    pub allow_origins: Option<Vec<String>>,
    pub allow_methods: Option<Vec<String>>,
    pub allow_headers: Option<Vec<String>>,
    pub expose_headers: Option<Vec<String>>,
    pub max_age: Option<u32>,
    pub allow_credentials: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CsrfIr {
    pub percentage_enabled: Option<u32>,
    pub percentage_shadowed: Option<u32>,
    pub additional_origins: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderModifiersIr {
    pub request: Option<HeaderModifierFilter>,
    pub response: Option<HeaderModifierFilter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryIr {
    pub attempts: Option<u32>,
    pub per_try_timeout: Option<Duration>,
    pub retry_on: Option<Vec<String>>,
    pub status_codes: Option<Vec<u16>>,
    pub backoff_base_interval: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeoutsIr {
    pub request: Option<Duration>,
    pub stream_idle: Option<Duration>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RbacAction {
    Allow,
    Deny,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RbacIr {
    pub action: RbacAction,
    pub match_expressions: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JwtIr {
    Disabled,
    Enabled {
        extension: ExtensionRef,
        providers: Vec<JwtProviderIr>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JwtProviderIr {
    pub name: String,
    pub issuer: Option<String>,
    pub audiences: Vec<String>,
    pub jwks: JwksSource,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JwksSource {
    Inline(String),
    Remote(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompressionIr {
    pub algorithms: Option<Vec<String>>,
    pub min_content_length: Option<u32>,
    pub disable: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecompressionIr {
    pub request: Option<bool>,
    pub response: Option<bool>,
}

#[derive(Clone, PartialEq, Eq)]
pub enum BasicAuthIr {
    Disabled,
    /// htpasswd-formatted `user:hash` entries.
    Enabled { users: Vec<String> },
}

#[derive(Clone, Debug)]
pub struct UrlRewriteIr {
    pub pattern: Regex,
    pub substitution: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiKeyAuthIr {
    Disabled,
    Enabled {
        sources: Vec<ApiKeySourceIr>,
        keys: ApiKeys,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiKeySourceIr {
    Header(String),
    Query(String),
    Cookie(String),
}

/// API keys by client id.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKeys(pub BTreeMap<String, String>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuth2Ir {
    pub extension: ExtensionRef,
    pub issuer_uri: String,
    pub client_id: String,
    pub client_secret: ClientSecret,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
    pub end_session_endpoint: Option<String>,
    pub redirect_uri: Option<String>,
    pub logout_path: Option<String>,
    pub scopes: Vec<String>,
    pub cluster_name: String,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientSecret(pub String);

// === impl TrafficPolicyIr ===

impl MergeablePolicy for TrafficPolicyIr {
    const PROVIDER_FIELDS: &'static [&'static str] =
        &["extAuth", "extProc", "rateLimit", "jwt", "oauth2"];

    fn from_ir(ir: &PolicyIr) -> Option<&Self> {
        match ir {
            PolicyIr::Traffic(ir) => Some(ir.as_ref()),
            _ => None,
        }
    }

    fn set_fields(&self) -> Vec<&'static str> {
        [
            ("buffer", self.buffer.is_some()),
            ("extProc", self.ext_proc.is_some()),
            ("transformation", self.transformation.is_some()),
            ("rustformation", self.rustformation.is_some()),
            ("extAuth", self.ext_auth.is_some()),
            ("localRateLimit", self.local_rate_limit.is_some()),
            ("rateLimit", self.rate_limit.is_some()),
            ("cors", self.cors.is_some()),
            ("csrf", self.csrf.is_some()),
            ("headerModifiers", self.header_modifiers.is_some()),
            ("autoHostRewrite", self.auto_host_rewrite.is_some()),
            ("retry", self.retry.is_some()),
            ("timeouts", self.timeouts.is_some()),
            ("rbac", self.rbac.is_some()),
            ("jwt", self.jwt.is_some()),
            ("compression", self.compression.is_some()),
            ("decompression", self.decompression.is_some()),
            ("basicAuth", self.basic_auth.is_some()),
            ("urlRewrite", self.url_rewrite.is_some()),
            ("apiKeyAuth", self.api_key_auth.is_some()),
            ("oauth2", self.oauth2.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }

    fn merge_from(&mut self, other: &Self, ctx: &mut MergeCtx<'_>) {
        ctx.nested("buffer", &mut self.buffer, &other.buffer);
        ctx.leaf("extProc", &mut self.ext_proc, &other.ext_proc);
        ctx.nested("transformation", &mut self.transformation, &other.transformation);
        ctx.nested("rustformation", &mut self.rustformation, &other.rustformation);
        ctx.leaf("extAuth", &mut self.ext_auth, &other.ext_auth);
        ctx.leaf("localRateLimit", &mut self.local_rate_limit, &other.local_rate_limit);
        ctx.leaf("rateLimit", &mut self.rate_limit, &other.rate_limit);
        ctx.nested("cors", &mut self.cors, &other.cors);
        ctx.nested("csrf", &mut self.csrf, &other.csrf);
        ctx.nested("headerModifiers", &mut self.header_modifiers, &other.header_modifiers);
        ctx.leaf("autoHostRewrite", &mut self.auto_host_rewrite, &other.auto_host_rewrite);
        ctx.nested("retry", &mut self.retry, &other.retry);
        ctx.nested("timeouts", &mut self.timeouts, &other.timeouts);
        ctx.leaf("rbac", &mut self.rbac, &other.rbac);
        ctx.leaf("jwt", &mut self.jwt, &other.jwt);
        ctx.nested("compression", &mut self.compression, &other.compression);
        ctx.nested("decompression", &mut self.decompression, &other.decompression);
        ctx.leaf("basicAuth", &mut self.basic_auth, &other.basic_auth);
        ctx.leaf("urlRewrite", &mut self.url_rewrite, &other.url_rewrite);
        ctx.leaf("apiKeyAuth", &mut self.api_key_auth, &other.api_key_auth);
        ctx.leaf("oauth2", &mut self.oauth2, &other.oauth2);
    }

    fn provider_weight(&self, field: &str) -> Option<i32> {
        let ext = match field {
            "extAuth" => match self.ext_auth.as_ref()? {
                ExtAuthIr::Enabled { provider, .. } => &provider.extension,
                ExtAuthIr::Disabled => return None,
            },
            "extProc" => match self.ext_proc.as_ref()? {
                ExtProcIr::Enabled { provider, .. } => &provider.extension,
                ExtProcIr::Disabled => return None,
            },
            "rateLimit" => &self.rate_limit.as_ref()?.provider.extension,
            "jwt" => match self.jwt.as_ref()? {
                JwtIr::Enabled { extension, .. } => extension,
                JwtIr::Disabled => return None,
            },
            "oauth2" => &self.oauth2.as_ref()?.extension,
            _ => return None,
        };
        Some(ext.weight)
    }
}

impl TrafficPolicyIr {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns every constraint violation in the policy.
    pub fn validate(&self) -> Vec<PolicyError> {
        let mut errors = Vec::new();

        if let Some(csrf) = &self.csrf {
            for (field, value) in [
                ("csrf.percentageEnabled", csrf.percentage_enabled),
                ("csrf.percentageShadowed", csrf.percentage_shadowed),
            ] {
                if let Some(v) = value.filter(|v| *v > MAX_PERCENTAGE) {
                    errors.push(PolicyError::InvalidField {
                        field,
                        message: format!("percentage {v} must be at most {MAX_PERCENTAGE}"),
                    });
                }
            }
        }

        if let Some(codes) = self.retry.as_ref().and_then(|r| r.status_codes.as_ref()) {
            for code in codes.iter().filter(|c| !(400..=599).contains(*c)) {
                errors.push(PolicyError::InvalidField {
                    field: "retry.statusCodes",
                    message: format!("status code {code} must be between 400 and 599"),
                });
            }
        }

        if let Some(rl) = &self.local_rate_limit {
            if rl.fill_interval < MIN_FILL_INTERVAL {
                errors.push(PolicyError::InvalidField {
                    field: "rateLimit.local.tokenBucket.fillInterval",
                    message: format!(
                        "fill interval {:?} must be at least {:?}",
                        rl.fill_interval, MIN_FILL_INTERVAL
                    ),
                });
            }
            if rl.max_tokens == 0 || rl.tokens_per_fill == 0 {
                errors.push(PolicyError::InvalidField {
                    field: "rateLimit.local.tokenBucket",
                    message: "maxTokens and tokensPerFill must be at least 1".to_string(),
                });
            }
        }

        if let Some(ExtProcIr::Enabled {
            processing_mode: Some(mode),
            ..
        }) = &self.ext_proc
        {
            let checks = [
                (mode.request_header_mode.as_deref(), &HEADER_PROCESSING_MODES[..]),
                (mode.response_header_mode.as_deref(), &HEADER_PROCESSING_MODES[..]),
                (mode.request_body_mode.as_deref(), &BODY_PROCESSING_MODES[..]),
                (mode.response_body_mode.as_deref(), &BODY_PROCESSING_MODES[..]),
            ];
            for (value, allowed) in checks {
                if let Some(v) = value.filter(|v| !allowed.contains(v)) {
                    errors.push(PolicyError::InvalidField {
                        field: "extProc.processingMode",
                        message: format!("unknown processing mode {v:?}"),
                    });
                }
            }
        }

        errors
    }
}

deep_merge_fields!(BufferIr {
    max_request_bytes => "maxRequestSize",
    disable => "disable",
});

deep_merge_fields!(TransformationIr {
    request => "request",
    response => "response",
});

deep_merge_fields!(CorsIr {
    allow_origins => "allowOrigins",
    allow_methods => "allowMethods",
    allow_headers => "allowHeaders",
    expose_headers => "exposeHeaders",
    max_age => "maxAge",
    allow_credentials => "allowCredentials",
});

deep_merge_fields!(CsrfIr {
    percentage_enabled => "percentageEnabled",
    percentage_shadowed => "percentageShadowed",
    additional_origins => "additionalOrigins",
});

deep_merge_fields!(HeaderModifiersIr {
    request => "request",
    response => "response",
});

deep_merge_fields!(RetryIr {
    attempts => "attempts",
    per_try_timeout => "perTryTimeout",
    retry_on => "retryOn",
    status_codes => "statusCodes",
    backoff_base_interval => "backoffBaseInterval",
});

deep_merge_fields!(TimeoutsIr {
    request => "request",
    stream_idle => "streamIdle",
});

deep_merge_fields!(CompressionIr {
    algorithms => "algorithms",
    min_content_length => "minContentLength",
    disable => "disable",
});

deep_merge_fields!(DecompressionIr {
    request => "request",
    response => "response",
});

// === impl BasicAuthIr ===

impl fmt::Debug for BasicAuthIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Enabled { users } => f
                .debug_struct("Enabled")
                .field("users", &users.len())
                .finish(),
        }
    }
}

// === impl UrlRewriteIr ===

impl PartialEq for UrlRewriteIr {
    fn eq(&self, other: &Self) -> bool {
        self.pattern.as_str() == other.pattern.as_str() && self.substitution == other.substitution
    }
}

impl Eq for UrlRewriteIr {}

// === impl ApiKeys ===

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

// === impl ClientSecret ===

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn fields(errors: &[PolicyError]) -> Vec<String> {
        errors
            .iter()
            .map(|e| match e {
                PolicyError::InvalidField { field, .. } => field.to_string(),
                e => e.to_string(),
            })
            .collect()
    }

    #[test]
    fn empty_policy_is_valid() {
        assert!(TrafficPolicyIr::default().validate().is_empty());
        assert!(TrafficPolicyIr::default().is_empty());
        assert!(TrafficPolicyIr::default().set_fields().is_empty());
    }

    #[rstest]
    #[case(Some(100), Some(0), vec![])]
    #[case(Some(101), None, vec!["csrf.percentageEnabled"])]
    #[case(Some(101), Some(200), vec!["csrf.percentageEnabled", "csrf.percentageShadowed"])]
    fn csrf_percentages(
        #[case] enabled: Option<u32>,
        #[case] shadowed: Option<u32>,
        #[case] expected: Vec<&str>,
    ) {
        let ir = TrafficPolicyIr {
            csrf: Some(CsrfIr {
                percentage_enabled: enabled,
                percentage_shadowed: shadowed,
                additional_origins: None,
            }),
            ..Default::default()
        };
        assert_eq!(fields(&ir.validate()), expected);
    }

    #[rstest]
    #[case(vec![503], true)]
    #[case(vec![400, 599], true)]
    #[case(vec![399], false)]
    #[case(vec![500, 600], false)]
    fn retry_status_codes(#[case] codes: Vec<u16>, #[case] valid: bool) {
        let ir = TrafficPolicyIr {
            retry: Some(RetryIr {
                status_codes: Some(codes),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(ir.validate().is_empty(), valid);
    }

    #[rstest]
    #[case(10, 1, Duration::from_millis(50), true)]
    #[case(10, 1, Duration::from_millis(49), false)]
    #[case(0, 1, Duration::from_secs(1), false)]
    #[case(1, 0, Duration::from_secs(1), false)]
    fn local_rate_limit(
        #[case] max_tokens: u32,
        #[case] tokens_per_fill: u32,
        #[case] fill_interval: Duration,
        #[case] valid: bool,
    ) {
        let ir = TrafficPolicyIr {
            local_rate_limit: Some(LocalRateLimitIr {
                max_tokens,
                tokens_per_fill,
                fill_interval,
            }),
            ..Default::default()
        };
        assert_eq!(ir.validate().is_empty(), valid);
    }

    #[test]
    fn url_rewrite_compares_patterns() {
        let a = UrlRewriteIr {
            pattern: Regex::new("^/v1/(.*)").unwrap(),
            substitution: "/\\1".to_string(),
        };
        assert_eq!(a, a.clone());
        let b = UrlRewriteIr {
            pattern: Regex::new("^/v2/(.*)").unwrap(),
            ..a.clone()
        };
        assert_ne!(a, b);
    }

    #[test]
    fn secrets_are_redacted() {
        let keys = ApiKeys(maplit::btreemap! {
            "client1".to_string() => "s3cr3t".to_string(),
        });
        assert_eq!(format!("{keys:?}"), "{\"client1\"}");
        assert_eq!(format!("{:?}", ClientSecret("hunter2".to_string())), "ClientSecret(..)");
        let basic = BasicAuthIr::Enabled {
            users: vec!["user:$apr1$hash".to_string()],
        };
        assert!(!format!("{basic:?}").contains("hash"));
    }

    #[test]
    fn set_fields_names_every_configured_sub_policy() {
        let ir = TrafficPolicyIr {
            cors: Some(CorsIr::default()),
            auto_host_rewrite: Some(true),
            basic_auth: Some(BasicAuthIr::Disabled),
            ..Default::default()
        };
        assert_eq!(ir.set_fields(), vec!["cors", "autoHostRewrite", "basicAuth"]);
    }
}
