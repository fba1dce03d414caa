use super::PolicyCtx;
use crate::routes;
use gateway_controller_core::{
    annotations,
    http_route::{HeaderModifierFilter, HeaderName, HeaderValue},
    policy::{
        traffic::{
            ApiKeyAuthIr, ApiKeySourceIr, ApiKeys, BasicAuthIr, BodyTransformIr, BufferIr,
            ClientSecret, CompressionIr, CorsIr, CsrfIr, DecompressionIr, DescriptorEntryIr,
            ExtAuthIr, ExtProcIr, ExtensionRef, GlobalRateLimitIr, GrpcProvider, GrpcServiceIr,
            HeaderModifiersIr, JwksSource, JwtIr, JwtProviderIr, LocalRateLimitIr, OAuth2Ir,
            ProcessingModeIr, RbacAction, RbacIr, RetryIr, TimeoutsIr, TransformIr,
            TransformationIr, UrlRewriteIr,
        },
        PolicyError, TrafficPolicyIr,
    },
    units, GroupKind, ObjectSource, ReferenceError,
};
use gateway_controller_k8s_api::{
    policy::{self as api, GrpcService, LocalObjectReference},
    GatewayExtension, ResourceExt, Secret, TrafficPolicy,
};
use regex::Regex;

const HTACCESS_KEY: &str = ".htaccess";
const CLIENT_SECRET_KEY: &str = "client-secret";
const DEFAULT_API_KEY_HEADER: &str = "api-key";

type Converted<T> = Result<Option<T>, PolicyError>;

/// Converts a TrafficPolicy, recording every sub-policy that fails to convert
/// in `errors` and leaving it unset.
pub(super) fn convert(
    policy: &TrafficPolicy,
    ctx: &PolicyCtx<'_>,
    errors: &mut Vec<PolicyError>,
) -> TrafficPolicyIr {
    let ns = policy.namespace().unwrap_or_default();
    let spec = &policy.spec;
    let transformation = keep(errors, spec.transformation.as_ref().map(transformation).transpose());
    let (transformation, rustformation) = if ctx.settings.use_rustformations {
        (None, transformation)
    } else {
        (transformation, None)
    };

    TrafficPolicyIr {
        buffer: keep(errors, spec.buffer.as_ref().map(buffer).transpose()),
        ext_proc: keep(errors, ext_proc(spec.ext_proc.as_ref(), &ns, ctx)),
        transformation,
        rustformation,
        ext_auth: keep(errors, ext_auth(spec.ext_auth.as_ref(), &ns, ctx)),
        local_rate_limit: keep(errors, local_rate_limit(spec.rate_limit.as_ref())),
        rate_limit: keep(errors, global_rate_limit(spec.rate_limit.as_ref(), &ns, ctx)),
        cors: spec.cors.as_ref().map(cors),
        csrf: spec.csrf.as_ref().map(|c| CsrfIr {
            percentage_enabled: c.percentage_enabled,
            percentage_shadowed: c.percentage_shadowed,
            additional_origins: c.additional_origins.clone(),
        }),
        header_modifiers: keep(
            errors,
            spec.header_modifiers.as_ref().map(header_modifiers).transpose(),
        ),
        auto_host_rewrite: spec.auto_host_rewrite,
        retry: keep(errors, spec.retry.as_ref().map(retry).transpose()),
        timeouts: keep(errors, spec.timeouts.as_ref().map(timeouts).transpose()),
        rbac: keep(errors, spec.rbac.as_ref().map(rbac).transpose()),
        jwt: keep(errors, jwt(spec.jwt.as_ref(), &ns, ctx)),
        compression: spec
            .compression
            .as_ref()
            .and_then(|c| c.response_compression.as_ref())
            .map(|c| CompressionIr {
                algorithms: c.algorithms.clone(),
                min_content_length: c.min_content_length,
                disable: c.disable,
            }),
        decompression: spec.decompression.as_ref().map(|d| DecompressionIr {
            request: d.request,
            response: d.response,
        }),
        basic_auth: keep(errors, basic_auth(spec.basic_auth.as_ref(), &ns, ctx)),
        url_rewrite: keep(
            errors,
            spec.url_rewrite
                .as_ref()
                .map(url_rewrite)
                .transpose()
                .map(Option::flatten),
        ),
        api_key_auth: keep(errors, api_key_auth(spec.api_key_auth.as_ref(), &ns, ctx)),
        oauth2: keep(errors, oauth2(spec.oauth2.as_ref(), &ns, ctx)),
    }
}

fn keep<T>(errors: &mut Vec<PolicyError>, converted: Converted<T>) -> Option<T> {
    converted.unwrap_or_else(|e| {
        errors.push(e);
        None
    })
}

fn invalid(field: &'static str, message: impl ToString) -> PolicyError {
    PolicyError::InvalidField {
        field,
        message: message.to_string(),
    }
}

fn duration(
    field: &'static str,
    value: Option<&String>,
) -> Result<Option<std::time::Duration>, PolicyError> {
    value
        .map(|v| units::parse_duration(v).map_err(|e| invalid(field, e)))
        .transpose()
}

fn buffer(b: &api::Buffer) -> Result<BufferIr, PolicyError> {
    let max_request_bytes = b
        .max_request_size
        .as_deref()
        .map(|q| units::parse_quantity_u32(q).map_err(|e| invalid("buffer.maxRequestSize", e)))
        .transpose()?;
    Ok(BufferIr {
        max_request_bytes,
        disable: b.disable,
    })
}

fn transformation(t: &api::TransformationPolicy) -> Result<TransformationIr, PolicyError> {
    fn transform(t: &api::Transform) -> Result<TransformIr, PolicyError> {
        let pairs = |v: &Option<Vec<api::HeaderValue>>| {
            v.iter()
                .flatten()
                .map(|h| (h.name.clone(), h.value.clone()))
                .collect::<Vec<_>>()
        };
        let body = t
            .body
            .as_ref()
            .map(|b| match b.parse_as.as_deref().unwrap_or("AsString") {
                "AsString" => Ok(BodyTransformIr::AsString(b.value.clone())),
                "AsJson" => Ok(BodyTransformIr::AsJson(b.value.clone())),
                other => Err(invalid(
                    "transformation.body.parseAs",
                    format!("unknown body format {other:?}"),
                )),
            })
            .transpose()?;
        Ok(TransformIr {
            set: pairs(&t.set),
            add: pairs(&t.add),
            remove: t.remove.clone().unwrap_or_default(),
            body,
        })
    }

    Ok(TransformationIr {
        request: t.request.as_ref().map(transform).transpose()?,
        response: t.response.as_ref().map(transform).transpose()?,
    })
}

fn cors(c: &api::CorsPolicy) -> CorsIr {
    CorsIr {
        allow_origins: c.allow_origins.clone(),
        allow_methods: c.allow_methods.clone(),
        allow_headers: c.allow_headers.clone(),
        expose_headers: c.expose_headers.clone(),
        max_age: c.max_age,
        allow_credentials: c.allow_credentials,
    }
}

fn header_modifiers(m: &api::HeaderModifiers) -> Result<HeaderModifiersIr, PolicyError> {
    fn filter(f: &api::HeaderFilter) -> Result<HeaderModifierFilter, PolicyError> {
        let name = |n: &str| {
            HeaderName::from_bytes(n.as_bytes())
                .map_err(|_| invalid("headerModifiers", format!("invalid header name {n:?}")))
        };
        let header = |h: &api::HeaderValue| {
            let value = HeaderValue::from_str(&h.value).map_err(|_| {
                invalid("headerModifiers", format!("invalid value for header {}", h.name))
            })?;
            Ok::<_, PolicyError>((name(&h.name)?, value))
        };
        Ok(HeaderModifierFilter {
            add: f.add.iter().flatten().map(header).collect::<Result<_, _>>()?,
            set: f.set.iter().flatten().map(header).collect::<Result<_, _>>()?,
            remove: f
                .remove
                .iter()
                .flatten()
                .map(|n| name(n))
                .collect::<Result<_, _>>()?,
        })
    }

    Ok(HeaderModifiersIr {
        request: m.request.as_ref().map(filter).transpose()?,
        response: m.response.as_ref().map(filter).transpose()?,
    })
}

fn retry(r: &api::Retry) -> Result<RetryIr, PolicyError> {
    Ok(RetryIr {
        attempts: r.attempts,
        per_try_timeout: duration("retry.perTryTimeout", r.per_try_timeout.as_ref())?,
        retry_on: r.retry_on.clone(),
        status_codes: r.status_codes.clone(),
        backoff_base_interval: duration(
            "retry.backoffBaseInterval",
            r.backoff_base_interval.as_ref(),
        )?,
    })
}

fn timeouts(t: &api::Timeouts) -> Result<TimeoutsIr, PolicyError> {
    Ok(TimeoutsIr {
        request: duration("timeouts.request", t.request.as_ref())?,
        stream_idle: duration("timeouts.streamIdle", t.stream_idle.as_ref())?,
    })
}

fn rbac(r: &api::Rbac) -> Result<RbacIr, PolicyError> {
    let action = match r.action.as_deref() {
        None | Some("Allow") => RbacAction::Allow,
        Some("Deny") => RbacAction::Deny,
        Some(other) => return Err(invalid("rbac.action", format!("unknown action {other:?}"))),
    };
    Ok(RbacIr {
        action,
        match_expressions: r.match_expressions.clone(),
    })
}

fn url_rewrite(u: &api::UrlRewrite) -> Result<Option<UrlRewriteIr>, PolicyError> {
    let Some(r) = &u.path_regex else {
        return Ok(None);
    };
    let pattern = Regex::new(&r.pattern).map_err(|e| invalid("urlRewrite.pathRegex.pattern", e))?;
    Ok(Some(UrlRewriteIr {
        pattern,
        substitution: r.substitution.clone(),
    }))
}

fn local_rate_limit(rl: Option<&api::RateLimit>) -> Converted<LocalRateLimitIr> {
    let Some(local) = rl.and_then(|rl| rl.local.as_ref()) else {
        return Ok(None);
    };
    let bucket = local
        .token_bucket
        .as_ref()
        .ok_or_else(|| invalid("rateLimit.local.tokenBucket", "a token bucket is required"))?;
    let fill_interval = units::parse_duration(&bucket.fill_interval)
        .map_err(|e| invalid("rateLimit.local.tokenBucket.fillInterval", e))?;
    Ok(Some(LocalRateLimitIr {
        max_tokens: bucket.max_tokens,
        tokens_per_fill: bucket.tokens_per_fill.unwrap_or(1),
        fill_interval,
    }))
}

// === GatewayExtension providers ===

/// Looks up a GatewayExtension in the policy's namespace, returning it with
/// the weight from its annotations.
fn extension<'c>(
    field: &'static str,
    r: &LocalObjectReference,
    ns: &str,
    ctx: &'c PolicyCtx<'_>,
) -> Result<(&'c GatewayExtension, ExtensionRef), PolicyError> {
    let source = ObjectSource::new(GroupKind::of::<GatewayExtension>(), ns, &r.name);
    let ext = ctx
        .extensions
        .get(&source)
        .ok_or_else(|| PolicyError::MissingExtension {
            field,
            namespace: ns.to_string(),
            name: r.name.clone(),
        })?;
    let weight = annotations::parse_precedence_weight(ext.annotations()).unwrap_or_else(|error| {
        tracing::info!(extension = %source, %error, "ignoring invalid GatewayExtension weight");
        0
    });
    Ok((&**ext, ExtensionRef { source, weight }))
}

fn wrong_type(field: &'static str, ext: &ExtensionRef, provider: &'static str) -> PolicyError {
    PolicyError::WrongExtensionType {
        field,
        namespace: ext.source.namespace.clone(),
        name: ext.source.name.clone(),
        provider,
    }
}

/// Resolves the cluster behind a backend referenced from a GatewayExtension.
fn extension_cluster(
    field: &'static str,
    ext: &ExtensionRef,
    backend_ref: &gateway_controller_k8s_api::routes::BackendRef,
    ctx: &PolicyCtx<'_>,
) -> Result<String, PolicyError> {
    let target = routes::backend_ref(backend_ref, &ext.source.namespace);
    ctx.backends
        .cluster_name(&ext.source, &target.target, target.port, ctx.grants)
        .map_err(|source| PolicyError::Reference { field, source })
}

fn grpc_provider(
    field: &'static str,
    ext: ExtensionRef,
    svc: &GrpcService,
    fail_open: Option<bool>,
    ctx: &PolicyCtx<'_>,
) -> Result<GrpcProvider, PolicyError> {
    let cluster_name = extension_cluster(field, &ext, &svc.backend_ref, ctx)?;
    Ok(GrpcProvider {
        extension: ext,
        service: GrpcServiceIr {
            cluster_name,
            authority: svc.authority.clone(),
        },
        fail_open: fail_open.unwrap_or(false),
    })
}

fn required_ref<'a>(
    field: &'static str,
    r: &'a Option<LocalObjectReference>,
) -> Result<&'a LocalObjectReference, PolicyError> {
    r.as_ref()
        .ok_or_else(|| invalid(field, "extensionRef is required unless disabled"))
}

fn ext_auth(p: Option<&api::ExtAuthPolicy>, ns: &str, ctx: &PolicyCtx<'_>) -> Converted<ExtAuthIr> {
    const FIELD: &str = "extAuth";
    let Some(p) = p else { return Ok(None) };
    if p.disable == Some(true) {
        return Ok(Some(ExtAuthIr::Disabled));
    }
    let (ext, ext_ref) = extension(FIELD, required_ref(FIELD, &p.extension_ref)?, ns, ctx)?;
    let Some(provider) = &ext.spec.ext_auth else {
        return Err(wrong_type(FIELD, &ext_ref, "extAuth"));
    };
    Ok(Some(ExtAuthIr::Enabled {
        provider: grpc_provider(FIELD, ext_ref, &provider.grpc_service, provider.fail_open, ctx)?,
        context_extensions: p.context_extensions.clone().unwrap_or_default(),
    }))
}

fn ext_proc(p: Option<&api::ExtProcPolicy>, ns: &str, ctx: &PolicyCtx<'_>) -> Converted<ExtProcIr> {
    const FIELD: &str = "extProc";
    let Some(p) = p else { return Ok(None) };
    if p.disable == Some(true) {
        return Ok(Some(ExtProcIr::Disabled));
    }
    let (ext, ext_ref) = extension(FIELD, required_ref(FIELD, &p.extension_ref)?, ns, ctx)?;
    let Some(provider) = &ext.spec.ext_proc else {
        return Err(wrong_type(FIELD, &ext_ref, "extProc"));
    };
    Ok(Some(ExtProcIr::Enabled {
        provider: grpc_provider(FIELD, ext_ref, &provider.grpc_service, provider.fail_open, ctx)?,
        processing_mode: p.processing_mode.as_ref().map(|m| ProcessingModeIr {
            request_header_mode: m.request_header_mode.clone(),
            response_header_mode: m.response_header_mode.clone(),
            request_body_mode: m.request_body_mode.clone(),
            response_body_mode: m.response_body_mode.clone(),
        }),
    }))
}

fn global_rate_limit(
    rl: Option<&api::RateLimit>,
    ns: &str,
    ctx: &PolicyCtx<'_>,
) -> Converted<GlobalRateLimitIr> {
    const FIELD: &str = "rateLimit.global";
    let Some(global) = rl.and_then(|rl| rl.global.as_ref()) else {
        return Ok(None);
    };
    let (ext, ext_ref) = extension(FIELD, &global.extension_ref, ns, ctx)?;
    let Some(provider) = &ext.spec.rate_limit else {
        return Err(wrong_type(FIELD, &ext_ref, "rateLimit"));
    };

    let descriptors = global
        .descriptors
        .iter()
        .map(|d| d.entries.iter().map(descriptor_entry).collect())
        .collect::<Result<_, _>>()?;
    let timeout = duration("rateLimit.global.timeout", provider.timeout.as_ref())?;

    Ok(Some(GlobalRateLimitIr {
        provider: grpc_provider(FIELD, ext_ref, &provider.grpc_service, provider.fail_open, ctx)?,
        domain: provider.domain.clone(),
        timeout,
        descriptors,
    }))
}

fn descriptor_entry(e: &api::RateLimitDescriptorEntry) -> Result<DescriptorEntryIr, PolicyError> {
    const FIELD: &str = "rateLimit.global.descriptors";
    match e.r#type.as_str() {
        "Generic" => match (&e.key, &e.value) {
            (Some(key), Some(value)) => Ok(DescriptorEntryIr::Generic {
                key: key.clone(),
                value: value.clone(),
            }),
            _ => Err(invalid(FIELD, "Generic entries require a key and a value")),
        },
        "Header" => e
            .header
            .clone()
            .map(DescriptorEntryIr::Header)
            .ok_or_else(|| invalid(FIELD, "Header entries require a header name")),
        "RemoteAddress" => Ok(DescriptorEntryIr::RemoteAddress),
        "Path" => Ok(DescriptorEntryIr::Path),
        other => Err(invalid(FIELD, format!("unknown entry type {other:?}"))),
    }
}

fn jwt(p: Option<&api::JwtAuthentication>, ns: &str, ctx: &PolicyCtx<'_>) -> Converted<JwtIr> {
    const FIELD: &str = "jwt";
    let Some(p) = p else { return Ok(None) };
    if p.disable == Some(true) {
        return Ok(Some(JwtIr::Disabled));
    }
    let (ext, extension) = extension(FIELD, required_ref(FIELD, &p.extension_ref)?, ns, ctx)?;
    let Some(jwt) = &ext.spec.jwt else {
        return Err(wrong_type(FIELD, &extension, "jwt"));
    };

    let providers = jwt
        .providers
        .iter()
        .map(|p| {
            let jwks = match (&p.local_jwks, &p.remote_jwks_uri) {
                (Some(inline), _) => JwksSource::Inline(inline.clone()),
                (None, Some(uri)) => JwksSource::Remote(uri.clone()),
                (None, None) => {
                    return Err(invalid(
                        "jwt.providers",
                        format!("provider {} has no JWKS source", p.name),
                    ))
                }
            };
            Ok(JwtProviderIr {
                name: p.name.clone(),
                issuer: p.issuer.clone(),
                audiences: p.audiences.clone(),
                jwks,
            })
        })
        .collect::<Result<_, _>>()?;

    Ok(Some(JwtIr::Enabled {
        extension,
        providers,
    }))
}

fn oauth2(p: Option<&api::OAuth2Policy>, ns: &str, ctx: &PolicyCtx<'_>) -> Converted<OAuth2Ir> {
    const FIELD: &str = "oauth2";
    let Some(p) = p else { return Ok(None) };
    let (ext, extension) = extension(FIELD, &p.extension_ref, ns, ctx)?;
    let Some(provider) = &ext.spec.oauth2 else {
        return Err(wrong_type(FIELD, &extension, "oauth2"));
    };

    let secret = secret_value(
        FIELD,
        &extension.source.namespace,
        &provider.client_secret_ref.name,
        CLIENT_SECRET_KEY,
        ctx,
    )?;
    let cluster_name = extension_cluster(FIELD, &extension, &provider.backend_ref, ctx)?;
    let discovered = ctx.oidc.get(&provider.issuer_uri).ok_or_else(|| {
        invalid(
            FIELD,
            format!("OpenID provider configuration for {} is not available", provider.issuer_uri),
        )
    })?;

    Ok(Some(OAuth2Ir {
        extension,
        issuer_uri: provider.issuer_uri.clone(),
        client_id: provider.client_id.clone(),
        client_secret: ClientSecret(secret),
        token_endpoint: discovered.token_endpoint,
        authorization_endpoint: discovered.authorization_endpoint,
        end_session_endpoint: discovered.end_session_endpoint,
        redirect_uri: p.redirect_uri.clone(),
        logout_path: p.logout_path.clone(),
        scopes: p.scopes.clone(),
        cluster_name,
    }))
}

// === Secret-backed authentication ===

fn secret<'c>(
    field: &'static str,
    ns: &str,
    name: &str,
    ctx: &'c PolicyCtx<'_>,
) -> Result<&'c crate::secrets::SecretData, PolicyError> {
    let source = ObjectSource::new(GroupKind::of::<Secret>(), ns, name);
    match ctx.secrets.get(&source) {
        Some(s) => Ok(s.as_ref()),
        None => Err(PolicyError::Reference {
            field,
            source: ReferenceError::NotFound(source),
        }),
    }
}

fn secret_value(
    field: &'static str,
    ns: &str,
    name: &str,
    key: &str,
    ctx: &PolicyCtx<'_>,
) -> Result<String, PolicyError> {
    let data = secret(field, ns, name, ctx)?;
    data.data
        .get(key)
        .filter(|v| !v.is_empty())
        .map(|v| String::from_utf8_lossy(v).trim().to_string())
        .ok_or_else(|| invalid(field, format!("Secret {ns}/{name} has no {key} entry")))
}

fn basic_auth(
    p: Option<&api::BasicAuthPolicy>,
    ns: &str,
    ctx: &PolicyCtx<'_>,
) -> Converted<BasicAuthIr> {
    const FIELD: &str = "basicAuth";
    let Some(p) = p else { return Ok(None) };
    if p.disable == Some(true) {
        return Ok(Some(BasicAuthIr::Disabled));
    }
    let users = match (&p.users, &p.secret_ref) {
        (Some(users), _) => users.clone(),
        (None, Some(r)) => secret_value(FIELD, ns, &r.name, HTACCESS_KEY, ctx)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect(),
        (None, None) => return Err(invalid(FIELD, "one of users or secretRef is required")),
    };
    if users.is_empty() {
        return Err(invalid(FIELD, "no users configured"));
    }
    Ok(Some(BasicAuthIr::Enabled { users }))
}

fn api_key_auth(
    p: Option<&api::ApiKeyAuthentication>,
    ns: &str,
    ctx: &PolicyCtx<'_>,
) -> Converted<ApiKeyAuthIr> {
    const FIELD: &str = "apiKeyAuth";
    let Some(p) = p else { return Ok(None) };
    if p.disable == Some(true) {
        return Ok(Some(ApiKeyAuthIr::Disabled));
    }

    let mut sources = p
        .key_sources
        .iter()
        .map(|s| match (&s.header, &s.query, &s.cookie) {
            (Some(h), _, _) => Ok(ApiKeySourceIr::Header(h.clone())),
            (None, Some(q), _) => Ok(ApiKeySourceIr::Query(q.clone())),
            (None, None, Some(c)) => Ok(ApiKeySourceIr::Cookie(c.clone())),
            (None, None, None) => Err(invalid(
                "apiKeyAuth.keySources",
                "one of header, query or cookie is required",
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if sources.is_empty() {
        sources.push(ApiKeySourceIr::Header(DEFAULT_API_KEY_HEADER.to_string()));
    }

    let r = p
        .secret_ref
        .as_ref()
        .ok_or_else(|| invalid("apiKeyAuth.secretRef", "a secret is required"))?;
    let keys = secret(FIELD, ns, &r.name, ctx)?
        .data
        .iter()
        .map(|(client, key)| (client.clone(), String::from_utf8_lossy(key).trim().to_string()))
        .collect();

    Ok(Some(ApiKeyAuthIr::Enabled {
        sources,
        keys: ApiKeys(keys),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::BackendIndex, secrets::SecretData, ReferenceGrants};
    use ahash::AHashMap as HashMap;
    use gateway_controller_core::{oidc::OidcProviderConfig, TranslatorSettings};
    use gateway_controller_k8s_api::{
        policy::{ExtAuthProvider, GatewayExtensionSpec, OAuth2Provider, TrafficPolicySpec},
        routes::BackendRef,
        ObjectMeta, Service, ServicePort, ServiceSpec,
    };
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Fixture {
        settings: TranslatorSettings,
        extensions: HashMap<ObjectSource, Arc<GatewayExtension>>,
        secrets: HashMap<ObjectSource, Arc<SecretData>>,
        backends: BackendIndex,
        grants: ReferenceGrants,
        oidc: HashMap<String, OidcProviderConfig>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut backends = BackendIndex::default();
            backends.apply_service(Service {
                metadata: ObjectMeta {
                    namespace: Some("default".to_string()),
                    name: Some("authz".to_string()),
                    ..Default::default()
                },
                spec: Some(ServiceSpec {
                    ports: Some(vec![ServicePort {
                        port: 9000,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                status: None,
            });
            Self {
                settings: TranslatorSettings::default(),
                extensions: HashMap::new(),
                secrets: HashMap::new(),
                backends,
                grants: ReferenceGrants::default(),
                oidc: HashMap::new(),
            }
        }

        fn extension(&mut self, name: &str, weight: Option<&str>, spec: GatewayExtensionSpec) {
            let ext = GatewayExtension {
                metadata: ObjectMeta {
                    namespace: Some("default".to_string()),
                    name: Some(name.to_string()),
                    annotations: weight.map(|w| {
                        btreemap! { annotations::POLICY_WEIGHT.to_string() => w.to_string() }
                    }),
                    ..Default::default()
                },
                spec,
            };
            self.extensions.insert(ObjectSource::of(&ext), Arc::new(ext));
        }

        fn secret(&mut self, name: &str, data: std::collections::BTreeMap<String, Vec<u8>>) {
            self.secrets.insert(
                ObjectSource::new(GroupKind::of::<Secret>(), "default", name),
                Arc::new(SecretData { type_: None, data }),
            );
        }

        fn convert(&self, spec: TrafficPolicySpec) -> (TrafficPolicyIr, Vec<PolicyError>) {
            let ctx = PolicyCtx {
                settings: &self.settings,
                extensions: &self.extensions,
                secrets: &self.secrets,
                backends: &self.backends,
                grants: &self.grants,
                oidc: &self.oidc,
            };
            let policy = TrafficPolicy {
                metadata: ObjectMeta {
                    namespace: Some("default".to_string()),
                    name: Some("tp".to_string()),
                    ..Default::default()
                },
                spec,
                status: None,
            };
            let mut errors = vec![];
            let ir = convert(&policy, &ctx, &mut errors);
            (ir, errors)
        }
    }

    fn authz_service() -> GrpcService {
        GrpcService {
            backend_ref: BackendRef {
                group: None,
                kind: None,
                name: "authz".to_string(),
                namespace: None,
                port: Some(9000),
                weight: None,
            },
            authority: None,
        }
    }

    fn ext_auth_policy(name: &str) -> TrafficPolicySpec {
        TrafficPolicySpec {
            ext_auth: Some(api::ExtAuthPolicy {
                extension_ref: Some(LocalObjectReference {
                    name: name.to_string(),
                }),
                context_extensions: None,
                disable: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn ext_auth_resolves_provider_cluster_and_weight() {
        let mut fx = Fixture::new();
        fx.extension(
            "authz",
            Some("7"),
            GatewayExtensionSpec {
                ext_auth: Some(ExtAuthProvider {
                    grpc_service: authz_service(),
                    fail_open: Some(true),
                }),
                ..Default::default()
            },
        );
        let (ir, errors) = fx.convert(ext_auth_policy("authz"));
        assert_eq!(errors, vec![]);
        let Some(ExtAuthIr::Enabled { provider, .. }) = ir.ext_auth else {
            panic!("ext auth must be enabled");
        };
        assert_eq!(provider.service.cluster_name, "kube_default_authz_9000");
        assert_eq!(provider.extension.weight, 7);
        assert!(provider.fail_open);
    }

    #[test]
    fn missing_and_mismatched_extensions() {
        let mut fx = Fixture::new();
        let (ir, errors) = fx.convert(ext_auth_policy("authz"));
        assert_eq!(ir.ext_auth, None);
        assert_eq!(
            errors,
            vec![PolicyError::MissingExtension {
                field: "extAuth",
                namespace: "default".to_string(),
                name: "authz".to_string(),
            }]
        );

        fx.extension("authz", None, GatewayExtensionSpec::default());
        let (_, errors) = fx.convert(ext_auth_policy("authz"));
        assert_eq!(
            errors,
            vec![PolicyError::WrongExtensionType {
                field: "extAuth",
                namespace: "default".to_string(),
                name: "authz".to_string(),
                provider: "extAuth",
            }]
        );
    }

    #[test]
    fn basic_auth_reads_htaccess_secrets() {
        let mut fx = Fixture::new();
        fx.secret(
            "users",
            btreemap! {
                HTACCESS_KEY.to_string() => b"# admins\nalice:$apr1$x\n\nbob:$apr1$y\n".to_vec(),
            },
        );
        let (ir, errors) = fx.convert(TrafficPolicySpec {
            basic_auth: Some(api::BasicAuthPolicy {
                secret_ref: Some(LocalObjectReference {
                    name: "users".to_string(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(errors, vec![]);
        assert_eq!(
            ir.basic_auth,
            Some(BasicAuthIr::Enabled {
                users: vec!["alice:$apr1$x".to_string(), "bob:$apr1$y".to_string()],
            })
        );
    }

    #[test]
    fn oauth2_requires_discovered_provider() {
        let mut fx = Fixture::new();
        fx.extension(
            "idp",
            None,
            GatewayExtensionSpec {
                oauth2: Some(OAuth2Provider {
                    issuer_uri: "https://idp.example.com".to_string(),
                    client_id: "gateway".to_string(),
                    client_secret_ref: LocalObjectReference {
                        name: "oauth".to_string(),
                    },
                    backend_ref: authz_service().backend_ref,
                }),
                ..Default::default()
            },
        );
        fx.secret(
            "oauth",
            btreemap! { CLIENT_SECRET_KEY.to_string() => b"hunter2\n".to_vec() },
        );
        let spec = TrafficPolicySpec {
            oauth2: Some(api::OAuth2Policy {
                extension_ref: LocalObjectReference {
                    name: "idp".to_string(),
                },
                redirect_uri: None,
                logout_path: Some("/logout".to_string()),
                scopes: vec!["openid".to_string()],
            }),
            ..Default::default()
        };

        let (ir, errors) = fx.convert(spec.clone());
        assert_eq!(ir.oauth2, None);
        assert_eq!(
            errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["oauth2: OpenID provider configuration for https://idp.example.com is not available"]
        );

        fx.oidc.insert(
            "https://idp.example.com".to_string(),
            OidcProviderConfig {
                token_endpoint: "https://idp.example.com/token".to_string(),
                authorization_endpoint: "https://idp.example.com/auth".to_string(),
                end_session_endpoint: None,
            },
        );
        let (ir, errors) = fx.convert(spec);
        assert_eq!(errors, vec![]);
        let oauth2 = ir.oauth2.expect("oauth2 must convert");
        assert_eq!(oauth2.client_secret, ClientSecret("hunter2".to_string()));
        assert_eq!(oauth2.token_endpoint, "https://idp.example.com/token");
        assert_eq!(oauth2.cluster_name, "kube_default_authz_9000");
    }

    #[test]
    fn invalid_fields_leave_other_sub_policies_intact() {
        let fx = Fixture::new();
        let (ir, errors) = fx.convert(TrafficPolicySpec {
            timeouts: Some(api::Timeouts {
                request: Some("soon".to_string()),
                stream_idle: None,
            }),
            rbac: Some(api::Rbac {
                action: Some("Deny".to_string()),
                match_expressions: vec!["request.path == '/admin'".to_string()],
            }),
            ..Default::default()
        });
        assert_eq!(ir.timeouts, None);
        assert_eq!(ir.rbac.map(|r| r.action), Some(RbacAction::Deny));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().starts_with("timeouts.request: "));
    }

    #[test]
    fn rustformations_replace_classic_transformations() {
        let mut fx = Fixture::new();
        let spec = TrafficPolicySpec {
            transformation: Some(api::TransformationPolicy {
                request: Some(api::Transform {
                    set: Some(vec![api::HeaderValue {
                        name: "x-user".to_string(),
                        value: "{{ header(\"user\") }}".to_string(),
                    }]),
                    ..Default::default()
                }),
                response: None,
            }),
            ..Default::default()
        };
        let (ir, _) = fx.convert(spec.clone());
        assert!(ir.transformation.is_some() && ir.rustformation.is_none());

        fx.settings.use_rustformations = true;
        let (ir, _) = fx.convert(spec);
        assert!(ir.transformation.is_none() && ir.rustformation.is_some());
    }
}
