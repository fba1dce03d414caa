//! Listener TLS configuration: option parsing, client certificate validation
//! and the errors reported on listeners when TLS cannot be configured.

use crate::{annotations, ReferenceError};
use gateway_controller_k8s_api::gateway as api;
use std::{collections::BTreeMap, fmt};

/// Maximum accepted length of the `verify-certificate-hash` option.
pub const MAX_CERTIFICATE_HASH_OPTION_LEN: usize = 4096;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
}

/// TLS settings of a terminating filter chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsConfigIr {
    pub certificates: Vec<TlsCertificate>,
    pub alpn_protocols: Vec<String>,
    pub cipher_suites: Vec<String>,
    pub ecdh_curves: Vec<String>,
    pub min_tls_version: Option<TlsVersion>,
    pub max_tls_version: Option<TlsVersion>,
    pub verify_subject_alt_names: Vec<String>,
    pub verify_certificate_hash: Vec<String>,
    pub client_certificate_validation: Option<ClientCertificateValidation>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct TlsCertificate {
    pub cert_chain: String,
    pub private_key: String,
    pub ca: Option<String>,
}

/// Client certificate validation applied to a filter chain once its CA
/// certificates have been fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientCertificateValidation {
    pub ca_certificates: Vec<String>,
    pub require_client_certificate: bool,
}

/// A reference to a ConfigMap or Secret holding a `ca.crt` bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaCertificateRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

/// Client certificate validation as configured on the Gateway, before the CA
/// certificates are fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientCertificateValidationIr {
    pub ca_certificate_refs: Vec<CaCertificateRef>,
    pub require_client_certificate: bool,
}

/// The Gateway's frontend TLS configuration, validated per port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrontendTlsConfigIr {
    pub default_validation: Option<ClientCertificateValidationIr>,
    pub default_error: Option<CaCertificateErrors>,
    pub per_port_validation: BTreeMap<u16, ClientCertificateValidationIr>,
    pub port_errors: BTreeMap<u16, CaCertificateErrors>,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum TlsOptionError {
    #[error("unknown tls option: {0}")]
    Unknown(String),

    #[error("invalid minimum tls version: {0}")]
    InvalidMinVersion(String),

    #[error("invalid maximum tls version: {0}")]
    InvalidMaxVersion(String),

    #[error("maximum tls version {max} is less than minimum tls version {min}")]
    VersionRange { min: TlsVersion, max: TlsVersion },

    #[error("invalid certificate hash: {0}")]
    InvalidCertificateHash(String),

    #[error("verify-certificate-hash value exceeds {MAX_CERTIFICATE_HASH_OPTION_LEN} characters")]
    CertificateHashTooLong,
}

/// Every TLS option error found in one options map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptionErrors(pub Vec<TlsOptionError>);

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum TlsSecretError {
    #[error("invalid TLS secret {namespace}/{name}: {message}")]
    Invalid {
        namespace: String,
        name: String,
        message: String,
    },
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum CaCertificateError {
    #[error("invalid ca.crt kind {kind} in {namespace}/{name}: InvalidCACertificateKind")]
    InvalidKind {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("failed to fetch CA certificate ConfigMap {name}/{namespace}: InvalidCACertificateRef")]
    InvalidRef { namespace: String, name: String },

    #[error("failed to fetch CA certificate {kind} {name}/{namespace}: missing CA certificate reference grant")]
    RefNotPermitted {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("failed to fetch CA certificate Secret: {0}")]
    Secret(ReferenceError),

    #[error("ca.crt key missing in {kind} {namespace}/{name}")]
    MissingKey {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("invalid ca.crt in {kind} {namespace}/{name}: {message}")]
    InvalidCertificate {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },
}

/// Every CA certificate error found for one listener or port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaCertificateErrors(pub Vec<CaCertificateError>);

/// Why a listener's TLS configuration could not be (fully) built.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ListenerTlsError {
    #[error(transparent)]
    CertificateRef(ReferenceError),

    #[error(transparent)]
    Secret(#[from] TlsSecretError),

    #[error(transparent)]
    Options(#[from] TlsOptionErrors),

    #[error("verify-subject-alt-names annotation requires a trusted CA to be configured")]
    SubjectAltNamesRequireCa,

    #[error(transparent)]
    CaCertificate(#[from] CaCertificateErrors),
}

/// The listener conditions describing a [`ListenerTlsError`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsErrorReasons {
    pub resolved_refs_reason: &'static str,
    pub accepted_reason: &'static str,
    pub message: String,
}

// === impl TlsVersion ===

impl std::str::FromStr for TlsVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(Self::V1_0),
            "1.1" => Ok(Self::V1_1),
            "1.2" => Ok(Self::V1_2),
            "1.3" => Ok(Self::V1_3),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V1_0 => "TLSv1_0",
            Self::V1_1 => "TLSv1_1",
            Self::V1_2 => "TLSv1_2",
            Self::V1_3 => "TLSv1_3",
        })
    }
}

// === impl TlsCertificate ===

impl fmt::Debug for TlsCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCertificate")
            .field("cert_chain", &self.cert_chain)
            .field("private_key", &"<redacted>")
            .field("ca", &self.ca)
            .finish()
    }
}

// === impl TlsOptionErrors ===

impl fmt::Display for TlsOptionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        join_errors(f, &self.0)
    }
}

impl std::error::Error for TlsOptionErrors {}

// === impl CaCertificateErrors ===

impl fmt::Display for CaCertificateErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        join_errors(f, &self.0)
    }
}

impl std::error::Error for CaCertificateErrors {}

impl CaCertificateErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn join_errors<E: fmt::Display>(f: &mut fmt::Formatter<'_>, errors: &[E]) -> fmt::Result {
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            f.write_str("\n")?;
        }
        write!(f, "{e}")?;
    }
    Ok(())
}

// === impl ListenerTlsError ===

impl ListenerTlsError {
    /// Maps the error to the `ResolvedRefs` and `Accepted` reasons and message
    /// reported on the listener.
    pub fn reasons(&self) -> TlsErrorReasons {
        const INVALID_CERT_REF: &str = "InvalidCertificateRef";
        const INVALID: &str = "Invalid";
        const NO_VALID_CA: &str = "NoValidCACertificate";

        let reasons = |resolved_refs_reason, accepted_reason, message: String| TlsErrorReasons {
            resolved_refs_reason,
            accepted_reason,
            message,
        };

        match self {
            Self::CertificateRef(ReferenceError::MissingReferenceGrant(_))
            | Self::CaCertificate(CaCertificateErrors(_))
                if self.is_missing_secret_grant() =>
            {
                reasons(
                    "RefNotPermitted",
                    INVALID,
                    "Reference not permitted by ReferenceGrant.".to_string(),
                )
            }
            Self::CertificateRef(ReferenceError::NotFound(obj)) => {
                reasons(INVALID_CERT_REF, INVALID, not_found_message(obj))
            }
            Self::CertificateRef(_) => {
                reasons(INVALID_CERT_REF, INVALID, "Invalid certificate ref(s).".to_string())
            }
            Self::Secret(_) | Self::Options(_) | Self::SubjectAltNamesRequireCa => {
                reasons(INVALID_CERT_REF, INVALID, self.to_string())
            }
            Self::CaCertificate(errs) => {
                let message = self.to_string();
                let has = |f: fn(&CaCertificateError) -> bool| errs.0.iter().any(f);
                if has(|e| matches!(e, CaCertificateError::RefNotPermitted { .. })) {
                    reasons("RefNotPermitted", NO_VALID_CA, message)
                } else if has(|e| matches!(e, CaCertificateError::InvalidRef { .. })) {
                    reasons("InvalidCACertificateRef", NO_VALID_CA, message)
                } else if has(|e| matches!(e, CaCertificateError::InvalidKind { .. })) {
                    reasons("InvalidCACertificateKind", NO_VALID_CA, message)
                } else if let Some(obj) = errs.0.iter().find_map(|e| match e {
                    CaCertificateError::Secret(ReferenceError::NotFound(obj)) => Some(obj),
                    _ => None,
                }) {
                    reasons(INVALID_CERT_REF, INVALID, not_found_message(obj))
                } else {
                    reasons(INVALID_CERT_REF, INVALID, message)
                }
            }
        }
    }

    fn is_missing_secret_grant(&self) -> bool {
        match self {
            Self::CertificateRef(ReferenceError::MissingReferenceGrant(_)) => true,
            Self::CaCertificate(errs) => errs.0.iter().any(|e| {
                matches!(
                    e,
                    CaCertificateError::Secret(ReferenceError::MissingReferenceGrant(_))
                )
            }),
            _ => false,
        }
    }
}

fn not_found_message(obj: &crate::ObjectSource) -> String {
    let kind = if obj.kind.is_empty() {
        "Resource"
    } else {
        &obj.kind
    };
    format!("{} {}/{} not found.", kind, obj.namespace, obj.name)
}

// === impl TlsConfigIr ===

/// Applies every listener TLS option in `options` to `out`.
///
/// All options are applied even when some fail; the returned error carries
/// every violation found.
pub fn apply_tls_extension_options(
    options: &BTreeMap<String, String>,
    out: &mut TlsConfigIr,
) -> Result<(), TlsOptionErrors> {
    let mut errors = Vec::new();
    for (key, value) in options {
        let res = match key.as_str() {
            annotations::CIPHER_SUITES => {
                out.cipher_suites = split_trimmed(value);
                Ok(())
            }
            annotations::ECDH_CURVES => {
                out.ecdh_curves = split_trimmed(value);
                Ok(())
            }
            annotations::ALPN_PROTOCOLS => {
                out.alpn_protocols = split_trimmed(value);
                Ok(())
            }
            annotations::VERIFY_SUBJECT_ALT_NAMES => {
                out.verify_subject_alt_names = split_trimmed(value);
                Ok(())
            }
            annotations::MIN_TLS_VERSION => value
                .parse()
                .map(|v| out.min_tls_version = Some(v))
                .map_err(|()| vec![TlsOptionError::InvalidMinVersion(value.clone())]),
            annotations::MAX_TLS_VERSION => value
                .parse()
                .map(|v| out.max_tls_version = Some(v))
                .map_err(|()| vec![TlsOptionError::InvalidMaxVersion(value.clone())]),
            annotations::VERIFY_CERTIFICATE_HASH => {
                parse_certificate_hashes(value).map(|h| out.verify_certificate_hash = h)
            }
            _ => Err(vec![TlsOptionError::Unknown(key.clone())]),
        };
        if let Err(e) = res {
            errors.extend(e);
        }
    }

    if let (Some(min), Some(max)) = (out.min_tls_version, out.max_tls_version) {
        if max < min {
            errors.push(TlsOptionError::VersionRange { min, max });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TlsOptionErrors(errors))
    }
}

fn split_trimmed(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).collect()
}

fn parse_certificate_hashes(value: &str) -> Result<Vec<String>, Vec<TlsOptionError>> {
    if value.len() > MAX_CERTIFICATE_HASH_OPTION_LEN {
        return Err(vec![TlsOptionError::CertificateHashTooLong]);
    }
    let hashes = split_list(value);
    let errors = hashes
        .iter()
        .filter(|h| !is_sha256_hash(h))
        .map(|h| TlsOptionError::InvalidCertificateHash(h.clone()))
        .collect::<Vec<_>>();
    if errors.is_empty() {
        Ok(hashes)
    } else {
        Err(errors)
    }
}

/// Splits a list separated by commas or `-`, in either flat or YAML-like
/// (`- a\n- b`) form, dropping empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .flat_map(|s| s.split('-'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A SHA-256 hash is 64 hex characters, optionally as 32 colon-separated
/// pairs.
fn is_sha256_hash(hash: &str) -> bool {
    if hash.len() == 64 {
        return hash.chars().all(|c| c.is_ascii_hexdigit());
    }
    let pairs = hash.split(':').collect::<Vec<_>>();
    pairs.len() == 32
        && pairs
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

// === impl FrontendTlsConfigIr ===

impl FrontendTlsConfigIr {
    /// Validates a Gateway's frontend TLS configuration. Invalid CA reference
    /// kinds are recorded as errors while the valid references are kept.
    pub fn from_api(cfg: &api::FrontendTlsConfig, gateway_ns: &str) -> Self {
        let mut ir = Self::default();
        if let Some(default) = cfg.default.as_ref().and_then(|d| d.validation.as_ref()) {
            let (validation, errors) = validation_ir(default, gateway_ns);
            ir.default_validation = validation;
            if !errors.is_empty() {
                ir.default_error = Some(errors);
            }
        }
        for port in &cfg.per_port {
            let Some(validation) = port.tls.validation.as_ref() else {
                continue;
            };
            let (validation, errors) = validation_ir(validation, gateway_ns);
            if let Some(v) = validation {
                ir.per_port_validation.insert(port.port, v);
            }
            if !errors.is_empty() {
                ir.port_errors.insert(port.port, errors);
            }
        }
        ir
    }
}

fn validation_ir(
    validation: &api::FrontendTlsValidation,
    gateway_ns: &str,
) -> (Option<ClientCertificateValidationIr>, CaCertificateErrors) {
    let mut errors = CaCertificateErrors::default();
    let mut refs = Vec::with_capacity(validation.ca_certificate_refs.len());
    for r in &validation.ca_certificate_refs {
        let group = if r.group == "core" { "" } else { r.group.as_str() };
        if group.is_empty() && (r.kind == "ConfigMap" || r.kind == "Secret") {
            refs.push(CaCertificateRef {
                group: String::new(),
                kind: r.kind.clone(),
                name: r.name.clone(),
                namespace: r.namespace.clone(),
            });
        } else {
            errors.0.push(CaCertificateError::InvalidKind {
                kind: r.kind.clone(),
                namespace: r.namespace.clone().unwrap_or_else(|| gateway_ns.to_string()),
                name: r.name.clone(),
            });
        }
    }
    let require_client_certificate = validation.mode.as_deref() != Some("AllowInsecureFallback");
    let ir = (!refs.is_empty()).then_some(ClientCertificateValidationIr {
        ca_certificate_refs: refs,
        require_client_certificate,
    });
    (ir, errors)
}

/// Resolves the client certificate validation for a port.
///
/// Per-port errors take precedence over per-port validation, which takes
/// precedence over the defaults: a per-port configuration, even an
/// erroneous one, always shadows the default.
pub fn resolve_frontend_tls_config(
    port: u16,
    cfg: Option<&FrontendTlsConfigIr>,
) -> (Option<ClientCertificateValidationIr>, Option<CaCertificateErrors>) {
    let Some(cfg) = cfg else {
        return (None, None);
    };
    if let Some(errors) = cfg.port_errors.get(&port) {
        return (cfg.per_port_validation.get(&port).cloned(), Some(errors.clone()));
    }
    if let Some(validation) = cfg.per_port_validation.get(&port) {
        return (Some(validation.clone()), None);
    }
    (cfg.default_validation.clone(), cfg.default_error.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const HEX64: &str = "df6ff72fe9116521268f6f2dd4966f51df479883fe7037b39f75916ac3049d1a";

    fn colon_pairs(hex: &str) -> String {
        hex.as_bytes()
            .chunks(2)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join(":")
    }

    #[rstest]
    #[case("A,B")]
    #[case("A, B")]
    #[case(" A ,B ")]
    fn cipher_suites_are_trimmed(#[case] value: &str) {
        let mut out = TlsConfigIr::default();
        apply_tls_extension_options(
            &btreemap! { annotations::CIPHER_SUITES.to_string() => value.to_string() },
            &mut out,
        )
        .unwrap();
        assert_eq!(out.cipher_suites, vec!["A", "B"]);
    }

    #[test]
    fn unknown_option_keeps_valid_options() {
        let mut out = TlsConfigIr::default();
        let err = apply_tls_extension_options(
            &btreemap! {
                "kgateway.dev/cipher-suite".to_string() => "A".to_string(),
                annotations::ECDH_CURVES.to_string() => "X25519, P-256".to_string(),
                annotations::MIN_TLS_VERSION.to_string() => "1.2".to_string(),
            },
            &mut out,
        )
        .unwrap_err();
        assert!(
            err.to_string().contains("unknown tls option: kgateway.dev/cipher-suite"),
            "{err}"
        );
        assert_eq!(out.ecdh_curves, vec!["X25519", "P-256"]);
        assert_eq!(out.min_tls_version, Some(TlsVersion::V1_2));
    }

    #[test]
    fn version_range_is_validated() {
        let mut out = TlsConfigIr::default();
        let err = apply_tls_extension_options(
            &btreemap! {
                annotations::MIN_TLS_VERSION.to_string() => "1.3".to_string(),
                annotations::MAX_TLS_VERSION.to_string() => "1.2".to_string(),
            },
            &mut out,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "maximum tls version TLSv1_2 is less than minimum tls version TLSv1_3"
        );

        let err = apply_tls_extension_options(
            &btreemap! { annotations::MAX_TLS_VERSION.to_string() => "1.4".to_string() },
            &mut TlsConfigIr::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid maximum tls version: 1.4");
    }

    #[rstest]
    #[case(HEX64.to_string())]
    #[case(colon_pairs(HEX64))]
    #[case(HEX64.to_uppercase())]
    fn accepts_certificate_hashes(#[case] hash: String) {
        assert_eq!(parse_certificate_hashes(&hash), Ok(vec![hash.clone()]));
    }

    #[rstest]
    #[case(HEX64[..63].to_string())]
    #[case(format!("{HEX64}0"))]
    #[case(colon_pairs(&HEX64[..62]))]
    #[case(format!("{}:0", colon_pairs(&HEX64[..62])))]
    #[case(colon_pairs(HEX64).replacen(':', "", 1))]
    #[case(format!("{}g", &HEX64[..63]))]
    fn rejects_certificate_hashes(#[case] hash: String) {
        assert_eq!(
            parse_certificate_hashes(&hash),
            Err(vec![TlsOptionError::InvalidCertificateHash(hash.clone())])
        );
    }

    #[test]
    fn certificate_hash_errors_are_aggregated() {
        let value = format!("bad1, {HEX64},\n - bad2");
        let mut out = TlsConfigIr::default();
        let err = apply_tls_extension_options(
            &btreemap! { annotations::VERIFY_CERTIFICATE_HASH.to_string() => value },
            &mut out,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid certificate hash: bad1\ninvalid certificate hash: bad2"
        );
        assert!(out.verify_certificate_hash.is_empty());
    }

    #[test]
    fn certificate_hash_length_limit() {
        let value = vec![HEX64; 64].join(",");
        assert!(value.len() > MAX_CERTIFICATE_HASH_OPTION_LEN);
        assert_eq!(
            parse_certificate_hashes(&value),
            Err(vec![TlsOptionError::CertificateHashTooLong])
        );
    }

    #[test]
    fn split_yaml_like_lists() {
        assert_eq!(split_list(" - a\n  - b\n  - c"), vec!["a", "b", "c"]);
        assert_eq!(split_list("a, b,,c"), vec!["a", "b", "c"]);
        assert_eq!(split_list("------ a, b\n, c       -d"), vec!["a", "b", "c", "d"]);
    }

    fn validation(refs: &[&str]) -> ClientCertificateValidationIr {
        ClientCertificateValidationIr {
            ca_certificate_refs: refs
                .iter()
                .map(|n| CaCertificateRef {
                    group: String::new(),
                    kind: "ConfigMap".to_string(),
                    name: n.to_string(),
                    namespace: None,
                })
                .collect(),
            require_client_certificate: true,
        }
    }

    fn errors(name: &str) -> CaCertificateErrors {
        CaCertificateErrors(vec![CaCertificateError::InvalidKind {
            kind: "Service".to_string(),
            namespace: "default".to_string(),
            name: name.to_string(),
        }])
    }

    #[test]
    fn per_port_configuration_shadows_default() {
        let cfg = FrontendTlsConfigIr {
            default_validation: Some(validation(&["default"])),
            default_error: Some(errors("default")),
            per_port_validation: btreemap! {
                443 => validation(&["p443"]),
                8443 => validation(&["p8443"]),
            },
            port_errors: btreemap! { 8443 => errors("p8443") },
        };

        assert_eq!(
            resolve_frontend_tls_config(8443, Some(&cfg)),
            (Some(validation(&["p8443"])), Some(errors("p8443")))
        );
        assert_eq!(
            resolve_frontend_tls_config(443, Some(&cfg)),
            (Some(validation(&["p443"])), None)
        );
        assert_eq!(
            resolve_frontend_tls_config(9443, Some(&cfg)),
            (Some(validation(&["default"])), Some(errors("default")))
        );
        assert_eq!(resolve_frontend_tls_config(443, None), (None, None));
    }

    #[test]
    fn per_port_error_without_validation_still_shadows_default() {
        let cfg = FrontendTlsConfigIr {
            default_validation: Some(validation(&["default"])),
            port_errors: btreemap! { 443 => errors("p443") },
            ..Default::default()
        };
        assert_eq!(
            resolve_frontend_tls_config(443, Some(&cfg)),
            (None, Some(errors("p443")))
        );
    }

    #[test]
    fn invalid_ca_kinds_keep_valid_refs() {
        let api_cfg = api::FrontendTlsConfig {
            default: Some(api::TlsConfig {
                validation: Some(api::FrontendTlsValidation {
                    ca_certificate_refs: vec![
                        api::ObjectReference {
                            group: String::new(),
                            kind: "ConfigMap".to_string(),
                            name: "ca".to_string(),
                            namespace: None,
                        },
                        api::ObjectReference {
                            group: String::new(),
                            kind: "Service".to_string(),
                            name: "nope".to_string(),
                            namespace: None,
                        },
                    ],
                    mode: Some("AllowInsecureFallback".to_string()),
                }),
            }),
            per_port: vec![],
        };
        let ir = FrontendTlsConfigIr::from_api(&api_cfg, "default");
        let v = ir.default_validation.expect("partial validation");
        assert_eq!(v.ca_certificate_refs.len(), 1);
        assert!(!v.require_client_certificate);
        let err = ListenerTlsError::CaCertificate(ir.default_error.expect("kind error"));
        assert_eq!(err.reasons().resolved_refs_reason, "InvalidCACertificateKind");
        assert_eq!(err.reasons().accepted_reason, "NoValidCACertificate");
    }

    #[test]
    fn listener_error_reasons() {
        let secret = crate::ObjectSource {
            group: String::new(),
            kind: "Secret".to_string(),
            namespace: "other".to_string(),
            name: "cert".to_string(),
        };
        let r = ListenerTlsError::CertificateRef(ReferenceError::MissingReferenceGrant(
            secret.clone(),
        ))
        .reasons();
        assert_eq!(r.resolved_refs_reason, "RefNotPermitted");
        assert_eq!(r.message, "Reference not permitted by ReferenceGrant.");

        let r = ListenerTlsError::CertificateRef(ReferenceError::NotFound(secret)).reasons();
        assert_eq!(r.resolved_refs_reason, "InvalidCertificateRef");
        assert_eq!(r.message, "Secret other/cert not found.");

        let r = ListenerTlsError::SubjectAltNamesRequireCa.reasons();
        assert_eq!(
            r.message,
            "verify-subject-alt-names annotation requires a trusted CA to be configured"
        );
    }
}
