//! Annotation keys read from Gateways, routes, policies, backends and
//! listener TLS options, with their parsers.

use crate::policy::InheritedPolicyPriority;
use std::collections::BTreeMap;

/// Sets the per-connection buffer limit of every listener of a Gateway, as a
/// Kubernetes quantity (e.g. `64Ki`).
pub const PER_CONNECTION_BUFFER_LIMIT: &str = "kgateway.dev/per-connection-buffer-limit";

/// Governs how policies inherited from a Gateway or a parent HTTPRoute merge
/// with the policies attached to the routes below it.
pub const INHERITED_POLICY_PRIORITY: &str = "kgateway.dev/inherited-policy-priority";

/// The signed integer weight of a policy or GatewayExtension. Defaults to 0.
pub const POLICY_WEIGHT: &str = "kgateway.dev/policy-weight";

/// Presence on a backend object disables Istio auto mTLS for that backend.
pub const DISABLE_ISTIO_AUTO_MTLS: &str = "kgateway.dev/disable-istio-auto-mtls";

/// Overrides RequestRedirect status codes on an HTTPRoute.
pub const HTTP_REDIRECT_STATUS_CODE: &str = "kgateway.dev/http-redirect-status-code";

// Listener TLS option keys.
pub const ALPN_PROTOCOLS: &str = "kgateway.dev/alpn-protocols";
pub const CIPHER_SUITES: &str = "kgateway.dev/cipher-suites";
pub const ECDH_CURVES: &str = "kgateway.dev/ecdh-curves";
pub const MIN_TLS_VERSION: &str = "kgateway.dev/min-tls-version";
pub const MAX_TLS_VERSION: &str = "kgateway.dev/max-tls-version";
pub const VERIFY_SUBJECT_ALT_NAMES: &str = "kgateway.dev/verify-subject-alt-names";
pub const VERIFY_CERTIFICATE_HASH: &str = "kgateway.dev/verify-certificate-hash";

/// ALPN value that allows clients to connect without negotiating ALPN.
pub const ALLOW_EMPTY_ALPN: &str = "allow-empty";

const REDIRECT_STATUS_CODES: [u16; 5] = [301, 302, 303, 307, 308];

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("invalid value for annotation {key}: {value}; must be a valid integer")]
    InvalidInteger { key: &'static str, value: String },

    #[error("invalid value for annotation {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid redirect status code {0}; must be one of 301, 302, 303, 307, 308")]
    InvalidRedirectStatus(String),
}

/// Redirect status codes from the `http-redirect-status-code` annotation:
/// either one code for every rule or a code per named rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RedirectStatusCodes {
    all: Option<u16>,
    per_rule: BTreeMap<String, u16>,
}

/// Parses the precedence weight of a policy. A missing annotation is weight 0.
pub fn parse_precedence_weight(
    annotations: &BTreeMap<String, String>,
) -> Result<i32, AnnotationError> {
    let Some(value) = annotations.get(POLICY_WEIGHT) else {
        return Ok(0);
    };
    value
        .parse::<i32>()
        .map_err(|_| AnnotationError::InvalidInteger {
            key: POLICY_WEIGHT,
            value: value.clone(),
        })
}

/// Parses the inherited policy priority of a Gateway or parent route. Returns
/// `None` when the annotation is absent.
pub fn parse_inherited_policy_priority(
    annotations: &BTreeMap<String, String>,
) -> Result<Option<InheritedPolicyPriority>, AnnotationError> {
    annotations
        .get(INHERITED_POLICY_PRIORITY)
        .map(|v| {
            v.parse().map_err(|_| AnnotationError::InvalidValue {
                key: INHERITED_POLICY_PRIORITY,
                value: v.clone(),
            })
        })
        .transpose()
}

pub fn is_istio_auto_mtls_disabled(annotations: &BTreeMap<String, String>) -> bool {
    annotations.contains_key(DISABLE_ISTIO_AUTO_MTLS)
}

pub fn parse_redirect_status_codes(
    annotations: &BTreeMap<String, String>,
) -> Result<Option<RedirectStatusCodes>, AnnotationError> {
    annotations
        .get(HTTP_REDIRECT_STATUS_CODE)
        .map(|v| v.parse())
        .transpose()
}

// === impl RedirectStatusCodes ===

impl RedirectStatusCodes {
    /// Returns the status code that applies to a rule, if any.
    pub fn for_rule(&self, rule_name: Option<&str>) -> Option<u16> {
        if let Some(code) = self.all {
            return Some(code);
        }
        rule_name.and_then(|n| self.per_rule.get(n).copied())
    }
}

impl std::str::FromStr for RedirectStatusCodes {
    type Err = AnnotationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn code(s: &str) -> Result<u16, AnnotationError> {
            s.trim()
                .parse::<u16>()
                .ok()
                .filter(|c| REDIRECT_STATUS_CODES.contains(c))
                .ok_or_else(|| AnnotationError::InvalidRedirectStatus(s.trim().to_string()))
        }

        let s = s.trim();
        if !s.contains('=') {
            return Ok(Self {
                all: Some(code(s)?),
                per_rule: BTreeMap::new(),
            });
        }

        let mut per_rule = BTreeMap::new();
        for pair in s.split(',').filter(|p| !p.trim().is_empty()) {
            let (rule, value) = pair.split_once('=').ok_or_else(|| AnnotationError::InvalidValue {
                key: HTTP_REDIRECT_STATUS_CODE,
                value: pair.to_string(),
            })?;
            let rule = rule.trim();
            if rule.is_empty() {
                return Err(AnnotationError::InvalidValue {
                    key: HTTP_REDIRECT_STATUS_CODE,
                    value: pair.to_string(),
                });
            }
            per_rule.insert(rule.to_string(), code(value)?);
        }
        Ok(Self {
            all: None,
            per_rule,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use rstest::rstest;

    #[rstest]
    #[case(None, Ok(0))]
    #[case(Some("10"), Ok(10))]
    #[case(Some("-3"), Ok(-3))]
    #[case(
        Some("high"),
        Err("invalid value for annotation kgateway.dev/policy-weight: high; must be a valid integer".to_string())
    )]
    #[case(
        Some("99999999999"),
        Err("invalid value for annotation kgateway.dev/policy-weight: 99999999999; must be a valid integer".to_string())
    )]
    fn precedence_weight(#[case] value: Option<&str>, #[case] expected: Result<i32, String>) {
        let annotations = value
            .map(|v| btreemap! { POLICY_WEIGHT.to_string() => v.to_string() })
            .unwrap_or_default();
        assert_eq!(
            parse_precedence_weight(&annotations).map_err(|e| e.to_string()),
            expected
        );
    }

    #[test]
    fn redirect_code_for_all_rules() {
        let codes: RedirectStatusCodes = "307".parse().unwrap();
        assert_eq!(codes.for_rule(None), Some(307));
        assert_eq!(codes.for_rule(Some("anything")), Some(307));
    }

    #[test]
    fn redirect_code_per_rule() {
        let codes: RedirectStatusCodes = "rule1=307, rule2=308".parse().unwrap();
        assert_eq!(codes.for_rule(Some("rule1")), Some(307));
        assert_eq!(codes.for_rule(Some("rule2")), Some(308));
        assert_eq!(codes.for_rule(Some("rule3")), None);
        assert_eq!(codes.for_rule(None), None);
    }

    #[rstest]
    #[case("200")]
    #[case("rule1=304")]
    #[case("=301")]
    #[case("rule1=abc")]
    fn invalid_redirect_codes(#[case] value: &str) {
        assert!(value.parse::<RedirectStatusCodes>().is_err(), "{value}");
    }

    #[test]
    fn inherited_priority() {
        let annotations = btreemap! {
            INHERITED_POLICY_PRIORITY.to_string() => "DeepMergePreferParent".to_string(),
        };
        assert_eq!(
            parse_inherited_policy_priority(&annotations),
            Ok(Some(InheritedPolicyPriority::DeepMergePreferParent))
        );
        assert_eq!(parse_inherited_policy_priority(&BTreeMap::new()), Ok(None));
        let bad = btreemap! {
            INHERITED_POLICY_PRIORITY.to_string() => "PreferNobody".to_string(),
        };
        assert!(parse_inherited_policy_priority(&bad).is_err());
    }
}
