//! Policy translation and attachment.
//!
//! Policies are translated into their IR whenever a snapshot is taken, since
//! their translation depends on other objects (GatewayExtensions, Secrets,
//! backends and discovered OIDC providers). The resulting [`PolicyIndex`]
//! answers which policies attach to an object or one of its sections.

use crate::{backend::BackendIndex, secrets::SecretData, ReferenceGrants};
use ahash::AHashMap as HashMap;
use gateway_controller_core::{
    annotations,
    oidc::OidcProviders,
    policy::{
        AttachedPolicies, PolicyAttachment, PolicyError, PolicyIr, PolicyRef, PolicyTarget,
        PolicyWrapper, Specificity,
    },
    GroupKind, ObjectSource, TranslatorSettings,
};
use gateway_controller_k8s_api::{
    labels, Backend, BackendConfigPolicy, Gateway, GatewayExtension, GrpcRoute, HttpRoute, Labels,
    ListenerPolicy, Resource, Service, TrafficPolicy,
};
use std::sync::Arc;

mod backend_config;
mod listener;
mod traffic;

/// A policy object as watched, before translation.
#[derive(Clone, Debug)]
pub(crate) enum RawPolicy {
    Traffic(Arc<TrafficPolicy>),
    Listener(Arc<ListenerPolicy>),
    BackendConfig(Arc<BackendConfigPolicy>),
}

/// Everything outside the policy object itself that translation reads.
pub(crate) struct PolicyCtx<'a> {
    pub settings: &'a TranslatorSettings,
    pub extensions: &'a HashMap<ObjectSource, Arc<GatewayExtension>>,
    pub secrets: &'a HashMap<ObjectSource, Arc<SecretData>>,
    pub backends: &'a BackendIndex,
    pub grants: &'a ReferenceGrants,
    pub oidc: &'a dyn OidcProviders,
}

/// Translated policies, indexed by the objects they target.
#[derive(Clone, Debug, Default)]
pub struct PolicyIndex {
    policies: Vec<Arc<PolicyWrapper>>,
    by_name: HashMap<ObjectSource, Vec<(Option<String>, Arc<PolicyWrapper>)>>,
    by_selector: HashMap<(GroupKind, String), Vec<Selection>>,
}

#[derive(Clone, Debug)]
struct Selection {
    match_labels: labels::Map,
    section_name: Option<String>,
    policy: Arc<PolicyWrapper>,
}

// === impl RawPolicy ===

impl RawPolicy {
    pub(crate) fn translate(&self, ctx: &PolicyCtx<'_>) -> PolicyWrapper {
        match self {
            Self::Traffic(p) => {
                let mut errors = Vec::new();
                let ir = traffic::convert(p, ctx, &mut errors);
                wrap(
                    p.as_ref(),
                    PolicyIr::Traffic(Arc::new(ir)),
                    PolicyRef::from_targets(&p.spec.target_refs, &p.spec.target_selectors),
                    &[
                        GroupKind::of::<Gateway>(),
                        GroupKind::of::<HttpRoute>(),
                        GroupKind::of::<GrpcRoute>(),
                    ],
                    errors,
                )
            }
            Self::Listener(p) => {
                let mut errors = Vec::new();
                let ir = listener::convert(p, &mut errors);
                wrap(
                    p.as_ref(),
                    PolicyIr::Listener(Arc::new(ir)),
                    PolicyRef::from_targets(&p.spec.target_refs, &p.spec.target_selectors),
                    &[GroupKind::of::<Gateway>()],
                    errors,
                )
            }
            Self::BackendConfig(p) => {
                let mut errors = Vec::new();
                let ir = backend_config::convert(p, &mut errors);
                wrap(
                    p.as_ref(),
                    PolicyIr::BackendConfig(Arc::new(ir)),
                    PolicyRef::from_targets(&p.spec.target_refs, &p.spec.target_selectors),
                    &[GroupKind::of::<Service>(), GroupKind::of::<Backend>()],
                    errors,
                )
            }
        }
    }
}

fn wrap<T>(
    policy: &T,
    ir: PolicyIr,
    target_refs: Vec<PolicyRef>,
    target_kinds: &[GroupKind],
    mut errors: Vec<PolicyError>,
) -> PolicyWrapper
where
    T: Resource,
    T::DynamicType: Default,
{
    let source = ObjectSource::of(policy);
    let meta = policy.meta();

    let precedence_weight = match annotations::parse_precedence_weight(
        meta.annotations.as_ref().unwrap_or(&Default::default()),
    ) {
        Ok(w) => w,
        Err(error) => {
            errors.push(error.into());
            0
        }
    };

    let mut supported = Vec::with_capacity(target_refs.len());
    for r in target_refs {
        let gk = r.group_kind();
        if target_kinds.contains(&gk) {
            supported.push(r);
        } else if !errors.contains(&PolicyError::UnsupportedTargetKind(gk.clone())) {
            errors.push(PolicyError::UnsupportedTargetKind(gk));
        }
    }

    if let Err(invalid) = ir.validate() {
        errors.extend(invalid);
    }

    if !errors.is_empty() {
        tracing::debug!(policy = %source, errors = errors.len(), "policy has errors");
    }

    PolicyWrapper {
        generation: meta.generation,
        creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0),
        ir,
        target_refs: supported,
        errors,
        precedence_weight,
        source,
    }
}

// === impl PolicyIndex ===

impl PolicyIndex {
    pub(crate) fn new(policies: impl IntoIterator<Item = PolicyWrapper>) -> Self {
        let mut index = Self::default();
        for policy in policies {
            let policy = Arc::new(policy);
            let namespace = policy.source.namespace.clone();
            for r in &policy.target_refs {
                match &r.target {
                    PolicyTarget::Name(name) => {
                        let target = ObjectSource::new(r.group_kind(), namespace.clone(), name);
                        index
                            .by_name
                            .entry(target)
                            .or_default()
                            .push((r.section_name.clone(), policy.clone()));
                    }
                    PolicyTarget::Labels(match_labels) => {
                        index
                            .by_selector
                            .entry((r.group_kind(), namespace.clone()))
                            .or_default()
                            .push(Selection {
                                match_labels: match_labels.clone(),
                                section_name: r.section_name.clone(),
                                policy: policy.clone(),
                            });
                    }
                }
            }
            index.policies.push(policy);
        }
        index
            .policies
            .sort_by(|a, b| a.source.cmp(&b.source));
        index
    }

    /// Every translated policy, ordered by source.
    pub fn policies(&self) -> &[Arc<PolicyWrapper>] {
        &self.policies
    }

    pub fn get(&self, source: &ObjectSource) -> Option<&Arc<PolicyWrapper>> {
        self.policies
            .binary_search_by(|p| p.source.cmp(source))
            .ok()
            .map(|i| &self.policies[i])
    }

    /// Returns the policies attached to `target`, or to one of its sections.
    ///
    /// Without a section only whole-object attachments apply. With a section,
    /// whole-object attachments apply along with those naming the section.
    /// A policy attached more than one way keeps its most specific attachment.
    pub fn attached_to(
        &self,
        target: &ObjectSource,
        labels: &Labels,
        section: Option<&str>,
    ) -> AttachedPolicies {
        let section_matches = |s: &Option<String>| match s {
            None => true,
            Some(s) => section == Some(s.as_str()),
        };

        let mut found: Vec<(Arc<PolicyWrapper>, Specificity)> = Vec::new();
        let mut add = |policy: &Arc<PolicyWrapper>, specificity| {
            match found.iter_mut().find(|(p, _)| p.source == policy.source) {
                Some((_, s)) => *s = (*s).max(specificity),
                None => found.push((policy.clone(), specificity)),
            }
        };

        for (section_name, policy) in self.by_name.get(target).into_iter().flatten() {
            if section_matches(section_name) {
                let specificity = if section_name.is_some() {
                    Specificity::Section
                } else {
                    Specificity::Name
                };
                add(policy, specificity);
            }
        }

        let key = (target.group_kind(), target.namespace.clone());
        for sel in self.by_selector.get(&key).into_iter().flatten() {
            if section_matches(&sel.section_name) && labels.selected_by(&sel.match_labels) {
                add(&sel.policy, Specificity::Selector);
            }
        }

        found
            .into_iter()
            .map(|(policy, specificity)| PolicyAttachment::new(policy, specificity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_core::oidc::OidcProviderConfig;
    use gateway_controller_k8s_api::{
        policy::{LocalPolicyTargetReference, LocalPolicyTargetSelector, TrafficPolicySpec},
        ObjectMeta,
    };
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn traffic_policy(
        name: &str,
        refs: Vec<LocalPolicyTargetReference>,
        selectors: Vec<LocalPolicyTargetSelector>,
    ) -> RawPolicy {
        RawPolicy::Traffic(Arc::new(TrafficPolicy {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: TrafficPolicySpec {
                target_refs: refs,
                target_selectors: selectors,
                auto_host_rewrite: Some(true),
                ..Default::default()
            },
            status: None,
        }))
    }

    fn route_ref(name: &str, section: Option<&str>) -> LocalPolicyTargetReference {
        LocalPolicyTargetReference {
            group: "gateway.networking.k8s.io".to_string(),
            kind: "HTTPRoute".to_string(),
            name: name.to_string(),
            section_name: section.map(str::to_string),
        }
    }

    fn translate(policies: Vec<RawPolicy>) -> PolicyIndex {
        let settings = TranslatorSettings::default();
        let extensions = HashMap::new();
        let secrets = HashMap::new();
        let backends = BackendIndex::default();
        let grants = ReferenceGrants::default();
        let oidc: HashMap<String, OidcProviderConfig> = HashMap::new();
        let ctx = PolicyCtx {
            settings: &settings,
            extensions: &extensions,
            secrets: &secrets,
            backends: &backends,
            grants: &grants,
            oidc: &oidc,
        };
        PolicyIndex::new(policies.iter().map(|p| p.translate(&ctx)))
    }

    fn attached(
        index: &PolicyIndex,
        labels: &Labels,
        section: Option<&str>,
    ) -> Vec<(String, Specificity)> {
        let route = ObjectSource::new(GroupKind::of::<HttpRoute>(), "default", "r");
        index
            .attached_to(&route, labels, section)
            .get(&GroupKind::of::<TrafficPolicy>())
            .iter()
            .map(|a| (a.source().name.clone(), a.specificity))
            .collect()
    }

    #[test]
    fn sections_and_selectors() {
        let index = translate(vec![
            traffic_policy("whole", vec![route_ref("r", None)], vec![]),
            traffic_policy("rule", vec![route_ref("r", Some("a"))], vec![]),
            traffic_policy("other", vec![route_ref("other", None)], vec![]),
            traffic_policy(
                "selected",
                vec![],
                vec![LocalPolicyTargetSelector {
                    group: "gateway.networking.k8s.io".to_string(),
                    kind: "HTTPRoute".to_string(),
                    match_labels: btreemap! { "app".to_string() => "web".to_string() },
                    section_name: None,
                }],
            ),
        ]);
        let labels = Labels::from_iter([("app", "web")]);

        assert_eq!(
            attached(&index, &labels, None),
            vec![
                ("whole".to_string(), Specificity::Name),
                ("selected".to_string(), Specificity::Selector),
            ]
        );
        assert_eq!(
            attached(&index, &labels, Some("a")),
            vec![
                ("rule".to_string(), Specificity::Section),
                ("whole".to_string(), Specificity::Name),
                ("selected".to_string(), Specificity::Selector),
            ]
        );
        assert_eq!(
            attached(&index, &Labels::default(), Some("b")),
            vec![("whole".to_string(), Specificity::Name)]
        );
    }

    #[test]
    fn duplicate_attachments_keep_the_most_specific() {
        let index = translate(vec![traffic_policy(
            "both",
            vec![route_ref("r", None)],
            vec![LocalPolicyTargetSelector {
                group: "gateway.networking.k8s.io".to_string(),
                kind: "HTTPRoute".to_string(),
                match_labels: btreemap! { "app".to_string() => "web".to_string() },
                section_name: None,
            }],
        )]);
        assert_eq!(
            attached(&index, &Labels::from_iter([("app", "web")]), None),
            vec![("both".to_string(), Specificity::Name)]
        );
    }

    #[test]
    fn unsupported_target_kinds_are_errors() {
        let index = translate(vec![traffic_policy(
            "svc",
            vec![LocalPolicyTargetReference {
                group: "".to_string(),
                kind: "Service".to_string(),
                name: "web".to_string(),
                section_name: None,
            }],
            vec![],
        )]);
        let policy = &index.policies()[0];
        assert!(policy.target_refs.is_empty());
        assert_eq!(
            policy.errors,
            vec![PolicyError::UnsupportedTargetKind(GroupKind::new("", "Service"))]
        );
    }

    #[test]
    fn invalid_weights_are_errors() {
        let raw = TrafficPolicy {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("weighted".to_string()),
                annotations: Some(btreemap! {
                    annotations::POLICY_WEIGHT.to_string() => "heavy".to_string(),
                }),
                ..Default::default()
            },
            spec: TrafficPolicySpec {
                target_refs: vec![route_ref("r", None)],
                ..Default::default()
            },
            status: None,
        };
        let index = translate(vec![RawPolicy::Traffic(Arc::new(raw))]);
        let policy = &index.policies()[0];
        assert_eq!(policy.precedence_weight, 0);
        assert_eq!(
            policy.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["invalid value for annotation kgateway.dev/policy-weight: heavy; must be a valid integer"]
        );
    }
}
