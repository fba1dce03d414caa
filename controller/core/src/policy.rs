use crate::{annotations::AnnotationError, GroupKind, ObjectSource};
use chrono::{offset::Utc, DateTime};
use gateway_controller_k8s_api::{
    policy::{LocalPolicyTargetReference, LocalPolicyTargetSelector},
    BackendConfigPolicy, ListenerPolicy, TrafficPolicy,
};
use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};

pub mod backend_config;
pub mod listener;
mod merge;
pub mod traffic;

pub use self::{
    backend_config::BackendConfigPolicyIr,
    listener::ListenerPolicyIr,
    merge::{
        merge_policies, AttachmentState, Contribution, DeepMerge, InheritedPolicyPriority, MergeCtx,
        MergeDepth, MergeOrigins, MergePreference, MergeSettings, MergeablePolicy, MergedPolicy,
    },
    traffic::TrafficPolicyIr,
};

/// What a policy attaches to: one named object or every object whose labels
/// match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PolicyTarget {
    Name(String),
    Labels(BTreeMap<String, String>),
}

/// A policy's attachment specification. A policy may carry several.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PolicyRef {
    pub group: String,
    pub kind: String,
    pub target: PolicyTarget,
    pub section_name: Option<String>,
}

/// How specifically a policy attaches to its target. Higher values win.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Specificity {
    Selector,
    Name,
    Section,
}

/// The translated form of a policy.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyIr {
    Traffic(Arc<TrafficPolicyIr>),
    Listener(Arc<ListenerPolicyIr>),
    BackendConfig(Arc<BackendConfigPolicyIr>),
}

/// A policy object together with its translated form, its targets and the
/// errors found while translating it.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyWrapper {
    pub source: ObjectSource,
    pub generation: Option<i64>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub ir: PolicyIr,
    pub target_refs: Vec<PolicyRef>,
    pub errors: Vec<PolicyError>,
    pub precedence_weight: i32,
}

/// A policy attached to a target, with the provenance needed to order it.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyAttachment {
    pub policy: Arc<PolicyWrapper>,
    pub specificity: Specificity,

    /// Zero for policies attached to the target itself; each inherited level
    /// (listener or Gateway, delegating parent route) adds one.
    pub depth: u8,
}

/// The policies attached to one attachment point, by policy kind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttachedPolicies(BTreeMap<GroupKind, Vec<PolicyAttachment>>);

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error("{field}: {message}")]
    InvalidField { field: &'static str, message: String },

    #[error("{field}: GatewayExtension {namespace}/{name} not found")]
    MissingExtension {
        field: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{field}: GatewayExtension {namespace}/{name} does not configure a {provider} provider")]
    WrongExtensionType {
        field: &'static str,
        namespace: String,
        name: String,
        provider: &'static str,
    },

    #[error("{field}: {source}")]
    Reference {
        field: &'static str,
        source: crate::ReferenceError,
    },

    #[error("unsupported target kind {0}")]
    UnsupportedTargetKind(GroupKind),
}

// === impl PolicyRef ===

impl PolicyRef {
    /// Converts the target references and selectors of a policy.
    pub fn from_targets(
        refs: &[LocalPolicyTargetReference],
        selectors: &[LocalPolicyTargetSelector],
    ) -> Vec<Self> {
        let named = refs.iter().map(|r| Self {
            group: r.group.clone(),
            kind: r.kind.clone(),
            target: PolicyTarget::Name(r.name.clone()),
            section_name: r.section_name.clone(),
        });
        let selected = selectors.iter().map(|s| Self {
            group: s.group.clone(),
            kind: s.kind.clone(),
            target: PolicyTarget::Labels(s.match_labels.clone()),
            section_name: s.section_name.clone(),
        });
        named.chain(selected).collect()
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }

    /// The specificity of an attachment made through this reference.
    pub fn specificity(&self) -> Specificity {
        match (&self.target, &self.section_name) {
            (PolicyTarget::Labels(_), _) => Specificity::Selector,
            (PolicyTarget::Name(_), Some(_)) => Specificity::Section,
            (PolicyTarget::Name(_), None) => Specificity::Name,
        }
    }
}

// === impl PolicyIr ===

impl PolicyIr {
    pub fn group_kind(&self) -> GroupKind {
        match self {
            Self::Traffic(_) => GroupKind::of::<TrafficPolicy>(),
            Self::Listener(_) => GroupKind::of::<ListenerPolicy>(),
            Self::BackendConfig(_) => GroupKind::of::<BackendConfigPolicy>(),
        }
    }

    pub fn validate(&self) -> Result<(), Vec<PolicyError>> {
        let errors = match self {
            Self::Traffic(ir) => ir.validate(),
            Self::Listener(ir) => ir.validate(),
            Self::BackendConfig(ir) => ir.validate(),
        };
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// === impl PolicyAttachment ===

impl PolicyAttachment {
    pub fn new(policy: Arc<PolicyWrapper>, specificity: Specificity) -> Self {
        Self {
            policy,
            specificity,
            depth: 0,
        }
    }

    pub fn source(&self) -> &ObjectSource {
        &self.policy.source
    }

    /// The attachment as inherited by a target one level further down.
    pub fn inherited(&self) -> Self {
        Self {
            depth: self.depth.saturating_add(1),
            ..self.clone()
        }
    }
}

/// Orders attachments by specificity (section, then name, then selector),
/// then by weight descending, then by creation timestamp ascending, then by
/// namespace and name.
///
/// Specificity is never overridden by weight: an exact-name attachment always
/// precedes a selector attachment.
pub fn cmp_attachments(a: &PolicyAttachment, b: &PolicyAttachment) -> Ordering {
    cmp_attachments_weighted(a, a.policy.precedence_weight, b, b.policy.precedence_weight)
}

pub(crate) fn cmp_attachments_weighted(
    a: &PolicyAttachment,
    a_weight: i32,
    b: &PolicyAttachment,
    b_weight: i32,
) -> Ordering {
    b.specificity
        .cmp(&a.specificity)
        .then_with(|| b_weight.cmp(&a_weight))
        .then_with(|| {
            a.policy
                .creation_timestamp
                .cmp(&b.policy.creation_timestamp)
        })
        .then_with(|| a.policy.source.namespace.cmp(&b.policy.source.namespace))
        .then_with(|| a.policy.source.name.cmp(&b.policy.source.name))
}

// === impl AttachedPolicies ===

impl AttachedPolicies {
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    pub fn get(&self, gk: &GroupKind) -> &[PolicyAttachment] {
        self.0.get(gk).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKind, &[PolicyAttachment])> {
        self.0.iter().map(|(gk, a)| (gk, a.as_slice()))
    }

    /// Adds an attachment, keeping each kind's list in attachment order.
    pub fn push(&mut self, attachment: PolicyAttachment) {
        let list = self
            .0
            .entry(attachment.policy.ir.group_kind())
            .or_default();
        list.push(attachment);
        list.sort_by(cmp_attachments);
    }

    /// Adds every attachment of `parent` as inherited from one level up.
    pub fn inherit_from(&mut self, parent: &AttachedPolicies) {
        for (_, attachments) in parent.iter() {
            for a in attachments {
                self.push(a.inherited());
            }
        }
    }

    /// Every distinct policy attached here.
    pub fn sources(&self) -> Vec<&ObjectSource> {
        let mut sources = self
            .0
            .values()
            .flatten()
            .map(PolicyAttachment::source)
            .collect::<Vec<_>>();
        sources.sort();
        sources.dedup();
        sources
    }
}

impl FromIterator<PolicyAttachment> for AttachedPolicies {
    fn from_iter<T: IntoIterator<Item = PolicyAttachment>>(iter: T) -> Self {
        let mut policies = Self::default();
        for a in iter {
            policies.push(a);
        }
        policies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn wrapper(
        name: &str,
        weight: i32,
        created_secs: Option<i64>,
    ) -> Arc<PolicyWrapper> {
        Arc::new(PolicyWrapper {
            source: ObjectSource::new(
                GroupKind::of::<TrafficPolicy>(),
                "default",
                name.to_string(),
            ),
            generation: Some(1),
            creation_timestamp: created_secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            ir: PolicyIr::Traffic(Default::default()),
            target_refs: vec![],
            errors: vec![],
            precedence_weight: weight,
        })
    }

    fn names(policies: &AttachedPolicies) -> Vec<String> {
        policies
            .get(&GroupKind::of::<TrafficPolicy>())
            .iter()
            .map(|a| a.source().name.clone())
            .collect()
    }

    #[test]
    fn exact_name_outranks_selector_regardless_of_weight() {
        for weight in [i32::MIN, -1, 0, 1, 100, i32::MAX] {
            let policies: AttachedPolicies = vec![
                PolicyAttachment::new(wrapper("selector", weight, Some(1)), Specificity::Selector),
                PolicyAttachment::new(wrapper("named", 0, Some(2)), Specificity::Name),
            ]
            .into_iter()
            .collect();
            assert_eq!(names(&policies), vec!["named", "selector"], "weight={weight}");
        }
    }

    #[test]
    fn ties_break_by_weight_then_age_then_name() {
        let policies: AttachedPolicies = vec![
            PolicyAttachment::new(wrapper("d", 0, Some(10)), Specificity::Name),
            PolicyAttachment::new(wrapper("c", 0, Some(10)), Specificity::Name),
            PolicyAttachment::new(wrapper("old", 0, Some(5)), Specificity::Name),
            PolicyAttachment::new(wrapper("heavy", 5, Some(50)), Specificity::Name),
            PolicyAttachment::new(wrapper("section", -5, Some(99)), Specificity::Section),
        ]
        .into_iter()
        .collect();
        assert_eq!(names(&policies), vec!["section", "heavy", "old", "c", "d"]);
    }

    #[test]
    fn policy_ref_specificity() {
        let refs = PolicyRef::from_targets(
            &[
                LocalPolicyTargetReference {
                    group: "gateway.networking.k8s.io".to_string(),
                    kind: "HTTPRoute".to_string(),
                    name: "r".to_string(),
                    section_name: None,
                },
                LocalPolicyTargetReference {
                    group: "gateway.networking.k8s.io".to_string(),
                    kind: "HTTPRoute".to_string(),
                    name: "r".to_string(),
                    section_name: Some("rule".to_string()),
                },
            ],
            &[LocalPolicyTargetSelector {
                group: "gateway.networking.k8s.io".to_string(),
                kind: "HTTPRoute".to_string(),
                match_labels: Default::default(),
                section_name: Some("rule".to_string()),
            }],
        );
        assert_eq!(
            refs.iter().map(PolicyRef::specificity).collect::<Vec<_>>(),
            vec![Specificity::Name, Specificity::Section, Specificity::Selector]
        );
    }
}
