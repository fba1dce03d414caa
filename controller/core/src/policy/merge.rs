use super::{cmp_attachments, cmp_attachments_weighted, PolicyAttachment, PolicyError, PolicyIr};
use crate::ObjectSource;
use std::{collections::BTreeMap, fmt, str::FromStr};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeDepth {
    /// Each top-level field is taken whole from the first policy that sets it.
    Shallow,
    /// Nested structures are merged field by field.
    Deep,
}

/// Which side wins when an inherited policy and a directly attached policy
/// set the same field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergePreference {
    Parent,
    Child,
}

/// The values of the `inherited-policy-priority` annotation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InheritedPolicyPriority {
    ShallowMergePreferParent,
    ShallowMergePreferChild,
    DeepMergePreferParent,
    DeepMergePreferChild,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MergeSettings {
    pub depth: MergeDepth,
    pub prefer: MergePreference,
}

/// The policy that supplied each merged field, keyed by field path
/// (`cors`, `cors.allowOrigins`, `perPort[443].proxyProtocol`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOrigins(BTreeMap<String, ObjectSource>);

/// How much of an attached policy is in effect after merging.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttachmentState {
    /// Every field the policy sets is in effect.
    Attached,
    /// Some of the fields the policy sets were overridden.
    Merged,
    /// None of the fields the policy sets are in effect.
    Overridden,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub source: ObjectSource,
    pub state: AttachmentState,
}

/// The effective policy of one kind at one attachment point.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedPolicy<T> {
    pub ir: T,
    pub origins: MergeOrigins,
    pub contributions: Vec<Contribution>,

    /// Errors carried by any of the merged policies.
    pub errors: Vec<PolicyError>,
}

/// A policy IR that can be folded with others of the same kind.
pub trait MergeablePolicy: Clone + Default + PartialEq {
    /// Fields configured through a GatewayExtension provider. These merge in a
    /// separate pass ordered by the provider's weight.
    const PROVIDER_FIELDS: &'static [&'static str] = &[];

    fn from_ir(ir: &PolicyIr) -> Option<&Self>;

    /// The names of the top-level fields this policy sets.
    fn set_fields(&self) -> Vec<&'static str>;

    /// Fills the unset fields of `self` from `other`.
    fn merge_from(&mut self, other: &Self, ctx: &mut MergeCtx<'_>);

    /// The weight of the GatewayExtension backing a provider field, if any.
    fn provider_weight(&self, _field: &str) -> Option<i32> {
        None
    }
}

/// Structures that merge field by field under deep merging.
pub trait DeepMerge {
    fn deep_merge(&mut self, other: &Self, path: &str, ctx: &mut MergeCtx<'_>);
}

/// Implements [`DeepMerge`] for a struct whose fields are all `Option`s.
macro_rules! deep_merge_fields {
    ($ty:ty { $($field:ident => $name:literal),+ $(,)? }) => {
        impl $crate::policy::DeepMerge for $ty {
            fn deep_merge(
                &mut self,
                other: &Self,
                path: &str,
                ctx: &mut $crate::policy::MergeCtx<'_>,
            ) {
                $(
                    ctx.fill(&format!("{path}.{}", $name), &mut self.$field, &other.$field);
                )+
            }
        }
    };
}
pub(crate) use deep_merge_fields;

#[derive(Copy, Clone, Debug)]
enum FieldFilter {
    AllExcept(&'static [&'static str]),
    Only(&'static str),
}

/// State for merging one policy into the accumulated result.
pub struct MergeCtx<'a> {
    depth: MergeDepth,
    source: &'a ObjectSource,
    origins: &'a mut MergeOrigins,
    filter: FieldFilter,
}

/// Folds the attachments of one policy kind into an effective policy.
///
/// Attachments are visited in priority order: first by inheritance tier (per
/// `settings.prefer`), then in attachment order. The first policy to set a
/// field wins. Provider fields are then merged in their own pass where a
/// GatewayExtension's weight stands in for the policy's weight.
///
/// Returns `None` if no attachment carries a policy of kind `T`.
pub fn merge_policies<T: MergeablePolicy>(
    attachments: &[PolicyAttachment],
    settings: MergeSettings,
) -> Option<MergedPolicy<T>> {
    let candidates = attachments
        .iter()
        .filter_map(|a| T::from_ir(&a.policy.ir).map(|ir| (a, ir)))
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        return None;
    }

    let max_depth = candidates.iter().map(|(a, _)| a.depth).max().unwrap_or(0);
    let tier = |a: &PolicyAttachment| match settings.prefer {
        MergePreference::Child => a.depth,
        MergePreference::Parent => max_depth - a.depth,
    };

    let mut ordered = candidates.clone();
    ordered.sort_by(|(a, _), (b, _)| tier(a).cmp(&tier(b)).then_with(|| cmp_attachments(a, b)));

    let mut ir = T::default();
    let mut origins = MergeOrigins::default();
    for (a, policy) in &ordered {
        let mut ctx = MergeCtx {
            depth: settings.depth,
            source: a.source(),
            origins: &mut origins,
            filter: FieldFilter::AllExcept(T::PROVIDER_FIELDS),
        };
        ir.merge_from(policy, &mut ctx);
    }

    for field in T::PROVIDER_FIELDS {
        let weight = |a: &PolicyAttachment, p: &T| {
            p.provider_weight(field)
                .unwrap_or(a.policy.precedence_weight)
        };
        let mut by_provider = candidates.clone();
        by_provider.sort_by(|(a, pa), (b, pb)| {
            tier(a)
                .cmp(&tier(b))
                .then_with(|| cmp_attachments_weighted(a, weight(a, pa), b, weight(b, pb)))
        });
        for (a, policy) in &by_provider {
            let mut ctx = MergeCtx {
                depth: settings.depth,
                source: a.source(),
                origins: &mut origins,
                filter: FieldFilter::Only(*field),
            };
            ir.merge_from(policy, &mut ctx);
        }
    }

    let contributions = ordered
        .iter()
        .map(|(a, policy)| Contribution {
            source: a.source().clone(),
            state: origins.state_of(a.source(), &policy.set_fields()),
        })
        .collect();
    let errors = ordered
        .iter()
        .flat_map(|(a, _)| a.policy.errors.iter().cloned())
        .collect();

    Some(MergedPolicy {
        ir,
        origins,
        contributions,
        errors,
    })
}

// === impl InheritedPolicyPriority ===

impl InheritedPolicyPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShallowMergePreferParent => "ShallowMergePreferParent",
            Self::ShallowMergePreferChild => "ShallowMergePreferChild",
            Self::DeepMergePreferParent => "DeepMergePreferParent",
            Self::DeepMergePreferChild => "DeepMergePreferChild",
        }
    }
}

impl FromStr for InheritedPolicyPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ShallowMergePreferParent" => Ok(Self::ShallowMergePreferParent),
            "ShallowMergePreferChild" => Ok(Self::ShallowMergePreferChild),
            "DeepMergePreferParent" => Ok(Self::DeepMergePreferParent),
            "DeepMergePreferChild" => Ok(Self::DeepMergePreferChild),
            _ => Err(format!("unknown inherited policy priority {s:?}")),
        }
    }
}

impl fmt::Display for InheritedPolicyPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl MergeSettings ===

impl From<InheritedPolicyPriority> for MergeSettings {
    fn from(priority: InheritedPolicyPriority) -> Self {
        use InheritedPolicyPriority::*;
        let (depth, prefer) = match priority {
            ShallowMergePreferParent => (MergeDepth::Shallow, MergePreference::Parent),
            ShallowMergePreferChild => (MergeDepth::Shallow, MergePreference::Child),
            DeepMergePreferParent => (MergeDepth::Deep, MergePreference::Parent),
            DeepMergePreferChild => (MergeDepth::Deep, MergePreference::Child),
        };
        Self { depth, prefer }
    }
}

// === impl MergeOrigins ===

impl MergeOrigins {
    pub fn get(&self, path: &str) -> Option<&ObjectSource> {
        self.0.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObjectSource)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns true if any part of the top-level `field` came from `source`.
    pub fn contributes(&self, source: &ObjectSource, field: &str) -> bool {
        self.0.iter().any(|(path, s)| {
            s == source
                && path
                    .strip_prefix(field)
                    .map_or(false, |rest| {
                        rest.is_empty() || rest.starts_with('.') || rest.starts_with('[')
                    })
        })
    }

    fn state_of(&self, source: &ObjectSource, fields: &[&'static str]) -> AttachmentState {
        let effective = fields
            .iter()
            .filter(|f| self.contributes(source, f))
            .count();
        if effective == fields.len() {
            AttachmentState::Attached
        } else if effective == 0 {
            AttachmentState::Overridden
        } else {
            AttachmentState::Merged
        }
    }
}

// === impl MergeCtx ===

impl MergeCtx<'_> {
    pub fn depth(&self) -> MergeDepth {
        self.depth
    }

    fn allows(&self, field: &str) -> bool {
        match self.filter {
            FieldFilter::AllExcept(excluded) => !excluded.contains(&field),
            FieldFilter::Only(only) => only == field,
        }
    }

    /// Merges a top-level field that is taken whole.
    pub fn leaf<T: Clone>(&mut self, field: &'static str, dst: &mut Option<T>, src: &Option<T>) {
        if self.allows(field) {
            self.fill(field, dst, src);
        }
    }

    /// Merges a top-level field that recurses under deep merging.
    pub fn nested<T: Clone + DeepMerge>(
        &mut self,
        field: &'static str,
        dst: &mut Option<T>,
        src: &Option<T>,
    ) {
        if !self.allows(field) {
            return;
        }
        match (dst.as_mut(), src) {
            (_, None) => {}
            (None, Some(_)) => self.fill(field, dst, src),
            (Some(d), Some(s)) => {
                if self.depth == MergeDepth::Deep {
                    d.deep_merge(s, field, self);
                }
            }
        }
    }

    /// Sets `dst` from `src` if `dst` is unset, recording the origin of `path`.
    pub fn fill<T: Clone>(&mut self, path: &str, dst: &mut Option<T>, src: &Option<T>) {
        if dst.is_some() {
            return;
        }
        if let Some(value) = src {
            *dst = Some(value.clone());
            self.record(path);
        }
    }

    pub fn record(&mut self, path: impl Into<String>) {
        self.origins.0.insert(path.into(), self.source.clone());
    }
}
