use ahash::AHashMap as HashMap;
use gateway_controller_core::{
    policy::{
        merge_policies, AttachedPolicies, AttachmentState, MergeSettings, MergeablePolicy,
        MergedPolicy, PolicyWrapper,
    },
    source::ParentRef,
    GroupKind, ObjectSource,
};
use gateway_controller_k8s_status::{
    conditions::{self, reasons},
    Condition, ReportMap,
};
use std::sync::Arc;

/// Merges attached policies and remembers how each policy ended up attached,
/// per ancestor, so its status is reported once when the Gateway is done.
#[derive(Debug, Default)]
pub(crate) struct PolicyTracker {
    attached: HashMap<(ObjectSource, ParentRef), Tracked>,
}

#[derive(Debug)]
struct Tracked {
    policy: Arc<PolicyWrapper>,
    state: AttachmentState,
}

// === impl PolicyTracker ===

impl PolicyTracker {
    /// Merges the policies of kind `kind` attached at one point, recording the
    /// contribution of each against `ancestor`.
    pub(crate) fn merge<T: MergeablePolicy>(
        &mut self,
        attached: &AttachedPolicies,
        kind: &GroupKind,
        settings: MergeSettings,
        ancestor: &ParentRef,
    ) -> Option<MergedPolicy<T>> {
        let attachments = attached.get(kind);
        let merged = merge_policies::<T>(attachments, settings)?;
        for c in &merged.contributions {
            if let Some(a) = attachments.iter().find(|a| *a.source() == c.source) {
                self.record(&a.policy, ancestor, c.state);
            }
        }
        Some(merged)
    }

    /// A policy that is fully attached at one point and overridden at another
    /// is reported as merged.
    fn record(
        &mut self,
        policy: &Arc<PolicyWrapper>,
        ancestor: &ParentRef,
        state: AttachmentState,
    ) {
        let key = (policy.source.clone(), ancestor.clone());
        match self.attached.get_mut(&key) {
            Some(tracked) if tracked.state != state => tracked.state = AttachmentState::Merged,
            Some(_) => {}
            None => {
                self.attached.insert(
                    key,
                    Tracked {
                        policy: policy.clone(),
                        state,
                    },
                );
            }
        }
    }

    pub(crate) fn report(self, reports: &mut ReportMap) {
        for ((source, ancestor), Tracked { policy, state }) in self.attached {
            let report = reports
                .policy(&source, policy.generation)
                .ancestor(&ancestor);
            if !policy.errors.is_empty() {
                let message = policy
                    .errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n");
                tracing::debug!(policy = %source, %message, "Policy has errors");
                report.conditions.set(Condition::new(
                    conditions::ACCEPTED,
                    false,
                    reasons::POLICY_INVALID,
                    message,
                ));
            }
            report.conditions.set(conditions::attachment(state));
        }
    }
}

/// The ancestor reference under which policies attached through a Gateway are
/// reported.
pub(crate) fn ancestor_ref(source: &ObjectSource) -> ParentRef {
    ParentRef {
        group: source.group.clone(),
        kind: source.kind.clone(),
        namespace: source.namespace.clone(),
        name: source.name.clone(),
        section_name: None,
        port: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_core::policy::{
        InheritedPolicyPriority, PolicyAttachment, PolicyIr, Specificity, TrafficPolicyIr,
    };
    use gateway_controller_k8s_api::{Gateway, TrafficPolicy};

    fn policy(name: &str, ir: TrafficPolicyIr) -> Arc<PolicyWrapper> {
        Arc::new(PolicyWrapper {
            source: ObjectSource::new(GroupKind::of::<TrafficPolicy>(), "default", name),
            generation: Some(1),
            creation_timestamp: None,
            ir: PolicyIr::Traffic(Arc::new(ir)),
            target_refs: vec![],
            errors: vec![],
            precedence_weight: 0,
        })
    }

    #[test]
    fn mixed_states_report_merged() {
        let gw = ancestor_ref(&ObjectSource::new(GroupKind::of::<Gateway>(), "default", "gw"));
        let winner = policy(
            "winner",
            TrafficPolicyIr {
                auto_host_rewrite: Some(true),
                ..Default::default()
            },
        );
        let loser = policy(
            "loser",
            TrafficPolicyIr {
                auto_host_rewrite: Some(false),
                ..Default::default()
            },
        );
        let kind = GroupKind::of::<TrafficPolicy>();
        let settings = MergeSettings::from(InheritedPolicyPriority::ShallowMergePreferChild);

        let mut tracker = PolicyTracker::default();
        let both = [
            PolicyAttachment::new(winner.clone(), Specificity::Section),
            PolicyAttachment::new(loser.clone(), Specificity::Name),
        ]
        .into_iter()
        .collect::<AttachedPolicies>();
        let merged = tracker
            .merge::<TrafficPolicyIr>(&both, &kind, settings, &gw)
            .expect("merged");
        assert_eq!(merged.ir.auto_host_rewrite, Some(true));

        let alone = [PolicyAttachment::new(loser.clone(), Specificity::Name)]
            .into_iter()
            .collect::<AttachedPolicies>();
        tracker.merge::<TrafficPolicyIr>(&alone, &kind, settings, &gw);

        let mut reports = ReportMap::default();
        tracker.report(&mut reports);
        let state = |p: &Arc<PolicyWrapper>| {
            reports
                .get_policy(&p.source)
                .and_then(|r| r.get_ancestor(&gw))
                .and_then(|a| a.conditions.get(conditions::ATTACHED))
                .map(|c| c.reason)
        };
        assert_eq!(state(&winner), Some(reasons::ATTACHED));
        assert_eq!(state(&loser), Some(reasons::MERGED));
    }
}
