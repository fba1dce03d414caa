use crate::conditions::{self, reasons, Condition, Conditions};
use gateway_controller_core::{
    source::{GatewaySource, ParentRef, RouteSource},
    GroupKind, ObjectSource,
};
use std::collections::BTreeMap;

/// Status accumulated by one translation pass, keyed by the object that owns
/// it.
///
/// Every stage writes into the map; conditions are only ever set on the
/// object (and parent or listener) that caused them, so one object's
/// failure never touches another's report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportMap {
    gateways: BTreeMap<ObjectSource, GatewayReport>,
    routes: BTreeMap<ObjectSource, RouteReport>,
    policies: BTreeMap<ObjectSource, PolicyReport>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GatewayReport {
    pub observed_generation: Option<i64>,
    pub conditions: Conditions,

    /// Listener reports in the order the listeners were first reported.
    listeners: Vec<(String, ListenerReport)>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListenerReport {
    pub conditions: Conditions,
    pub attached_routes: i32,
    pub supported_kinds: Vec<GroupKind>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteReport {
    pub observed_generation: Option<i64>,
    parents: BTreeMap<ParentRef, ParentReport>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParentReport {
    pub conditions: Conditions,
}

/// A policy's status, per ancestor (the Gateway or route the policy is
/// attached through).
///
/// A report with no ancestors clears the policy's status.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolicyReport {
    pub observed_generation: Option<i64>,
    ancestors: BTreeMap<ParentRef, AncestorReport>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AncestorReport {
    pub conditions: Conditions,
}

// === impl ReportMap ===

impl ReportMap {
    pub fn gateway(&mut self, gateway: &GatewaySource) -> &mut GatewayReport {
        let report = self.gateways.entry(gateway.source.clone()).or_default();
        report.observed_generation = gateway.generation;
        report
    }

    pub fn route(&mut self, route: &RouteSource) -> &mut RouteReport {
        let report = self.routes.entry(route.source.clone()).or_default();
        report.observed_generation = route.generation;
        report
    }

    pub fn policy(&mut self, source: &ObjectSource, generation: Option<i64>) -> &mut PolicyReport {
        let report = self.policies.entry(source.clone()).or_default();
        report.observed_generation = generation;
        report
    }

    /// Gives every policy that previously carried a status, but was not
    /// reported in this pass, an empty report so that its stale ancestors are
    /// removed.
    pub fn reset_stale_policies<'a>(
        &mut self,
        previously_reported: impl IntoIterator<Item = &'a ObjectSource>,
    ) {
        for source in previously_reported {
            if !self.policies.contains_key(source) {
                tracing::debug!(policy = %source, "clearing stale policy status");
                self.policies.insert(source.clone(), PolicyReport::default());
            }
        }
    }

    /// Folds the reports of another pass (another Gateway's translation) into
    /// this map. Route parents and policy ancestors are combined; for the
    /// same parent or ancestor, conditions from `other` replace ours.
    pub fn merge(&mut self, other: ReportMap) {
        for (source, report) in other.gateways {
            self.gateways.insert(source, report);
        }
        for (source, report) in other.routes {
            let ours = self.routes.entry(source).or_default();
            ours.observed_generation = report.observed_generation;
            for (parent, p) in report.parents {
                let entry = ours.parents.entry(parent).or_default();
                for c in p.conditions.iter() {
                    entry.conditions.set(c.clone());
                }
            }
        }
        for (source, report) in other.policies {
            let ours = self.policies.entry(source).or_default();
            ours.observed_generation = report.observed_generation;
            for (ancestor, a) in report.ancestors {
                let entry = ours.ancestors.entry(ancestor).or_default();
                for c in a.conditions.iter() {
                    entry.conditions.set(c.clone());
                }
            }
        }
    }

    pub fn gateways(&self) -> impl Iterator<Item = (&ObjectSource, &GatewayReport)> {
        self.gateways.iter()
    }

    pub fn routes(&self) -> impl Iterator<Item = (&ObjectSource, &RouteReport)> {
        self.routes.iter()
    }

    pub fn policies(&self) -> impl Iterator<Item = (&ObjectSource, &PolicyReport)> {
        self.policies.iter()
    }

    pub fn get_gateway(&self, source: &ObjectSource) -> Option<&GatewayReport> {
        self.gateways.get(source)
    }

    pub fn get_route(&self, source: &ObjectSource) -> Option<&RouteReport> {
        self.routes.get(source)
    }

    pub fn get_policy(&self, source: &ObjectSource) -> Option<&PolicyReport> {
        self.policies.get(source)
    }
}

// === impl GatewayReport ===

impl GatewayReport {
    pub fn listener(&mut self, name: &str) -> &mut ListenerReport {
        let idx = match self.listeners.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.listeners.push((name.to_string(), ListenerReport::default()));
                self.listeners.len() - 1
            }
        };
        &mut self.listeners[idx].1
    }

    pub fn get_listener(&self, name: &str) -> Option<&ListenerReport> {
        self.listeners.iter().find(|(n, _)| n == name).map(|(_, l)| l)
    }

    pub fn listeners(&self) -> impl Iterator<Item = (&str, &ListenerReport)> {
        self.listeners.iter().map(|(n, l)| (n.as_str(), l))
    }

    /// Returns the report with conditions that were never set filled with
    /// their positive defaults.
    pub fn with_defaults(&self) -> Self {
        let mut report = self.clone();
        report.conditions.set_default(Condition::new(
            conditions::ACCEPTED,
            true,
            reasons::ACCEPTED,
            "",
        ));
        report.conditions.set_default(Condition::new(
            conditions::PROGRAMMED,
            true,
            reasons::PROGRAMMED,
            "",
        ));
        for (_, listener) in report.listeners.iter_mut() {
            listener.set_defaults();
        }
        report
    }
}

// === impl ListenerReport ===

impl ListenerReport {
    fn set_defaults(&mut self) {
        let c = &mut self.conditions;
        c.set_default(Condition::new(conditions::ACCEPTED, true, reasons::ACCEPTED, ""));
        c.set_default(Condition::new(
            conditions::CONFLICTED,
            false,
            reasons::NO_CONFLICTS,
            "",
        ));
        c.set_default(Condition::new(
            conditions::RESOLVED_REFS,
            true,
            reasons::RESOLVED_REFS,
            "",
        ));
        c.set_default(Condition::new(
            conditions::PROGRAMMED,
            true,
            reasons::PROGRAMMED,
            "",
        ));
    }
}

// === impl RouteReport ===

impl RouteReport {
    pub fn parent(&mut self, parent: &ParentRef) -> &mut ParentReport {
        self.parents.entry(parent.clone()).or_default()
    }

    pub fn get_parent(&self, parent: &ParentRef) -> Option<&ParentReport> {
        self.parents.get(parent)
    }

    pub fn parents(&self) -> impl Iterator<Item = (&ParentRef, &ParentReport)> {
        self.parents.iter()
    }

    pub fn with_defaults(&self) -> Self {
        let mut report = self.clone();
        for p in report.parents.values_mut() {
            p.conditions.set_default(Condition::new(
                conditions::ACCEPTED,
                true,
                reasons::ACCEPTED,
                "",
            ));
            p.conditions.set_default(Condition::new(
                conditions::RESOLVED_REFS,
                true,
                reasons::RESOLVED_REFS,
                "",
            ));
        }
        report
    }
}

// === impl PolicyReport ===

impl PolicyReport {
    pub fn ancestor(&mut self, ancestor: &ParentRef) -> &mut AncestorReport {
        self.ancestors.entry(ancestor.clone()).or_default()
    }

    pub fn get_ancestor(&self, ancestor: &ParentRef) -> Option<&AncestorReport> {
        self.ancestors.get(ancestor)
    }

    pub fn ancestors(&self) -> impl Iterator<Item = (&ParentRef, &AncestorReport)> {
        self.ancestors.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }

    pub fn with_defaults(&self) -> Self {
        let mut report = self.clone();
        for a in report.ancestors.values_mut() {
            a.conditions.set_default(Condition::new(
                conditions::ACCEPTED,
                true,
                reasons::VALID,
                "Policy accepted",
            ));
            a.conditions.set_default(Condition::new(
                conditions::ATTACHED,
                true,
                reasons::ATTACHED,
                "Attached to all targets",
            ));
        }
        report
    }
}
