use crate::report::{GatewayReport, PolicyReport, RouteReport};
use chrono::{DateTime, Utc};
use gateway_controller_core::{source::ParentRef, ObjectSource};
use gateway_controller_k8s_api::{
    gateway::{GatewayStatus, ListenerStatus, RouteGroupKind},
    policy::PolicyAncestorStatus,
    routes::{ParentReference, RouteParentStatus},
};

/// A status change to be written to one object.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub target: ObjectSource,
    pub status: StatusUpdate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusUpdate {
    /// The whole status of a Gateway owned by this controller.
    Gateway(GatewayStatus),

    /// This controller's entries in a route's `status.parents`. Entries
    /// written by other controllers are preserved.
    RouteParents(Vec<RouteParentStatus>),

    /// This controller's entries in a policy's `status.ancestors`. An empty
    /// list removes them.
    PolicyAncestors(Vec<PolicyAncestorStatus>),
}

pub fn gateway_status(report: &GatewayReport, now: DateTime<Utc>) -> GatewayStatus {
    let report = report.with_defaults();
    let generation = report.observed_generation;
    GatewayStatus {
        conditions: report.conditions.to_k8s(generation, now),
        listeners: report
            .listeners()
            .map(|(name, l)| ListenerStatus {
                name: name.to_string(),
                attached_routes: l.attached_routes,
                supported_kinds: l
                    .supported_kinds
                    .iter()
                    .map(|gk| RouteGroupKind {
                        group: Some(gk.group.clone()),
                        kind: gk.kind.clone(),
                    })
                    .collect(),
                conditions: l.conditions.to_k8s(generation, now),
            })
            .collect(),
    }
}

pub fn route_parents(
    report: &RouteReport,
    controller_name: &str,
    now: DateTime<Utc>,
) -> Vec<RouteParentStatus> {
    let report = report.with_defaults();
    report
        .parents()
        .map(|(parent, p)| RouteParentStatus {
            parent_ref: parent_reference(parent),
            controller_name: controller_name.to_string(),
            conditions: p.conditions.to_k8s(report.observed_generation, now),
        })
        .collect()
}

pub fn policy_ancestors(
    report: &PolicyReport,
    controller_name: &str,
    now: DateTime<Utc>,
) -> Vec<PolicyAncestorStatus> {
    let report = report.with_defaults();
    report
        .ancestors()
        .map(|(ancestor, a)| PolicyAncestorStatus {
            ancestor_ref: parent_reference(ancestor),
            controller_name: controller_name.to_string(),
            conditions: a.conditions.to_k8s(report.observed_generation, now),
        })
        .collect()
}

pub(crate) fn parent_reference(parent: &ParentRef) -> ParentReference {
    ParentReference {
        group: Some(parent.group.clone()),
        kind: Some(parent.kind.clone()),
        namespace: Some(parent.namespace.clone()),
        name: parent.name.clone(),
        section_name: parent.section_name.clone(),
        port: parent.port,
    }
}

/// Replaces the entries owned by `controller_name` in a shared status list,
/// keeping every other controller's entries in place.
pub(crate) fn merge_entries<T>(
    current: Vec<T>,
    ours: Vec<T>,
    controller_name: &str,
    owner: impl Fn(&T) -> &str,
) -> Vec<T> {
    current
        .into_iter()
        .filter(|e| owner(e) != controller_name)
        .chain(ours)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conditions::{self, reasons, Condition},
        ReportMap,
    };
    use gateway_controller_core::{
        source::GatewaySource,
        GroupKind,
    };
    use pretty_assertions::assert_eq;

    fn gateway() -> GatewaySource {
        GatewaySource {
            source: ObjectSource::new(
                GroupKind::new("gateway.networking.k8s.io", "Gateway"),
                "default",
                "gw",
            ),
            generation: Some(4),
            class_name: "kgateway".to_string(),
            annotations: Default::default(),
            listeners: vec![],
            frontend_tls: None,
        }
    }

    #[test]
    fn gateway_status_fills_defaults() {
        let gw = gateway();
        let mut reports = ReportMap::default();
        let report = reports.gateway(&gw);
        let listener = report.listener("http");
        listener.attached_routes = 2;
        listener.supported_kinds = vec![GroupKind::new("gateway.networking.k8s.io", "HTTPRoute")];
        listener.conditions.set(Condition::new(
            conditions::PROGRAMMED,
            false,
            reasons::INVALID,
            "TCP/TLS listener has no valid backends or routes",
        ));

        let status = gateway_status(
            reports.get_gateway(&gw.source).expect("report"),
            DateTime::<Utc>::MIN_UTC,
        );
        assert_eq!(
            status
                .conditions
                .iter()
                .map(|c| (c.type_.as_str(), c.status.as_str(), c.observed_generation))
                .collect::<Vec<_>>(),
            vec![("Accepted", "True", Some(4)), ("Programmed", "True", Some(4))]
        );
        let listener = &status.listeners[0];
        assert_eq!(listener.attached_routes, 2);
        assert_eq!(listener.supported_kinds[0].kind, "HTTPRoute");
        assert_eq!(
            listener
                .conditions
                .iter()
                .map(|c| (c.type_.as_str(), c.status.as_str()))
                .collect::<Vec<_>>(),
            vec![
                ("Programmed", "False"),
                ("Accepted", "True"),
                ("Conflicted", "False"),
                ("ResolvedRefs", "True"),
            ]
        );
    }

    #[test]
    fn merge_keeps_other_controllers() {
        let current = vec![("other", 1), ("ours", 2), ("another", 3)];
        let merged = merge_entries(current, vec![("ours", 4)], "ours", |e| e.0);
        assert_eq!(merged, vec![("other", 1), ("another", 3), ("ours", 4)]);
    }
}
