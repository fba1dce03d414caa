use crate::{
    patch::{self, StatusUpdate, Update},
    report::{GatewayReport, PolicyReport, RouteReport},
    ReportMap,
};
use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use gateway_controller_core::ObjectSource;
use tokio::sync::mpsc::UnboundedSender;

/// Turns the reports of each translation pass into status updates, sending
/// only those that changed since they were last sent.
#[derive(Debug)]
pub struct Publisher {
    controller_name: String,
    sent: HashMap<ObjectSource, Sent>,
    updates: UnboundedSender<Update>,
}

#[derive(Debug, PartialEq)]
enum Sent {
    Gateway(GatewayReport),
    Route(RouteReport),
    Policy(PolicyReport),
}

// === impl Publisher ===

impl Publisher {
    pub fn new(controller_name: impl Into<String>, updates: UnboundedSender<Update>) -> Self {
        Self {
            controller_name: controller_name.into(),
            sent: HashMap::default(),
            updates,
        }
    }

    /// Sends an update for every report that differs from the last one sent
    /// for its object. Returns the number of updates sent.
    pub fn publish(&mut self, reports: &ReportMap, now: DateTime<Utc>) -> usize {
        let mut sent = 0;

        for (source, report) in reports.gateways() {
            if self.is_unchanged(source, |s| matches!(s, Sent::Gateway(r) if r == report)) {
                continue;
            }
            let status = StatusUpdate::Gateway(patch::gateway_status(report, now));
            if self.send(source, status) {
                self.sent.insert(source.clone(), Sent::Gateway(report.clone()));
                sent += 1;
            }
        }

        for (source, report) in reports.routes() {
            if self.is_unchanged(source, |s| matches!(s, Sent::Route(r) if r == report)) {
                continue;
            }
            let parents = patch::route_parents(report, &self.controller_name, now);
            if self.send(source, StatusUpdate::RouteParents(parents)) {
                self.sent.insert(source.clone(), Sent::Route(report.clone()));
                sent += 1;
            }
        }

        for (source, report) in reports.policies() {
            if self.is_unchanged(source, |s| matches!(s, Sent::Policy(r) if r == report)) {
                continue;
            }
            let ancestors = patch::policy_ancestors(report, &self.controller_name, now);
            if self.send(source, StatusUpdate::PolicyAncestors(ancestors)) {
                self.sent.insert(source.clone(), Sent::Policy(report.clone()));
                sent += 1;
            }
        }

        // Objects that were not reported in this pass are sent again when they
        // reappear.
        self.sent.retain(|source, s| match s {
            Sent::Gateway(_) => reports.get_gateway(source).is_some(),
            Sent::Route(_) => reports.get_route(source).is_some(),
            Sent::Policy(_) => reports.get_policy(source).is_some(),
        });

        sent
    }

    fn is_unchanged(&self, source: &ObjectSource, same: impl Fn(&Sent) -> bool) -> bool {
        self.sent.get(source).map_or(false, same)
    }

    fn send(&self, target: &ObjectSource, status: StatusUpdate) -> bool {
        match self.updates.send(Update {
            target: target.clone(),
            status,
        }) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(%target, %error, "Failed to send status update");
                false
            }
        }
    }
}
